//! vigil: keeps a tmux dashboard in line with a vault of agent runs.

pub mod actions;
pub mod controller;
pub mod reconcile;
pub mod refresh;
pub mod vault;
pub mod workspace;

pub use actions::*;
pub use controller::*;
pub use reconcile::*;
pub use refresh::*;
pub use vault::*;
pub use workspace::*;
