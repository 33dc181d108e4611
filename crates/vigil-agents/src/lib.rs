pub mod adapter;
pub mod error;
pub mod ready;

pub use adapter::*;
pub use error::*;
pub use ready::*;
