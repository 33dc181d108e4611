pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod naming;
pub mod tmux;
pub mod types;

pub use error::*;
#[cfg(any(test, feature = "test-support"))]
pub use fake::*;
pub use naming::*;
pub use tmux::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::{dashboard_session_name, FakeMux, MuxError, Multiplexer, SplitSpec, TmuxCli};
    use std::any::TypeId;
    use std::path::Path;

    #[test]
    fn crate_root_reexports_mux_types() {
        let _ = TypeId::of::<MuxError>();
        let _ = TypeId::of::<TmuxCli>();
        let _ = TypeId::of::<SplitSpec>();
        let _ = TypeId::of::<dyn Multiplexer>();
    }

    #[test]
    fn fake_mux_is_usable_as_trait_object() {
        let mux: Box<dyn Multiplexer> = Box::new(FakeMux::new());
        let session = dashboard_session_name("vigil", Path::new("/no/such/vault"));
        assert!(!mux.has_session(&session).expect("has session"));
    }
}
