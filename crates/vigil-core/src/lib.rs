pub mod config;
pub mod events;
pub mod run;
pub mod store;
pub mod types;
pub mod validation;

pub use config::*;
pub use events::*;
pub use run::*;
pub use store::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{
        parse_config, parse_event_line, EventKind, Run, RunRef, RunStatus, RunStore, Validate,
    };
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<RunRef>();
        let _ = TypeId::of::<RunStatus>();
        let _ = TypeId::of::<EventKind>();
        let _ = TypeId::of::<dyn RunStore>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let config = parse_config("[session]\nprefix = \"vx\"\n").expect("parse config");
        assert!(config.validate().is_empty());

        let mut run = Run::new(RunRef::new("ISS-1", "r1"));
        run.events.push(
            parse_event_line("- 2026-01-15T10:00:00Z | status | blocked").expect("parse event"),
        );
        assert_eq!(run.status(), RunStatus::Blocked);
    }
}
