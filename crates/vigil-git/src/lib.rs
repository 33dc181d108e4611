pub mod branches;
pub mod command;
pub mod error;
pub mod merge_state;
pub mod repo;

#[cfg(test)]
mod test_support;

pub use branches::*;
pub use command::*;
pub use error::*;
pub use merge_state::*;
pub use repo::*;

#[cfg(test)]
mod tests {
    use super::{
        BranchInspector, GitBranchInspector, GitCli, GitError, MergeStateClassifier, RepoHandle,
    };
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_types() {
        let _ = TypeId::of::<GitCli>();
        let _ = TypeId::of::<GitError>();
        let _ = TypeId::of::<RepoHandle>();
        let _ = TypeId::of::<GitBranchInspector>();
        let _ = TypeId::of::<dyn BranchInspector>();
        let _ = TypeId::of::<MergeStateClassifier>();
    }
}
