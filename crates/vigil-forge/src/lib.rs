pub mod error;
pub mod host;
pub mod url;

pub use error::*;
pub use host::*;
pub use url::*;

#[cfg(test)]
mod tests {
    use super::{extract_pr_url, CodeHost, ForgeError, GhCodeHost, PullRequest};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_forge_types() {
        let _ = TypeId::of::<ForgeError>();
        let _ = TypeId::of::<PullRequest>();
        let _ = TypeId::of::<GhCodeHost>();
        let _ = TypeId::of::<dyn CodeHost>();
        assert!(extract_pr_url("https://github.com/a/b/pull/1").is_some());
    }
}
