use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
}

/// Repository containing `path`, which may be the vault or a run worktree.
pub fn discover_repo(path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    match git.run(path, ["rev-parse", "--show-toplevel"]) {
        Ok(output) if !output.first_line().is_empty() => Ok(RepoHandle {
            root: PathBuf::from(output.first_line()),
        }),
        Ok(_) | Err(GitError::CommandFailed { .. }) => Err(GitError::NotARepository {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(err),
    }
}

/// Branch checked out at the repository root; a detached HEAD has none.
pub fn current_branch(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    match git.run(&repo.root, ["symbolic-ref", "--quiet", "--short", "HEAD"]) {
        Ok(output) => Ok(output.first_line().to_string()),
        Err(GitError::CommandFailed {
            status: Some(1), ..
        }) => Err(GitError::Parse {
            context: format!("HEAD is detached in {}", repo.root.display()),
        }),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{current_branch, discover_repo};
    use crate::command::GitCli;
    use crate::error::GitError;
    use crate::test_support::{init_repo, run_git, unique_temp_dir};

    #[test]
    fn worktree_subdirectories_resolve_to_the_repo_root() {
        let root = init_repo();
        let worktree = root.join("runs").join("r1");
        fs::create_dir_all(&worktree).expect("nested dir");

        let repo = discover_repo(&worktree, &GitCli::default()).expect("discover");
        assert_eq!(
            repo.root.canonicalize().expect("canonical root"),
            root.canonicalize().expect("canonical repo")
        );

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn plain_directories_and_missing_git_are_told_apart() {
        let dir = unique_temp_dir("plain");
        fs::create_dir_all(&dir).expect("plain dir");

        let err = discover_repo(&dir, &GitCli::default()).expect_err("not a repo");
        assert!(matches!(err, GitError::NotARepository { ref path } if *path == dir));

        let err = discover_repo(&dir, &GitCli::new("/nonexistent/bin/git")).expect_err("no git");
        assert!(matches!(err, GitError::Io { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn detached_head_has_no_current_branch() {
        let root = init_repo();
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).expect("discover");
        assert_eq!(current_branch(&repo, &git).expect("branch"), "main");

        run_git(&root, &["switch", "-c", "run/r1"]);
        assert_eq!(current_branch(&repo, &git).expect("branch"), "run/r1");

        run_git(&root, &["checkout", "--detach"]);
        assert!(matches!(
            current_branch(&repo, &git),
            Err(GitError::Parse { .. })
        ));

        let _ = fs::remove_dir_all(&root);
    }
}
