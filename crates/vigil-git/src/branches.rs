//! Branch queries the merge-state classifier needs, behind a trait so the
//! classification rules can be exercised without a repository.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::RepoHandle;

pub const REMOTE_PREFIX: &str = "origin/";

/// `git merge-tree` exit status for "usage error", returned by git < 2.38.
const MERGE_TREE_USAGE_STATUS: i32 = 129;

pub trait BranchInspector {
    /// Resolves the configured base name to a ref that exists in this repo.
    fn resolve_base_ref(&self, base: &str) -> Result<String, GitError>;
    /// Local branches whose tip is reachable from `base_ref`.
    fn merged_branches(&self, base_ref: &str) -> Result<HashSet<String>, GitError>;
    /// Commits on `branch` that `base_ref` does not have.
    fn ahead_count(&self, branch: &str, base_ref: &str) -> Result<u32, GitError>;
    /// Whether merging `branch` into `base_ref` would conflict.
    fn has_conflict(&self, branch: &str, base_ref: &str) -> Result<bool, GitError>;
    /// Tip commit time of each local branch.
    fn branch_commit_times(&self) -> Result<HashMap<String, DateTime<Utc>>, GitError>;
}

/// Candidate refs for `base`, remote-tracking form first unless the caller
/// already passed one, in which case the bare local name is the fallback.
pub fn base_ref_candidates(base: &str) -> [String; 2] {
    match base.strip_prefix(REMOTE_PREFIX) {
        Some(local) => [base.to_string(), local.to_string()],
        None => [format!("{REMOTE_PREFIX}{base}"), base.to_string()],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitBranchInspector {
    pub git: GitCli,
    pub repo: RepoHandle,
}

impl GitBranchInspector {
    pub fn new(repo: RepoHandle) -> Self {
        Self {
            git: GitCli::default(),
            repo,
        }
    }

    pub fn with_cli(repo: RepoHandle, git: GitCli) -> Self {
        Self { git, repo }
    }

    fn legacy_merge_tree_conflict(&self, branch: &str, base_ref: &str) -> Result<bool, GitError> {
        let merge_base = self.git.run(&self.repo.root, ["merge-base", base_ref, branch])?;
        let output = self.git.run(
            &self.repo.root,
            ["merge-tree", merge_base.stdout.trim(), base_ref, branch],
        )?;
        Ok(output
            .stdout
            .lines()
            .any(|line| line.starts_with("+<<<<<<<") || line.starts_with("<<<<<<<")))
    }
}

impl BranchInspector for GitBranchInspector {
    fn resolve_base_ref(&self, base: &str) -> Result<String, GitError> {
        for candidate in base_ref_candidates(base) {
            let spec = format!("{candidate}^{{commit}}");
            if self
                .git
                .succeeds(&self.repo.root, ["rev-parse", "--verify", "--quiet", &spec])?
            {
                return Ok(candidate);
            }
        }
        Err(GitError::UnresolvedRef {
            reference: base.to_string(),
        })
    }

    fn merged_branches(&self, base_ref: &str) -> Result<HashSet<String>, GitError> {
        let output = self.git.run(
            &self.repo.root,
            ["branch", "--merged", base_ref, "--format=%(refname:short)"],
        )?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn ahead_count(&self, branch: &str, base_ref: &str) -> Result<u32, GitError> {
        let range = format!("{base_ref}..{branch}");
        let output = self
            .git
            .run(&self.repo.root, ["rev-list", "--count", &range])?;
        let raw = output.stdout.trim();
        raw.parse::<u32>().map_err(|_| GitError::Parse {
            context: format!("rev-list count '{raw}'"),
        })
    }

    fn has_conflict(&self, branch: &str, base_ref: &str) -> Result<bool, GitError> {
        let result = self.git.run(
            &self.repo.root,
            ["merge-tree", "--write-tree", "--no-messages", base_ref, branch],
        );
        match result {
            Ok(_) => Ok(false),
            Err(err) => match err.exit_status() {
                Some(1) => Ok(true),
                Some(MERGE_TREE_USAGE_STATUS) => self.legacy_merge_tree_conflict(branch, base_ref),
                _ => Err(err),
            },
        }
    }

    fn branch_commit_times(&self) -> Result<HashMap<String, DateTime<Utc>>, GitError> {
        let output = self.git.run(
            &self.repo.root,
            [
                "for-each-ref",
                "--format=%(refname:short)%09%(committerdate:iso-strict)",
                "refs/heads",
            ],
        )?;
        Ok(parse_branch_commit_times(&output.stdout))
    }
}

fn parse_branch_commit_times(stdout: &str) -> HashMap<String, DateTime<Utc>> {
    let mut times = HashMap::new();
    for line in stdout.lines() {
        let Some((name, raw_ts)) = line.split_once('\t') else {
            continue;
        };
        match DateTime::parse_from_rfc3339(raw_ts.trim()) {
            Ok(at) => {
                times.insert(name.trim().to_string(), at.with_timezone(&Utc));
            }
            Err(err) => {
                tracing::debug!(branch = name, error = %err, "skipping unparsable commit date");
            }
        }
    }
    times
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::repo::discover_repo;
    use crate::test_support::{commit_file, init_repo, run_git};

    fn inspector_for(root: &std::path::Path) -> GitBranchInspector {
        let git = GitCli::default();
        let repo = discover_repo(root, &git).expect("discover repo");
        GitBranchInspector::with_cli(repo, git)
    }

    #[test]
    fn candidates_prefer_remote_form_then_local() {
        assert_eq!(
            base_ref_candidates("main"),
            ["origin/main".to_string(), "main".to_string()]
        );
        assert_eq!(
            base_ref_candidates("origin/main"),
            ["origin/main".to_string(), "main".to_string()]
        );
    }

    #[test]
    fn parses_commit_times_and_skips_garbage() {
        let times = parse_branch_commit_times(
            "main\t2026-01-15T10:00:00+00:00\nfeature/x\t2026-01-15T12:00:00+02:00\nbroken\n",
        );
        assert_eq!(times.len(), 2);
        assert_eq!(
            times["feature/x"].to_rfc3339(),
            "2026-01-15T10:00:00+00:00"
        );
    }

    #[test]
    fn resolve_base_ref_falls_back_to_local_branch_without_remote() {
        let root = init_repo();
        let inspector = inspector_for(&root);

        assert_eq!(inspector.resolve_base_ref("main").expect("resolve"), "main");
        assert_eq!(
            inspector.resolve_base_ref("origin/main").expect("resolve"),
            "main"
        );
        let err = inspector
            .resolve_base_ref("trunk")
            .expect_err("unknown base");
        assert!(matches!(err, GitError::UnresolvedRef { .. }));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn merged_set_and_ahead_count_track_branch_progress() {
        let root = init_repo();
        run_git(&root, &["branch", "fresh"]);
        run_git(&root, &["checkout", "-b", "work"]);
        commit_file(&root, "work.txt", "one\n", "work 1");
        commit_file(&root, "work.txt", "two\n", "work 2");
        run_git(&root, &["checkout", "main"]);

        let inspector = inspector_for(&root);
        let merged = inspector.merged_branches("main").expect("merged");
        assert!(merged.contains("fresh"));
        assert!(merged.contains("main"));
        assert!(!merged.contains("work"));

        assert_eq!(inspector.ahead_count("work", "main").expect("ahead"), 2);
        assert_eq!(inspector.ahead_count("fresh", "main").expect("ahead"), 0);

        let times = inspector.branch_commit_times().expect("times");
        assert!(times.contains_key("work"));
        assert!(times.contains_key("fresh"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn conflict_detection_distinguishes_clean_and_conflicting_merges() {
        let root = init_repo();
        run_git(&root, &["checkout", "-b", "clean"]);
        commit_file(&root, "other.txt", "side\n", "clean change");
        run_git(&root, &["checkout", "main"]);
        run_git(&root, &["checkout", "-b", "clash"]);
        commit_file(&root, "README.md", "branch version\n", "clash change");
        run_git(&root, &["checkout", "main"]);
        commit_file(&root, "README.md", "main version\n", "main change");

        let inspector = inspector_for(&root);
        assert!(!inspector.has_conflict("clean", "main").expect("clean merge"));
        assert!(inspector.has_conflict("clash", "main").expect("conflicting merge"));

        let _ = fs::remove_dir_all(&root);
    }
}
