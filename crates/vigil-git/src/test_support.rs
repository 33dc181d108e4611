//! Throwaway repositories driven through the real `git` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("vigil-git-{prefix}-{now}"))
}

pub fn run_git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Repository on `main` with one commit touching `README.md`.
pub fn init_repo() -> PathBuf {
    let root = unique_temp_dir("repo");
    fs::create_dir_all(&root).expect("create temp repo");
    run_git(&root, &["init", "--initial-branch=main"]);
    commit_file(&root, "README.md", "init\n", "init");
    root
}

pub fn commit_file(root: &Path, file: &str, contents: &str, message: &str) {
    fs::write(root.join(file), contents).expect("write file");
    run_git(root, &["add", file]);
    run_git(root, &["commit", "-m", message]);
}
