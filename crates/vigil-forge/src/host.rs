use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::error::ForgeError;
use crate::url::extract_pr_url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrState {
    Open,
    Merged,
    Closed,
    Other(String),
}

impl PrState {
    pub fn from_name(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => PrState::Open,
            "merged" => PrState::Merged,
            "closed" => PrState::Closed,
            other => PrState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PrState::Open => "open",
            PrState::Merged => "merged",
            PrState::Closed => "closed",
            PrState::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
    pub state: PrState,
}

impl PullRequest {
    /// `#<number> <state>` when the URL ends in a number, else the state.
    pub fn label(&self) -> String {
        match self.url.rsplit('/').next().filter(|tail| {
            !tail.is_empty() && tail.chars().all(|ch| ch.is_ascii_digit())
        }) {
            Some(number) => format!("#{number} {}", self.state),
            None => self.state.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrDraft {
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
}

/// Pull-request operations against whatever hosts the repository.
pub trait CodeHost: Send + Sync {
    /// `Ok(None)` when the branch has no pull request.
    fn pr_lookup(&self, cwd: &Path, branch: &str) -> Result<Option<PullRequest>, ForgeError>;
    /// Opens a pull request and returns its URL.
    fn pr_create(&self, cwd: &Path, draft: &PrDraft) -> Result<String, ForgeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhCli {
    pub binary: PathBuf,
}

impl Default for GhCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gh"),
        }
    }
}

impl GhCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs `gh` in `cwd` with prompts and colour disabled.
    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GhOutput, ForgeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command
            .current_dir(cwd)
            .env("GH_PROMPT_DISABLED", "1")
            .env("NO_COLOR", "1");
        let mut rendered = self.binary.display().to_string();
        for arg in args {
            let arg = arg.as_ref();
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
            command.arg(arg);
        }
        tracing::trace!(command = %rendered, cwd = %cwd.display(), "gh");

        let output = command.output().map_err(|source| ForgeError::Io {
            command: rendered.clone(),
            source,
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ForgeError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }
        Ok(GhOutput { stdout, stderr })
    }
}

#[derive(Debug, Deserialize)]
struct PrViewJson {
    url: String,
    state: String,
}

fn parse_pr_view(stdout: &str) -> Result<PullRequest, ForgeError> {
    let view: PrViewJson = serde_json::from_str(stdout.trim()).map_err(|err| ForgeError::Parse {
        message: format!("gh pr view json: {err}"),
    })?;
    Ok(PullRequest {
        url: view.url,
        state: PrState::from_name(&view.state),
    })
}

/// [`CodeHost`] backed by the GitHub CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GhCodeHost {
    pub cli: GhCli,
}

impl GhCodeHost {
    pub fn new(cli: GhCli) -> Self {
        Self { cli }
    }
}

impl CodeHost for GhCodeHost {
    fn pr_lookup(&self, cwd: &Path, branch: &str) -> Result<Option<PullRequest>, ForgeError> {
        match self
            .cli
            .run(cwd, ["pr", "view", branch, "--json", "url,state"])
        {
            Ok(output) => parse_pr_view(&output.stdout).map(Some),
            Err(err) if err.is_no_pull_request() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn pr_create(&self, cwd: &Path, draft: &PrDraft) -> Result<String, ForgeError> {
        let output = self.cli.run(
            cwd,
            [
                "pr",
                "create",
                "--base",
                draft.base.as_str(),
                "--head",
                draft.head.as_str(),
                "--title",
                draft.title.as_str(),
                "--body",
                draft.body.as_str(),
            ],
        )?;
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        extract_pr_url(&combined).ok_or_else(|| ForgeError::MissingUrl {
            output: combined.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gh_pr_view_json() {
        let pr = parse_pr_view(r#"{"state":"MERGED","url":"https://github.com/acme/w/pull/9"}"#)
            .expect("parse");
        assert_eq!(pr.state, PrState::Merged);
        assert_eq!(pr.label(), "#9 merged");

        let err = parse_pr_view("not json").expect_err("invalid json");
        assert!(matches!(err, ForgeError::Parse { .. }));
    }

    #[test]
    fn state_names_are_case_insensitive_and_keep_unknowns() {
        assert_eq!(PrState::from_name("OPEN"), PrState::Open);
        assert_eq!(PrState::from_name(" closed "), PrState::Closed);
        assert_eq!(PrState::from_name("DRAFT").as_str(), "draft");
    }

    #[test]
    fn label_falls_back_to_state_without_number() {
        let pr = PullRequest {
            url: "https://github.com/acme/w/pull/new".to_string(),
            state: PrState::Open,
        };
        assert_eq!(pr.label(), "open");
    }

    #[test]
    fn missing_gh_binary_is_io_error() {
        let host = GhCodeHost::new(GhCli::new("/definitely/missing/gh-binary"));
        let err = host
            .pr_lookup(Path::new("."), "feat")
            .expect_err("missing binary");
        assert!(matches!(err, ForgeError::Io { .. }));
        assert!(err.to_string().contains("pr view feat --json url,state"));
    }
}
