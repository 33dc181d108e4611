use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::GitError;

/// Captured streams of a successful git invocation, decoded lossily.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    fn from_process(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// First stdout line, trimmed.
    pub fn first_line(&self) -> &str {
        self.stdout.lines().next().unwrap_or_default().trim()
    }
}

/// Runs git non-interactively with `-C <cwd>` and a fixed locale so output is
/// parseable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command<I, S>(&self, cwd: &Path, args: I) -> (Command, String)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command
            .arg("-C")
            .arg(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");
        let mut rendered = format!("git -C {}", cwd.display());
        for arg in args {
            let arg = arg.as_ref();
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
            command.arg(arg);
        }
        (command, rendered)
    }

    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (mut command, rendered) = self.command(cwd, args);
        tracing::trace!(command = %rendered, "git");
        let output = command.output().map_err(|source| GitError::Io {
            command: rendered.clone(),
            source,
        })?;
        let captured = GitOutput::from_process(&output);
        if output.status.success() {
            Ok(captured)
        } else {
            Err(GitError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout: captured.stdout,
                stderr: captured.stderr,
            })
        }
    }

    /// Exit-code probe. Only a failure to run git at all is an error.
    pub fn succeeds<I, S>(&self, cwd: &Path, args: I) -> Result<bool, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        match self.run(cwd, args) {
            Ok(_) => Ok(true),
            Err(GitError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
