use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("could not run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}: {}", render_status(*.status), .stderr.trim())]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("{} is not inside a git repository", .path.display())]
    NotARepository { path: PathBuf },
    #[error("neither local nor remote ref exists for '{reference}'")]
    UnresolvedRef { reference: String },
    #[error("unexpected git output: {context}")]
    Parse { context: String },
}

fn render_status(status: Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| format!("status {code}"))
}

impl GitError {
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            GitError::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }
}
