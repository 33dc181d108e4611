#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("could not run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed with status {status:?}: {}", .stderr.trim())]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("pull request output carried no recognizable URL: {output}")]
    MissingUrl { output: String },
    #[error("unable to parse code-host output: {message}")]
    Parse { message: String },
}

impl ForgeError {
    /// Captured collaborator output, stderr first, for surfacing to the user.
    pub fn captured_output(&self) -> Option<String> {
        match self {
            ForgeError::CommandFailed { stdout, stderr, .. } => {
                let combined = [stderr.trim(), stdout.trim()]
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(combined)
            }
            ForgeError::MissingUrl { output } => Some(output.clone()),
            _ => None,
        }
    }

    pub fn is_no_pull_request(&self) -> bool {
        match self {
            ForgeError::CommandFailed { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                lower.contains("no pull requests found")
                    || lower.contains("no open pull requests")
                    || lower.contains("could not find pull request")
            }
            _ => false,
        }
    }
}
