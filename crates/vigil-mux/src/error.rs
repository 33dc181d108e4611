#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("tmux command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tmux command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("multiplexer target not found: {target}")]
    NotFound { target: String },
    #[error("invalid tmux output: {context}")]
    Parse { context: String },
}

impl MuxError {
    /// True when the failure only says the session, window or pane is gone.
    pub fn is_missing_target(&self) -> bool {
        match self {
            MuxError::NotFound { .. } => true,
            MuxError::CommandFailed { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                lower.contains("can't find")
                    || lower.contains("no such")
                    || lower.contains("session not found")
                    || lower.contains("no server running")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MuxError;
    use std::error::Error;

    #[test]
    fn io_variant_mentions_command_and_keeps_source() {
        let err = MuxError::Io {
            command: "tmux list-windows".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no tmux"),
        };
        assert!(err.to_string().contains("tmux command failed to start (tmux list-windows)"));
        assert!(err.source().is_some());
        assert!(!err.is_missing_target());
    }

    #[test]
    fn missing_target_detection_reads_tmux_stderr() {
        let missing = MuxError::CommandFailed {
            command: "tmux select-pane -t %9".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "can't find pane: %9".to_string(),
        };
        assert!(missing.is_missing_target());
        assert!(missing.to_string().contains("can't find pane"));

        let other = MuxError::CommandFailed {
            command: "tmux link-window".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "index in use: 1".to_string(),
        };
        assert!(!other.is_missing_target());
        assert!(MuxError::NotFound {
            target: "=vigil:3".to_string()
        }
        .is_missing_target());
    }
}
