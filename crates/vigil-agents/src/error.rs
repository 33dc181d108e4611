use vigil_core::AgentKind;
use vigil_mux::MuxError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent {agent} is not available (executable '{executable}' not found)")]
    Unavailable { agent: AgentKind, executable: String },
    #[error("invalid ready pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("agent in pane {pane} not ready after {waited_ms}ms")]
    ReadyTimeout {
        pane: String,
        waited_ms: u128,
        last_output: String,
    },
    #[error(transparent)]
    Mux(#[from] MuxError),
}

#[cfg(test)]
mod tests {
    use vigil_core::AgentKind;

    use super::AgentError;

    #[test]
    fn unavailable_error_names_agent_and_executable() {
        let err = AgentError::Unavailable {
            agent: AgentKind::Codex,
            executable: "codex".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "agent codex is not available (executable 'codex' not found)"
        );
    }

    #[test]
    fn ready_timeout_reports_pane_and_wait() {
        let err = AgentError::ReadyTimeout {
            pane: "%4".to_string(),
            waited_ms: 1500,
            last_output: "loading".to_string(),
        };
        assert_eq!(err.to_string(), "agent in pane %4 not ready after 1500ms");
    }
}
