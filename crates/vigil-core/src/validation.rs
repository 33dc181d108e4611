use serde::{Deserialize, Serialize};

use crate::config::VigilConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for VigilConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.git.base_branch.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "git.base_branch.empty",
                message: "base_branch must name a branch".to_string(),
            });
        }

        let prefix = self.session.prefix.trim();
        if prefix.is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "session.prefix.empty",
                message: "session prefix must not be empty".to_string(),
            });
        } else if prefix.contains(['.', ':']) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "session.prefix.invalid",
                message: format!("session prefix '{prefix}' must not contain '.' or ':'"),
            });
        }

        if !(1..=90).contains(&self.session.chat_percent) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "session.chat_percent.range",
                message: format!(
                    "chat_percent must be between 1 and 90, got {}",
                    self.session.chat_percent
                ),
            });
        }

        if self.session.chat_command.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "session.chat_command.empty",
                message: "chat pane will start an idle shell".to_string(),
            });
        }

        if self.agents.ready_timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "agents.ready_timeout.zero",
                message: "ready_timeout_secs must be greater than zero".to_string(),
            });
        }

        if self.agents.ready_poll_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "agents.ready_poll.zero",
                message: "ready_poll_ms must be greater than zero".to_string(),
            });
        }

        issues
    }
}
