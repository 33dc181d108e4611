use std::process::Command;

use regex::Regex;
use vigil_core::AgentKind;

use crate::error::AgentError;

/// How the initial prompt reaches the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptInjection {
    /// Passed on the launch command line.
    Argument,
    /// Typed into the pane once the agent is ready.
    SendKeys,
}

pub trait CommandProbe {
    fn command_exists(&self, executable: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommandProbe;

impl CommandProbe for ProcessCommandProbe {
    fn command_exists(&self, executable: &str) -> bool {
        Command::new("sh")
            .arg("-c")
            .arg(format!("command -v -- {}", shell_quote(executable)))
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

pub trait AgentAdapter: Send + Sync {
    fn kind(&self) -> AgentKind;
    fn executable(&self) -> &str;
    /// Shell command line the run pane executes.
    fn launch_command(&self, prompt: Option<&str>) -> String;
    /// Pane output that means the agent accepts input.
    fn ready_pattern(&self) -> &str;
    fn prompt_injection(&self) -> PromptInjection;

    fn is_available(&self, probe: &dyn CommandProbe) -> bool {
        probe.command_exists(self.executable())
    }

    fn ready_regex(&self) -> Result<Regex, AgentError> {
        Regex::new(self.ready_pattern()).map_err(|err| AgentError::InvalidPattern {
            pattern: self.ready_pattern().to_string(),
            message: err.to_string(),
        })
    }

    fn ensure_available(&self, probe: &dyn CommandProbe) -> Result<(), AgentError> {
        if self.is_available(probe) {
            Ok(())
        } else {
            Err(AgentError::Unavailable {
                agent: self.kind(),
                executable: self.executable().to_string(),
            })
        }
    }
}

fn command_with_prompt(executable: &str, prompt: Option<&str>) -> String {
    match prompt.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prompt) => format!("{executable} {}", shell_quote(prompt)),
        None => executable.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeAdapter {
    pub executable: String,
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
        }
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn launch_command(&self, prompt: Option<&str>) -> String {
        command_with_prompt(&self.executable, prompt)
    }

    fn ready_pattern(&self) -> &str {
        r"(?i)(\? for shortcuts|welcome to claude|^\s*>\s*$)"
    }

    fn prompt_injection(&self) -> PromptInjection {
        PromptInjection::Argument
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexAdapter {
    pub executable: String,
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self {
            executable: "codex".to_string(),
        }
    }
}

impl AgentAdapter for CodexAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn launch_command(&self, prompt: Option<&str>) -> String {
        command_with_prompt(&self.executable, prompt)
    }

    fn ready_pattern(&self) -> &str {
        r"(?i)(context left|send a message|openai codex)"
    }

    fn prompt_injection(&self) -> PromptInjection {
        PromptInjection::Argument
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiAdapter {
    pub executable: String,
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self {
            executable: "gemini".to_string(),
        }
    }
}

impl AgentAdapter for GeminiAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Gemini
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn launch_command(&self, _prompt: Option<&str>) -> String {
        self.executable.clone()
    }

    fn ready_pattern(&self) -> &str {
        r"(?i)type your message"
    }

    fn prompt_injection(&self) -> PromptInjection {
        PromptInjection::SendKeys
    }
}

/// Plain login shell; the prompt is typed in as a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellAdapter {
    pub executable: String,
}

impl Default for ShellAdapter {
    fn default() -> Self {
        Self {
            executable: std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string()),
        }
    }
}

impl AgentAdapter for ShellAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Shell
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn launch_command(&self, _prompt: Option<&str>) -> String {
        self.executable.clone()
    }

    fn ready_pattern(&self) -> &str {
        r"(?m)[$#%>]\s*$"
    }

    fn prompt_injection(&self) -> PromptInjection {
        PromptInjection::SendKeys
    }
}

pub fn default_adapter_for(kind: AgentKind) -> Box<dyn AgentAdapter> {
    match kind {
        AgentKind::Claude => Box::new(ClaudeAdapter::default()),
        AgentKind::Codex => Box::new(CodexAdapter::default()),
        AgentKind::Gemini => Box::new(GeminiAdapter::default()),
        AgentKind::Shell => Box::new(ShellAdapter::default()),
    }
}

pub fn shell_quote(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}
