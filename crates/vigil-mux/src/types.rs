use std::path::{Path, PathBuf};

use crate::error::MuxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    /// Server-wide window id (`@N`). Recycled by tmux once a window dies.
    pub id: String,
    pub index: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// Server-wide pane id (`%N`).
    pub id: String,
    pub index: u32,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    /// New pane to the right (`split-window -h`).
    Horizontal,
    /// New pane below (`split-window -v`).
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSpec {
    pub target: String,
    pub direction: SplitDirection,
    pub size_percent: Option<u8>,
    /// Span the whole window instead of splitting only `target`.
    pub full: bool,
    pub cwd: Option<PathBuf>,
    pub command: Option<String>,
}

impl SplitSpec {
    pub fn new(target: impl Into<String>, direction: SplitDirection) -> Self {
        Self {
            target: target.into(),
            direction,
            size_percent: None,
            full: false,
            cwd: None,
            command: None,
        }
    }

    pub fn size_percent(mut self, percent: u8) -> Self {
        self.size_percent = Some(percent);
        self
    }

    pub fn full(mut self) -> Self {
        self.full = true;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        let command = command.into();
        if !command.trim().is_empty() {
            self.command = Some(command);
        }
        self
    }
}

/// Exact-match session target (`=name`), so `vigil-ab` never matches
/// `vigil-abc` by prefix.
pub fn session_target(session: &str) -> String {
    format!("={session}")
}

pub fn window_target(session: &str, index: u32) -> String {
    format!("={session}:{index}")
}

/// The operations vigil needs from a terminal multiplexer. Window targets are
/// either a window id (`@N`) or `=session:index`; pane targets are pane ids.
pub trait Multiplexer: Send + Sync {
    fn has_session(&self, session: &str) -> Result<bool, MuxError>;
    fn new_session(
        &self,
        session: &str,
        cwd: &Path,
        window_name: &str,
        command: Option<&str>,
    ) -> Result<(), MuxError>;
    fn kill_session(&self, session: &str) -> Result<(), MuxError>;

    fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>, MuxError>;
    fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: &Path,
        command: Option<&str>,
    ) -> Result<WindowInfo, MuxError>;
    fn link_window(&self, window_id: &str, session: &str, index: u32) -> Result<(), MuxError>;
    fn unlink_window(&self, session: &str, index: u32) -> Result<(), MuxError>;
    fn select_window(&self, target: &str) -> Result<(), MuxError>;

    fn list_panes(&self, window: &str) -> Result<Vec<PaneInfo>, MuxError>;
    /// Splits `spec.target` and returns the new pane's id.
    fn split_pane(&self, spec: &SplitSpec) -> Result<String, MuxError>;
    fn kill_pane(&self, pane: &str) -> Result<(), MuxError>;
    fn set_pane_title(&self, pane: &str, title: &str) -> Result<(), MuxError>;
    fn pane_title(&self, pane: &str) -> Result<String, MuxError>;
    fn swap_panes(&self, source: &str, target: &str) -> Result<(), MuxError>;
    fn select_pane(&self, pane: &str) -> Result<(), MuxError>;

    /// Session-scoped user option. Keys are stored as given.
    fn set_option(&self, session: &str, key: &str, value: &str) -> Result<(), MuxError>;
    fn option(&self, session: &str, key: &str) -> Result<Option<String>, MuxError>;

    fn send_keys(&self, pane: &str, text: &str, enter: bool) -> Result<(), MuxError>;
    fn capture_pane(&self, pane: &str) -> Result<String, MuxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_use_exact_session_match() {
        assert_eq!(session_target("vigil-1a2b3c4d"), "=vigil-1a2b3c4d");
        assert_eq!(window_target("vigil-1a2b3c4d", 3), "=vigil-1a2b3c4d:3");
    }

    #[test]
    fn split_spec_builder_ignores_blank_commands() {
        let spec = SplitSpec::new("%1", SplitDirection::Horizontal)
            .size_percent(25)
            .cwd("/tmp")
            .command("   ");
        assert_eq!(spec.size_percent, Some(25));
        assert_eq!(spec.command, None);
        assert!(!spec.full);

        let spec = SplitSpec::new("%1", SplitDirection::Vertical)
            .full()
            .command("vigil issues");
        assert!(spec.full);
        assert_eq!(spec.command.as_deref(), Some("vigil issues"));
    }
}
