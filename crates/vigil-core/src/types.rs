//! Identity, status and label types shared by every vigil crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a run: the issue it works on plus the run id within that issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunRef {
    pub issue_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid run reference '{input}': expected <issue-id>/<run-id>")]
pub struct RunRefParseError {
    pub input: String,
}

impl RunRef {
    pub fn new(issue_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            issue_id: issue_id.into(),
            run_id: run_id.into(),
        }
    }

    /// First 8 characters of the run id, used as a compact display handle.
    pub fn short_id(&self) -> &str {
        match self.run_id.char_indices().nth(8) {
            Some((idx, _)) => &self.run_id[..idx],
            None => &self.run_id,
        }
    }
}

impl std::str::FromStr for RunRef {
    type Err = RunRefParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || RunRefParseError {
            input: value.to_string(),
        };
        let (issue_id, run_id) = trimmed.split_once('/').ok_or_else(invalid)?;
        let well_formed = |part: &str| {
            !part.is_empty() && !part.contains('/') && !part.chars().any(char::is_whitespace)
        };
        if !well_formed(issue_id) || !well_formed(run_id) {
            return Err(invalid());
        }
        Ok(Self::new(issue_id, run_id))
    }
}

impl std::fmt::Display for RunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.issue_id, self.run_id)
    }
}

/// Run status, derived from the name of the latest `status` event.
///
/// Variants are declared in display-rank order, so the derived `Ord` matches
/// [`RunStatus::rank`]. Names outside the known vocabulary are kept verbatim
/// in `Other` and rank after everything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Running,
    Blocked,
    BlockedViaApi,
    Booting,
    Queued,
    PrOpen,
    Done,
    Failed,
    Canceled,
    Unknown,
    Other(String),
}

impl RunStatus {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "running" => RunStatus::Running,
            "blocked" => RunStatus::Blocked,
            "blocked-via-api" => RunStatus::BlockedViaApi,
            "booting" => RunStatus::Booting,
            "queued" => RunStatus::Queued,
            "pr-open" => RunStatus::PrOpen,
            "done" => RunStatus::Done,
            "failed" => RunStatus::Failed,
            "canceled" => RunStatus::Canceled,
            "unknown" => RunStatus::Unknown,
            _ => RunStatus::Other(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Blocked => "blocked",
            RunStatus::BlockedViaApi => "blocked-via-api",
            RunStatus::Booting => "booting",
            RunStatus::Queued => "queued",
            RunStatus::PrOpen => "pr-open",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
            RunStatus::Unknown => "unknown",
            RunStatus::Other(name) => name,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            RunStatus::Running => 0,
            RunStatus::Blocked => 1,
            RunStatus::BlockedViaApi => 2,
            RunStatus::Booting => 3,
            RunStatus::Queued => 4,
            RunStatus::PrOpen => 5,
            RunStatus::Done => 6,
            RunStatus::Failed => 7,
            RunStatus::Canceled => 8,
            RunStatus::Unknown => 9,
            RunStatus::Other(_) => 10,
        }
    }

    /// Statuses shown by the default run filter.
    pub fn default_active() -> [RunStatus; 6] {
        [
            RunStatus::Running,
            RunStatus::Blocked,
            RunStatus::BlockedViaApi,
            RunStatus::Booting,
            RunStatus::Queued,
            RunStatus::PrOpen,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Done | RunStatus::Failed | RunStatus::Canceled
        )
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        RunStatus::from_name(&value)
    }
}

impl From<RunStatus> for String {
    fn from(value: RunStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    Resolved,
    Closed,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "open" => Ok(IssueStatus::Open),
            "resolved" => Ok(IssueStatus::Resolved),
            "closed" => Ok(IssueStatus::Closed),
            other => Err(format!(
                "invalid issue status '{other}'. valid values: open, resolved, closed"
            )),
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked work item. Owned by the store; runs hold only its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub frontmatter: BTreeMap<String, String>,
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: String::new(),
            status: IssueStatus::Open,
            topic: None,
            frontmatter: BTreeMap::new(),
        }
    }
}

/// Relationship of a run's branch to the base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Merged,
    NoChange,
    Clean,
    Conflict,
}

impl MergeState {
    pub fn label(self) -> &'static str {
        match self {
            MergeState::Merged => "merged",
            MergeState::NoChange => "no change",
            MergeState::Clean => "clean",
            MergeState::Conflict => "conflict",
        }
    }
}

impl std::str::FromStr for MergeState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "merged" => Ok(MergeState::Merged),
            "no change" => Ok(MergeState::NoChange),
            "clean" => Ok(MergeState::Clean),
            "conflict" => Ok(MergeState::Conflict),
            other => Err(format!(
                "invalid merge state '{other}'. valid values: merged, no change, clean, conflict"
            )),
        }
    }
}

impl std::fmt::Display for MergeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How a branch that is already merged into base, but whose tip predates the
/// run's first event, is labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergedBeforeStartPolicy {
    #[default]
    Merged,
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Claude,
    Codex,
    Gemini,
    Shell,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Gemini => "gemini",
            AgentKind::Shell => "shell",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "codex" => Ok(AgentKind::Codex),
            "gemini" => Ok(AgentKind::Gemini),
            "shell" => Ok(AgentKind::Shell),
            other => Err(format!(
                "invalid agent '{other}'. valid values: claude, codex, gemini, shell"
            )),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run list ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Updated,
    #[default]
    Status,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Updated => "updated",
            SortKey::Status => "status",
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "name" => Ok(SortKey::Name),
            "updated" => Ok(SortKey::Updated),
            "status" => Ok(SortKey::Status),
            other => Err(format!(
                "invalid sort key '{other}'. valid values: name, updated, status"
            )),
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ref_parses_and_renders_issue_slash_run() {
        let reference: RunRef = "ISS-12/20260115-a1b2c3d4e5".parse().expect("parse ref");
        assert_eq!(reference.issue_id, "ISS-12");
        assert_eq!(reference.run_id, "20260115-a1b2c3d4e5");
        assert_eq!(reference.to_string(), "ISS-12/20260115-a1b2c3d4e5");
        assert_eq!(reference.short_id(), "20260115");
    }

    #[test]
    fn run_ref_rejects_titles_that_are_not_references() {
        for input in ["chat", "runs", "a/", "/b", "a/b/c", "a b/c", ""] {
            assert!(input.parse::<RunRef>().is_err(), "{input} should not parse");
        }
    }

    #[test]
    fn run_status_known_names_roundtrip_and_unknown_names_are_preserved() {
        for status in RunStatus::default_active() {
            assert_eq!(RunStatus::from_name(status.as_str()), status);
        }
        let other = RunStatus::from_name("paused");
        assert_eq!(other, RunStatus::Other("paused".to_string()));
        assert_eq!(other.as_str(), "paused");
        assert_eq!(other.rank(), 10);
    }

    #[test]
    fn run_status_derived_order_follows_rank_table() {
        let mut statuses = vec![
            RunStatus::Other("zzz".to_string()),
            RunStatus::Unknown,
            RunStatus::Done,
            RunStatus::Running,
            RunStatus::PrOpen,
            RunStatus::BlockedViaApi,
        ];
        statuses.sort();
        let ranks: Vec<u8> = statuses.iter().map(RunStatus::rank).collect();
        assert_eq!(ranks, vec![0, 2, 5, 6, 9, 10]);
    }

    #[test]
    fn run_status_serializes_as_plain_name() {
        let json = serde_json::to_string(&RunStatus::BlockedViaApi).expect("serialize");
        assert_eq!(json, "\"blocked-via-api\"");
        let decoded: RunStatus = serde_json::from_str("\"pr-open\"").expect("deserialize");
        assert_eq!(decoded, RunStatus::PrOpen);
    }

    #[test]
    fn merge_state_accepts_label_variants() {
        assert_eq!("no change".parse::<MergeState>(), Ok(MergeState::NoChange));
        assert_eq!("no-change".parse::<MergeState>(), Ok(MergeState::NoChange));
        assert_eq!("Conflict".parse::<MergeState>(), Ok(MergeState::Conflict));
        assert!("dirty".parse::<MergeState>().is_err());
        assert_eq!(MergeState::NoChange.to_string(), "no change");
    }

    #[test]
    fn issue_status_and_sort_key_parse_case_insensitively() {
        assert_eq!("Resolved".parse::<IssueStatus>(), Ok(IssueStatus::Resolved));
        assert_eq!("UPDATED".parse::<SortKey>(), Ok(SortKey::Updated));
        assert!("priority".parse::<SortKey>().is_err());
        assert_eq!("codex".parse::<AgentKind>(), Ok(AgentKind::Codex));
    }
}
