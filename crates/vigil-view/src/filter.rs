//! Run filtering. Every set field is an independent predicate and a row must
//! satisfy all of them.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use vigil_core::{IssueStatus, MergeState, RunStatus};

use crate::rows::RunRow;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid duration '{input}': {message}")]
    InvalidDuration { input: String, message: String },
    #[error("duration '{input}' must be greater than zero")]
    NonPositiveDuration { input: String },
    #[error("invalid issue pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("invalid value for filter '{field}': {message}")]
    InvalidValue { field: String, message: String },
    #[error("unknown filter '{field}'. valid filters: status, agent, merge, pr, issue-status, issue, updated")]
    UnknownField { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrFilter {
    #[default]
    All,
    Has,
    None,
}

impl PrFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            PrFilter::All => "all",
            PrFilter::Has => "has",
            PrFilter::None => "none",
        }
    }

    fn accepts(self, has_pr: bool) -> bool {
        match self {
            PrFilter::All => true,
            PrFilter::Has => has_pr,
            PrFilter::None => !has_pr,
        }
    }
}

impl std::str::FromStr for PrFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "all" => Ok(PrFilter::All),
            "has" | "yes" => Ok(PrFilter::Has),
            "none" | "no" => Ok(PrFilter::None),
            other => Err(format!("invalid pr filter '{other}'. valid values: all, has, none")),
        }
    }
}

#[derive(Debug, Clone)]
enum IssueMatcher {
    Substring(String),
    Pattern(Regex),
}

/// Issue-id match: a case-insensitive substring, or a `/regex/` compiled
/// case-insensitively. Two queries are equal when their source text is.
#[derive(Debug, Clone)]
pub struct IssueQuery {
    raw: String,
    matcher: IssueMatcher,
}

impl IssueQuery {
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let trimmed = raw.trim();
        let matcher = match trimmed
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(pattern) if trimmed.len() >= 2 => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| FilterError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: err.to_string(),
                    })?;
                IssueMatcher::Pattern(regex)
            }
            _ => IssueMatcher::Substring(trimmed.to_lowercase()),
        };
        Ok(Self {
            raw: trimmed.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, issue_id: &str) -> bool {
        match &self.matcher {
            IssueMatcher::Substring(needle) => issue_id.to_lowercase().contains(needle),
            IssueMatcher::Pattern(regex) => regex.is_match(issue_id),
        }
    }
}

impl PartialEq for IssueQuery {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for IssueQuery {}

/// "Updated within" cutoff, keeping the text it was written as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedWithin {
    raw: String,
    window: Duration,
}

impl UpdatedWithin {
    /// Accepts `<N>d`, `<N>w` or any humantime duration (`90m`, `2h 30m`).
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let trimmed = raw.trim();
        let invalid = |message: String| FilterError::InvalidDuration {
            input: trimmed.to_string(),
            message,
        };
        if trimmed.is_empty() {
            return Err(invalid("empty duration".to_string()));
        }
        if trimmed.starts_with('-') {
            return Err(FilterError::NonPositiveDuration {
                input: trimmed.to_string(),
            });
        }

        let shorthand = trimmed
            .strip_suffix('d')
            .map(|n| (n, 1))
            .or_else(|| trimmed.strip_suffix('w').map(|n| (n, 7)));
        let window = match shorthand.and_then(|(n, days)| n.parse::<i64>().ok().map(|n| (n, days)))
        {
            Some((count, days)) => count
                .checked_mul(days)
                .and_then(Duration::try_days)
                .ok_or_else(|| invalid("duration out of range".to_string()))?,
            None => {
                let std = humantime::parse_duration(trimmed).map_err(|err| invalid(err.to_string()))?;
                Duration::from_std(std).map_err(|err| invalid(err.to_string()))?
            }
        };

        if window <= Duration::zero() {
            return Err(FilterError::NonPositiveDuration {
                input: trimmed.to_string(),
            });
        }
        Ok(Self {
            raw: trimmed.to_string(),
            window,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn accepts(&self, updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        updated_at.is_some_and(|at| now - at <= self.window)
    }
}

/// Active run filter. An empty `statuses` set accepts every status; every
/// other field accepts everything when unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    pub statuses: BTreeSet<RunStatus>,
    pub agent: Option<String>,
    pub merge_state: Option<MergeState>,
    pub pr: PrFilter,
    pub issue_status: Option<IssueStatus>,
    pub issue_query: Option<IssueQuery>,
    pub updated_within: Option<UpdatedWithin>,
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            statuses: RunStatus::default_active().into_iter().collect(),
            agent: None,
            merge_state: None,
            pr: PrFilter::All,
            issue_status: None,
            issue_query: None,
            updated_within: None,
        }
    }
}

impl RunFilter {
    /// Accepts every row.
    pub fn all() -> Self {
        Self {
            statuses: BTreeSet::new(),
            ..Self::default()
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, row: &RunRow) -> bool {
        self.matches_at(row, Utc::now())
    }

    pub fn matches_at(&self, row: &RunRow, now: DateTime<Utc>) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&row.status) {
            return false;
        }
        if let Some(agent) = &self.agent {
            match &row.agent {
                Some(row_agent) if row_agent.eq_ignore_ascii_case(agent.trim()) => {}
                _ => return false,
            }
        }
        if let Some(merge_state) = self.merge_state {
            if row.merge_state != Some(merge_state) {
                return false;
            }
        }
        if !self.pr.accepts(row.has_pr()) {
            return false;
        }
        if let Some(issue_status) = self.issue_status {
            if row.issue_status != Some(issue_status) {
                return false;
            }
        }
        if let Some(query) = &self.issue_query {
            if !query.matches(&row.reference.issue_id) {
                return false;
            }
        }
        if let Some(within) = &self.updated_within {
            if !within.accepts(row.updated_at, now) {
                return false;
            }
        }
        true
    }

    pub fn filter_rows(&self, rows: Vec<RunRow>) -> Vec<RunRow> {
        self.filter_rows_at(rows, Utc::now())
    }

    pub fn filter_rows_at(&self, rows: Vec<RunRow>, now: DateTime<Utc>) -> Vec<RunRow> {
        rows.into_iter()
            .filter(|row| self.matches_at(row, now))
            .collect()
    }

    /// Sets one field from `key=value` text, the same vocabulary
    /// [`RunFilter::summary`] prints. `all` (or an empty value) clears a field.
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), FilterError> {
        let value = value.trim();
        let cleared = value.is_empty() || value.eq_ignore_ascii_case("all");
        let invalid = |message: String| FilterError::InvalidValue {
            field: field.to_string(),
            message,
        };
        match field.trim() {
            "status" => {
                self.statuses = if cleared {
                    BTreeSet::new()
                } else if value.eq_ignore_ascii_case("active") {
                    RunStatus::default_active().into_iter().collect()
                } else {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(RunStatus::from_name)
                        .collect()
                };
            }
            "agent" => self.agent = (!cleared).then(|| value.to_lowercase()),
            "merge" => {
                self.merge_state = if cleared {
                    None
                } else {
                    Some(value.parse::<MergeState>().map_err(invalid)?)
                };
            }
            "pr" => self.pr = value.parse::<PrFilter>().map_err(invalid)?,
            "issue-status" => {
                self.issue_status = if cleared {
                    None
                } else {
                    Some(value.parse::<IssueStatus>().map_err(invalid)?)
                };
            }
            "issue" => {
                self.issue_query = if value.is_empty() {
                    None
                } else {
                    Some(IssueQuery::parse(value)?)
                };
            }
            "updated" => {
                self.updated_within = if cleared {
                    None
                } else {
                    Some(UpdatedWithin::parse(value)?)
                };
            }
            other => {
                return Err(FilterError::UnknownField {
                    field: other.to_string(),
                })
            }
        }
        Ok(())
    }

    /// `filter: k=v ...` listing only fields that differ from the default,
    /// or an empty string for the default filter.
    pub fn summary(&self) -> String {
        let baseline = Self::default();
        let mut parts = Vec::new();
        if self.statuses != baseline.statuses {
            if self.statuses.is_empty() {
                parts.push("status=all".to_string());
            } else {
                let names: Vec<&str> = self.statuses.iter().map(RunStatus::as_str).collect();
                parts.push(format!("status={}", names.join(",")));
            }
        }
        if let Some(agent) = &self.agent {
            parts.push(format!("agent={agent}"));
        }
        if let Some(merge_state) = self.merge_state {
            parts.push(format!("merge={}", merge_state.label().replace(' ', "-")));
        }
        if self.pr != PrFilter::All {
            parts.push(format!("pr={}", self.pr.as_str()));
        }
        if let Some(issue_status) = self.issue_status {
            parts.push(format!("issue-status={issue_status}"));
        }
        if let Some(query) = &self.issue_query {
            parts.push(format!("issue={}", query.as_str()));
        }
        if let Some(within) = &self.updated_within {
            parts.push(format!("updated={}", within.as_str()));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!("filter: {}", parts.join(" "))
        }
    }
}

impl fmt::Display for RunFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
