//! Persistence seam. The reconciler and actions only ever see a `RunStore`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::events::Event;
use crate::run::Run;
use crate::types::{Issue, IssueStatus, RunRef, RunStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("issue not found: {id}")]
    IssueNotFound { id: String },
    #[error("run not found: {reference}")]
    RunNotFound { reference: RunRef },
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunQuery {
    pub issue_id: Option<String>,
    pub statuses: Option<BTreeSet<RunStatus>>,
    pub limit: Option<usize>,
}

impl RunQuery {
    pub fn for_issue(issue_id: impl Into<String>) -> Self {
        Self {
            issue_id: Some(issue_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, run: &Run) -> bool {
        if let Some(issue_id) = &self.issue_id {
            if &run.reference.issue_id != issue_id {
                return false;
            }
        }
        match &self.statuses {
            Some(statuses) => statuses.contains(&run.status()),
            None => true,
        }
    }

    /// Filters, orders most recently updated first, then truncates to `limit`.
    pub fn apply(&self, runs: Vec<Run>) -> Vec<Run> {
        let mut selected: Vec<Run> = runs.into_iter().filter(|run| self.matches(run)).collect();
        selected.sort_by(|a, b| {
            b.updated_at()
                .cmp(&a.updated_at())
                .then_with(|| a.reference.cmp(&b.reference))
        });
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

pub trait RunStore: Send + Sync {
    fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>, StoreError>;
    fn list_issues(&self) -> Result<Vec<Issue>, StoreError>;
    fn resolve_issue(&self, id: &str) -> Result<Issue, StoreError>;
    fn get_run(&self, reference: &RunRef) -> Result<Run, StoreError>;
    fn append_event(&self, reference: &RunRef, event: &Event) -> Result<(), StoreError>;
    fn set_issue_status(&self, id: &str, status: IssueStatus) -> Result<(), StoreError>;
    fn vault_path(&self) -> &Path;
}
