//! Row building: one pass over the vault producing every display row, with
//! merge state, pull requests and issue info merged in. Collaborator failures
//! degrade the affected column and are reported as warnings.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use vigil_core::{EventKind, Issue, MergeState, Run, RunQuery, RunRef, RunStore, SortKey, StoreError};
use vigil_forge::CodeHost;
use vigil_git::{discover_repo, BranchInspector, GitBranchInspector, GitCli, MergeStateClassifier};
use vigil_view::{sort_issue_rows, sort_rows, IssueRow, RunFilter, RunRow};

/// Artifact event name under which a run's pull-request URL is recorded.
pub const PR_ARTIFACT: &str = "pr";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub rows: Vec<RunRow>,
    pub issues: Vec<IssueRow>,
    pub warnings: Vec<String>,
    pub built_at: DateTime<Utc>,
}

impl RefreshSnapshot {
    /// Filtered and sorted copy of the rows, indexed from 1.
    pub fn project(&self, filter: &RunFilter, key: SortKey) -> Vec<RunRow> {
        let mut rows = filter.filter_rows_at(self.rows.clone(), Utc::now());
        sort_rows(&mut rows, key);
        rows
    }

    pub fn row(&self, reference: &RunRef) -> Option<&RunRow> {
        self.rows.iter().find(|row| &row.reference == reference)
    }
}

/// Last recorded `artifact | pr | url=...` of a run.
pub fn recorded_pr_url(run: &Run) -> Option<String> {
    run.events
        .iter()
        .filter(|event| event.kind == EventKind::Artifact && event.name == PR_ARTIFACT)
        .max_by_key(|event| event.at)
        .and_then(|event| event.attr("url"))
        .map(str::to_string)
}

/// `#<number>` for a pull-request URL ending in a number.
pub fn pr_number_label(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|tail| !tail.is_empty() && tail.chars().all(|ch| ch.is_ascii_digit()))
        .map(|number| format!("#{number}"))
}

/// Assembles rows from already-gathered facts.
pub fn build_rows(
    runs: &[Run],
    issues: &[Issue],
    merge_states: &HashMap<RunRef, MergeState>,
    pull_requests: &HashMap<RunRef, (String, Option<String>)>,
) -> Vec<RunRow> {
    let by_id: HashMap<&str, &Issue> = issues.iter().map(|issue| (issue.id.as_str(), issue)).collect();
    runs.iter()
        .map(|run| {
            let mut row = RunRow::from_run(run)
                .with_issue(by_id.get(run.reference.issue_id.as_str()).copied());
            row.merge_state = merge_states.get(&run.reference).copied();
            if let Some((url, label)) = pull_requests.get(&run.reference) {
                row.pr_url = Some(url.clone());
                row.pr_label = label.clone();
            }
            row
        })
        .collect()
}

pub fn build_issue_rows(issues: &[Issue], rows: &[RunRow]) -> Vec<IssueRow> {
    let mut issue_rows: Vec<IssueRow> = issues
        .iter()
        .map(|issue| IssueRow::from_issue(issue, rows))
        .collect();
    sort_issue_rows(&mut issue_rows);
    issue_rows
}

/// Everything a refresh pass needs. Cheap to clone and `Send`, so a pass can
/// run on a worker thread.
#[derive(Clone)]
pub struct RowBuilder {
    store: Arc<dyn RunStore>,
    forge: Option<Arc<dyn CodeHost>>,
    classifier: MergeStateClassifier,
    git: GitCli,
}

impl std::fmt::Debug for RowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowBuilder")
            .field("vault", &self.store.vault_path())
            .field("forge", &self.forge.is_some())
            .field("classifier", &self.classifier)
            .finish()
    }
}

impl RowBuilder {
    pub fn new(store: Arc<dyn RunStore>, classifier: MergeStateClassifier) -> Self {
        Self {
            store,
            forge: None,
            classifier,
            git: GitCli::default(),
        }
    }

    pub fn with_forge(mut self, forge: Arc<dyn CodeHost>) -> Self {
        self.forge = Some(forge);
        self
    }

    pub fn with_git(mut self, git: GitCli) -> Self {
        self.git = git;
        self
    }

    /// Full pass against the vault's own repository.
    pub fn refresh(&self) -> Result<RefreshSnapshot, StoreError> {
        let mut warnings = Vec::new();
        let inspector = match discover_repo(self.store.vault_path(), &self.git) {
            Ok(repo) => Some(GitBranchInspector::with_cli(repo, self.git.clone())),
            Err(err) => {
                tracing::debug!(error = %err, "vault is not in a git repository; merge state skipped");
                warnings.push(format!("merge state unavailable: {err}"));
                None
            }
        };
        let mut snapshot = self.refresh_with(
            inspector
                .as_ref()
                .map(|inspector| inspector as &dyn BranchInspector),
        )?;
        warnings.append(&mut snapshot.warnings);
        snapshot.warnings = warnings;
        Ok(snapshot)
    }

    /// Pass using the given branch inspector; `None` leaves merge state empty.
    pub fn refresh_with(
        &self,
        inspector: Option<&dyn BranchInspector>,
    ) -> Result<RefreshSnapshot, StoreError> {
        let runs = self.store.list_runs(&RunQuery::default())?;
        let mut warnings = Vec::new();
        let issues = match self.store.list_issues() {
            Ok(issues) => issues,
            Err(err) => {
                tracing::warn!(error = %err, "issues unavailable");
                warnings.push(format!("issues unavailable: {err}"));
                Vec::new()
            }
        };

        let merge_states = inspector
            .map(|inspector| self.classifier.classify_runs(inspector, &runs))
            .unwrap_or_default();
        let pull_requests = self.pull_requests(&runs, &mut warnings);

        let rows = build_rows(&runs, &issues, &merge_states, &pull_requests);
        let issue_rows = build_issue_rows(&issues, &rows);
        tracing::debug!(runs = rows.len(), issues = issue_rows.len(), "refresh pass complete");
        Ok(RefreshSnapshot {
            rows,
            issues: issue_rows,
            warnings,
            built_at: Utc::now(),
        })
    }

    /// Recorded PR artifacts win; otherwise one lookup per branch.
    fn pull_requests(
        &self,
        runs: &[Run],
        warnings: &mut Vec<String>,
    ) -> HashMap<RunRef, (String, Option<String>)> {
        let mut found = HashMap::new();
        let mut lookup_failed = false;
        for run in runs {
            if let Some(url) = recorded_pr_url(run) {
                let label = pr_number_label(&url);
                found.insert(run.reference.clone(), (url, label));
                continue;
            }
            let (Some(forge), Some(branch)) = (self.forge.as_deref(), run.branch.as_deref()) else {
                continue;
            };
            if lookup_failed {
                continue;
            }
            let cwd: &Path = run
                .worktree_path
                .as_deref()
                .filter(|path| path.is_dir())
                .unwrap_or_else(|| self.store.vault_path());
            match forge.pr_lookup(cwd, branch) {
                Ok(Some(pr)) => {
                    let label = pr.label();
                    found.insert(run.reference.clone(), (pr.url, Some(label)));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(run = %run.reference, branch, error = %err, "pr lookup failed");
                    warnings.push(format!("pr lookup unavailable: {err}"));
                    lookup_failed = true;
                }
            }
        }
        found
    }
}
