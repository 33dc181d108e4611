//! Classifies each run's branch against the base branch.
//!
//! Rules, first match wins:
//! 1. branch is in the merged set of the base ref -> `merged` (or `no change`
//!    when the policy says so and the branch tip predates the run's start)
//! 2. no commits ahead of base -> `no change`
//! 3. merge simulation conflicts -> `conflict`, otherwise `clean`

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use vigil_core::{MergeState, MergedBeforeStartPolicy, Run, RunRef};

use crate::branches::BranchInspector;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStateClassifier {
    pub base_branch: String,
    pub policy: MergedBeforeStartPolicy,
}

impl Default for MergeStateClassifier {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            policy: MergedBeforeStartPolicy::default(),
        }
    }
}

/// Per-refresh facts shared by every branch classified in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatePass {
    pub base_ref: String,
    pub merged: HashSet<String>,
    pub commit_times: HashMap<String, DateTime<Utc>>,
    pub policy: MergedBeforeStartPolicy,
}

impl MergeStateClassifier {
    pub fn new(base_branch: impl Into<String>, policy: MergedBeforeStartPolicy) -> Self {
        Self {
            base_branch: base_branch.into(),
            policy,
        }
    }

    pub fn begin_pass(&self, inspector: &dyn BranchInspector) -> Result<MergeStatePass, GitError> {
        let base_ref = inspector.resolve_base_ref(&self.base_branch)?;
        let merged = inspector.merged_branches(&base_ref)?;
        let commit_times = match self.policy {
            MergedBeforeStartPolicy::NoChange => inspector.branch_commit_times()?,
            MergedBeforeStartPolicy::Merged => HashMap::new(),
        };
        Ok(MergeStatePass {
            base_ref,
            merged,
            commit_times,
            policy: self.policy,
        })
    }

    /// Classifies every run with a branch. Any git failure drops that run
    /// (or the whole pass, if the base cannot be resolved) from the result.
    pub fn classify_runs(
        &self,
        inspector: &dyn BranchInspector,
        runs: &[Run],
    ) -> HashMap<RunRef, MergeState> {
        let mut states = HashMap::new();
        let pass = match self.begin_pass(inspector) {
            Ok(pass) => pass,
            Err(err) => {
                tracing::debug!(base = %self.base_branch, error = %err, "merge-state pass skipped");
                return states;
            }
        };

        for run in runs {
            let Some(branch) = run.branch.as_deref().filter(|b| !b.trim().is_empty()) else {
                continue;
            };
            match pass.classify(inspector, branch, run.started_at()) {
                Ok(state) => {
                    states.insert(run.reference.clone(), state);
                }
                Err(err) => {
                    tracing::debug!(run = %run.reference, branch, error = %err, "merge state unavailable");
                }
            }
        }
        states
    }
}

impl MergeStatePass {
    pub fn classify(
        &self,
        inspector: &dyn BranchInspector,
        branch: &str,
        run_started_at: Option<DateTime<Utc>>,
    ) -> Result<MergeState, GitError> {
        if self.merged.contains(branch) {
            return Ok(self.merged_label(branch, run_started_at));
        }

        if inspector.ahead_count(branch, &self.base_ref)? == 0 {
            return Ok(MergeState::NoChange);
        }

        if inspector.has_conflict(branch, &self.base_ref)? {
            Ok(MergeState::Conflict)
        } else {
            Ok(MergeState::Clean)
        }
    }

    fn merged_label(&self, branch: &str, run_started_at: Option<DateTime<Utc>>) -> MergeState {
        if self.policy != MergedBeforeStartPolicy::NoChange {
            return MergeState::Merged;
        }
        match (self.commit_times.get(branch), run_started_at) {
            (Some(tip), Some(started)) if *tip < started => MergeState::NoChange,
            _ => MergeState::Merged,
        }
    }
}
