use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_core::{Issue, IssueStatus, MergeState, Run, RunRef, RunStatus};

/// Placeholder shown for any value a collaborator could not provide.
pub const MISSING: &str = "-";

/// One run as displayed. Rebuilt on every refresh; `index` is a view position
/// only and changes whenever the list is re-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRow {
    pub index: usize,
    pub reference: RunRef,
    pub short_id: String,
    pub status: RunStatus,
    pub agent: Option<String>,
    pub branch: Option<String>,
    pub phase: Option<String>,
    pub merge_state: Option<MergeState>,
    pub pr_url: Option<String>,
    pub pr_label: Option<String>,
    pub issue_status: Option<IssueStatus>,
    pub issue_title: Option<String>,
    pub issue_topic: Option<String>,
    pub unanswered: Vec<String>,
    pub session_name: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunRow {
    /// Row with the run's own derived fields; collaborator-provided columns
    /// start empty.
    pub fn from_run(run: &Run) -> Self {
        Self {
            index: 0,
            reference: run.reference.clone(),
            short_id: run.short_id().to_string(),
            status: run.status(),
            agent: run.agent.clone(),
            branch: run.branch.clone(),
            phase: run.phase().map(str::to_string),
            merge_state: None,
            pr_url: None,
            pr_label: None,
            issue_status: None,
            issue_title: None,
            issue_topic: None,
            unanswered: run
                .unanswered_questions()
                .into_iter()
                .map(|question| question.name.clone())
                .collect(),
            session_name: run.session_name.clone(),
            updated_at: run.updated_at(),
        }
    }

    pub fn with_issue(mut self, issue: Option<&Issue>) -> Self {
        if let Some(issue) = issue {
            self.issue_status = Some(issue.status);
            self.issue_title = Some(issue.title.clone());
            self.issue_topic = issue.topic.clone();
        }
        self
    }

    pub fn merge_label(&self) -> &str {
        self.merge_state.map(MergeState::label).unwrap_or(MISSING)
    }

    pub fn pr_display(&self) -> &str {
        self.pr_label
            .as_deref()
            .or(self.pr_url.as_deref())
            .unwrap_or(MISSING)
    }

    pub fn has_pr(&self) -> bool {
        self.pr_url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRow {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub status: IssueStatus,
    pub topic: Option<String>,
    pub runs: usize,
    pub active_runs: usize,
    pub unanswered: usize,
}

impl IssueRow {
    /// Aggregates `rows` belonging to `issue`; other rows are ignored.
    pub fn from_issue(issue: &Issue, rows: &[RunRow]) -> Self {
        let active: Vec<RunStatus> = RunStatus::default_active().to_vec();
        let own = rows.iter().filter(|row| row.reference.issue_id == issue.id);
        let (mut runs, mut active_runs, mut unanswered) = (0, 0, 0);
        for row in own {
            runs += 1;
            if active.contains(&row.status) {
                active_runs += 1;
            }
            unanswered += row.unanswered.len();
        }
        Self {
            index: 0,
            id: issue.id.clone(),
            title: issue.title.clone(),
            status: issue.status,
            topic: issue.topic.clone(),
            runs,
            active_runs,
            unanswered,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use vigil_core::{Event, EventKind};

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    fn blocked_run() -> Run {
        let mut run = Run::new(RunRef::new("ISS-1", "20260115-abcdef12"));
        run.agent = Some("claude".to_string());
        run.events = vec![
            Event::new(at(1), EventKind::Status, "blocked"),
            Event::new(at(2), EventKind::Question, "q1").with_attr("text", "pick A or B"),
        ];
        run
    }

    #[test]
    fn row_carries_derived_run_state() {
        let row = RunRow::from_run(&blocked_run());
        assert_eq!(row.status, RunStatus::Blocked);
        assert_eq!(row.unanswered, vec!["q1".to_string()]);
        assert_eq!(row.short_id, "20260115");
        assert_eq!(row.updated_at, Some(at(2)));
        assert_eq!(row.merge_label(), "-");
        assert_eq!(row.pr_display(), "-");
        assert!(!row.has_pr());
    }

    #[test]
    fn issue_details_are_optional() {
        let mut issue = Issue::new("ISS-1", "Flaky login");
        issue.topic = Some("auth".to_string());
        let row = RunRow::from_run(&blocked_run()).with_issue(Some(&issue));
        assert_eq!(row.issue_status, Some(IssueStatus::Open));
        assert_eq!(row.issue_topic.as_deref(), Some("auth"));

        let orphan = RunRow::from_run(&blocked_run()).with_issue(None);
        assert_eq!(orphan.issue_title, None);
    }

    #[test]
    fn issue_row_counts_only_its_runs() {
        let issue = Issue::new("ISS-1", "Flaky login");
        let mut done = RunRow::from_run(&blocked_run());
        done.status = RunStatus::Done;
        done.unanswered.clear();
        let mut other = RunRow::from_run(&blocked_run());
        other.reference = RunRef::new("ISS-2", "r1");

        let row = IssueRow::from_issue(&issue, &[RunRow::from_run(&blocked_run()), done, other]);
        assert_eq!((row.runs, row.active_runs, row.unanswered), (2, 1, 1));
    }
}
