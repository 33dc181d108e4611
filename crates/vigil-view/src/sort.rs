//! Deterministic row ordering. Every key ends in the issue id, run id and
//! short id, so no two distinct runs compare equal.

use std::cmp::Ordering;

use vigil_core::{IssueStatus, SortKey};

use crate::rows::{IssueRow, RunRow};

fn by_identity(a: &RunRow, b: &RunRow) -> Ordering {
    a.reference
        .issue_id
        .cmp(&b.reference.issue_id)
        .then_with(|| a.reference.run_id.cmp(&b.reference.run_id))
        .then_with(|| a.short_id.cmp(&b.short_id))
}

/// Most recent first; rows without a timestamp go last.
fn by_updated_desc(a: &RunRow, b: &RunRow) -> Ordering {
    b.updated_at.cmp(&a.updated_at)
}

pub fn compare_rows(key: SortKey, a: &RunRow, b: &RunRow) -> Ordering {
    match key {
        SortKey::Status => a
            .status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| by_updated_desc(a, b))
            .then_with(|| by_identity(a, b)),
        SortKey::Updated => by_updated_desc(a, b).then_with(|| by_identity(a, b)),
        SortKey::Name => by_identity(a, b),
    }
}

/// Sorts in place and renumbers `index` to `1..=N`.
pub fn sort_rows(rows: &mut [RunRow], key: SortKey) {
    rows.sort_by(|a, b| compare_rows(key, a, b));
    for (position, row) in rows.iter_mut().enumerate() {
        row.index = position + 1;
    }
}

fn issue_status_rank(status: IssueStatus) -> u8 {
    match status {
        IssueStatus::Open => 0,
        IssueStatus::Resolved => 1,
        IssueStatus::Closed => 2,
    }
}

/// Open issues first, then by id.
pub fn sort_issue_rows(rows: &mut [IssueRow]) {
    rows.sort_by(|a, b| {
        issue_status_rank(a.status)
            .cmp(&issue_status_rank(b.status))
            .then_with(|| a.id.cmp(&b.id))
    });
    for (position, row) in rows.iter_mut().enumerate() {
        row.index = position + 1;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use vigil_core::{RunRef, RunStatus};

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    fn row(issue: &str, run: &str, status: RunStatus, minute: Option<u32>) -> RunRow {
        RunRow {
            index: 99,
            reference: RunRef::new(issue, run),
            short_id: run.chars().take(8).collect(),
            status,
            agent: None,
            branch: None,
            phase: None,
            merge_state: None,
            pr_url: None,
            pr_label: None,
            issue_status: None,
            issue_title: None,
            issue_topic: None,
            unanswered: Vec::new(),
            session_name: None,
            updated_at: minute.map(at),
        }
    }

    fn refs(rows: &[RunRow]) -> Vec<String> {
        rows.iter().map(|row| row.reference.to_string()).collect()
    }

    fn sample() -> Vec<RunRow> {
        vec![
            row("B", "r1", RunStatus::Done, Some(50)),
            row("A", "r2", RunStatus::Blocked, Some(10)),
            row("A", "r1", RunStatus::Running, Some(5)),
            row("C", "r1", RunStatus::Other("paused".to_string()), Some(59)),
            row("A", "r3", RunStatus::Blocked, Some(10)),
            row("D", "r1", RunStatus::Unknown, None),
        ]
    }

    #[test]
    fn status_key_uses_rank_then_recency_then_ids() {
        let mut rows = sample();
        sort_rows(&mut rows, SortKey::Status);
        assert_eq!(refs(&rows), vec!["A/r1", "A/r2", "A/r3", "B/r1", "D/r1", "C/r1"]);
    }

    #[test]
    fn updated_key_is_newest_first_with_undated_last() {
        let mut rows = sample();
        sort_rows(&mut rows, SortKey::Updated);
        assert_eq!(refs(&rows), vec!["C/r1", "B/r1", "A/r2", "A/r3", "A/r1", "D/r1"]);
    }

    #[test]
    fn name_key_orders_by_issue_then_run() {
        let mut rows = sample();
        sort_rows(&mut rows, SortKey::Name);
        assert_eq!(refs(&rows), vec!["A/r1", "A/r2", "A/r3", "B/r1", "C/r1", "D/r1"]);
    }

    #[test]
    fn sorting_is_repeatable_and_renumbers_from_one() {
        for key in [SortKey::Name, SortKey::Updated, SortKey::Status] {
            let mut first = sample();
            sort_rows(&mut first, key);
            let mut reversed = sample();
            reversed.reverse();
            sort_rows(&mut reversed, key);
            assert_eq!(first, reversed, "key {key}");
            for (position, row) in first.iter().enumerate() {
                assert_eq!(row.index, position + 1);
            }
        }
    }

    #[test]
    fn issue_rows_put_open_first() {
        let issue = |id: &str, status| IssueRow {
            index: 0,
            id: id.to_string(),
            title: id.to_string(),
            status,
            topic: None,
            runs: 0,
            active_runs: 0,
            unanswered: 0,
        };
        let mut rows = vec![
            issue("A", IssueStatus::Closed),
            issue("C", IssueStatus::Open),
            issue("B", IssueStatus::Open),
            issue("D", IssueStatus::Resolved),
        ];
        sort_issue_rows(&mut rows);
        let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "D", "A"]);
        assert_eq!(rows[3].index, 4);
    }
}
