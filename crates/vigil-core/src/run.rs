//! Run aggregate. Everything but identity and workspace metadata is derived
//! from the event log on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::events::{Event, EventKind};
use crate::types::{RunRef, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub reference: RunRef,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub window_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Run {
    pub fn new(reference: RunRef) -> Self {
        Self {
            reference,
            branch: None,
            worktree_path: None,
            session_name: None,
            window_id: None,
            agent: None,
            events: Vec::new(),
        }
    }

    pub fn status(&self) -> RunStatus {
        derive_status(&self.events)
    }

    pub fn unanswered_questions(&self) -> Vec<&Event> {
        unanswered_questions(&self.events)
    }

    /// Name of the latest `phase` event.
    pub fn phase(&self) -> Option<&str> {
        ordered_events(&self.events)
            .into_iter()
            .rev()
            .find(|event| event.kind == EventKind::Phase)
            .map(|event| event.name.as_str())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|event| event.at).min()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|event| event.at).max()
    }

    pub fn short_id(&self) -> &str {
        self.reference.short_id()
    }
}

/// Events in ascending timestamp order. Equal timestamps keep log order.
pub fn ordered_events(events: &[Event]) -> Vec<&Event> {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by_key(|event| event.at);
    ordered
}

pub fn derive_status(events: &[Event]) -> RunStatus {
    ordered_events(events)
        .into_iter()
        .rev()
        .find(|event| event.kind == EventKind::Status)
        .map(|event| RunStatus::from_name(&event.name))
        .unwrap_or(RunStatus::Unknown)
}

/// Questions with no matching `answer` later in the ordered log. A question
/// asked again while still open keeps only its latest occurrence.
pub fn unanswered_questions(events: &[Event]) -> Vec<&Event> {
    let mut open: Vec<&Event> = Vec::new();
    for event in ordered_events(events) {
        match event.kind {
            EventKind::Question => {
                open.retain(|question| question.name != event.name);
                open.push(event);
            }
            EventKind::Answer => open.retain(|question| question.name != event.name),
            _ => {}
        }
    }
    open
}
