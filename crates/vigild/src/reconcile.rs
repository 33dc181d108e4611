//! Keeps the multiplexer topology in line with the vault.
//!
//! The dashboard session holds one `dashboard` window with three panes bound
//! to the `runs`, `issues` and `chat` roles. Bindings live in session user
//! options (`@vigil-role-<role>`) so they survive pane-id churn; pane titles
//! are only used to find panes when an option is stale and to detect drift.
//! Each run with a workspace gets its own session, whose window is linked into
//! the dashboard session when opened.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use vigil_core::{Run, RunRef, RunStore, SessionConfig, StoreError};
use vigil_mux::{
    run_session_name, window_target, Multiplexer, MuxError, PaneInfo, SplitDirection, SplitSpec,
    WindowInfo,
};

pub const DASHBOARD_WINDOW: &str = "dashboard";
pub const ROLE_OPTION_PREFIX: &str = "@vigil-role-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Runs,
    Issues,
    Chat,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Runs, Role::Issues, Role::Chat];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Runs => "runs",
            Role::Issues => "issues",
            Role::Chat => "chat",
        }
    }

    pub fn option_key(self) -> String {
        format!("{ROLE_OPTION_PREFIX}{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "runs" => Ok(Role::Runs),
            "issues" => Ok(Role::Issues),
            "chat" => Ok(Role::Chat),
            other => Err(format!("invalid role '{other}'. valid values: runs, issues, chat")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("run {reference} has no workspace yet")]
    NoWorkspace { reference: RunRef },
    #[error("session {session} has no windows")]
    NoWindow { session: String },
    #[error("dashboard has no pane for role {role}")]
    RoleMissing { role: Role },
    #[error("session {session} has no chat pane to swap back")]
    NoChatPane { session: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSettings {
    pub cwd: PathBuf,
    pub chat_command: String,
    pub issues_command: String,
    pub chat_percent: u8,
}

impl LayoutSettings {
    pub fn from_config(vault: impl Into<PathBuf>, session: &SessionConfig) -> Self {
        Self {
            cwd: vault.into(),
            chat_command: session.chat_command.clone(),
            issues_command: session.issues_command.clone(),
            chat_percent: session.chat_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOutcome {
    Unchanged,
    /// Titles or bindings were corrected without touching panes.
    Relabeled,
    Rebuilt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftRepair {
    None,
    /// A run pane left in the chat slot was swapped back to its session.
    Restored(RunRef),
    /// The chat slot carried a stray title that no run explains.
    Relabeled { title: String },
}

/// A run pane currently swapped into the dashboard's chat slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub reference: RunRef,
    pub run_pane: String,
    pub chat_pane: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedRun {
    pub reference: RunRef,
    pub session: String,
    pub window_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub linked: Vec<(u32, RunRef)>,
    pub unlinked: Vec<u32>,
    /// Runs left out because their session or window could not be resolved.
    pub skipped: Vec<RunRef>,
}

impl SyncReport {
    /// True when the topology was not touched. Skipped runs do not count.
    pub fn is_noop(&self) -> bool {
        self.linked.is_empty() && self.unlinked.is_empty()
    }
}

/// Session name for a run: the recorded one, else derived from its ref.
pub fn session_for_run(dashboard: &str, run: &Run) -> String {
    run.session_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| run_session_name(dashboard, &run.reference))
}

/// Creates the run's session in its worktree when missing. A run without a
/// worktree has no session and yields `None`.
pub fn ensure_run_session(
    mux: &dyn Multiplexer,
    dashboard: &str,
    run: &Run,
) -> Result<Option<String>, MuxError> {
    let Some(worktree) = run.worktree_path.as_deref() else {
        return Ok(None);
    };
    let session = session_for_run(dashboard, run);
    if !mux.has_session(&session)? {
        mux.new_session(&session, worktree, &run.reference.to_string(), None)?;
        tracing::info!(run = %run.reference, session, "created run session");
    }
    Ok(Some(session))
}

/// The run's window: the recorded id while it still exists in the session,
/// else the session's lowest-indexed window.
pub fn resolve_run_window(
    mux: &dyn Multiplexer,
    session: &str,
    recorded: Option<&str>,
) -> Result<WindowInfo, ReconcileError> {
    let windows = mux.list_windows(session)?;
    if let Some(recorded) = recorded {
        if let Some(window) = windows.iter().find(|window| window.id == recorded) {
            return Ok(window.clone());
        }
        tracing::debug!(session, recorded, "recorded window id is stale");
    }
    windows
        .into_iter()
        .min_by_key(|window| window.index)
        .ok_or_else(|| ReconcileError::NoWindow {
            session: session.to_string(),
        })
}

/// Smallest index above `reserved` that no window occupies.
pub fn next_free_index(windows: &[WindowInfo], reserved: u32) -> u32 {
    let used: HashSet<u32> = windows.iter().map(|window| window.index).collect();
    (reserved + 1..)
        .find(|index| !used.contains(index))
        .unwrap_or(reserved + 1)
}

fn find_dashboard_window(windows: &[WindowInfo]) -> Option<&WindowInfo> {
    windows
        .iter()
        .filter(|window| window.name == DASHBOARD_WINDOW)
        .min_by_key(|window| window.index)
        .or_else(|| windows.iter().min_by_key(|window| window.index))
}

struct Bound<'a> {
    runs: &'a PaneInfo,
    issues: &'a PaneInfo,
    chat: &'a PaneInfo,
}

/// Owns every topology mutation for one dashboard session.
pub struct Reconciler {
    mux: Arc<dyn Multiplexer>,
    store: Arc<dyn RunStore>,
    dashboard: String,
    settings: LayoutSettings,
    active: Option<Attachment>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("dashboard", &self.dashboard)
            .field("settings", &self.settings)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        store: Arc<dyn RunStore>,
        dashboard: impl Into<String>,
        settings: LayoutSettings,
    ) -> Self {
        Self {
            mux,
            store,
            dashboard: dashboard.into(),
            settings,
            active: None,
        }
    }

    pub fn dashboard(&self) -> &str {
        &self.dashboard
    }

    pub fn active_run(&self) -> Option<&RunRef> {
        self.active.as_ref().map(|attachment| &attachment.reference)
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.active.as_ref()
    }

    pub fn mux(&self) -> &dyn Multiplexer {
        self.mux.as_ref()
    }

    pub fn store(&self) -> &dyn RunStore {
        self.store.as_ref()
    }

    /// Creates the dashboard session if needed and returns its dashboard
    /// window.
    pub fn ensure_dashboard(&self) -> Result<WindowInfo, ReconcileError> {
        if !self.mux.has_session(&self.dashboard)? {
            self.mux
                .new_session(&self.dashboard, &self.settings.cwd, DASHBOARD_WINDOW, None)?;
            tracing::info!(session = %self.dashboard, "created dashboard session");
        }
        let windows = self.mux.list_windows(&self.dashboard)?;
        find_dashboard_window(&windows)
            .cloned()
            .ok_or_else(|| ReconcileError::NoWindow {
                session: self.dashboard.clone(),
            })
    }

    fn role_option(&self, role: Role) -> Option<String> {
        match self.mux.option(&self.dashboard, &role.option_key()) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(role = %role, error = %err, "role binding unreadable");
                None
            }
        }
    }

    /// Pane bound to `role`: the persisted option if it names a pane of the
    /// window, else the pane titled after the role.
    fn resolve_role<'a>(&self, role: Role, panes: &'a [PaneInfo]) -> Option<&'a PaneInfo> {
        if let Some(bound) = self.role_option(role) {
            if let Some(pane) = panes.iter().find(|pane| pane.id == bound) {
                return Some(pane);
            }
        }
        panes.iter().find(|pane| pane.title == role.as_str())
    }

    fn bind<'a>(&self, panes: &'a [PaneInfo]) -> Option<Bound<'a>> {
        if panes.len() != 3 {
            return None;
        }
        let runs = self.resolve_role(Role::Runs, panes)?;
        let issues = self.resolve_role(Role::Issues, panes)?;
        if runs.id == issues.id {
            return None;
        }
        let chat = panes
            .iter()
            .find(|pane| pane.id != runs.id && pane.id != issues.id)?;
        Some(Bound { runs, issues, chat })
    }

    fn sync_binding(&self, role: Role, pane: &str) -> Result<bool, MuxError> {
        let key = role.option_key();
        if self.mux.option(&self.dashboard, &key)?.as_deref() == Some(pane) {
            return Ok(false);
        }
        self.mux.set_option(&self.dashboard, &key, pane)?;
        Ok(true)
    }

    /// Brings the dashboard window to three panes bound to runs, issues and
    /// chat. A window that already satisfies that is left alone apart from
    /// correcting stale runs/issues titles and bindings; the chat slot's
    /// title is [`Reconciler::repair_drift`]'s concern.
    pub fn ensure_layout(&mut self) -> Result<LayoutOutcome, ReconcileError> {
        let window = self.ensure_dashboard()?;
        let panes = self.mux.list_panes(&window.id)?;

        if let Some(bound) = self.bind(&panes) {
            let mut changed = false;
            for (role, pane) in [(Role::Runs, bound.runs), (Role::Issues, bound.issues)] {
                if pane.title != role.as_str() {
                    self.mux.set_pane_title(&pane.id, role.as_str())?;
                    changed = true;
                }
                changed |= self.sync_binding(role, &pane.id)?;
            }
            changed |= self.sync_binding(Role::Chat, &bound.chat.id)?;
            return Ok(if changed {
                LayoutOutcome::Relabeled
            } else {
                LayoutOutcome::Unchanged
            });
        }

        self.rebuild_layout(&window, panes)?;
        Ok(LayoutOutcome::Rebuilt)
    }

    fn rebuild_layout(
        &mut self,
        window: &WindowInfo,
        mut panes: Vec<PaneInfo>,
    ) -> Result<(), ReconcileError> {
        tracing::info!(session = %self.dashboard, panes = panes.len(), "rebuilding dashboard layout");
        if self.active.is_some() {
            if let Err(err) = self.detach_run() {
                tracing::debug!(error = %err, "detach before rebuild failed");
            }
            panes = self.mux.list_panes(&window.id)?;
        }

        panes.sort_by_key(|pane| pane.index);
        let Some((keep, rest)) = panes.split_first() else {
            return Err(ReconcileError::NoWindow {
                session: self.dashboard.clone(),
            });
        };
        for pane in rest {
            self.mux.kill_pane(&pane.id)?;
        }
        let runs = keep.id.clone();
        self.mux.set_pane_title(&runs, Role::Runs.as_str())?;

        let chat = self.mux.split_pane(
            &SplitSpec::new(runs.as_str(), SplitDirection::Horizontal)
                .size_percent(self.settings.chat_percent)
                .cwd(self.settings.cwd.clone())
                .command(self.settings.chat_command.clone()),
        )?;
        self.mux.set_pane_title(&chat, Role::Chat.as_str())?;

        let issues = self.mux.split_pane(
            &SplitSpec::new(runs.as_str(), SplitDirection::Horizontal)
                .full()
                .cwd(self.settings.cwd.clone())
                .command(self.settings.issues_command.clone()),
        )?;
        self.mux.set_pane_title(&issues, Role::Issues.as_str())?;

        for (role, pane) in [(Role::Runs, &runs), (Role::Issues, &issues), (Role::Chat, &chat)] {
            self.mux.set_option(&self.dashboard, &role.option_key(), pane)?;
        }
        self.active = None;
        Ok(())
    }

    fn chat_slot(&self) -> Result<Option<PaneInfo>, ReconcileError> {
        let window = self.ensure_dashboard()?;
        let panes = self.mux.list_panes(&window.id)?;
        if let Some(bound) = self.bind(&panes) {
            return Ok(Some(bound.chat.clone()));
        }
        Ok(self.resolve_role(Role::Chat, &panes).cloned())
    }

    /// Fixes a chat slot left holding something other than the chat pane.
    /// A title naming a resolvable run means an attachment was never undone:
    /// the run's pane goes back to its session. Any other stray title is
    /// relabeled `chat`.
    pub fn repair_drift(&mut self) -> Result<DriftRepair, ReconcileError> {
        let Some(slot) = self.chat_slot()? else {
            return Ok(DriftRepair::None);
        };
        let title = self.mux.pane_title(&slot.id)?;
        if title == Role::Chat.as_str() {
            return Ok(DriftRepair::None);
        }
        if let Some(active) = &self.active {
            if active.run_pane == slot.id && title == active.reference.to_string() {
                return Ok(DriftRepair::None);
            }
        }

        if let Ok(reference) = title.parse::<RunRef>() {
            match self.restore_run_pane(&reference, &slot) {
                Ok(()) => {
                    tracing::warn!(run = %reference, "restored run pane left in chat slot");
                    self.active = None;
                    return Ok(DriftRepair::Restored(reference));
                }
                Err(err) => {
                    tracing::warn!(run = %reference, error = %err, "drifted run pane unresolvable; relabeling");
                }
            }
        }

        self.mux.set_pane_title(&slot.id, Role::Chat.as_str())?;
        self.sync_binding(Role::Chat, &slot.id)?;
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.run_pane == slot.id)
        {
            self.active = None;
        }
        tracing::warn!(title, "relabeled chat slot");
        Ok(DriftRepair::Relabeled { title })
    }

    fn restore_run_pane(&self, reference: &RunRef, slot: &PaneInfo) -> Result<(), ReconcileError> {
        let run = self.store.get_run(reference)?;
        let session = session_for_run(&self.dashboard, &run);
        if !self.mux.has_session(&session)? {
            return Err(ReconcileError::NoWindow { session });
        }
        let window = resolve_run_window(self.mux.as_ref(), &session, run.window_id.as_deref())?;
        let panes = self.mux.list_panes(&window.id)?;
        let chat_pane = panes
            .iter()
            .find(|pane| pane.title == Role::Chat.as_str())
            .ok_or_else(|| ReconcileError::NoChatPane {
                session: session.clone(),
            })?;

        self.mux.swap_panes(&slot.id, &chat_pane.id)?;
        self.mux.set_pane_title(&chat_pane.id, Role::Chat.as_str())?;
        self.mux.set_pane_title(&slot.id, &reference.to_string())?;
        self.sync_binding(Role::Chat, &chat_pane.id)?;
        Ok(())
    }

    /// Links the run's window into the dashboard session and selects it.
    pub fn open_run(&mut self, run: &Run) -> Result<OpenedRun, ReconcileError> {
        let session = ensure_run_session(self.mux.as_ref(), &self.dashboard, run)?.ok_or_else(
            || ReconcileError::NoWorkspace {
                reference: run.reference.clone(),
            },
        )?;
        self.ensure_layout()?;
        if let Err(err) = self.repair_drift() {
            tracing::debug!(error = %err, "drift repair before open failed");
        }

        let window = resolve_run_window(self.mux.as_ref(), &session, run.window_id.as_deref())?;
        let dashboard_window = self.ensure_dashboard()?;
        let linked = self.mux.list_windows(&self.dashboard)?;
        let index = match linked
            .iter()
            .find(|existing| existing.id == window.id && existing.index != dashboard_window.index)
        {
            Some(existing) => existing.index,
            None => {
                let index = next_free_index(&linked, dashboard_window.index);
                self.mux.link_window(&window.id, &self.dashboard, index)?;
                tracing::info!(run = %run.reference, index, "linked run window");
                index
            }
        };
        self.mux
            .select_window(&window_target(&self.dashboard, index))?;
        Ok(OpenedRun {
            reference: run.reference.clone(),
            session,
            window_id: window.id,
            index,
        })
    }

    /// Selects the dashboard window and the pane bound to `role`.
    pub fn switch_role(&mut self, role: Role) -> Result<String, ReconcileError> {
        let window = self.ensure_dashboard()?;
        self.mux
            .select_window(&window_target(&self.dashboard, window.index))?;
        let panes = self.mux.list_panes(&window.id)?;
        let pane = self
            .resolve_role(role, &panes)
            .or_else(|| match role {
                Role::Chat => self.bind(&panes).map(|bound| bound.chat),
                Role::Runs | Role::Issues => None,
            })
            .ok_or(ReconcileError::RoleMissing { role })?;
        self.mux.select_pane(&pane.id)?;
        Ok(pane.id.clone())
    }

    /// Makes the dashboard session's run windows exactly `desired`, each at
    /// the index following the dashboard window in the given order. Runs
    /// without a workspace are left out silently; runs whose session or
    /// window cannot be resolved are left out and listed in
    /// [`SyncReport::skipped`].
    pub fn sync_windows(&mut self, desired: &[Run]) -> Result<SyncReport, ReconcileError> {
        let dashboard_window = self.ensure_dashboard()?;
        let reserved = dashboard_window.index;

        let mut report = SyncReport::default();
        let mut wanted: Vec<(u32, String, RunRef)> = Vec::new();
        let mut seen = HashSet::new();
        for run in desired {
            let window = match self.run_window(run) {
                Ok(Some(window)) => window,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(run = %run.reference, error = %err, "skipping run window");
                    report.skipped.push(run.reference.clone());
                    continue;
                }
            };
            if window.id == dashboard_window.id || !seen.insert(window.id.clone()) {
                continue;
            }
            let index = reserved + 1 + wanted.len() as u32;
            wanted.push((index, window.id, run.reference.clone()));
        }

        let existing = self.mux.list_windows(&self.dashboard)?;
        for window in existing.iter().filter(|w| w.index != reserved) {
            let keep = wanted
                .iter()
                .any(|(index, id, _)| *index == window.index && *id == window.id);
            if !keep {
                self.mux.unlink_window(&self.dashboard, window.index)?;
                report.unlinked.push(window.index);
            }
        }

        let current: HashSet<(u32, String)> = self
            .mux
            .list_windows(&self.dashboard)?
            .into_iter()
            .map(|window| (window.index, window.id))
            .collect();
        for (index, id, reference) in wanted {
            if current.contains(&(index, id.clone())) {
                continue;
            }
            self.mux.link_window(&id, &self.dashboard, index)?;
            report.linked.push((index, reference));
        }

        if !report.is_noop() || !report.skipped.is_empty() {
            tracing::info!(
                linked = report.linked.len(),
                unlinked = report.unlinked.len(),
                skipped = report.skipped.len(),
                "synced run windows"
            );
        }
        Ok(report)
    }

    fn run_window(&self, run: &Run) -> Result<Option<WindowInfo>, ReconcileError> {
        let Some(session) = ensure_run_session(self.mux.as_ref(), &self.dashboard, run)? else {
            return Ok(None);
        };
        resolve_run_window(self.mux.as_ref(), &session, run.window_id.as_deref()).map(Some)
    }

    /// Swaps the run's pane into the dashboard's chat slot. Any previous
    /// attachment is undone first.
    pub fn attach_run(&mut self, run: &Run) -> Result<Attachment, ReconcileError> {
        if self.active.is_some() {
            self.detach_run()?;
        }
        let session = ensure_run_session(self.mux.as_ref(), &self.dashboard, run)?.ok_or_else(
            || ReconcileError::NoWorkspace {
                reference: run.reference.clone(),
            },
        )?;
        self.ensure_layout()?;
        if let Err(err) = self.repair_drift() {
            tracing::debug!(error = %err, "drift repair before attach failed");
        }

        let window = resolve_run_window(self.mux.as_ref(), &session, run.window_id.as_deref())?;
        let run_pane = self
            .mux
            .list_panes(&window.id)?
            .into_iter()
            .min_by_key(|pane| pane.index)
            .ok_or_else(|| ReconcileError::NoWindow {
                session: session.clone(),
            })?;
        let chat_pane = self
            .chat_slot()?
            .ok_or(ReconcileError::RoleMissing { role: Role::Chat })?;

        self.mux.swap_panes(&run_pane.id, &chat_pane.id)?;
        self.mux
            .set_pane_title(&run_pane.id, &run.reference.to_string())?;
        self.sync_binding(Role::Chat, &run_pane.id)?;
        self.mux.select_pane(&run_pane.id)?;

        let attachment = Attachment {
            reference: run.reference.clone(),
            run_pane: run_pane.id,
            chat_pane: chat_pane.id,
        };
        tracing::info!(run = %attachment.reference, "attached run pane");
        self.active = Some(attachment.clone());
        Ok(attachment)
    }

    /// Swaps the attached run pane back. Returns the run that was attached.
    /// Panes killed out-of-band just clear the attachment; the next
    /// [`Reconciler::ensure_layout`] rebuilds whatever is missing.
    pub fn detach_run(&mut self) -> Result<Option<RunRef>, ReconcileError> {
        let Some(attachment) = self.active.take() else {
            return Ok(None);
        };
        match self.mux.swap_panes(&attachment.run_pane, &attachment.chat_pane) {
            Ok(()) => {}
            Err(err) if err.is_missing_target() => {
                tracing::debug!(run = %attachment.reference, error = %err, "attached pane gone");
                return Ok(Some(attachment.reference));
            }
            Err(err) => {
                self.active = Some(attachment);
                return Err(err.into());
            }
        }
        self.sync_binding(Role::Chat, &attachment.chat_pane)?;
        if self.mux.pane_title(&attachment.chat_pane)? != Role::Chat.as_str() {
            self.mux
                .set_pane_title(&attachment.chat_pane, Role::Chat.as_str())?;
        }
        tracing::info!(run = %attachment.reference, "detached run pane");
        Ok(Some(attachment.reference))
    }
}
