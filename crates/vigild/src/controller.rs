//! Single owner of all mutable session state.
//!
//! The controller thread holds the reconciler, the active filter and sort and
//! the last snapshot. Anything that shells out runs on a worker thread and
//! reports back through the same inbox as a completion, so state transitions
//! only ever happen on the controller thread. The reconciler itself is lent
//! to the worker for topology operations and returned with the completion,
//! even when the operation panics. Topology commands arriving meanwhile are
//! queued in order; a queued reconcile absorbs further reconciles and a
//! queued sync is replaced by the newer one.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use vigil_core::{RunRef, SortKey, StoreError};
use vigil_view::{IssueRow, RunFilter, RunRow};

use crate::actions::{perform, ActionContext, ActionError, ActionOutcome, UserAction};
use crate::reconcile::{
    Attachment, DriftRepair, LayoutOutcome, OpenedRun, ReconcileError, Reconciler, Role,
    SyncReport,
};
use crate::refresh::{RefreshSnapshot, RowBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Refresh,
    /// Layout check followed by drift repair.
    Reconcile,
    SetFilter(RunFilter),
    SetSort(SortKey),
    OpenRun(RunRef),
    AttachRun(RunRef),
    DetachRun,
    SwitchRole(Role),
    /// Links exactly the runs of the current filtered view.
    SyncWindows,
    Action(UserAction),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Snapshot {
        rows: Vec<RunRow>,
        issues: Vec<IssueRow>,
        filter_summary: String,
        warnings: Vec<String>,
    },
    Reconciled {
        layout: LayoutOutcome,
        drift: DriftRepair,
    },
    Opened(OpenedRun),
    Attached(Attachment),
    Detached(Option<RunRef>),
    Switched {
        role: Role,
        pane: String,
    },
    Synced(SyncReport),
    ActionSucceeded(ActionOutcome),
    ActionFailed {
        action: &'static str,
        message: String,
        output: Option<String>,
    },
    Error {
        context: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TopologyCommand {
    Reconcile,
    Open(RunRef),
    Attach(RunRef),
    Detach,
    Switch(Role),
    Sync(Vec<RunRef>),
}

impl TopologyCommand {
    fn context(&self) -> &'static str {
        match self {
            TopologyCommand::Reconcile => "reconcile",
            TopologyCommand::Open(_) => "open",
            TopologyCommand::Attach(_) => "attach",
            TopologyCommand::Detach => "detach",
            TopologyCommand::Switch(_) => "switch",
            TopologyCommand::Sync(_) => "sync",
        }
    }
}

enum Completion {
    Refreshed(Result<RefreshSnapshot, StoreError>),
    Topology {
        reconciler: Reconciler,
        update: Update,
    },
    Action {
        action: &'static str,
        result: Result<ActionOutcome, ActionError>,
    },
    /// A refresh or action worker panicked before producing its completion.
    Panicked {
        context: &'static str,
        message: String,
    },
}

enum Message {
    Command(Command),
    Completion(Completion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("controller has stopped")]
pub struct ControllerStopped;

/// Cloneable sender for [`Command`]s.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    sender: Sender<Message>,
}

impl ControllerHandle {
    pub fn send(&self, command: Command) -> Result<(), ControllerStopped> {
        self.sender
            .send(Message::Command(command))
            .map_err(|_| ControllerStopped)
    }
}

pub struct Controller {
    inbox: Receiver<Message>,
    sender: Sender<Message>,
    updates: Sender<Update>,
    reconciler: Option<Reconciler>,
    builder: RowBuilder,
    actions: ActionContext,
    filter: RunFilter,
    sort: SortKey,
    snapshot: Option<RefreshSnapshot>,
    refresh_in_flight: bool,
    refresh_pending: bool,
    refreshes_started: usize,
    topology_queue: VecDeque<TopologyCommand>,
    workers: usize,
    shutting_down: bool,
}

impl Controller {
    pub fn new(
        reconciler: Reconciler,
        builder: RowBuilder,
        actions: ActionContext,
        filter: RunFilter,
        sort: SortKey,
    ) -> (Self, ControllerHandle, Receiver<Update>) {
        let (sender, inbox) = mpsc::channel();
        let (updates, update_rx) = mpsc::channel();
        let controller = Self {
            inbox,
            sender: sender.clone(),
            updates,
            reconciler: Some(reconciler),
            builder,
            actions,
            filter,
            sort,
            snapshot: None,
            refresh_in_flight: false,
            refresh_pending: false,
            refreshes_started: 0,
            topology_queue: VecDeque::new(),
            workers: 0,
            shutting_down: false,
        };
        (controller, ControllerHandle { sender }, update_rx)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    /// Processes messages until shutdown has been requested and every worker
    /// has reported back, or every handle is gone.
    pub fn run(mut self) {
        while let Ok(message) = self.inbox.recv() {
            self.handle(message);
            if self.shutting_down && self.workers == 0 {
                break;
            }
        }
        tracing::debug!("controller stopped");
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Command(command) => self.handle_command(command),
            Message::Completion(completion) => {
                self.workers = self.workers.saturating_sub(1);
                self.handle_completion(completion);
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        if self.shutting_down {
            tracing::debug!(?command, "ignoring command during shutdown");
            return;
        }
        match command {
            Command::Refresh => self.request_refresh(),
            Command::Reconcile => self.enqueue_topology(TopologyCommand::Reconcile),
            Command::SetFilter(filter) => {
                self.filter = filter;
                self.publish_snapshot();
            }
            Command::SetSort(sort) => {
                self.sort = sort;
                self.publish_snapshot();
            }
            Command::OpenRun(reference) => self.enqueue_topology(TopologyCommand::Open(reference)),
            Command::AttachRun(reference) => {
                self.enqueue_topology(TopologyCommand::Attach(reference))
            }
            Command::DetachRun => self.enqueue_topology(TopologyCommand::Detach),
            Command::SwitchRole(role) => self.enqueue_topology(TopologyCommand::Switch(role)),
            Command::SyncWindows => {
                let desired = self
                    .snapshot
                    .as_ref()
                    .map(|snapshot| {
                        snapshot
                            .project(&self.filter, self.sort)
                            .into_iter()
                            .map(|row| row.reference)
                            .collect()
                    })
                    .unwrap_or_default();
                self.enqueue_topology(TopologyCommand::Sync(desired));
            }
            Command::Action(action) => self.start_action(action),
            Command::Shutdown => self.shutting_down = true,
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Refreshed(result) => {
                self.refresh_in_flight = false;
                match result {
                    Ok(snapshot) => {
                        self.snapshot = Some(snapshot);
                        self.publish_snapshot();
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "refresh failed");
                        self.emit(Update::Error {
                            context: "refresh",
                            message: err.to_string(),
                        });
                    }
                }
                if self.refresh_pending && !self.shutting_down {
                    self.refresh_pending = false;
                    self.start_refresh();
                }
            }
            Completion::Topology { reconciler, update } => {
                self.reconciler = Some(reconciler);
                self.emit(update);
                self.drain_topology();
            }
            Completion::Action { action, result } => {
                match result {
                    Ok(outcome) => self.emit(Update::ActionSucceeded(outcome)),
                    Err(err) => {
                        tracing::warn!(action, error = %err, "action failed");
                        self.emit(Update::ActionFailed {
                            action,
                            message: err.to_string(),
                            output: err.captured_output(),
                        });
                    }
                }
                self.request_refresh();
            }
            Completion::Panicked { context, message } => {
                tracing::error!(context, reason = %message, "worker panicked");
                self.emit(Update::Error { context, message });
                if context == "refresh" {
                    self.refresh_in_flight = false;
                    if self.refresh_pending && !self.shutting_down {
                        self.refresh_pending = false;
                        self.start_refresh();
                    }
                }
            }
        }
    }

    fn emit(&self, update: Update) {
        if self.updates.send(update).is_err() {
            tracing::debug!("update receiver dropped");
        }
    }

    fn publish_snapshot(&self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        self.emit(Update::Snapshot {
            rows: snapshot.project(&self.filter, self.sort),
            issues: snapshot.issues.clone(),
            filter_summary: self.filter.summary(),
            warnings: snapshot.warnings.clone(),
        });
    }

    fn request_refresh(&mut self) {
        if self.refresh_in_flight {
            self.refresh_pending = true;
            return;
        }
        self.start_refresh();
    }

    fn start_refresh(&mut self) {
        self.refresh_in_flight = true;
        self.refreshes_started += 1;
        tracing::debug!(cycle = self.refreshes_started, "refresh started");
        let builder = self.builder.clone();
        self.spawn_worker("refresh", move || Completion::Refreshed(builder.refresh()));
    }

    fn start_action(&mut self, action: UserAction) {
        let ctx = self.actions.clone();
        self.spawn_worker(action.name(), move || Completion::Action {
            action: action.name(),
            result: perform(&ctx, &action),
        });
    }

    fn enqueue_topology(&mut self, command: TopologyCommand) {
        match &command {
            TopologyCommand::Reconcile if self.topology_queue.contains(&command) => {
                tracing::trace!("reconcile already queued");
                return;
            }
            TopologyCommand::Sync(_) => self
                .topology_queue
                .retain(|queued| !matches!(queued, TopologyCommand::Sync(_))),
            _ => {}
        }
        self.topology_queue.push_back(command);
        self.drain_topology();
    }

    /// Lends the reconciler to a worker for the next queued command.
    fn drain_topology(&mut self) {
        if self.shutting_down {
            self.topology_queue.clear();
            return;
        }
        if self.reconciler.is_none() {
            return;
        }
        let Some(command) = self.topology_queue.pop_front() else {
            return;
        };
        let Some(reconciler) = self.reconciler.take() else {
            return;
        };
        self.spawn_worker(command.context(), move || {
            lend_reconciler(reconciler, &command, apply_topology)
        });
    }

    fn spawn_worker<F>(&mut self, context: &'static str, work: F)
    where
        F: FnOnce() -> Completion + Send + 'static,
    {
        self.workers += 1;
        let sender = self.sender.clone();
        thread::spawn(move || {
            let completion =
                panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
                    Completion::Panicked {
                        context,
                        message: panic_message(payload.as_ref()),
                    }
                });
            if sender.send(Message::Completion(completion)).is_err() {
                tracing::debug!("controller gone before completion");
            }
        });
    }
}

/// Runs `apply` on the lent reconciler and always hands it back, turning an
/// error or a panic into an [`Update::Error`].
fn lend_reconciler<F>(mut reconciler: Reconciler, command: &TopologyCommand, apply: F) -> Completion
where
    F: FnOnce(&mut Reconciler, &TopologyCommand) -> Result<Update, ReconcileError>,
{
    let context = command.context();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| apply(&mut reconciler, command)));
    let update = match outcome {
        Ok(Ok(update)) => update,
        Ok(Err(err)) => {
            tracing::warn!(context, error = %err, "topology operation failed");
            Update::Error {
                context,
                message: err.to_string(),
            }
        }
        Err(payload) => {
            let message = format!("topology worker panicked: {}", panic_message(payload.as_ref()));
            tracing::error!(context, reason = %message, "topology operation panicked");
            Update::Error { context, message }
        }
    };
    Completion::Topology { reconciler, update }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn apply_topology(
    reconciler: &mut Reconciler,
    command: &TopologyCommand,
) -> Result<Update, ReconcileError> {
    match command {
        TopologyCommand::Reconcile => {
            let layout = reconciler.ensure_layout()?;
            let drift = reconciler.repair_drift()?;
            Ok(Update::Reconciled { layout, drift })
        }
        TopologyCommand::Open(reference) => {
            let run = reconciler.store().get_run(reference)?;
            Ok(Update::Opened(reconciler.open_run(&run)?))
        }
        TopologyCommand::Attach(reference) => {
            let run = reconciler.store().get_run(reference)?;
            Ok(Update::Attached(reconciler.attach_run(&run)?))
        }
        TopologyCommand::Detach => Ok(Update::Detached(reconciler.detach_run()?)),
        TopologyCommand::Switch(role) => Ok(Update::Switched {
            role: *role,
            pane: reconciler.switch_role(*role)?,
        }),
        TopologyCommand::Sync(references) => {
            let mut runs = Vec::with_capacity(references.len());
            for reference in references {
                match reconciler.store().get_run(reference) {
                    Ok(run) => runs.push(run),
                    Err(err) => tracing::debug!(run = %reference, error = %err, "run vanished before sync"),
                }
            }
            Ok(Update::Synced(reconciler.sync_windows(&runs)?))
        }
    }
}
