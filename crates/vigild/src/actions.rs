//! Operator-initiated actions. Unlike refresh, failures here are returned to
//! the caller with the collaborator's own output intact.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use vigil_agents::{
    default_adapter_for, wait_until_ready, AgentError, CommandProbe, PromptInjection, ReadyWait,
};
use vigil_core::{
    AgentKind, Event, EventKind, IssueStatus, Run, RunRef, RunStore, StoreError, VigilConfig,
};
use vigil_forge::{CodeHost, ForgeError, PrDraft};
use vigil_mux::{Multiplexer, MuxError};

use crate::reconcile::{ensure_run_session, resolve_run_window, session_for_run, ReconcileError};
use crate::refresh::PR_ARTIFACT;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("run {reference} has no workspace yet")]
    NoWorkspace { reference: RunRef },
    #[error("run {reference} has no branch")]
    NoBranch { reference: RunRef },
    #[error("run {reference} has no unanswered question '{question}'")]
    UnknownQuestion { reference: RunRef, question: String },
    #[error("{action} failed: {source}")]
    Mux {
        action: &'static str,
        #[source]
        source: MuxError,
    },
    #[error("{action} failed: {source}")]
    Agent {
        action: &'static str,
        #[source]
        source: AgentError,
    },
    #[error("{action} failed: {source}")]
    Forge {
        action: &'static str,
        #[source]
        source: ForgeError,
    },
}

impl ActionError {
    /// Output the failing collaborator printed, unmodified.
    pub fn captured_output(&self) -> Option<String> {
        let output = match self {
            ActionError::Mux {
                source: MuxError::CommandFailed { stdout, stderr, .. },
                ..
            } => join_output(stderr, stdout),
            ActionError::Agent {
                source: AgentError::ReadyTimeout { last_output, .. },
                ..
            } => last_output.clone(),
            ActionError::Agent {
                source: AgentError::Mux(MuxError::CommandFailed { stdout, stderr, .. }),
                ..
            } => join_output(stderr, stdout),
            ActionError::Forge { source, .. } => source.captured_output()?,
            _ => return None,
        };
        Some(output).filter(|output| !output.trim().is_empty())
    }

    fn mux(action: &'static str) -> impl FnOnce(MuxError) -> Self {
        move |source| ActionError::Mux { action, source }
    }

    fn agent(action: &'static str) -> impl FnOnce(AgentError) -> Self {
        move |source| ActionError::Agent { action, source }
    }

    fn reconcile(action: &'static str, reference: &RunRef) -> impl FnOnce(ReconcileError) -> Self {
        let reference = reference.clone();
        move |err| match err {
            ReconcileError::Mux(source) => ActionError::Mux { action, source },
            ReconcileError::Store(source) => ActionError::Store(source),
            _ => ActionError::NoWorkspace { reference },
        }
    }
}

fn join_output(stderr: &str, stdout: &str) -> String {
    [stderr, stdout]
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Start {
        reference: RunRef,
        prompt: Option<String>,
        agent: Option<AgentKind>,
    },
    Stop {
        reference: RunRef,
    },
    Answer {
        reference: RunRef,
        question: String,
        text: String,
    },
    CreatePr {
        reference: RunRef,
        title: Option<String>,
        body: Option<String>,
    },
    ResolveIssue {
        id: String,
    },
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            UserAction::Start { .. } => "start",
            UserAction::Stop { .. } => "stop",
            UserAction::Answer { .. } => "answer",
            UserAction::CreatePr { .. } => "create pr",
            UserAction::ResolveIssue { .. } => "resolve issue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Started {
        reference: RunRef,
        agent: AgentKind,
        pane: String,
        waited: Duration,
    },
    Stopped {
        reference: RunRef,
        killed_session: bool,
    },
    Answered {
        reference: RunRef,
        question: String,
        delivered: bool,
    },
    PrCreated {
        reference: RunRef,
        url: String,
    },
    IssueResolved {
        id: String,
    },
}

/// Collaborators the actions run against.
#[derive(Clone)]
pub struct ActionContext {
    pub store: Arc<dyn RunStore>,
    pub mux: Arc<dyn Multiplexer>,
    pub forge: Arc<dyn CodeHost>,
    pub probe: Arc<dyn CommandProbe + Send + Sync>,
    pub dashboard: String,
    pub config: VigilConfig,
    pub ready: ReadyWait,
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("dashboard", &self.dashboard)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl ActionContext {
    pub fn new(
        store: Arc<dyn RunStore>,
        mux: Arc<dyn Multiplexer>,
        forge: Arc<dyn CodeHost>,
        probe: Arc<dyn CommandProbe + Send + Sync>,
        dashboard: impl Into<String>,
        config: VigilConfig,
    ) -> Self {
        let ready = ReadyWait {
            timeout: Duration::from_secs(config.agents.ready_timeout_secs),
            poll: Duration::from_millis(config.agents.ready_poll_ms),
        };
        Self {
            store,
            mux,
            forge,
            probe,
            dashboard: dashboard.into(),
            config,
            ready,
        }
    }

    fn append(&self, reference: &RunRef, event: Event) -> Result<(), ActionError> {
        self.store.append_event(reference, &event)?;
        tracing::info!(run = %reference, kind = %event.kind, name = %event.name, "event appended");
        Ok(())
    }

    /// First pane of the run's live window, if the session exists.
    fn live_pane(&self, run: &Run, action: &'static str) -> Result<Option<String>, ActionError> {
        let session = session_for_run(&self.dashboard, run);
        if !self.mux.has_session(&session).map_err(ActionError::mux(action))? {
            return Ok(None);
        }
        let window = resolve_run_window(self.mux.as_ref(), &session, run.window_id.as_deref())
            .map_err(ActionError::reconcile(action, &run.reference))?;
        let pane = self
            .mux
            .list_panes(&window.id)
            .map_err(ActionError::mux(action))?
            .into_iter()
            .min_by_key(|pane| pane.index)
            .map(|pane| pane.id);
        Ok(pane)
    }
}

pub fn perform(ctx: &ActionContext, action: &UserAction) -> Result<ActionOutcome, ActionError> {
    match action {
        UserAction::Start {
            reference,
            prompt,
            agent,
        } => start_run(ctx, reference, prompt.as_deref(), *agent),
        UserAction::Stop { reference } => stop_run(ctx, reference),
        UserAction::Answer {
            reference,
            question,
            text,
        } => answer(ctx, reference, question, text),
        UserAction::CreatePr {
            reference,
            title,
            body,
        } => create_pr(ctx, reference, title.as_deref(), body.as_deref()),
        UserAction::ResolveIssue { id } => resolve_issue(ctx, id),
    }
}

/// Launches the agent in the run's session, waits for it to accept input and
/// hands it the prompt.
pub fn start_run(
    ctx: &ActionContext,
    reference: &RunRef,
    prompt: Option<&str>,
    agent: Option<AgentKind>,
) -> Result<ActionOutcome, ActionError> {
    const ACTION: &str = "start";
    let run = ctx.store.get_run(reference)?;
    let kind = agent
        .or_else(|| run.agent.as_deref().and_then(|name| name.parse().ok()))
        .unwrap_or(ctx.config.agents.default);
    let adapter = default_adapter_for(kind);
    adapter
        .ensure_available(ctx.probe.as_ref())
        .map_err(ActionError::agent(ACTION))?;
    let ready_pattern = adapter.ready_regex().map_err(ActionError::agent(ACTION))?;

    ensure_run_session(ctx.mux.as_ref(), &ctx.dashboard, &run)
        .map_err(ActionError::mux(ACTION))?
        .ok_or_else(|| ActionError::NoWorkspace {
            reference: reference.clone(),
        })?;
    let pane = ctx
        .live_pane(&run, ACTION)?
        .ok_or_else(|| ActionError::NoWorkspace {
            reference: reference.clone(),
        })?;

    let injection = adapter.prompt_injection();
    let inline_prompt = match injection {
        PromptInjection::Argument => prompt,
        PromptInjection::SendKeys => None,
    };
    ctx.mux
        .send_keys(&pane, &adapter.launch_command(inline_prompt), true)
        .map_err(ActionError::mux(ACTION))?;
    let waited = wait_until_ready(ctx.mux.as_ref(), &pane, &ready_pattern, ctx.ready)
        .map_err(ActionError::agent(ACTION))?;

    if injection == PromptInjection::SendKeys {
        if let Some(prompt) = prompt.map(str::trim).filter(|prompt| !prompt.is_empty()) {
            ctx.mux
                .send_keys(&pane, prompt, true)
                .map_err(ActionError::mux(ACTION))?;
        }
    }

    ctx.append(
        reference,
        Event::new(Utc::now(), EventKind::Status, "running").with_attr("agent", kind.as_str()),
    )?;
    Ok(ActionOutcome::Started {
        reference: reference.clone(),
        agent: kind,
        pane,
        waited,
    })
}

/// Kills the run's session (if any) and marks the run canceled.
pub fn stop_run(ctx: &ActionContext, reference: &RunRef) -> Result<ActionOutcome, ActionError> {
    const ACTION: &str = "stop";
    let run = ctx.store.get_run(reference)?;
    let session = session_for_run(&ctx.dashboard, &run);
    let killed_session = match ctx.mux.kill_session(&session) {
        Ok(()) => true,
        Err(err) if err.is_missing_target() => false,
        Err(source) => return Err(ActionError::Mux { action: ACTION, source }),
    };
    ctx.append(reference, Event::new(Utc::now(), EventKind::Status, "canceled"))?;
    Ok(ActionOutcome::Stopped {
        reference: reference.clone(),
        killed_session,
    })
}

/// Records the answer, then types it into the run's pane when one is live.
pub fn answer(
    ctx: &ActionContext,
    reference: &RunRef,
    question: &str,
    text: &str,
) -> Result<ActionOutcome, ActionError> {
    const ACTION: &str = "answer";
    let run = ctx.store.get_run(reference)?;
    let open = run
        .unanswered_questions()
        .iter()
        .any(|event| event.name == question);
    if !open {
        return Err(ActionError::UnknownQuestion {
            reference: reference.clone(),
            question: question.to_string(),
        });
    }

    ctx.append(
        reference,
        Event::new(Utc::now(), EventKind::Answer, question).with_attr("text", text),
    )?;

    let delivered = match ctx.live_pane(&run, ACTION)? {
        Some(pane) => {
            ctx.mux
                .send_keys(&pane, text, true)
                .map_err(ActionError::mux(ACTION))?;
            true
        }
        None => false,
    };
    Ok(ActionOutcome::Answered {
        reference: reference.clone(),
        question: question.to_string(),
        delivered,
    })
}

/// Opens a pull request for the run's branch and records its URL.
pub fn create_pr(
    ctx: &ActionContext,
    reference: &RunRef,
    title: Option<&str>,
    body: Option<&str>,
) -> Result<ActionOutcome, ActionError> {
    const ACTION: &str = "create pr";
    let run = ctx.store.get_run(reference)?;
    let branch = run
        .branch
        .clone()
        .filter(|branch| !branch.trim().is_empty())
        .ok_or_else(|| ActionError::NoBranch {
            reference: reference.clone(),
        })?;
    let issue = ctx.store.resolve_issue(&reference.issue_id).ok();

    let draft = PrDraft {
        base: ctx.config.git.base_branch.clone(),
        head: branch,
        title: title
            .map(str::to_string)
            .or_else(|| issue.as_ref().map(|issue| format!("{}: {}", issue.id, issue.title)))
            .unwrap_or_else(|| reference.to_string()),
        body: body
            .map(str::to_string)
            .or_else(|| issue.as_ref().map(|issue| issue.summary.clone()))
            .unwrap_or_default(),
    };
    let cwd: &Path = run
        .worktree_path
        .as_deref()
        .unwrap_or_else(|| ctx.store.vault_path());
    let url = ctx
        .forge
        .pr_create(cwd, &draft)
        .map_err(|source| ActionError::Forge {
            action: ACTION,
            source,
        })?;

    ctx.append(
        reference,
        Event::new(Utc::now(), EventKind::Artifact, PR_ARTIFACT).with_attr("url", url.as_str()),
    )?;
    Ok(ActionOutcome::PrCreated {
        reference: reference.clone(),
        url,
    })
}

pub fn resolve_issue(ctx: &ActionContext, id: &str) -> Result<ActionOutcome, ActionError> {
    let issue = ctx.store.resolve_issue(id)?;
    ctx.store.set_issue_status(&issue.id, IssueStatus::Resolved)?;
    tracing::info!(issue = %issue.id, "issue resolved");
    Ok(ActionOutcome::IssueResolved { id: issue.id })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use chrono::{DateTime, TimeZone};
    use vigil_core::{Issue, RunStatus};
    use vigil_forge::PullRequest;
    use vigil_mux::FakeMux;

    use super::*;
    use crate::vault::{RunMeta, VaultStore};

    const DASH: &str = "vigil-0badcafe";

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    struct StaticProbe(HashSet<&'static str>);

    impl CommandProbe for StaticProbe {
        fn command_exists(&self, executable: &str) -> bool {
            self.0.contains(executable)
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        drafts: Mutex<Vec<PrDraft>>,
        failure: Option<String>,
    }

    impl CodeHost for RecordingHost {
        fn pr_lookup(&self, _cwd: &Path, _branch: &str) -> Result<Option<PullRequest>, ForgeError> {
            Ok(None)
        }

        fn pr_create(&self, _cwd: &Path, draft: &PrDraft) -> Result<String, ForgeError> {
            if let Some(stderr) = &self.failure {
                return Err(ForgeError::CommandFailed {
                    command: "gh pr create".to_string(),
                    status: Some(1),
                    stdout: String::new(),
                    stderr: stderr.clone(),
                });
            }
            if let Ok(mut drafts) = self.drafts.lock() {
                drafts.push(draft.clone());
            }
            Ok("https://github.com/acme/app/pull/9".to_string())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<VaultStore>,
        mux: Arc<FakeMux>,
        host: Arc<RecordingHost>,
        ctx: ActionContext,
        reference: RunRef,
    }

    fn fixture_with_host(host: RecordingHost) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(VaultStore::new(dir.path()));
        let mut issue = Issue::new("ISS-1", "Flaky login");
        issue.summary = "Login fails under load.".to_string();
        store.save_issue(&issue).expect("issue");

        let reference = RunRef::new("ISS-1", "r1");
        for event in [
            Event::new(at(1), EventKind::Status, "blocked"),
            Event::new(at(2), EventKind::Question, "q1").with_attr("text", "pick A or B"),
        ] {
            store.append_event(&reference, &event).expect("append");
        }
        store
            .save_run_meta(
                &reference,
                &RunMeta {
                    branch: Some("iss-1/r1".to_string()),
                    worktree: Some(PathBuf::from("wt/r1")),
                    ..RunMeta::default()
                },
            )
            .expect("meta");

        let mux = Arc::new(FakeMux::new());
        let host = Arc::new(host);
        let probe = Arc::new(StaticProbe(HashSet::from(["claude", "gemini"])));
        let mut ctx = ActionContext::new(
            store.clone(),
            mux.clone(),
            host.clone(),
            probe,
            DASH,
            VigilConfig::default(),
        );
        ctx.ready = ReadyWait {
            timeout: Duration::from_millis(50),
            poll: Duration::from_millis(5),
        };
        Fixture {
            _dir: dir,
            store,
            mux,
            host,
            ctx,
            reference,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_host(RecordingHost::default())
    }

    impl Fixture {
        fn run(&self) -> Run {
            self.store.get_run(&self.reference).expect("run")
        }

        /// Creates the run session and returns its pane.
        fn live_session(&self) -> String {
            let run = self.run();
            ensure_run_session(self.mux.as_ref(), DASH, &run)
                .expect("session")
                .expect("worktree");
            self.ctx
                .live_pane(&run, "test")
                .expect("pane lookup")
                .expect("pane")
        }
    }

    #[test]
    fn start_launches_agent_with_inline_prompt_and_marks_running() {
        let fx = fixture();
        let pane = fx.live_session();
        fx.mux.set_pane_output(&pane, "Welcome to Claude\n> ");

        let outcome = start_run(&fx.ctx, &fx.reference, Some("fix it"), None).expect("start");
        assert!(matches!(outcome, ActionOutcome::Started { agent: AgentKind::Claude, .. }));
        assert_eq!(fx.mux.sent_keys(&pane), vec!["claude 'fix it'\n"]);
        let run = fx.run();
        assert_eq!(run.status(), RunStatus::Running);
        assert_eq!(run.events.last().and_then(|e| e.attr("agent")), Some("claude"));
    }

    #[test]
    fn start_types_prompt_for_send_keys_agents() {
        let fx = fixture();
        let pane = fx.live_session();
        fx.mux.set_pane_output(&pane, "Type your message");

        start_run(&fx.ctx, &fx.reference, Some("fix it"), Some(AgentKind::Gemini)).expect("start");
        assert_eq!(fx.mux.sent_keys(&pane), vec!["gemini\n", "fix it\n"]);
    }

    #[test]
    fn start_fails_when_agent_missing_or_never_ready() {
        let fx = fixture();
        let err = start_run(&fx.ctx, &fx.reference, None, Some(AgentKind::Codex))
            .expect_err("codex is not installed");
        assert!(matches!(
            err,
            ActionError::Agent {
                source: AgentError::Unavailable { .. },
                ..
            }
        ));

        let pane = fx.live_session();
        fx.mux.set_pane_output(&pane, "npm ERR! missing module");
        let err = start_run(&fx.ctx, &fx.reference, None, None).expect_err("never ready");
        assert_eq!(err.captured_output().as_deref(), Some("npm ERR! missing module"));
        assert_eq!(fx.run().status(), RunStatus::Blocked);
    }

    #[test]
    fn stop_kills_session_and_cancels() {
        let fx = fixture();
        fx.live_session();
        let outcome = stop_run(&fx.ctx, &fx.reference).expect("stop");
        assert_eq!(
            outcome,
            ActionOutcome::Stopped {
                reference: fx.reference.clone(),
                killed_session: true,
            }
        );
        assert!(fx.mux.session_names().is_empty());
        assert_eq!(fx.run().status(), RunStatus::Canceled);

        let again = stop_run(&fx.ctx, &fx.reference).expect("stop without session");
        assert!(matches!(again, ActionOutcome::Stopped { killed_session: false, .. }));
    }

    #[test]
    fn answer_records_event_and_types_into_live_pane() {
        let fx = fixture();
        let outcome = answer(&fx.ctx, &fx.reference, "q1", "A").expect("answer");
        assert!(matches!(outcome, ActionOutcome::Answered { delivered: false, .. }));
        assert!(fx.run().unanswered_questions().is_empty());

        let err = answer(&fx.ctx, &fx.reference, "q1", "B").expect_err("already answered");
        assert!(matches!(err, ActionError::UnknownQuestion { .. }));
    }

    #[test]
    fn answer_is_delivered_when_session_is_live() {
        let fx = fixture();
        let pane = fx.live_session();
        answer(&fx.ctx, &fx.reference, "q1", "A").expect("answer");
        assert_eq!(fx.mux.sent_keys(&pane), vec!["A\n"]);
    }

    #[test]
    fn create_pr_uses_issue_defaults_and_records_artifact() {
        let fx = fixture();
        let outcome = create_pr(&fx.ctx, &fx.reference, None, None).expect("pr");
        assert_eq!(
            outcome,
            ActionOutcome::PrCreated {
                reference: fx.reference.clone(),
                url: "https://github.com/acme/app/pull/9".to_string(),
            }
        );
        let drafts = fx.host.drafts.lock().expect("drafts").clone();
        assert_eq!(drafts[0].base, "main");
        assert_eq!(drafts[0].head, "iss-1/r1");
        assert_eq!(drafts[0].title, "ISS-1: Flaky login");
        assert_eq!(drafts[0].body, "Login fails under load.");
        assert_eq!(
            crate::refresh::recorded_pr_url(&fx.run()).as_deref(),
            Some("https://github.com/acme/app/pull/9")
        );
    }

    #[test]
    fn create_pr_failure_keeps_gh_output_verbatim() {
        let fx = fixture_with_host(RecordingHost {
            failure: Some("a pull request for branch \"iss-1/r1\" already exists".to_string()),
            ..RecordingHost::default()
        });
        let err = create_pr(&fx.ctx, &fx.reference, Some("t"), Some("b")).expect_err("gh fails");
        assert_eq!(
            err.captured_output().as_deref(),
            Some("a pull request for branch \"iss-1/r1\" already exists")
        );
        assert!(crate::refresh::recorded_pr_url(&fx.run()).is_none());
    }

    #[test]
    fn resolve_issue_updates_status() {
        let fx = fixture();
        perform(
            &fx.ctx,
            &UserAction::ResolveIssue {
                id: "ISS-1".to_string(),
            },
        )
        .expect("resolve");
        assert_eq!(
            fx.store.resolve_issue("ISS-1").expect("issue").status,
            IssueStatus::Resolved
        );
        assert!(matches!(
            resolve_issue(&fx.ctx, "ISS-404"),
            Err(ActionError::Store(StoreError::IssueNotFound { .. }))
        ));
    }
}
