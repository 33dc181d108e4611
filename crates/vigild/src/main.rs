use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vigil_core::{AgentKind, RunRef, RunStore, SortKey};
use vigil_view::{IssueRow, RunFilter, RunRow, MISSING};
use vigild::{
    perform, ActionError, ActionOutcome, Command, Controller, DriftRepair, Role, Update,
    UserAction, Workspace, WorkspaceOptions,
};

const LOG_ENV: &str = "VIGIL_LOG";

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Keeps a tmux dashboard in line with a vault of agent runs", long_about = None)]
struct Cli {
    /// Vault directory (defaults to the current directory).
    #[arg(long, global = true)]
    vault: Option<PathBuf>,
    /// Config file (defaults to <vault>/.vigil/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// tmux server socket name.
    #[arg(long, global = true)]
    socket: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List runs through the active filter
    Runs {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        sort: Option<SortKey>,
        #[arg(long)]
        json: bool,
    },
    /// List issues
    Issues {
        #[arg(long)]
        json: bool,
        /// Redraw every few seconds until interrupted.
        #[arg(long)]
        watch: bool,
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Link a run's window into the dashboard and select it
    Open {
        reference: RunRef,
        /// Swap the run's pane into the chat slot instead.
        #[arg(long)]
        attach: bool,
    },
    /// Swap an attached run pane back to its session
    Detach,
    /// Focus a dashboard pane
    Switch { role: Role },
    /// Ensure the dashboard layout
    Layout,
    /// Ensure the layout and repair chat-slot drift
    Repair,
    /// Link exactly the filtered runs into the dashboard
    Sync {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        sort: Option<SortKey>,
    },
    /// Launch a run's agent
    Start {
        reference: RunRef,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        agent: Option<AgentKind>,
    },
    /// Kill a run's session and cancel it
    Stop { reference: RunRef },
    /// Answer a run's question
    Answer {
        reference: RunRef,
        question: String,
        text: String,
    },
    /// Open a pull request for a run's branch
    Pr {
        reference: RunRef,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Mark an issue resolved
    Resolve { issue: String },
    /// Reconcile and refresh periodically until SIGINT/SIGTERM
    Watch {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Also keep the dashboard's linked windows in step with the view.
        #[arg(long)]
        sync: bool,
    },
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Comma-separated statuses, `active` or `all`.
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    agent: Option<String>,
    /// merged | no-change | clean | conflict
    #[arg(long)]
    merge: Option<String>,
    /// all | has | none
    #[arg(long)]
    pr: Option<String>,
    #[arg(long = "issue-status")]
    issue_status: Option<String>,
    /// Issue id substring or /regex/.
    #[arg(long)]
    issue: Option<String>,
    /// e.g. 2d, 1w, 90m
    #[arg(long)]
    updated: Option<String>,
    /// Start from an empty filter instead of the active statuses.
    #[arg(long)]
    all: bool,
}

impl FilterArgs {
    fn build(&self) -> Result<RunFilter> {
        let mut filter = if self.all {
            RunFilter::all()
        } else {
            RunFilter::default()
        };
        let fields = [
            ("status", &self.status),
            ("agent", &self.agent),
            ("merge", &self.merge),
            ("pr", &self.pr),
            ("issue-status", &self.issue_status),
            ("issue", &self.issue),
            ("updated", &self.updated),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                filter
                    .set(field, value)
                    .with_context(|| format!("invalid --{field}"))?;
            }
        }
        Ok(filter)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let vault = match cli.vault {
        Some(vault) => vault,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let workspace = Workspace::open(&WorkspaceOptions {
        vault,
        config: cli.config,
        socket: cli.socket,
    })?;

    match cli.command {
        Commands::Runs { filter, sort, json } => {
            let filter = filter.build()?;
            let sort = sort.unwrap_or(workspace.config.view.sort);
            let snapshot = workspace.row_builder().refresh()?;
            let rows = snapshot.project(&filter, sort);
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_runs(&rows, &filter.summary(), &snapshot.warnings);
            }
        }
        Commands::Issues {
            json,
            watch,
            interval,
        } => {
            if watch {
                let stop = install_stop_flag()?;
                while !stop.load(Ordering::Relaxed) {
                    let snapshot = workspace.row_builder().refresh()?;
                    print!("\x1b[2J\x1b[H");
                    print_issues(&snapshot.issues);
                    io::stdout().flush()?;
                    sleep_until_stopped(&stop, Duration::from_secs(interval.max(1)));
                }
            } else {
                let snapshot = workspace.row_builder().refresh()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&snapshot.issues)?);
                } else {
                    print_issues(&snapshot.issues);
                }
            }
        }
        Commands::Open { reference, attach } => {
            let run = workspace.store.get_run(&reference)?;
            let mut reconciler = workspace.reconciler();
            if attach {
                let attachment = reconciler.attach_run(&run)?;
                println!("attached {} ({})", attachment.reference, attachment.run_pane);
            } else {
                let opened = reconciler.open_run(&run)?;
                println!(
                    "opened {} at {}:{}",
                    opened.reference, workspace.dashboard, opened.index
                );
            }
        }
        Commands::Detach => {
            // A fresh process has no attachment record; drift repair swaps
            // back whatever run pane occupies the chat slot.
            let mut reconciler = workspace.reconciler();
            match reconciler.repair_drift()? {
                DriftRepair::Restored(reference) => println!("detached {reference}"),
                _ => println!("nothing attached"),
            }
        }
        Commands::Switch { role } => {
            let pane = workspace.reconciler().switch_role(role)?;
            println!("{role} -> {pane}");
        }
        Commands::Layout => {
            let outcome = workspace.reconciler().ensure_layout()?;
            println!("layout: {outcome:?}");
        }
        Commands::Repair => {
            let mut reconciler = workspace.reconciler();
            let layout = reconciler.ensure_layout()?;
            let drift = reconciler.repair_drift()?;
            println!("layout: {layout:?}, drift: {drift:?}");
        }
        Commands::Sync { filter, sort } => {
            let filter = filter.build()?;
            let sort = sort.unwrap_or(workspace.config.view.sort);
            let snapshot = workspace.row_builder().refresh()?;
            let mut runs = Vec::new();
            for row in snapshot.project(&filter, sort) {
                runs.push(workspace.store.get_run(&row.reference)?);
            }
            let report = workspace.reconciler().sync_windows(&runs)?;
            println!(
                "linked {}, unlinked {}, skipped {}",
                report.linked.len(),
                report.unlinked.len(),
                report.skipped.len()
            );
            for reference in &report.skipped {
                eprintln!("skipped {reference}: session or window unavailable");
            }
        }
        Commands::Start {
            reference,
            prompt,
            agent,
        } => run_action(
            &workspace,
            UserAction::Start {
                reference,
                prompt,
                agent,
            },
        )?,
        Commands::Stop { reference } => run_action(&workspace, UserAction::Stop { reference })?,
        Commands::Answer {
            reference,
            question,
            text,
        } => run_action(
            &workspace,
            UserAction::Answer {
                reference,
                question,
                text,
            },
        )?,
        Commands::Pr {
            reference,
            title,
            body,
        } => run_action(
            &workspace,
            UserAction::CreatePr {
                reference,
                title,
                body,
            },
        )?,
        Commands::Resolve { issue } => {
            run_action(&workspace, UserAction::ResolveIssue { id: issue })?
        }
        Commands::Watch {
            filter,
            interval,
            sync,
        } => watch(&workspace, filter.build()?, Duration::from_secs(interval.max(1)), sync)?,
    }

    Ok(())
}

fn run_action(workspace: &Workspace, action: UserAction) -> Result<()> {
    match perform(&workspace.actions(), &action) {
        Ok(outcome) => {
            println!("{}", describe_outcome(&outcome));
            Ok(())
        }
        Err(err) => {
            report_action_error(&err);
            bail!("{} failed", action.name())
        }
    }
}

fn report_action_error(err: &ActionError) {
    eprintln!("error: {err}");
    if let Some(output) = err.captured_output() {
        eprintln!("{output}");
    }
}

fn describe_outcome(outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Started {
            reference,
            agent,
            pane,
            waited,
        } => format!(
            "started {agent} for {reference} in {pane} (ready after {}ms)",
            waited.as_millis()
        ),
        ActionOutcome::Stopped {
            reference,
            killed_session,
        } => {
            if *killed_session {
                format!("stopped {reference}")
            } else {
                format!("canceled {reference} (no live session)")
            }
        }
        ActionOutcome::Answered {
            reference,
            question,
            delivered,
        } => {
            let suffix = if *delivered { "" } else { " (recorded only)" };
            format!("answered {question} on {reference}{suffix}")
        }
        ActionOutcome::PrCreated { url, .. } => url.clone(),
        ActionOutcome::IssueResolved { id } => format!("resolved {id}"),
    }
}

fn install_stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok(stop)
}

fn sleep_until_stopped(stop: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn watch(workspace: &Workspace, filter: RunFilter, interval: Duration, sync: bool) -> Result<()> {
    let stop = install_stop_flag()?;
    let (controller, handle, updates) = Controller::new(
        workspace.reconciler(),
        workspace.row_builder(),
        workspace.actions(),
        filter,
        workspace.config.view.sort,
    );
    let worker = controller.spawn();
    let mut next_tick = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        if Instant::now() >= next_tick {
            handle.send(Command::Reconcile)?;
            handle.send(Command::Refresh)?;
            next_tick = Instant::now() + interval;
        }
        match updates.recv_timeout(Duration::from_millis(100)) {
            Ok(Update::Snapshot {
                rows,
                filter_summary,
                warnings,
                ..
            }) => {
                print!("\x1b[2J\x1b[H");
                print_runs(&rows, &filter_summary, &warnings);
                io::stdout().flush()?;
                if sync {
                    handle.send(Command::SyncWindows)?;
                }
            }
            Ok(Update::Reconciled { drift, .. }) if drift != DriftRepair::None => {
                tracing::info!(?drift, "repaired dashboard drift");
            }
            Ok(Update::ActionFailed {
                action,
                message,
                output,
            }) => {
                eprintln!("{action}: {message}");
                if let Some(output) = output {
                    eprintln!("{output}");
                }
            }
            Ok(Update::Error { context, message }) => {
                tracing::warn!(%context, "{message}");
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = handle.send(Command::Shutdown);
    if worker.join().is_err() {
        bail!("controller thread panicked");
    }
    Ok(())
}

fn print_runs(rows: &[RunRow], summary: &str, warnings: &[String]) {
    if !summary.is_empty() {
        println!("{summary}");
    }
    println!(
        "{:>3}  {:<24} {:<16} {:<8} {:<10} {:<12} {:>2}  {}",
        "#", "RUN", "STATUS", "AGENT", "MERGE", "PR", "Q", "UPDATED"
    );
    let now = Utc::now();
    for row in rows {
        let updated = row
            .updated_at
            .map(|at| {
                let age = (now - at).to_std().unwrap_or_default();
                let rounded = Duration::from_secs(age.as_secs() / 60 * 60);
                format!("{} ago", humantime::format_duration(rounded))
            })
            .unwrap_or_else(|| MISSING.to_string());
        println!(
            "{:>3}  {:<24} {:<16} {:<8} {:<10} {:<12} {:>2}  {}",
            row.index,
            row.reference.to_string(),
            row.status.as_str(),
            row.agent.as_deref().unwrap_or(MISSING),
            row.merge_label(),
            row.pr_display(),
            row.unanswered.len(),
            updated,
        );
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
}

fn print_issues(rows: &[IssueRow]) {
    println!(
        "{:>3}  {:<12} {:<9} {:>4} {:>6} {:>2}  {}",
        "#", "ISSUE", "STATUS", "RUNS", "ACTIVE", "Q", "TITLE"
    );
    for row in rows {
        println!(
            "{:>3}  {:<12} {:<9} {:>4} {:>6} {:>2}  {}",
            row.index,
            row.id,
            row.status.as_str(),
            row.runs,
            row.active_runs,
            row.unanswered,
            row.title,
        );
    }
}
