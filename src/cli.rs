use crate::backend::{BrokerApi, HttpBackend};
use crate::model::{Address, BrokerId, ClientConfig, NewProfile, DEFAULT_BROKER_SET};
use crate::orchestrator::{
    process_workflow_completion, run_workflow, AppState, DiscoveryView, Selection,
    WorkflowEvent, WorkflowPlan,
};
use crate::text_summary::{self, TextSummary};
use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

type Output = mpsc::UnboundedSender<OutputLine>;

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (Output, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "cloak",
    version,
    about = "Drive data-broker discovery and removal jobs on a local cloak backend"
)]
pub struct Cli {
    /// Base URL of the local backend service
    #[arg(
        long,
        env = "CLOAK_BASE_URL",
        default_value = "http://127.0.0.1:5179",
        global = true
    )]
    pub base_url: String,

    /// Interval between job status fetches
    #[arg(long, default_value = "2s", global = true)]
    pub poll_interval: humantime::Duration,

    /// Timeout for a single backend request
    #[arg(long, default_value = "30s", global = true)]
    pub request_timeout: humantime::Duration,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Check that the backend is reachable
    Health,

    /// List or create subject profiles
    #[command(subcommand)]
    Profiles(ProfilesCommand),

    /// List the named broker sets discovery can run against
    BrokerSets,

    /// Run discovery, review the findings and optionally start removal
    Run(RunArgs),

    /// Attach to an existing discovery job and apply review actions
    Review(ReviewArgs),

    /// List removal jobs, newest first
    History,

    /// Show one removal job
    Removal {
        job_id: String,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ProfilesCommand {
    List,
    Create(CreateProfileArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CreateProfileArgs {
    #[arg(long)]
    pub label: String,

    #[arg(long = "name")]
    pub names: Vec<String>,

    #[arg(long = "email")]
    pub emails: Vec<String>,

    #[arg(long = "phone")]
    pub phones: Vec<String>,

    /// Postal address as `street,city,state,zip,country` (repeatable)
    #[arg(long = "address")]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Args, Clone)]
pub struct ReviewActions {
    /// Broker ids to mark as false positive
    #[arg(long = "false-positive", value_delimiter = ',')]
    pub false_positives: Vec<BrokerId>,

    /// Broker ids to confirm as true matches
    #[arg(long = "verify", value_delimiter = ',')]
    pub verified: Vec<BrokerId>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Subject profile id
    #[arg(long)]
    pub profile: String,

    /// Broker set key
    #[arg(long, default_value = DEFAULT_BROKER_SET)]
    pub broker_set: String,

    #[command(flatten)]
    pub review: ReviewActions,

    /// `all` or a comma-separated list of broker ids
    #[arg(long, default_value = "all", value_parser = parse_selection)]
    pub select: Selection,

    /// Hand the selection off to a removal job
    #[arg(long)]
    pub remove: bool,

    /// Export the workflow report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub auto_save: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ReviewArgs {
    pub job_id: String,

    /// Subject profile the job was started for
    #[arg(long)]
    pub profile: Option<String>,

    #[command(flatten)]
    pub review: ReviewActions,
}

fn parse_selection(s: &str) -> Result<Selection, String> {
    if s.trim().eq_ignore_ascii_case("all") {
        return Ok(Selection::All);
    }
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.parse::<BrokerId>()
                .map_err(|e| format!("invalid broker id {part:?}: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Selection::Only)
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.trim_end_matches('/').to_string(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("cloak/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        futures::future::pending::<()>().await;
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let api: Arc<dyn BrokerApi> =
        Arc::new(HttpBackend::new(&cfg).context("failed to build backend client")?);
    let (out_tx, out_handle) = spawn_output_writer();

    let res = dispatch(&args, &cfg, api, &out_tx).await;

    drop(out_tx);
    let _ = out_handle.await;
    res
}

async fn dispatch(
    args: &Cli,
    cfg: &ClientConfig,
    api: Arc<dyn BrokerApi>,
    out: &Output,
) -> Result<()> {
    match &args.command {
        Command::Health => {
            api.health()
                .await
                .with_context(|| format!("backend at {} is not healthy", cfg.base_url))?;
            if args.json {
                emit_json(out, &serde_json::json!({ "ok": true, "base_url": cfg.base_url }))?;
            } else {
                let _ = out.send(OutputLine::Stdout(format!("Backend OK: {}", cfg.base_url)));
            }
        }
        Command::Profiles(ProfilesCommand::List) => {
            let profiles = api.list_profiles().await.context("failed to list profiles")?;
            if args.json {
                emit_json(out, &profiles)?;
            } else {
                emit_summary(out, text_summary::build_profiles_summary(&profiles));
            }
        }
        Command::Profiles(ProfilesCommand::Create(p)) => {
            let profile = NewProfile {
                label: p.label.clone(),
                names: p.names.clone(),
                emails: p.emails.clone(),
                phones: p.phones.clone(),
                addresses: p.addresses.clone(),
            }
            .validated()?;
            let id = api
                .create_profile(&profile)
                .await
                .context("failed to create profile")?;
            if args.json {
                emit_json(out, &serde_json::json!({ "id": id }))?;
            } else {
                let _ = out.send(OutputLine::Stdout(format!("Created profile {id}")));
            }
        }
        Command::BrokerSets => {
            let sets = api
                .list_broker_sets()
                .await
                .context("failed to list broker sets")?;
            if args.json {
                emit_json(out, &sets)?;
            } else {
                emit_summary(out, text_summary::build_broker_sets_summary(&sets));
            }
        }
        Command::Run(run) => run_command(args, cfg, api, run, out).await?,
        Command::Review(review) => review_command(args, cfg, api, review, out).await?,
        Command::History => {
            let state = AppState::new(api, cfg.poll_interval);
            let jobs = state
                .removal
                .load_history()
                .await
                .context("failed to load removal history")?;
            if args.json {
                emit_json(out, &jobs)?;
            } else {
                emit_summary(out, text_summary::build_history_summary(&jobs));
            }
        }
        Command::Removal { job_id } => {
            let state = AppState::new(api, cfg.poll_interval);
            let job = state
                .removal
                .inspect(job_id)
                .await
                .with_context(|| format!("failed to load removal job {job_id}"))?;
            if args.json {
                emit_json(out, &job)?;
            } else {
                emit_summary(out, text_summary::build_removal_summary(&job));
            }
        }
    }
    Ok(())
}

async fn run_command(
    args: &Cli,
    cfg: &ClientConfig,
    api: Arc<dyn BrokerApi>,
    run: &RunArgs,
    out: &Output,
) -> Result<()> {
    let mut state = AppState::new(api, cfg.poll_interval);
    let plan = WorkflowPlan {
        profile_id: run.profile.clone(),
        broker_set: run.broker_set.clone(),
        false_positives: run.review.false_positives.clone(),
        verified: run.review.verified.clone(),
        selection: run.select.clone(),
        remove: run.remove,
    };

    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let progress = tokio::spawn(forward_progress(evt_rx, out.clone()));

    let outcome = tokio::select! {
        res = run_workflow(&mut state, &plan, &evt_tx) => Some(res),
        _ = shutdown_signal() => None,
    };
    if outcome.is_none() {
        state.discovery.stop();
        state.removal.stop();
    }
    drop(evt_tx);
    let _ = progress.await;

    let Some(res) = outcome else {
        let _ = out.send(OutputLine::Stderr(
            "Interrupted; jobs keep running on the backend.".into(),
        ));
        return Ok(());
    };
    let report = match res {
        Ok(report) => report,
        Err(e) => {
            let kind = e.kind();
            return Err(anyhow::Error::new(e).context(format!("workflow failed ({kind} error)")));
        }
    };

    let auto_save_dir = run.auto_save.then(crate::storage::reports_dir);
    let processed =
        process_workflow_completion(run.export_json.as_deref(), auto_save_dir.as_deref(), &report);

    if args.json {
        emit_json(out, &report)?;
    } else {
        emit_summary(out, text_summary::build_workflow_summary(&report));
    }
    for msg in processed.export_messages {
        let _ = out.send(OutputLine::Stderr(msg));
    }
    if let Some(p) = processed.auto_saved_path {
        let _ = out.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
    }

    if !report.succeeded() {
        anyhow::bail!("workflow did not complete successfully");
    }
    Ok(())
}

async fn review_command(
    args: &Cli,
    cfg: &ClientConfig,
    api: Arc<dyn BrokerApi>,
    review: &ReviewArgs,
    out: &Output,
) -> Result<()> {
    let mut state = AppState::new(api, cfg.poll_interval);
    state
        .discovery
        .attach(&review.job_id, review.profile.as_deref())
        .await
        .with_context(|| format!("failed to load discovery job {}", review.job_id))?;

    let mut view = state.discovery.snapshot();
    if view.phase.is_active() {
        let mut rx = state.discovery.subscribe();
        let mut last = String::new();
        loop {
            let current = rx.borrow_and_update().clone();
            let line = text_summary::discovery_progress_line(&current);
            if line != last {
                let _ = out.send(OutputLine::Stderr(line.clone()));
                last = line;
            }
            if !current.phase.is_active() {
                view = current;
                break;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        view = current;
                        break;
                    }
                }
                _ = shutdown_signal() => {
                    state.discovery.stop();
                    view = state.discovery.snapshot();
                    break;
                }
            }
        }
    }

    for broker_id in &review.review.false_positives {
        state
            .discovery
            .mark_false_positive(*broker_id)
            .await
            .with_context(|| format!("failed to mark broker {broker_id} as false positive"))?;
    }
    for broker_id in &review.review.verified {
        state
            .discovery
            .verify_positive(*broker_id)
            .await
            .with_context(|| format!("failed to verify broker {broker_id}"))?;
    }
    if !review.review.false_positives.is_empty() || !review.review.verified.is_empty() {
        view = state.discovery.snapshot();
    }

    print_discovery(args, out, &view)
}

fn print_discovery(args: &Cli, out: &Output, view: &DiscoveryView) -> Result<()> {
    if args.json {
        emit_json(out, view)
    } else {
        emit_summary(out, text_summary::build_discovery_summary(view, None));
        Ok(())
    }
}

/// Render workflow events as progress lines on stderr, skipping repeats.
async fn forward_progress(mut rx: mpsc::UnboundedReceiver<WorkflowEvent>, out: Output) {
    let mut last = String::new();
    while let Some(ev) = rx.recv().await {
        let line = match ev {
            WorkflowEvent::Discovery(view) => text_summary::discovery_progress_line(&view),
            WorkflowEvent::Removal(view) => text_summary::removal_progress_line(&view),
            WorkflowEvent::Message(msg) => msg,
        };
        if line != last {
            let _ = out.send(OutputLine::Stderr(line.clone()));
            last = line;
        }
    }
}

fn emit_json<T: Serialize + ?Sized>(out: &Output, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    let _ = out.send(OutputLine::Stdout(body));
    Ok(())
}

fn emit_summary(out: &Output, summary: TextSummary) {
    for line in summary.lines {
        let _ = out.send(OutputLine::Stdout(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let cli = Cli::try_parse_from(["cloak", "health"]).unwrap();
        let cfg = build_config(&cli);
        if std::env::var_os("CLOAK_BASE_URL").is_none() {
            assert_eq!(cfg.base_url, "http://127.0.0.1:5179");
        }
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(cfg.user_agent.starts_with("cloak/"));
    }

    #[test]
    fn run_flags_parse_into_a_plan() {
        let cli = Cli::try_parse_from([
            "cloak",
            "run",
            "--profile",
            "P1",
            "--false-positive",
            "3,7",
            "--select",
            "1,4",
            "--remove",
            "--poll-interval",
            "500ms",
        ])
        .unwrap();
        assert_eq!(build_config(&cli).poll_interval, Duration::from_millis(500));
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.broker_set, "quick_scan");
        assert_eq!(run.review.false_positives, vec![BrokerId(3), BrokerId(7)]);
        assert_eq!(run.select, Selection::Only(vec![BrokerId(1), BrokerId(4)]));
        assert!(run.remove);
        assert!(run.auto_save);
    }

    #[test]
    fn profile_addresses_are_repeatable() {
        let cli = Cli::try_parse_from([
            "cloak",
            "profiles",
            "create",
            "--label",
            "me",
            "--address",
            "1 Main St,Springfield,IL,62701,US",
            "--address",
            ",Portland,OR",
        ])
        .unwrap();
        let Command::Profiles(ProfilesCommand::Create(p)) = cli.command else {
            panic!("expected profiles create");
        };
        assert_eq!(p.addresses.len(), 2);
        assert_eq!(p.addresses[0].country.as_deref(), Some("US"));
        assert_eq!(p.addresses[1].street, None);
        assert_eq!(p.addresses[1].state.as_deref(), Some("OR"));

        let profile = NewProfile {
            label: p.label,
            addresses: p.addresses,
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_eq!(profile.addresses.len(), 2);
    }

    #[test]
    fn selection_parser() {
        assert_eq!(parse_selection("ALL"), Ok(Selection::All));
        assert_eq!(
            parse_selection("2, 5,"),
            Ok(Selection::Only(vec![BrokerId(2), BrokerId(5)]))
        );
        assert!(parse_selection("x").is_err());
    }
}
