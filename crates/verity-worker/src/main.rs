//! `verity` binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the
//! SQLite store and either runs the analysis workers or performs a single
//! operation against the store and exits.
//!
//! ```text
//! verity run
//! verity submit --submitter alice "The Eiffel Tower is 330 m tall"
//! verity claims --attention
//! verity approve <claim-id> --reviewer bob
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use verity_core::{
  claim::NewClaim,
  job::{JobKind, JobState},
  lifecycle::ClaimStatus,
  store::{ClaimQuery, ClaimStore as _, JobStore as _},
  verdict::{HumanVerdictInput, VerdictEdit, VerdictLabel},
};
use verity_engine::{AiProcessingHandler, ClaimIntake, ClaimWorkflow, FailureRecorder};
use verity_queue::{JobQueue, SystemClock};
use verity_store_sqlite::SqliteStore;
use verity_worker::{HttpAnalyzer, LogNotifier, WorkerConfig};

type Workflow = ClaimWorkflow<SqliteStore, HttpAnalyzer, LogNotifier>;

#[derive(Parser)]
#[command(name = "verity", author, version, about = "Verity fact-checking pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Process analysis jobs until interrupted.
  Run,

  /// Submit a claim and queue it for analysis.
  Submit {
    #[arg(long)]
    submitter: String,
    text:      String,
  },

  /// List claims.
  Claims {
    #[arg(long)]
    status:    Option<ClaimStatus>,
    /// Only pending claims whose analysis was abandoned.
    #[arg(long)]
    attention: bool,
    #[arg(long)]
    submitter: Option<String>,
    #[arg(long)]
    limit:     Option<usize>,
  },

  /// Show a claim with its verdicts and who answers for the outcome.
  Show { claim_id: Uuid },

  /// Approve the AI verdict on a claim as-is.
  Approve {
    claim_id: Uuid,
    #[arg(long)]
    reviewer: String,
  },

  /// Edit the AI verdict on a claim. Editing publishes it.
  Edit {
    claim_id:    Uuid,
    #[arg(long)]
    reviewer:    String,
    #[arg(long)]
    label:       Option<VerdictLabel>,
    #[arg(long)]
    explanation: Option<String>,
  },

  /// Publish a reviewer-authored verdict.
  Verdict {
    claim_id:    Uuid,
    #[arg(long)]
    reviewer:    String,
    #[arg(long)]
    label:       VerdictLabel,
    #[arg(long)]
    explanation: String,
  },

  /// Reject a claim.
  Reject {
    claim_id: Uuid,
    #[arg(long)]
    reviewer: String,
    #[arg(long)]
    reason:   String,
  },

  /// List queued jobs.
  Jobs {
    #[arg(long)]
    state: Option<JobState>,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let cfg = WorkerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = cfg.store_path();
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  match cli.command {
    Command::Run => run(&cfg, store).await,

    Command::Submit { submitter, text } => {
      let queue = Arc::new(queue(&cfg, store.clone())?);
      let intake = ClaimIntake::new(store, queue, Some(cfg.job_options()));
      let (claim, job_id) = intake
        .submit(NewClaim::new(submitter, text))
        .await
        .context("failed to submit claim")?;
      info!(claim_id = %claim.claim_id, %job_id, "claim queued for analysis");
      print_json(&claim)
    }

    Command::Claims { status, attention, submitter, limit } => {
      let query = ClaimQuery {
        status,
        needs_attention: attention,
        submitter_id: submitter,
        limit,
        offset: None,
      };
      let claims = store.list_claims(&query).await.context("failed to list claims")?;
      print_json(&claims)
    }

    Command::Show { claim_id } => {
      let workflow = workflow(&cfg, store.clone())?;
      let claim = store
        .find_claim(claim_id)
        .await?
        .with_context(|| format!("claim {claim_id} not found"))?;
      let ai_verdict = match claim.ai_verdict_id {
        Some(id) => store.find_ai_verdict(id).await?,
        None => None,
      };
      let verdict = match claim.verdict_id {
        Some(id) => store.find_verdict(id).await?,
        None => None,
      };
      let responsibility = workflow.responsibility(claim_id).await?;
      print_json(&serde_json::json!({
        "claim":          claim,
        "ai_verdict":     ai_verdict,
        "verdict":        verdict,
        "responsibility": responsibility,
      }))
    }

    Command::Approve { claim_id, reviewer } => {
      let claim = workflow(&cfg, store)?
        .approve_ai_verdict(claim_id, &reviewer)
        .await
        .context("failed to approve verdict")?;
      print_json(&claim)
    }

    Command::Edit { claim_id, reviewer, label, explanation } => {
      let edit = VerdictEdit { label, explanation, evidence: None };
      let claim = workflow(&cfg, store)?
        .edit_ai_verdict(claim_id, &reviewer, edit)
        .await
        .context("failed to edit verdict")?;
      print_json(&claim)
    }

    Command::Verdict { claim_id, reviewer, label, explanation } => {
      let input = HumanVerdictInput { label, explanation, evidence: Vec::new() };
      let claim = workflow(&cfg, store)?
        .create_human_verdict(claim_id, &reviewer, input)
        .await
        .context("failed to create verdict")?;
      print_json(&claim)
    }

    Command::Reject { claim_id, reviewer, reason } => {
      let claim = workflow(&cfg, store)?
        .reject(claim_id, &reviewer, &reason)
        .await
        .context("failed to reject claim")?;
      print_json(&claim)
    }

    Command::Jobs { state } => {
      let jobs = store.list_jobs(state).await.context("failed to list jobs")?;
      print_json(&jobs)
    }
  }
}

/// Run the workers and the failure recorder until ctrl-c, then drain.
async fn run(cfg: &WorkerConfig, store: Arc<SqliteStore>) -> anyhow::Result<()> {
  let workflow = workflow(cfg, store.clone())?;

  let mut queue = queue(cfg, store.clone())?;
  queue
    .register(JobKind::AiProcessing, AiProcessingHandler::new(workflow.clone()))
    .context("failed to register ai-processing handler")?;
  let queue = Arc::new(queue);

  let recorder = FailureRecorder::new(workflow, store);
  let recorder = tokio::spawn(recorder.run(queue.subscribe()));

  let workers = queue.start(cfg.concurrency);
  info!(concurrency = cfg.concurrency, analyzer = %cfg.analyzer_url, "verity worker started");

  tokio::signal::ctrl_c()
    .await
    .context("failed to listen for ctrl-c")?;
  info!("shutting down; waiting for running jobs");

  workers.shutdown().await;
  // Dropping the last queue handle closes the event channel, which lets the
  // recorder drain what is left and stop.
  drop(queue);
  recorder.await.context("failure recorder panicked")?;

  info!("verity worker stopped");
  Ok(())
}

fn workflow(cfg: &WorkerConfig, store: Arc<SqliteStore>) -> anyhow::Result<Arc<Workflow>> {
  let analyzer = HttpAnalyzer::new(cfg.analyzer_url.clone(), cfg.analyzer_timeout())
    .context("failed to build analyzer client")?;
  Ok(Arc::new(ClaimWorkflow::new(
    store,
    Arc::new(analyzer),
    Arc::new(LogNotifier),
    cfg.workflow_config(),
  )))
}

fn queue(cfg: &WorkerConfig, store: Arc<SqliteStore>) -> anyhow::Result<JobQueue<SqliteStore>> {
  JobQueue::new(store, Arc::new(SystemClock), cfg.queue_config())
    .context("invalid queue configuration")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
