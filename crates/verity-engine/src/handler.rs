//! Glue between the job queue and the workflow.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use verity_core::{
  analyzer::Analyzer,
  job::{JobError, JobEvent, JobKind, JobPayload, JobState},
  lifecycle::ClaimStatus,
  notify::Notifier,
  store::{ClaimStore, JobStore},
};
use verity_queue::{JobContext, JobHandler};

use crate::{ClaimWorkflow, Error, Result};

/// Runs `ai-processing` jobs through [`ClaimWorkflow::process_new_claim`].
///
/// Transient analyzer and store failures are retryable; everything else
/// (permanent analyzer errors, missing claims, invalid input) fails the job
/// immediately.
pub struct AiProcessingHandler<S, A, N> {
  workflow: Arc<ClaimWorkflow<S, A, N>>,
}

impl<S, A, N> AiProcessingHandler<S, A, N> {
  pub fn new(workflow: Arc<ClaimWorkflow<S, A, N>>) -> Self { Self { workflow } }
}

impl<S, A, N> JobHandler for AiProcessingHandler<S, A, N>
where
  S: ClaimStore + 'static,
  A: Analyzer + 'static,
  N: Notifier + 'static,
{
  fn handle(&self, payload: JobPayload, ctx: JobContext) -> BoxFuture<'_, Result<(), JobError>> {
    Box::pin(async move {
      let JobPayload::AiProcessing { claim_id, claim_text } = payload;
      self
        .workflow
        .process_new_claim(claim_id, &claim_text, Some(ctx.timeout))
        .await
        .map(|_| ())
        .map_err(JobError::from)
    })
  }
}

/// Marks claims whose analysis job failed for good, so they surface as
/// needing manual attention.
///
/// Events are a fast path only. The job table is the record of what failed,
/// so the recorder replays it on start and whenever it falls behind the
/// event stream.
pub struct FailureRecorder<S, A, N, J> {
  workflow: Arc<ClaimWorkflow<S, A, N>>,
  jobs:     Arc<J>,
}

impl<S, A, N, J> FailureRecorder<S, A, N, J>
where
  S: ClaimStore,
  A: Analyzer,
  N: Notifier,
  J: JobStore,
{
  pub fn new(workflow: Arc<ClaimWorkflow<S, A, N>>, jobs: Arc<J>) -> Self {
    Self { workflow, jobs }
  }

  /// Handle one queue event. Only failed `ai-processing` jobs matter.
  pub async fn handle_event(&self, event: &JobEvent) -> Result<()> {
    let JobEvent::Failed { job_id, kind: JobKind::AiProcessing, error, .. } = event else {
      return Ok(());
    };

    let job = self
      .jobs
      .get_job(*job_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { what: "job", id: *job_id })?;
    let JobPayload::AiProcessing { claim_id, .. } = job.payload;

    self.workflow.record_analysis_failure(claim_id, error).await
  }

  /// Mark every pending claim whose `ai-processing` job has failed and which
  /// carries no error yet. Returns how many claims were marked.
  pub async fn reconcile(&self) -> Result<usize> {
    let failed = self
      .jobs
      .list_jobs(Some(JobState::Failed))
      .await
      .map_err(Error::store)?;

    let mut marked = 0;
    for job in failed {
      let JobPayload::AiProcessing { claim_id, .. } = job.payload;
      let Some(claim) = self
        .workflow
        .store()
        .find_claim(claim_id)
        .await
        .map_err(Error::store)?
      else {
        continue;
      };
      if claim.status != ClaimStatus::Pending || claim.last_error.is_some() {
        continue;
      }

      let error = job.last_error.as_deref().unwrap_or("analysis job failed");
      self.workflow.record_analysis_failure(claim_id, error).await?;
      marked += 1;
    }

    if marked > 0 {
      info!(marked, "recorded analysis failures missed by the event stream");
    }
    Ok(marked)
  }

  async fn catch_up(&self) {
    if let Err(err) = self.reconcile().await {
      warn!(error = %err, "failed to reconcile failed analysis jobs");
    }
  }

  /// Consume queue events until the channel closes. Subscribe before
  /// calling so no failure slips between the initial replay and the first
  /// event.
  pub async fn run(self, mut events: broadcast::Receiver<JobEvent>) {
    self.catch_up().await;
    loop {
      match events.recv().await {
        Ok(event) => {
          if let Err(err) = self.handle_event(&event).await {
            warn!(job_id = %event.job_id(), error = %err, "failed to record analysis failure");
          }
        }
        Err(RecvError::Lagged(missed)) => {
          warn!(missed, "failure recorder fell behind; replaying failed jobs");
          self.catch_up().await;
        }
        Err(RecvError::Closed) => break,
      }
    }
    debug!("failure recorder stopped");
  }
}
