//! Claim submission: persist a pending claim, then queue its analysis.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;
use verity_core::{
  claim::{Claim, NewClaim},
  job::{JobOptions, JobPayload},
  store::{ClaimStore, JobStore},
};
use verity_queue::JobQueue;

use crate::{Error, Result};

pub struct ClaimIntake<S, J> {
  claims:  Arc<S>,
  queue:   Arc<JobQueue<J>>,
  options: Option<JobOptions>,
}

impl<S, J> ClaimIntake<S, J>
where
  S: ClaimStore,
  J: JobStore + 'static,
{
  /// `options` overrides the `ai-processing` defaults for every submission.
  pub fn new(claims: Arc<S>, queue: Arc<JobQueue<J>>, options: Option<JobOptions>) -> Self {
    Self { claims, queue, options }
  }

  /// Create a pending claim and enqueue its analysis job.
  ///
  /// If the job cannot be queued the claim is kept and marked as needing
  /// manual attention before the error is returned.
  pub async fn submit(&self, input: NewClaim) -> Result<(Claim, Uuid)> {
    input.validate()?;
    let claim = self.claims.create_claim(input).await.map_err(Error::store)?;

    let payload = JobPayload::AiProcessing {
      claim_id:   claim.claim_id,
      claim_text: claim.text.clone(),
    };
    let job_id = match self.queue.enqueue(payload, self.options).await {
      Ok(job_id) => job_id,
      Err(err) => {
        error!(claim_id = %claim.claim_id, error = %err, "failed to queue claim analysis");
        let note = format!("analysis could not be queued: {err}");
        if let Err(record_err) = self.claims.record_claim_error(claim.claim_id, Some(note)).await {
          error!(claim_id = %claim.claim_id, error = %record_err, "failed to record claim error");
        }
        return Err(err.into());
      }
    };

    info!(
      claim_id = %claim.claim_id,
      job_id = %job_id,
      submitter = %claim.submitter_id,
      "claim submitted"
    );
    Ok((claim, job_id))
  }
}
