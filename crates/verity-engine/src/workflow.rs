//! [`ClaimWorkflow`]: the claim state machine and the operations that drive
//! it.
//!
//! Every write is a compare-and-set on the claim's revision. When a write
//! comes back stale the operation is re-validated against the fresh claim,
//! so two racing reviewer actions resolve to exactly one winner and the
//! loser sees an [`Error::InvalidState`]. No lock is held while awaiting the
//! store, the analyzer or the notifier.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use verity_core::{
  analyzer::{AnalysisRequest, Analyzer},
  claim::Claim,
  lifecycle::ClaimStatus,
  notify::{Notification, NotificationKind, Notifier},
  store::{ClaimStore, ClaimUpdate, WriteOutcome},
  verdict::{
    AiVerdict, DEFAULT_DISCLAIMER, HumanVerdictInput, Responsibility, Verdict,
    VerdictEdit,
  },
};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
  /// Attached to every unedited AI verdict.
  pub disclaimer:         String,
  /// Compare-and-set attempts before an operation gives up with
  /// [`Error::Conflict`].
  pub max_write_attempts: u32,
}

impl Default for WorkflowConfig {
  fn default() -> Self {
    Self {
      disclaimer:         DEFAULT_DISCLAIMER.to_owned(),
      max_write_attempts: 5,
    }
  }
}

pub struct ClaimWorkflow<S, A, N> {
  store:    Arc<S>,
  analyzer: Arc<A>,
  notifier: Arc<N>,
  config:   WorkflowConfig,
}

impl<S, A, N> ClaimWorkflow<S, A, N>
where
  S: ClaimStore,
  A: Analyzer,
  N: Notifier,
{
  pub fn new(
    store: Arc<S>,
    analyzer: Arc<A>,
    notifier: Arc<N>,
    config: WorkflowConfig,
  ) -> Self {
    Self { store, analyzer, notifier, config }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  async fn load(&self, claim_id: Uuid) -> Result<Claim> {
    self
      .store
      .find_claim(claim_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::claim_not_found(claim_id))
  }

  /// Run `attempt` against the current claim until its write applies.
  ///
  /// `attempt` validates the claim it is given and issues one guarded write.
  /// On a stale write it is called again with the claim as the store now
  /// has it.
  async fn write_guarded<F, Fut>(&self, claim_id: Uuid, mut attempt: F) -> Result<Claim>
  where
    F: FnMut(Claim) -> Fut,
    Fut: Future<Output = Result<WriteOutcome<Claim>>>,
  {
    let attempts = self.config.max_write_attempts.max(1);
    let mut claim = self.load(claim_id).await?;

    for _ in 0..attempts {
      match attempt(claim).await? {
        WriteOutcome::Applied(updated) => return Ok(updated),
        WriteOutcome::Stale(current) => {
          debug!(
            claim_id = %claim_id,
            revision = current.revision,
            status = %current.status,
            "claim changed concurrently; re-validating"
          );
          claim = current;
        }
        WriteOutcome::Missing => return Err(Error::claim_not_found(claim_id)),
      }
    }
    Err(Error::Conflict { claim_id, attempts })
  }

  async fn notify(
    &self,
    claim: &Claim,
    kind: NotificationKind,
    title: &str,
    message: String,
  ) {
    let notification = Notification {
      user_id: claim.submitter_id.clone(),
      kind,
      title: title.to_owned(),
      message,
      related_id: claim.claim_id,
    };
    if let Err(err) = self.notifier.notify(notification).await {
      warn!(
        claim_id = %claim.claim_id,
        kind = %kind,
        error = %err,
        "failed to notify submitter"
      );
    }
  }

  // ─── Automated path ────────────────────────────────────────────────────────

  /// Analyze a pending claim and record the AI verdict.
  ///
  /// Returns the updated claim, or `None` when the claim had already left
  /// `pending` (a retried or late job); nothing is written in that case.
  /// Analyzer failures are returned unchanged so the queue can decide
  /// whether to retry. `deadline` is handed to the analyzer as the time it
  /// has left.
  pub async fn process_new_claim(
    &self,
    claim_id: Uuid,
    claim_text: &str,
    deadline: Option<Duration>,
  ) -> Result<Option<Claim>> {
    let claim = self.load(claim_id).await?;
    if claim.status != ClaimStatus::Pending {
      debug!(claim_id = %claim_id, status = %claim.status, "claim already processed; skipping");
      return Ok(None);
    }

    let request = AnalysisRequest {
      claim_id,
      claim_text: claim_text.to_owned(),
      timeout: deadline,
    };
    let analysis = self.analyzer.analyze(request).await?;
    let verdict =
      AiVerdict::new(claim_id, analysis, &self.config.disclaimer, Utc::now())?;
    let (label, confidence) = (verdict.label, verdict.confidence);

    let attempts = self.config.max_write_attempts.max(1);
    let mut claim = claim;
    for _ in 0..attempts {
      let update = ClaimUpdate::for_claim(&claim, ClaimStatus::AiProcessed);
      match self
        .store
        .create_ai_verdict(verdict.clone(), update)
        .await
        .map_err(Error::store)?
      {
        WriteOutcome::Applied(updated) => {
          info!(
            claim_id = %claim_id,
            label = %label,
            confidence,
            "claim analyzed"
          );
          self
            .notify(
              &updated,
              NotificationKind::ClaimAnalyzed,
              "Your claim has been analyzed",
              format!(
                "Preliminary verdict: {label} ({:.0}% confidence). A reviewer \
                 will confirm it.",
                confidence * 100.0
              ),
            )
            .await;
          return Ok(Some(updated));
        }
        WriteOutcome::Stale(current) if current.status != ClaimStatus::Pending => {
          debug!(
            claim_id = %claim_id,
            status = %current.status,
            "claim left pending during analysis; discarding result"
          );
          return Ok(None);
        }
        WriteOutcome::Stale(current) => claim = current,
        WriteOutcome::Missing => return Err(Error::claim_not_found(claim_id)),
      }
    }
    Err(Error::Conflict { claim_id, attempts })
  }

  /// Keep a note of why automated analysis was abandoned. The claim stays
  /// `pending` so a reviewer can pick it up by hand.
  pub async fn record_analysis_failure(&self, claim_id: Uuid, error: &str) -> Result<()> {
    let claim = self.load(claim_id).await?;
    if claim.status != ClaimStatus::Pending {
      debug!(claim_id = %claim_id, status = %claim.status, "claim no longer pending; failure not recorded");
      return Ok(());
    }
    self
      .store
      .record_claim_error(claim_id, Some(error.to_owned()))
      .await
      .map_err(Error::store)?;
    warn!(claim_id = %claim_id, error, "claim needs manual attention");
    Ok(())
  }

  // ─── Reviewer actions ──────────────────────────────────────────────────────

  /// Accept the AI verdict as is. Responsibility stays with the analyzer and
  /// the disclaimer is kept.
  pub async fn approve_ai_verdict(&self, claim_id: Uuid, reviewer_id: &str) -> Result<Claim> {
    let store = &self.store;
    let claim = self
      .write_guarded(claim_id, |claim| async move {
        if claim.status != ClaimStatus::AiProcessed {
          return Err(invalid_state(&claim, "approve the AI verdict of", "it is not ai_processed"));
        }
        if claim.ai_verdict_id.is_none() {
          return Err(invalid_state(&claim, "approve the AI verdict of", "it has no AI verdict"));
        }
        let next = claim.status.transition_to(ClaimStatus::Approved)?;
        store
          .update_claim(ClaimUpdate::for_claim(&claim, next).reviewer(reviewer_id))
          .await
          .map_err(Error::store)
      })
      .await?;

    info!(claim_id = %claim_id, reviewer = reviewer_id, "AI verdict approved");
    self
      .notify(
        &claim,
        NotificationKind::ClaimApproved,
        "Your claim has been reviewed",
        "A reviewer approved the automated verdict on your claim.".to_owned(),
      )
      .await;
    Ok(claim)
  }

  /// Overwrite the AI verdict with a reviewer's changes and approve the
  /// claim. The disclaimer is removed for good and the organization becomes
  /// responsible for the verdict.
  ///
  /// Allowed from `ai_processed`, and from `approved` when the AI verdict
  /// was already edited. Refused once the claim has an independent human
  /// verdict.
  pub async fn edit_ai_verdict(
    &self,
    claim_id: Uuid,
    reviewer_id: &str,
    edit: VerdictEdit,
  ) -> Result<Claim> {
    if edit.is_empty() {
      return Err(verity_core::Error::EmptyEdit.into());
    }

    let store = &self.store;
    let edit = &edit;
    let claim = self
      .write_guarded(claim_id, |claim| async move {
        const OP: &str = "edit the AI verdict of";
        if claim.verdict_id.is_some() {
          return Err(invalid_state(&claim, OP, "it already has an independent human verdict"));
        }
        let Some(ai_verdict_id) = claim.ai_verdict_id else {
          return Err(invalid_state(&claim, OP, "it has no AI verdict"));
        };
        let mut verdict = store
          .find_ai_verdict(ai_verdict_id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::NotFound { what: "ai verdict", id: ai_verdict_id })?;

        let next = match claim.status {
          ClaimStatus::AiProcessed => claim.status.transition_to(ClaimStatus::Approved)?,
          ClaimStatus::Approved if verdict.edited_by_human => ClaimStatus::Approved,
          ClaimStatus::Approved => {
            return Err(invalid_state(&claim, OP, "its AI verdict was already approved unedited"));
          }
          _ => return Err(invalid_state(&claim, OP, "it is not ai_processed")),
        };

        verdict.apply_edit(reviewer_id, edit, Utc::now())?;
        store
          .update_ai_verdict(verdict, ClaimUpdate::for_claim(&claim, next).reviewer(reviewer_id))
          .await
          .map_err(Error::store)
      })
      .await?;

    info!(
      claim_id = %claim_id,
      reviewer = reviewer_id,
      "AI verdict edited; responsibility transferred to the organization"
    );
    self
      .notify(
        &claim,
        NotificationKind::ClaimApproved,
        "Your claim has been reviewed",
        "A reviewer revised and approved the verdict on your claim.".to_owned(),
      )
      .await;
    Ok(claim)
  }

  /// Publish a reviewer-authored verdict, bypassing the analyzer. Any AI
  /// verdict already on the claim is kept as history.
  pub async fn create_human_verdict(
    &self,
    claim_id: Uuid,
    reviewer_id: &str,
    input: HumanVerdictInput,
  ) -> Result<Claim> {
    if input.explanation.trim().is_empty() {
      return Err(Error::InvalidInput("verdict explanation must not be empty".into()));
    }
    let label = input.label;

    let store = &self.store;
    let input = &input;
    let claim = self
      .write_guarded(claim_id, |claim| async move {
        if claim.verdict_id.is_some() {
          return Err(invalid_state(&claim, "create a verdict for", "it already has one"));
        }
        let next = claim.status.transition_to(ClaimStatus::Approved)?;
        let verdict = Verdict::new(claim.claim_id, reviewer_id, input.clone(), Utc::now());
        store
          .create_verdict(verdict, ClaimUpdate::for_claim(&claim, next).reviewer(reviewer_id))
          .await
          .map_err(Error::store)
      })
      .await?;

    info!(claim_id = %claim_id, reviewer = reviewer_id, label = %label, "human verdict created");
    self
      .notify(
        &claim,
        NotificationKind::ClaimApproved,
        "Your claim has been reviewed",
        format!("A reviewer published a verdict on your claim: {label}."),
      )
      .await;
    Ok(claim)
  }

  /// Reject a claim that is `pending` or `ai_processed`.
  pub async fn reject(&self, claim_id: Uuid, reviewer_id: &str, reason: &str) -> Result<Claim> {
    let reason = reason.trim();
    if reason.is_empty() {
      return Err(Error::InvalidInput("rejection reason must not be empty".into()));
    }

    let store = &self.store;
    let claim = self
      .write_guarded(claim_id, |claim| async move {
        let next = claim.status.transition_to(ClaimStatus::Rejected)?;
        store
          .update_claim(
            ClaimUpdate::for_claim(&claim, next)
              .reviewer(reviewer_id)
              .reason(reason),
          )
          .await
          .map_err(Error::store)
      })
      .await?;

    info!(claim_id = %claim_id, reviewer = reviewer_id, reason, "claim rejected");
    self
      .notify(
        &claim,
        NotificationKind::ClaimRejected,
        "Your claim was not accepted",
        format!("Reason: {reason}"),
      )
      .await;
    Ok(claim)
  }

  // ─── Queries ───────────────────────────────────────────────────────────────

  /// Who answers for the claim's outcome, or `None` while it has no verdict.
  pub async fn responsibility(&self, claim_id: Uuid) -> Result<Option<Responsibility>> {
    let claim = self.load(claim_id).await?;

    let ai = match claim.ai_verdict_id {
      Some(id) => Some(
        self
          .store
          .find_ai_verdict(id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::NotFound { what: "ai verdict", id })?,
      ),
      None => None,
    };
    let human = match claim.verdict_id {
      Some(id) => Some(
        self
          .store
          .find_verdict(id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::NotFound { what: "verdict", id })?,
      ),
      None => None,
    };

    Ok(Responsibility::resolve(ai.as_ref(), human.as_ref()))
  }
}

fn invalid_state(claim: &Claim, operation: &str, why: &str) -> Error {
  Error::InvalidState(format!(
    "cannot {operation} claim {} (status {}): {why}",
    claim.claim_id, claim.status
  ))
}
