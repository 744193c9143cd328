//! The `ClaimStore` and `JobStore` traits and their supporting types.
//!
//! Traits are implemented by storage backends (e.g. `verity-store-sqlite`).
//! The queue and the lifecycle engine depend on these abstractions, not on
//! any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  claim::{Claim, NewClaim},
  job::{Job, JobKind, JobState},
  lifecycle::ClaimStatus,
  verdict::{AiVerdict, Verdict},
};

// ─── Claim writes ────────────────────────────────────────────────────────────

/// A guarded change to a claim row.
///
/// The write only applies if the claim's revision still equals
/// `expected_revision`; this is the per-claim compare-and-set that
/// serializes lifecycle operations on one claim.
#[derive(Debug, Clone)]
pub struct ClaimUpdate {
  pub claim_id:          Uuid,
  pub expected_revision: u64,
  pub status:            ClaimStatus,
  /// `None` leaves the current value in place.
  pub assigned_reviewer: Option<String>,
  /// `None` leaves the current value in place.
  pub rejection_reason:  Option<String>,
}

impl ClaimUpdate {
  /// Move `claim` to `status`, guarded on its current revision.
  pub fn for_claim(claim: &Claim, status: ClaimStatus) -> Self {
    Self {
      claim_id: claim.claim_id,
      expected_revision: claim.revision,
      status,
      assigned_reviewer: None,
      rejection_reason: None,
    }
  }

  pub fn reviewer(mut self, reviewer_id: &str) -> Self {
    self.assigned_reviewer = Some(reviewer_id.to_owned());
    self
  }

  pub fn reason(mut self, reason: &str) -> Self {
    self.rejection_reason = Some(reason.to_owned());
    self
  }
}

/// Result of a guarded write.
#[derive(Debug, Clone)]
#[must_use]
pub enum WriteOutcome<T> {
  /// Every row changed atomically.
  Applied(T),
  /// Another write got there first; nothing changed. Carries the claim as it
  /// is now.
  Stale(Claim),
  /// The claim does not exist.
  Missing,
}

/// Parameters for [`ClaimStore::list_claims`].
#[derive(Debug, Clone, Default)]
pub struct ClaimQuery {
  pub status:          Option<ClaimStatus>,
  /// Only pending claims whose analysis was abandoned.
  pub needs_attention: bool,
  pub submitter_id:    Option<String>,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}

// ─── ClaimStore ──────────────────────────────────────────────────────────────

/// Persistence for claims and their verdict children.
///
/// Every method is atomic: concurrent readers never observe a partially
/// applied write. Verdict writes carry the claim update that goes with them
/// and commit in the same transaction.
pub trait ClaimStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Claims ──────────────────────────────────────────────────────────────

  /// Persist a new `pending` claim at revision 0.
  fn create_claim(
    &self,
    input: NewClaim,
  ) -> impl Future<Output = Result<Claim, Self::Error>> + Send + '_;

  /// Retrieve a claim by id. Returns `None` if not found.
  fn find_claim(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Claim>, Self::Error>> + Send + '_;

  fn list_claims<'a>(
    &'a self,
    query: &'a ClaimQuery,
  ) -> impl Future<Output = Result<Vec<Claim>, Self::Error>> + Send + 'a;

  /// Apply a guarded status change.
  fn update_claim(
    &self,
    update: ClaimUpdate,
  ) -> impl Future<Output = Result<WriteOutcome<Claim>, Self::Error>> + Send + '_;

  /// Record (or clear) the last analysis failure on a pending claim. Claims
  /// that have left `pending` are left untouched, so a reviewer action that
  /// lands first always wins. Does not bump the revision: it is bookkeeping,
  /// not a lifecycle step.
  fn record_claim_error(
    &self,
    id: Uuid,
    error: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Verdicts ────────────────────────────────────────────────────────────

  fn find_ai_verdict(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<AiVerdict>, Self::Error>> + Send + '_;

  fn find_verdict(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Verdict>, Self::Error>> + Send + '_;

  /// Insert an AI verdict, link it to its claim and apply `update`, all or
  /// nothing. Also clears the claim's `last_error`.
  fn create_ai_verdict(
    &self,
    verdict: AiVerdict,
    update: ClaimUpdate,
  ) -> impl Future<Output = Result<WriteOutcome<Claim>, Self::Error>> + Send + '_;

  /// Overwrite an existing AI verdict (the editor id and timestamp travel on
  /// the verdict itself) and apply `update`, all or nothing.
  fn update_ai_verdict(
    &self,
    verdict: AiVerdict,
    update: ClaimUpdate,
  ) -> impl Future<Output = Result<WriteOutcome<Claim>, Self::Error>> + Send + '_;

  /// Insert a human verdict, link it to its claim and apply `update`, all or
  /// nothing.
  fn create_verdict(
    &self,
    verdict: Verdict,
    update: ClaimUpdate,
  ) -> impl Future<Output = Result<WriteOutcome<Claim>, Self::Error>> + Send + '_;
}

// ─── JobStore ────────────────────────────────────────────────────────────────

/// Durable storage for queue jobs. A job is recorded before `enqueue`
/// returns, so nothing is lost across restarts.
pub trait JobStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn insert_job(
    &self,
    job: Job,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Atomically claim the next eligible waiting job of one of `kinds`.
  ///
  /// Eligible means `ready_at <= now`. Order: priority descending, then
  /// `ready_at`, then insertion order. The claimed job becomes `active` with
  /// `lease_expires_at = lease_until`.
  fn claim_next_job<'a>(
    &'a self,
    kinds: &'a [JobKind],
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send + 'a;

  /// Heartbeat. Returns `false` if the job is no longer active (it was
  /// recovered as stalled, or finished).
  fn extend_lease(
    &self,
    job_id: Uuid,
    lease_until: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Mark an active job completed.
  ///
  /// This and the two methods below return `false` (and change nothing) when
  /// the job is no longer active, e.g. it was recovered as stalled while its
  /// handler was still running. An unknown job id is an error.
  fn complete_job(
    &self,
    job_id: Uuid,
    attempts: u32,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Return an active job to `waiting`, eligible again at `ready_at`.
  fn retry_job(
    &self,
    job_id: Uuid,
    attempts: u32,
    ready_at: DateTime<Utc>,
    error: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn fail_job(
    &self,
    job_id: Uuid,
    attempts: u32,
    error: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Recover active jobs whose lease lapsed before `now`.
  ///
  /// Each is returned to `waiting` with `stalled_count + 1`, or moved to
  /// `failed` once that count would exceed `max_stalled_count`. Returns the
  /// jobs in their new state.
  fn requeue_stalled(
    &self,
    now: DateTime<Utc>,
    max_stalled_count: u32,
  ) -> impl Future<Output = Result<Vec<Job>, Self::Error>> + Send + '_;

  fn get_job(
    &self,
    job_id: Uuid,
  ) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send + '_;

  fn list_jobs(
    &self,
    state: Option<JobState>,
  ) -> impl Future<Output = Result<Vec<Job>, Self::Error>> + Send + '_;
}
