//! Integration tests for `SqliteStore` against an in-memory database.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;
use verity_core::{
  analyzer::Analysis,
  claim::NewClaim,
  job::{BackoffPolicy, Job, JobKind, JobOptions, JobPayload, JobState},
  lifecycle::ClaimStatus,
  store::{ClaimQuery, ClaimStore, ClaimUpdate, JobStore, WriteOutcome},
  verdict::{
    AiVerdict, EvidenceSource, HumanVerdictInput, Responsibility, Verdict,
    VerdictEdit, VerdictLabel,
  },
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

/// A whole-second instant; stored timestamps keep microsecond precision.
fn t0() -> chrono::DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn analysis() -> Analysis {
  Analysis {
    label:            VerdictLabel::False,
    confidence:       0.95,
    explanation:      "Satellite imagery shows curvature.".into(),
    evidence:         vec![EvidenceSource {
      url:     "https://example.org/earth".into(),
      title:   Some("Earth from orbit".into()),
      excerpt: None,
    }],
    analyzer_version: "test-analyzer/1".into(),
  }
}

fn applied<T>(outcome: WriteOutcome<T>) -> T {
  match outcome {
    WriteOutcome::Applied(v) => v,
    WriteOutcome::Stale(c) => panic!("unexpected stale write at revision {}", c.revision),
    WriteOutcome::Missing => panic!("unexpected missing claim"),
  }
}

// ─── Claims ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_find_claim() {
  let s = store().await;

  let claim = s
    .create_claim(NewClaim::new("user-1", "Earth is flat"))
    .await
    .unwrap();
  assert_eq!(claim.status, ClaimStatus::Pending);
  assert_eq!(claim.revision, 0);

  let fetched = s.find_claim(claim.claim_id).await.unwrap().unwrap();
  assert_eq!(fetched.claim_id, claim.claim_id);
  assert_eq!(fetched.submitter_id, "user-1");
  assert_eq!(fetched.text, "Earth is flat");
  assert!(fetched.ai_verdict_id.is_none());
  assert!(fetched.verdict_id.is_none());
}

#[tokio::test]
async fn find_claim_missing_returns_none() {
  let s = store().await;
  assert!(s.find_claim(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn blank_claim_is_rejected() {
  let s = store().await;
  let err = s.create_claim(NewClaim::new("user-1", "   ")).await.unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(verity_core::Error::EmptyClaimText)
  ));
}

#[tokio::test]
async fn update_claim_bumps_revision() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();

  let updated = applied(
    s.update_claim(
      ClaimUpdate::for_claim(&claim, ClaimStatus::Rejected)
        .reviewer("rev-1")
        .reason("not a factual claim"),
    )
    .await
    .unwrap(),
  );

  assert_eq!(updated.status, ClaimStatus::Rejected);
  assert_eq!(updated.revision, 1);
  assert_eq!(updated.assigned_reviewer.as_deref(), Some("rev-1"));
  assert_eq!(updated.rejection_reason.as_deref(), Some("not a factual claim"));
}

#[tokio::test]
async fn stale_revision_changes_nothing() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();

  let first = ClaimUpdate::for_claim(&claim, ClaimStatus::Approved);
  let second = ClaimUpdate::for_claim(&claim, ClaimStatus::Rejected);

  applied(s.update_claim(first).await.unwrap());
  let outcome = s.update_claim(second).await.unwrap();

  let WriteOutcome::Stale(current) = outcome else {
    panic!("second write must be stale");
  };
  assert_eq!(current.status, ClaimStatus::Approved);
  assert_eq!(current.revision, 1);

  let stored = s.find_claim(claim.claim_id).await.unwrap().unwrap();
  assert_eq!(stored.status, ClaimStatus::Approved);
}

#[tokio::test]
async fn update_missing_claim_reports_missing() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();
  let mut update = ClaimUpdate::for_claim(&claim, ClaimStatus::Approved);
  update.claim_id = Uuid::new_v4();

  assert!(matches!(
    s.update_claim(update).await.unwrap(),
    WriteOutcome::Missing
  ));
}

#[tokio::test]
async fn list_claims_filters_by_status_and_attention() {
  let s = store().await;
  let a = s.create_claim(NewClaim::new("u1", "a")).await.unwrap();
  let b = s.create_claim(NewClaim::new("u2", "b")).await.unwrap();
  let c = s.create_claim(NewClaim::new("u1", "c")).await.unwrap();

  applied(
    s.update_claim(ClaimUpdate::for_claim(&c, ClaimStatus::Rejected))
      .await
      .unwrap(),
  );
  s.record_claim_error(b.claim_id, Some("analyzer unreachable".into()))
    .await
    .unwrap();

  let pending = s
    .list_claims(&ClaimQuery {
      status: Some(ClaimStatus::Pending),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(pending.len(), 2);

  let attention = s
    .list_claims(&ClaimQuery { needs_attention: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(attention.len(), 1);
  assert_eq!(attention[0].claim_id, b.claim_id);
  assert!(attention[0].needs_attention());

  let by_submitter = s
    .list_claims(&ClaimQuery {
      submitter_id: Some("u1".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  let ids: Vec<_> = by_submitter.iter().map(|c| c.claim_id).collect();
  assert_eq!(ids.len(), 2);
  assert!(ids.contains(&a.claim_id));
  assert!(ids.contains(&c.claim_id));
}

#[tokio::test]
async fn record_claim_error_does_not_bump_revision() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();

  s.record_claim_error(claim.claim_id, Some("timeout".into()))
    .await
    .unwrap();

  let stored = s.find_claim(claim.claim_id).await.unwrap().unwrap();
  assert_eq!(stored.revision, 0);
  assert_eq!(stored.last_error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn record_claim_error_skips_claims_past_pending() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();
  applied(
    s.update_claim(ClaimUpdate::for_claim(&claim, ClaimStatus::Rejected).reason("spam"))
      .await
      .unwrap(),
  );

  s.record_claim_error(claim.claim_id, Some("analyzer gave up".into()))
    .await
    .unwrap();

  let stored = s.find_claim(claim.claim_id).await.unwrap().unwrap();
  assert_eq!(stored.status, ClaimStatus::Rejected);
  assert_eq!(stored.last_error, None);
}

// ─── AI verdicts ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_ai_verdict_links_and_transitions() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "Earth is flat")).await.unwrap();
  s.record_claim_error(claim.claim_id, Some("earlier failure".into()))
    .await
    .unwrap();

  let verdict = AiVerdict::new(claim.claim_id, analysis(), "", Utc::now()).unwrap();
  let updated = applied(
    s.create_ai_verdict(
      verdict.clone(),
      ClaimUpdate::for_claim(&claim, ClaimStatus::AiProcessed),
    )
    .await
    .unwrap(),
  );

  assert_eq!(updated.status, ClaimStatus::AiProcessed);
  assert_eq!(updated.ai_verdict_id, Some(verdict.ai_verdict_id));
  assert!(updated.last_error.is_none());

  let stored = s.find_ai_verdict(verdict.ai_verdict_id).await.unwrap().unwrap();
  assert_eq!(stored.label, VerdictLabel::False);
  assert_eq!(stored.evidence, verdict.evidence);
  assert!(!stored.edited_by_human);
  assert!(stored.disclaimer.is_some());
}

#[tokio::test]
async fn stale_ai_verdict_write_inserts_nothing() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();

  let first = AiVerdict::new(claim.claim_id, analysis(), "", Utc::now()).unwrap();
  let late = AiVerdict::new(claim.claim_id, analysis(), "", Utc::now()).unwrap();

  applied(
    s.create_ai_verdict(first, ClaimUpdate::for_claim(&claim, ClaimStatus::AiProcessed))
      .await
      .unwrap(),
  );
  let outcome = s
    .create_ai_verdict(
      late.clone(),
      ClaimUpdate::for_claim(&claim, ClaimStatus::AiProcessed),
    )
    .await
    .unwrap();

  assert!(matches!(outcome, WriteOutcome::Stale(_)));
  assert!(s.find_ai_verdict(late.ai_verdict_id).await.unwrap().is_none());
}

#[tokio::test]
async fn update_ai_verdict_persists_edit() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();
  let mut verdict = AiVerdict::new(claim.claim_id, analysis(), "", Utc::now()).unwrap();
  let claim = applied(
    s.create_ai_verdict(
      verdict.clone(),
      ClaimUpdate::for_claim(&claim, ClaimStatus::AiProcessed),
    )
    .await
    .unwrap(),
  );

  let edited_at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
  verdict
    .apply_edit(
      "rev-9",
      &VerdictEdit {
        label: Some(VerdictLabel::MostlyFalse),
        ..Default::default()
      },
      edited_at,
    )
    .unwrap();

  let claim = applied(
    s.update_ai_verdict(
      verdict.clone(),
      ClaimUpdate::for_claim(&claim, ClaimStatus::Approved).reviewer("rev-9"),
    )
    .await
    .unwrap(),
  );
  assert_eq!(claim.status, ClaimStatus::Approved);

  let stored = s.find_ai_verdict(verdict.ai_verdict_id).await.unwrap().unwrap();
  assert!(stored.edited_by_human);
  assert!(stored.disclaimer.is_none());
  assert_eq!(stored.edited_by.as_deref(), Some("rev-9"));
  assert_eq!(stored.edited_at, Some(edited_at));
  assert_eq!(stored.label, VerdictLabel::MostlyFalse);
  assert_eq!(stored.responsibility(), Responsibility::Organization);
}

#[tokio::test]
async fn broken_disclaimer_invariant_is_refused() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();
  let mut verdict = AiVerdict::new(claim.claim_id, analysis(), "", Utc::now()).unwrap();
  verdict.disclaimer = None;

  let err = s
    .create_ai_verdict(verdict, ClaimUpdate::for_claim(&claim, ClaimStatus::AiProcessed))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(verity_core::Error::DisclaimerInvariant(_))
  ));

  let stored = s.find_claim(claim.claim_id).await.unwrap().unwrap();
  assert_eq!(stored.status, ClaimStatus::Pending);
}

// ─── Human verdicts ──────────────────────────────────────────────────────────

#[tokio::test]
async fn create_verdict_links_and_transitions() {
  let s = store().await;
  let claim = s.create_claim(NewClaim::new("u", "c")).await.unwrap();

  let verdict = Verdict::new(
    claim.claim_id,
    "rev-1",
    HumanVerdictInput {
      label:       VerdictLabel::True,
      explanation: "Checked against primary sources.".into(),
      evidence:    vec![],
    },
    t0(),
  );
  let updated = applied(
    s.create_verdict(
      verdict.clone(),
      ClaimUpdate::for_claim(&claim, ClaimStatus::Approved).reviewer("rev-1"),
    )
    .await
    .unwrap(),
  );

  assert_eq!(updated.status, ClaimStatus::Approved);
  assert_eq!(updated.verdict_id, Some(verdict.verdict_id));

  let stored = s.find_verdict(verdict.verdict_id).await.unwrap().unwrap();
  assert_eq!(stored, verdict);
}

// ─── Jobs ────────────────────────────────────────────────────────────────────

fn ai_job(text: &str, options: JobOptions, now: chrono::DateTime<Utc>) -> Job {
  Job::new(
    JobPayload::AiProcessing { claim_id: Uuid::new_v4(), claim_text: text.into() },
    options,
    now,
  )
}

const KINDS: &[JobKind] = &[JobKind::AiProcessing];

#[tokio::test]
async fn insert_and_get_job() {
  let s = store().await;
  let now = t0();
  let job = ai_job("a", JobOptions::default(), now);
  s.insert_job(job.clone()).await.unwrap();

  let stored = s.get_job(job.job_id).await.unwrap().unwrap();
  assert_eq!(stored.state, JobState::Waiting);
  assert_eq!(stored.payload, job.payload);
  assert_eq!(stored.max_attempts, 3);
  assert_eq!(stored.timeout, Duration::from_secs(300));
  assert_eq!(stored.backoff, BackoffPolicy::exponential(Duration::from_secs(5)));
}

#[tokio::test]
async fn claim_next_is_fifo_within_priority() {
  let s = store().await;
  let now = t0();

  let first = ai_job("first", JobOptions::default(), now);
  let second = ai_job("second", JobOptions::default(), now);
  let urgent = ai_job("urgent", JobOptions { priority: 10, ..Default::default() }, now);
  for job in [&first, &second, &urgent] {
    s.insert_job(job.clone()).await.unwrap();
  }

  let lease = now + chrono::Duration::seconds(30);
  let order: Vec<Uuid> = [
    s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap(),
    s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap(),
    s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap(),
  ]
  .iter()
  .map(|j| j.job_id)
  .collect();

  assert_eq!(order, vec![urgent.job_id, first.job_id, second.job_id]);
  assert!(s.claim_next_job(KINDS, now, lease).await.unwrap().is_none());
}

#[tokio::test]
async fn claimed_job_is_active_with_lease() {
  let s = store().await;
  let now = t0();
  s.insert_job(ai_job("a", JobOptions::default(), now)).await.unwrap();

  let lease = now + chrono::Duration::seconds(30);
  let job = s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap();
  assert_eq!(job.state, JobState::Active);
  assert_eq!(job.lease_expires_at, Some(lease));
}

#[tokio::test]
async fn retried_job_waits_until_ready() {
  let s = store().await;
  let now = t0();
  s.insert_job(ai_job("a", JobOptions::default(), now)).await.unwrap();

  let lease = now + chrono::Duration::seconds(30);
  let job = s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap();
  let ready_at = now + chrono::Duration::seconds(5);
  assert!(
    s.retry_job(job.job_id, 1, ready_at, "analyzer timeout".into())
      .await
      .unwrap()
  );

  assert!(s.claim_next_job(KINDS, now, lease).await.unwrap().is_none());

  let again = s
    .claim_next_job(KINDS, ready_at, ready_at + chrono::Duration::seconds(30))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(again.job_id, job.job_id);
  assert_eq!(again.attempts, 1);
  assert_eq!(again.last_error.as_deref(), Some("analyzer timeout"));
}

#[tokio::test]
async fn complete_and_fail_are_terminal() {
  let s = store().await;
  let now = t0();
  let lease = now + chrono::Duration::seconds(30);
  s.insert_job(ai_job("ok", JobOptions::default(), now)).await.unwrap();
  s.insert_job(ai_job("bad", JobOptions::default(), now)).await.unwrap();

  let ok = s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap();
  let bad = s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap();
  assert!(s.complete_job(ok.job_id, 1, now).await.unwrap());
  assert!(s.fail_job(bad.job_id, 3, "gave up".into(), now).await.unwrap());

  let completed = s.list_jobs(Some(JobState::Completed)).await.unwrap();
  let failed = s.list_jobs(Some(JobState::Failed)).await.unwrap();
  assert_eq!(completed.len(), 1);
  assert_eq!(completed[0].finished_at, Some(now));
  assert_eq!(failed.len(), 1);
  assert_eq!(failed[0].attempts, 3);
  assert_eq!(failed[0].last_error.as_deref(), Some("gave up"));
  assert_eq!(s.list_jobs(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn finishing_unknown_job_errors() {
  let s = store().await;
  let err = s.complete_job(Uuid::new_v4(), 1, Utc::now()).await.unwrap_err();
  assert!(matches!(err, crate::Error::JobNotFound(_)));
}

#[tokio::test]
async fn expired_lease_is_requeued_then_failed() {
  let s = store().await;
  let now = t0();
  let job = ai_job("a", JobOptions::default(), now);
  s.insert_job(job.clone()).await.unwrap();

  let lease = now + chrono::Duration::seconds(30);
  s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap();

  // Still alive: nothing to recover.
  assert!(s.requeue_stalled(now, 1).await.unwrap().is_empty());

  let later = lease + chrono::Duration::seconds(1);
  let recovered = s.requeue_stalled(later, 1).await.unwrap();
  assert_eq!(recovered.len(), 1);
  assert_eq!(recovered[0].state, JobState::Waiting);
  assert_eq!(recovered[0].stalled_count, 1);

  // Stalls a second time: over the limit.
  let lease = later + chrono::Duration::seconds(30);
  s.claim_next_job(KINDS, later, lease).await.unwrap().unwrap();
  let recovered = s
    .requeue_stalled(lease + chrono::Duration::seconds(1), 1)
    .await
    .unwrap();
  assert_eq!(recovered[0].state, JobState::Failed);
  assert_eq!(recovered[0].stalled_count, 2);
}

#[tokio::test]
async fn heartbeat_keeps_job_alive() {
  let s = store().await;
  let now = t0();
  let job = ai_job("a", JobOptions::default(), now);
  s.insert_job(job.clone()).await.unwrap();

  let lease = now + chrono::Duration::seconds(30);
  s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap();
  let extended = lease + chrono::Duration::seconds(30);
  assert!(s.extend_lease(job.job_id, extended).await.unwrap());

  assert!(
    s.requeue_stalled(lease + chrono::Duration::seconds(1), 1)
      .await
      .unwrap()
      .is_empty()
  );

  assert!(s.complete_job(job.job_id, 1, now).await.unwrap());
  assert!(!s.extend_lease(job.job_id, extended).await.unwrap());
}

#[tokio::test]
async fn late_finish_of_recovered_job_is_discarded() {
  let s = store().await;
  let now = t0();
  let job = ai_job("a", JobOptions::default(), now);
  s.insert_job(job.clone()).await.unwrap();

  let lease = now + chrono::Duration::seconds(30);
  s.claim_next_job(KINDS, now, lease).await.unwrap().unwrap();
  s.requeue_stalled(lease + chrono::Duration::seconds(1), 1)
    .await
    .unwrap();

  assert!(!s.complete_job(job.job_id, 1, lease).await.unwrap());
  let stored = s.get_job(job.job_id).await.unwrap().unwrap();
  assert_eq!(stored.state, JobState::Waiting);
  assert!(stored.finished_at.is_none());
}
