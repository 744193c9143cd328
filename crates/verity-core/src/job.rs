//! Job model for the background queue.
//!
//! Job kinds form a closed enum; each kind carries a strongly-typed payload.
//! Backoff is expressed as an explicit `ready_at` timestamp on the job record
//! rather than as a delayed re-insertion.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

// ─── Kinds and payloads ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
  #[serde(rename = "ai-processing")]
  AiProcessing,
}

impl JobKind {
  pub const ALL: [JobKind; 1] = [Self::AiProcessing];

  /// The discriminant stored in the `kind` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::AiProcessing => "ai-processing",
    }
  }
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| Error::UnknownJobKind(s.to_owned()))
  }
}

/// The typed payload of a job. The variant tag must match
/// [`JobKind::as_str`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum JobPayload {
  #[serde(rename = "ai-processing")]
  AiProcessing { claim_id: Uuid, claim_text: String },
}

impl JobPayload {
  pub fn kind(&self) -> JobKind {
    match self {
      Self::AiProcessing { .. } => JobKind::AiProcessing,
    }
  }

  /// Serialise the inner payload (without the kind tag) for the
  /// `payload_json` column.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let full = serde_json::to_value(self)?;
    Ok(full.get("data").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Rebuild a payload from its stored kind and JSON body.
  pub fn from_parts(kind: JobKind, data: serde_json::Value) -> Result<Self> {
    let wrapped = serde_json::json!({ "kind": kind.as_str(), "data": data });
    Ok(serde_json::from_value(wrapped)?)
  }
}

// ─── Backoff ─────────────────────────────────────────────────────────────────

/// How long a failed job waits before it becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
  Fixed { delay_ms: u64 },
  /// `delay = base * 2^(attempts - 1)`
  Exponential { base_ms: u64 },
}

impl BackoffPolicy {
  pub fn fixed(delay: Duration) -> Self {
    Self::Fixed { delay_ms: delay.as_millis() as u64 }
  }

  pub fn exponential(base: Duration) -> Self {
    Self::Exponential { base_ms: base.as_millis() as u64 }
  }

  /// Delay after the `attempts`-th failed attempt (1-based).
  pub fn delay_for(&self, attempts: u32) -> Duration {
    match *self {
      Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
      Self::Exponential { base_ms } => {
        let factor = 1u64
          .checked_shl(attempts.saturating_sub(1))
          .unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor))
      }
    }
  }
}

impl Default for BackoffPolicy {
  fn default() -> Self { Self::exponential(DEFAULT_BACKOFF_BASE) }
}

// ─── Options ─────────────────────────────────────────────────────────────────

/// Per-job execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
  pub max_attempts: u32,
  pub backoff:      BackoffPolicy,
  pub timeout:      Duration,
  /// Higher runs first; ties are broken by enqueue order.
  pub priority:     i32,
}

impl JobOptions {
  /// Defaults for a kind. Every kind currently shares the `ai-processing`
  /// contract: 3 attempts, exponential backoff from 5 s, 300 s timeout.
  pub fn for_kind(kind: JobKind) -> Self {
    match kind {
      JobKind::AiProcessing => Self::default(),
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.max_attempts == 0 {
      return Err(Error::InvalidJobOptions("max_attempts must be at least 1"));
    }
    if self.timeout.is_zero() {
      return Err(Error::InvalidJobOptions("timeout must be non-zero"));
    }
    Ok(())
  }
}

impl Default for JobOptions {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      backoff:      BackoffPolicy::default(),
      timeout:      DEFAULT_TIMEOUT,
      priority:     0,
    }
  }
}

// ─── Job record ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Waiting,
  Active,
  Completed,
  Failed,
}

impl JobState {
  pub const ALL: [JobState; 4] =
    [Self::Waiting, Self::Active, Self::Completed, Self::Failed];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Waiting => "waiting",
      Self::Active => "active",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

impl fmt::Display for JobState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobState {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|state| state.as_str() == s)
      .ok_or_else(|| Error::UnknownJobState(s.to_owned()))
  }
}

/// A unit of queued work. Retained after it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub job_id:           Uuid,
  pub payload:          JobPayload,
  pub state:            JobState,
  /// Attempts that have finished (successfully or not).
  pub attempts:         u32,
  pub max_attempts:     u32,
  pub backoff:          BackoffPolicy,
  pub timeout:          Duration,
  pub priority:         i32,
  /// Times the job was recovered from a worker that stopped heartbeating.
  pub stalled_count:    u32,
  pub created_at:       DateTime<Utc>,
  /// The job is not dispatched before this instant.
  pub ready_at:         DateTime<Utc>,
  /// While active: the instant after which the job counts as stalled.
  pub lease_expires_at: Option<DateTime<Utc>>,
  pub last_error:       Option<String>,
  pub finished_at:      Option<DateTime<Utc>>,
}

impl Job {
  /// A waiting job, eligible immediately.
  pub fn new(payload: JobPayload, options: JobOptions, now: DateTime<Utc>) -> Self {
    Self {
      job_id: Uuid::new_v4(),
      payload,
      state: JobState::Waiting,
      attempts: 0,
      max_attempts: options.max_attempts,
      backoff: options.backoff,
      timeout: options.timeout,
      priority: options.priority,
      stalled_count: 0,
      created_at: now,
      ready_at: now,
      lease_expires_at: None,
      last_error: None,
      finished_at: None,
    }
  }

  pub fn kind(&self) -> JobKind { self.payload.kind() }
}

// ─── Handler results and events ──────────────────────────────────────────────

/// How a handler reports failure to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
  /// Counted as an attempt and retried while attempts remain.
  #[error("{0}")]
  Retryable(String),

  /// Fails the job immediately (malformed payload, invalid state, ...).
  #[error("{0}")]
  Permanent(String),
}

impl JobError {
  pub fn is_retryable(&self) -> bool { matches!(self, Self::Retryable(_)) }
}

/// Lifecycle notifications published by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
  Completed {
    job_id: Uuid,
    kind:   JobKind,
  },
  Failed {
    job_id:   Uuid,
    kind:     JobKind,
    attempts: u32,
    error:    String,
  },
  Stalled {
    job_id: Uuid,
    kind:   JobKind,
  },
}

impl JobEvent {
  pub fn job_id(&self) -> Uuid {
    match self {
      Self::Completed { job_id, .. }
      | Self::Failed { job_id, .. }
      | Self::Stalled { job_id, .. } => *job_id,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exponential_backoff_doubles() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(5));
    assert_eq!(policy.delay_for(1), Duration::from_secs(5));
    assert_eq!(policy.delay_for(2), Duration::from_secs(10));
    assert_eq!(policy.delay_for(3), Duration::from_secs(20));
  }

  #[test]
  fn exponential_backoff_saturates() {
    let policy = BackoffPolicy::exponential(Duration::from_secs(5));
    assert_eq!(policy.delay_for(200), Duration::from_millis(u64::MAX));
  }

  #[test]
  fn fixed_backoff_is_constant() {
    let policy = BackoffPolicy::fixed(Duration::from_millis(250));
    assert_eq!(policy.delay_for(1), policy.delay_for(7));
  }

  #[test]
  fn ai_processing_defaults() {
    let options = JobOptions::for_kind(JobKind::AiProcessing);
    assert_eq!(options.max_attempts, 3);
    assert_eq!(options.timeout, Duration::from_secs(300));
    assert_eq!(options.backoff.delay_for(1), Duration::from_secs(5));
  }

  #[test]
  fn zero_attempts_is_invalid() {
    let options = JobOptions { max_attempts: 0, ..Default::default() };
    assert!(matches!(options.validate(), Err(Error::InvalidJobOptions(_))));
  }

  #[test]
  fn payload_parts_roundtrip() {
    let payload = JobPayload::AiProcessing {
      claim_id:   Uuid::new_v4(),
      claim_text: "Earth is flat".into(),
    };
    let data = payload.to_json().unwrap();
    assert_eq!(data["claim_text"], "Earth is flat");

    let rebuilt = JobPayload::from_parts(payload.kind(), data).unwrap();
    assert_eq!(rebuilt, payload);
    assert_eq!(payload.kind().as_str(), "ai-processing");
  }
}
