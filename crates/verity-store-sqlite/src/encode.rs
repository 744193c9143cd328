//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so that text comparison in SQL orders them
//! chronologically. Evidence lists and backoff policies are compact JSON.
//! UUIDs are hyphenated lowercase strings.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;
use verity_core::{
  claim::Claim,
  job::{BackoffPolicy, Job, JobPayload},
  verdict::{AiVerdict, EvidenceSource, Responsibility, Verdict},
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

fn decode_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>> {
  s.map(decode_uuid).transpose()
}

pub fn encode_evidence(evidence: &[EvidenceSource]) -> Result<String> {
  Ok(serde_json::to_string(evidence)?)
}

fn decode_evidence(s: &str) -> Result<Vec<EvidenceSource>> {
  Ok(serde_json::from_str(s)?)
}

pub fn encode_backoff(b: &BackoffPolicy) -> Result<String> {
  Ok(serde_json::to_string(b)?)
}

pub fn encode_duration_ms(d: Duration) -> i64 {
  i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ─── Claim rows ──────────────────────────────────────────────────────────────

pub const CLAIM_COLUMNS: &str = "claim_id, submitter_id, text, status, \
  ai_verdict_id, verdict_id, assigned_reviewer, rejection_reason, \
  last_error, revision, created_at, updated_at";

/// Raw strings read directly from a `claims` row.
#[derive(Debug)]
pub struct RawClaim {
  pub claim_id:          String,
  pub submitter_id:      String,
  pub text:              String,
  pub status:            String,
  pub ai_verdict_id:     Option<String>,
  pub verdict_id:        Option<String>,
  pub assigned_reviewer: Option<String>,
  pub rejection_reason:  Option<String>,
  pub last_error:        Option<String>,
  pub revision:          i64,
  pub created_at:        String,
  pub updated_at:        String,
}

impl RawClaim {
  /// Map a row selected with [`CLAIM_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      claim_id:          row.get(0)?,
      submitter_id:      row.get(1)?,
      text:              row.get(2)?,
      status:            row.get(3)?,
      ai_verdict_id:     row.get(4)?,
      verdict_id:        row.get(5)?,
      assigned_reviewer: row.get(6)?,
      rejection_reason:  row.get(7)?,
      last_error:        row.get(8)?,
      revision:          row.get(9)?,
      created_at:        row.get(10)?,
      updated_at:        row.get(11)?,
    })
  }

  pub fn into_claim(self) -> Result<Claim> {
    Ok(Claim {
      claim_id:          decode_uuid(&self.claim_id)?,
      submitter_id:      self.submitter_id,
      text:              self.text,
      status:            self.status.parse()?,
      ai_verdict_id:     decode_opt_uuid(self.ai_verdict_id.as_deref())?,
      verdict_id:        decode_opt_uuid(self.verdict_id.as_deref())?,
      assigned_reviewer: self.assigned_reviewer,
      rejection_reason:  self.rejection_reason,
      last_error:        self.last_error,
      revision:          self.revision.max(0) as u64,
      created_at:        decode_dt(&self.created_at)?,
      updated_at:        decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Verdict rows ────────────────────────────────────────────────────────────

pub const AI_VERDICT_COLUMNS: &str = "ai_verdict_id, claim_id, label, \
  confidence, explanation, evidence, analyzer_version, edited_by_human, \
  edited_by, edited_at, disclaimer, created_at";

/// Raw values read directly from an `ai_verdicts` row.
pub struct RawAiVerdict {
  pub ai_verdict_id:    String,
  pub claim_id:         String,
  pub label:            String,
  pub confidence:       f64,
  pub explanation:      String,
  pub evidence:         String,
  pub analyzer_version: String,
  pub edited_by_human:  bool,
  pub edited_by:        Option<String>,
  pub edited_at:        Option<String>,
  pub disclaimer:       Option<String>,
  pub created_at:       String,
}

impl RawAiVerdict {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ai_verdict_id:    row.get(0)?,
      claim_id:         row.get(1)?,
      label:            row.get(2)?,
      confidence:       row.get(3)?,
      explanation:      row.get(4)?,
      evidence:         row.get(5)?,
      analyzer_version: row.get(6)?,
      edited_by_human:  row.get(7)?,
      edited_by:        row.get(8)?,
      edited_at:        row.get(9)?,
      disclaimer:       row.get(10)?,
      created_at:       row.get(11)?,
    })
  }

  pub fn into_ai_verdict(self) -> Result<AiVerdict> {
    let verdict = AiVerdict {
      ai_verdict_id:    decode_uuid(&self.ai_verdict_id)?,
      claim_id:         decode_uuid(&self.claim_id)?,
      label:            self.label.parse()?,
      confidence:       self.confidence,
      explanation:      self.explanation,
      evidence:         decode_evidence(&self.evidence)?,
      analyzer_version: self.analyzer_version,
      edited_by_human:  self.edited_by_human,
      edited_by:        self.edited_by,
      edited_at:        decode_opt_dt(self.edited_at.as_deref())?,
      disclaimer:       self.disclaimer,
      created_at:       decode_dt(&self.created_at)?,
    };
    verdict.validate()?;
    Ok(verdict)
  }
}

/// Column values for writing an [`AiVerdict`].
pub struct AiVerdictParams {
  pub ai_verdict_id:    String,
  pub claim_id:         String,
  pub label:            &'static str,
  pub confidence:       f64,
  pub explanation:      String,
  pub evidence:         String,
  pub analyzer_version: String,
  pub edited_by_human:  bool,
  pub edited_by:        Option<String>,
  pub edited_at:        Option<String>,
  pub disclaimer:       Option<String>,
  pub created_at:       String,
}

impl AiVerdictParams {
  pub fn encode(v: &AiVerdict) -> Result<Self> {
    v.validate()?;
    Ok(Self {
      ai_verdict_id:    encode_uuid(v.ai_verdict_id),
      claim_id:         encode_uuid(v.claim_id),
      label:            v.label.as_str(),
      confidence:       v.confidence,
      explanation:      v.explanation.clone(),
      evidence:         encode_evidence(&v.evidence)?,
      analyzer_version: v.analyzer_version.clone(),
      edited_by_human:  v.edited_by_human,
      edited_by:        v.edited_by.clone(),
      edited_at:        v.edited_at.map(encode_dt),
      disclaimer:       v.disclaimer.clone(),
      created_at:       encode_dt(v.created_at),
    })
  }
}

pub const VERDICT_COLUMNS: &str = "verdict_id, claim_id, reviewer_id, label, \
  explanation, evidence, responsibility, is_final, created_at";

/// Raw values read directly from a `verdicts` row.
pub struct RawVerdict {
  pub verdict_id:     String,
  pub claim_id:       String,
  pub reviewer_id:    String,
  pub label:          String,
  pub explanation:    String,
  pub evidence:       String,
  pub responsibility: String,
  pub is_final:       bool,
  pub created_at:     String,
}

impl RawVerdict {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      verdict_id:     row.get(0)?,
      claim_id:       row.get(1)?,
      reviewer_id:    row.get(2)?,
      label:          row.get(3)?,
      explanation:    row.get(4)?,
      evidence:       row.get(5)?,
      responsibility: row.get(6)?,
      is_final:       row.get(7)?,
      created_at:     row.get(8)?,
    })
  }

  pub fn into_verdict(self) -> Result<Verdict> {
    let responsibility = match self.responsibility.as_str() {
      "organization" => Responsibility::Organization,
      "ai" => Responsibility::Ai,
      other => return Err(Error::UnknownResponsibility(other.to_owned())),
    };
    Ok(Verdict {
      verdict_id:  decode_uuid(&self.verdict_id)?,
      claim_id:    decode_uuid(&self.claim_id)?,
      reviewer_id: self.reviewer_id,
      label:       self.label.parse()?,
      explanation: self.explanation,
      evidence:    decode_evidence(&self.evidence)?,
      responsibility,
      is_final:    self.is_final,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub fn encode_responsibility(r: Responsibility) -> &'static str {
  match r {
    Responsibility::Ai => "ai",
    Responsibility::Organization => "organization",
  }
}

// ─── Job rows ────────────────────────────────────────────────────────────────

pub const JOB_COLUMNS: &str = "job_id, kind, payload, state, attempts, \
  max_attempts, backoff, timeout_ms, priority, stalled_count, created_at, \
  ready_at, lease_expires_at, last_error, finished_at";

/// Raw values read directly from a `jobs` row.
pub struct RawJob {
  pub job_id:           String,
  pub kind:             String,
  pub payload:          String,
  pub state:            String,
  pub attempts:         i64,
  pub max_attempts:     i64,
  pub backoff:          String,
  pub timeout_ms:       i64,
  pub priority:         i32,
  pub stalled_count:    i64,
  pub created_at:       String,
  pub ready_at:         String,
  pub lease_expires_at: Option<String>,
  pub last_error:       Option<String>,
  pub finished_at:      Option<String>,
}

impl RawJob {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      job_id:           row.get(0)?,
      kind:             row.get(1)?,
      payload:          row.get(2)?,
      state:            row.get(3)?,
      attempts:         row.get(4)?,
      max_attempts:     row.get(5)?,
      backoff:          row.get(6)?,
      timeout_ms:       row.get(7)?,
      priority:         row.get(8)?,
      stalled_count:    row.get(9)?,
      created_at:       row.get(10)?,
      ready_at:         row.get(11)?,
      lease_expires_at: row.get(12)?,
      last_error:       row.get(13)?,
      finished_at:      row.get(14)?,
    })
  }

  pub fn into_job(self) -> Result<Job> {
    let kind = self.kind.parse()?;
    let payload_json: serde_json::Value = serde_json::from_str(&self.payload)?;

    Ok(Job {
      job_id:           decode_uuid(&self.job_id)?,
      payload:          JobPayload::from_parts(kind, payload_json)?,
      state:            self.state.parse()?,
      attempts:         to_u32(self.attempts),
      max_attempts:     to_u32(self.max_attempts),
      backoff:          serde_json::from_str(&self.backoff)?,
      timeout:          Duration::from_millis(self.timeout_ms.max(0) as u64),
      priority:         self.priority,
      stalled_count:    to_u32(self.stalled_count),
      created_at:       decode_dt(&self.created_at)?,
      ready_at:         decode_dt(&self.ready_at)?,
      lease_expires_at: decode_opt_dt(self.lease_expires_at.as_deref())?,
      last_error:       self.last_error,
      finished_at:      decode_opt_dt(self.finished_at.as_deref())?,
    })
  }
}

fn to_u32(v: i64) -> u32 { u32::try_from(v.max(0)).unwrap_or(u32::MAX) }

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn encoded_timestamps_sort_chronologically() {
    let whole = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let later = whole + chrono::Duration::milliseconds(500);
    let next_second = whole + chrono::Duration::seconds(1);

    let (a, b, c) = (encode_dt(whole), encode_dt(later), encode_dt(next_second));
    assert_eq!(a.len(), b.len());
    assert!(a < b && b < c);
    assert_eq!(decode_dt(&b).unwrap(), later);
  }
}
