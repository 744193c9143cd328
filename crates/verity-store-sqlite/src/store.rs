//! [`SqliteStore`]: the SQLite implementation of [`ClaimStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{OptionalExtension as _, Transaction};
use uuid::Uuid;

use verity_core::{
  claim::{Claim, NewClaim},
  lifecycle::ClaimStatus,
  store::{ClaimQuery, ClaimStore, ClaimUpdate, WriteOutcome},
  verdict::{AiVerdict, Verdict},
};

use crate::{
  Error, Result,
  encode::{
    AI_VERDICT_COLUMNS, AiVerdictParams, CLAIM_COLUMNS, RawAiVerdict, RawClaim,
    RawVerdict, VERDICT_COLUMNS, encode_dt, encode_evidence,
    encode_responsibility, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Verity store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `link` and the guarded claim update in one transaction.
  ///
  /// `link` performs the verdict-side write; it only runs once the revision
  /// guard has passed, so a stale caller never touches verdict rows.
  async fn guarded_write<F>(
    &self,
    update: ClaimUpdate,
    link: F,
  ) -> Result<WriteOutcome<Claim>>
  where
    F: FnOnce(&Transaction<'_>, &str) -> rusqlite::Result<()> + Send + 'static,
  {
    let claim_id   = encode_uuid(update.claim_id);
    let expected   = update.expected_revision as i64;
    let status     = update.status.as_str();
    let reviewer   = update.assigned_reviewer;
    let reason     = update.rejection_reason;
    let now        = encode_dt(Utc::now());

    let outcome: GuardOutcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let current = select_claim(&tx, &claim_id)?;
        let Some(current) = current else {
          return Ok(GuardOutcome::Missing);
        };
        if current.revision != expected {
          return Ok(GuardOutcome::Stale(current));
        }

        link(&tx, &now)?;

        tx.execute(
          "UPDATE claims
           SET status            = ?2,
               assigned_reviewer = COALESCE(?3, assigned_reviewer),
               rejection_reason  = COALESCE(?4, rejection_reason),
               revision          = revision + 1,
               updated_at        = ?5
           WHERE claim_id = ?1 AND revision = ?6",
          rusqlite::params![claim_id, status, reviewer, reason, now, expected],
        )?;

        let updated = select_claim(&tx, &claim_id)?;
        tx.commit()?;

        Ok(match updated {
          Some(raw) => GuardOutcome::Applied(raw),
          None => GuardOutcome::Missing,
        })
      })
      .await?;

    Ok(match outcome {
      GuardOutcome::Applied(raw) => WriteOutcome::Applied(raw.into_claim()?),
      GuardOutcome::Stale(raw) => WriteOutcome::Stale(raw.into_claim()?),
      GuardOutcome::Missing => WriteOutcome::Missing,
    })
  }
}

/// [`WriteOutcome`] before decoding, as produced inside the connection thread.
enum GuardOutcome {
  Applied(RawClaim),
  Stale(RawClaim),
  Missing,
}

fn select_claim(
  conn: &rusqlite::Connection,
  claim_id: &str,
) -> rusqlite::Result<Option<RawClaim>> {
  conn
    .query_row(
      &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE claim_id = ?1"),
      rusqlite::params![claim_id],
      RawClaim::from_row,
    )
    .optional()
}

// ─── ClaimStore impl ─────────────────────────────────────────────────────────

impl ClaimStore for SqliteStore {
  type Error = Error;

  // ── Claims ────────────────────────────────────────────────────────────────

  async fn create_claim(&self, input: NewClaim) -> Result<Claim> {
    input.validate()?;

    let now = Utc::now();
    let claim = Claim {
      claim_id:          Uuid::new_v4(),
      submitter_id:      input.submitter_id,
      text:              input.text,
      status:            ClaimStatus::Pending,
      ai_verdict_id:     None,
      verdict_id:        None,
      assigned_reviewer: None,
      rejection_reason:  None,
      last_error:        None,
      revision:          0,
      created_at:        now,
      updated_at:        now,
    };

    let id_str     = encode_uuid(claim.claim_id);
    let submitter  = claim.submitter_id.clone();
    let text       = claim.text.clone();
    let status_str = claim.status.as_str();
    let at_str     = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO claims (claim_id, submitter_id, text, status, revision, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
          rusqlite::params![id_str, submitter, text, status_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(claim)
  }

  async fn find_claim(&self, id: Uuid) -> Result<Option<Claim>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawClaim> = self
      .conn
      .call(move |conn| Ok(select_claim(conn, &id_str)?))
      .await?;

    raw.map(RawClaim::into_claim).transpose()
  }

  async fn list_claims(&self, query: &ClaimQuery) -> Result<Vec<Claim>> {
    let status_str = if query.needs_attention {
      Some(ClaimStatus::Pending.as_str())
    } else {
      query.status.map(ClaimStatus::as_str)
    };
    let needs_attention = query.needs_attention;
    let submitter       = query.submitter_id.clone();
    let limit_val       = query.limit.unwrap_or(100) as i64;
    let offset_val      = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawClaim> = self
      .conn
      .call(move |conn| {
        // Build WHERE clause dynamically; unused parameters bind as NULL.
        let mut conds: Vec<&'static str> = vec![];
        if status_str.is_some() {
          conds.push("status = ?1");
        }
        if needs_attention {
          conds.push("last_error IS NOT NULL");
        }
        if submitter.is_some() {
          conds.push("submitter_id = ?2");
        }

        let where_clause = if conds.is_empty() {
          String::new()
        } else {
          format!("WHERE {}", conds.join(" AND "))
        };

        let sql = format!(
          "SELECT {CLAIM_COLUMNS}
           FROM claims
           {where_clause}
           ORDER BY created_at, claim_id
           LIMIT ?3 OFFSET ?4"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![status_str, submitter, limit_val, offset_val],
            RawClaim::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawClaim::into_claim).collect()
  }

  async fn update_claim(&self, update: ClaimUpdate) -> Result<WriteOutcome<Claim>> {
    self.guarded_write(update, |_, _| Ok(())).await
  }

  async fn record_claim_error(&self, id: Uuid, error: Option<String>) -> Result<()> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE claims SET last_error = ?2, updated_at = ?3
           WHERE claim_id = ?1 AND status = 'pending'",
          rusqlite::params![id_str, error, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Verdicts ──────────────────────────────────────────────────────────────

  async fn find_ai_verdict(&self, id: Uuid) -> Result<Option<AiVerdict>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawAiVerdict> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {AI_VERDICT_COLUMNS} FROM ai_verdicts WHERE ai_verdict_id = ?1"),
            rusqlite::params![id_str],
            RawAiVerdict::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawAiVerdict::into_ai_verdict).transpose()
  }

  async fn find_verdict(&self, id: Uuid) -> Result<Option<Verdict>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawVerdict> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {VERDICT_COLUMNS} FROM verdicts WHERE verdict_id = ?1"),
            rusqlite::params![id_str],
            RawVerdict::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawVerdict::into_verdict).transpose()
  }

  async fn create_ai_verdict(
    &self,
    verdict: AiVerdict,
    update:  ClaimUpdate,
  ) -> Result<WriteOutcome<Claim>> {
    if verdict.claim_id != update.claim_id {
      return Err(Error::OrphanVerdict(verdict.ai_verdict_id));
    }
    let p = AiVerdictParams::encode(&verdict)?;

    self
      .guarded_write(update, move |tx, now| {
        tx.execute(
          &format!(
            "INSERT INTO ai_verdicts ({AI_VERDICT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
          ),
          rusqlite::params![
            p.ai_verdict_id,
            p.claim_id,
            p.label,
            p.confidence,
            p.explanation,
            p.evidence,
            p.analyzer_version,
            p.edited_by_human,
            p.edited_by,
            p.edited_at,
            p.disclaimer,
            p.created_at,
          ],
        )?;
        tx.execute(
          "UPDATE claims SET ai_verdict_id = ?2, last_error = NULL, updated_at = ?3
           WHERE claim_id = ?1",
          rusqlite::params![p.claim_id, p.ai_verdict_id, now],
        )?;
        Ok(())
      })
      .await
  }

  async fn update_ai_verdict(
    &self,
    verdict: AiVerdict,
    update:  ClaimUpdate,
  ) -> Result<WriteOutcome<Claim>> {
    if verdict.claim_id != update.claim_id {
      return Err(Error::OrphanVerdict(verdict.ai_verdict_id));
    }
    let p = AiVerdictParams::encode(&verdict)?;

    self
      .guarded_write(update, move |tx, _| {
        let changed = tx.execute(
          "UPDATE ai_verdicts
           SET label           = ?3,
               explanation     = ?4,
               evidence        = ?5,
               edited_by_human = ?6,
               edited_by       = ?7,
               edited_at       = ?8,
               disclaimer      = ?9
           WHERE ai_verdict_id = ?1 AND claim_id = ?2",
          rusqlite::params![
            p.ai_verdict_id,
            p.claim_id,
            p.label,
            p.explanation,
            p.evidence,
            p.edited_by_human,
            p.edited_by,
            p.edited_at,
            p.disclaimer,
          ],
        )?;
        if changed == 0 {
          return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        Ok(())
      })
      .await
  }

  async fn create_verdict(
    &self,
    verdict: Verdict,
    update:  ClaimUpdate,
  ) -> Result<WriteOutcome<Claim>> {
    if verdict.claim_id != update.claim_id {
      return Err(Error::OrphanVerdict(verdict.verdict_id));
    }

    let verdict_id     = encode_uuid(verdict.verdict_id);
    let claim_id       = encode_uuid(verdict.claim_id);
    let reviewer_id    = verdict.reviewer_id.clone();
    let label          = verdict.label.as_str();
    let explanation    = verdict.explanation.clone();
    let evidence       = encode_evidence(&verdict.evidence)?;
    let responsibility = encode_responsibility(verdict.responsibility);
    let is_final       = verdict.is_final;
    let created_at     = encode_dt(verdict.created_at);

    self
      .guarded_write(update, move |tx, now| {
        tx.execute(
          &format!(
            "INSERT INTO verdicts ({VERDICT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
          ),
          rusqlite::params![
            verdict_id,
            claim_id,
            reviewer_id,
            label,
            explanation,
            evidence,
            responsibility,
            is_final,
            created_at,
          ],
        )?;
        tx.execute(
          "UPDATE claims SET verdict_id = ?2, updated_at = ?3 WHERE claim_id = ?1",
          rusqlite::params![claim_id, verdict_id, now],
        )?;
        Ok(())
      })
      .await
  }
}
