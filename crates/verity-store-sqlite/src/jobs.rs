//! [`JobStore`] implementation for [`SqliteStore`]: the durable queue table.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use verity_core::{
  job::{Job, JobKind, JobState},
  store::JobStore,
};

use crate::{
  Error, Result,
  encode::{
    JOB_COLUMNS, RawJob, encode_backoff, encode_dt, encode_duration_ms,
    encode_uuid,
  },
  store::SqliteStore,
};

impl SqliteStore {
  /// Move an active job to a new state. Jobs that are no longer active (e.g.
  /// recovered by the stall reaper while a slow handler finished) are left
  /// alone and `Ok(false)` is returned.
  async fn finish_active(
    &self,
    job_id: Uuid,
    sql: &'static str,
    params: FinishParams,
  ) -> Result<bool> {
    let id_str = encode_uuid(job_id);

    let (applied, exists): (bool, bool) = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          sql,
          rusqlite::params![id_str, params.attempts, params.at, params.error],
        )?;
        if changed == 1 {
          return Ok((true, true));
        }
        let exists = conn
          .query_row(
            "SELECT 1 FROM jobs WHERE job_id = ?1",
            rusqlite::params![id_str],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        Ok((false, exists))
      })
      .await?;

    if !exists {
      return Err(Error::JobNotFound(job_id));
    }
    Ok(applied)
  }
}

struct FinishParams {
  attempts: i64,
  at:       String,
  error:    Option<String>,
}

impl JobStore for SqliteStore {
  type Error = Error;

  async fn insert_job(&self, job: Job) -> Result<()> {
    let job_id_str    = encode_uuid(job.job_id);
    let kind          = job.kind().as_str();
    let payload       = job.payload.to_json()?.to_string();
    let state         = job.state.as_str();
    let attempts      = i64::from(job.attempts);
    let max_attempts  = i64::from(job.max_attempts);
    let backoff       = encode_backoff(&job.backoff)?;
    let timeout_ms    = encode_duration_ms(job.timeout);
    let priority      = job.priority;
    let stalled_count = i64::from(job.stalled_count);
    let created_at    = encode_dt(job.created_at);
    let ready_at      = encode_dt(job.ready_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO jobs (
             job_id, kind, payload, state, attempts, max_attempts,
             backoff, timeout_ms, priority, stalled_count, created_at, ready_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
          rusqlite::params![
            job_id_str,
            kind,
            payload,
            state,
            attempts,
            max_attempts,
            backoff,
            timeout_ms,
            priority,
            stalled_count,
            created_at,
            ready_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn claim_next_job(
    &self,
    kinds:       &[JobKind],
    now:         DateTime<Utc>,
    lease_until: DateTime<Utc>,
  ) -> Result<Option<Job>> {
    if kinds.is_empty() {
      return Ok(None);
    }
    let kinds: Vec<&'static str> = kinds.iter().map(|k| k.as_str()).collect();
    let now_str   = encode_dt(now);
    let lease_str = encode_dt(lease_until);

    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let placeholders = (0..kinds.len())
          .map(|i| format!("?{}", i + 2))
          .collect::<Vec<_>>()
          .join(", ");
        let sql = format!(
          "SELECT job_id FROM jobs
           WHERE state = 'waiting' AND ready_at <= ?1 AND kind IN ({placeholders})
           ORDER BY priority DESC, ready_at, seq
           LIMIT 1"
        );

        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(kinds.len() + 1);
        params.push(&now_str);
        for kind in &kinds {
          params.push(kind);
        }

        let next: Option<String> = tx
          .query_row(&sql, params.as_slice(), |r| r.get(0))
          .optional()?;
        let Some(job_id) = next else {
          return Ok(None);
        };

        tx.execute(
          "UPDATE jobs SET state = 'active', lease_expires_at = ?2
           WHERE job_id = ?1 AND state = 'waiting'",
          rusqlite::params![job_id, lease_str],
        )?;

        let raw = tx.query_row(
          &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
          rusqlite::params![job_id],
          RawJob::from_row,
        )?;
        tx.commit()?;
        Ok(Some(raw))
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn extend_lease(&self, job_id: Uuid, lease_until: DateTime<Utc>) -> Result<bool> {
    let id_str    = encode_uuid(job_id);
    let lease_str = encode_dt(lease_until);

    let changed: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE jobs SET lease_expires_at = ?2 WHERE job_id = ?1 AND state = 'active'",
          rusqlite::params![id_str, lease_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn complete_job(&self, job_id: Uuid, attempts: u32, at: DateTime<Utc>) -> Result<bool> {
    self
      .finish_active(
        job_id,
        "UPDATE jobs
         SET state = 'completed', attempts = ?2, finished_at = ?3,
             lease_expires_at = NULL, last_error = COALESCE(?4, last_error)
         WHERE job_id = ?1 AND state = 'active'",
        FinishParams { attempts: i64::from(attempts), at: encode_dt(at), error: None },
      )
      .await
  }

  async fn retry_job(
    &self,
    job_id:   Uuid,
    attempts: u32,
    ready_at: DateTime<Utc>,
    error:    String,
  ) -> Result<bool> {
    self
      .finish_active(
        job_id,
        "UPDATE jobs
         SET state = 'waiting', attempts = ?2, ready_at = ?3,
             lease_expires_at = NULL, last_error = ?4
         WHERE job_id = ?1 AND state = 'active'",
        FinishParams {
          attempts: i64::from(attempts),
          at:       encode_dt(ready_at),
          error:    Some(error),
        },
      )
      .await
  }

  async fn fail_job(
    &self,
    job_id:   Uuid,
    attempts: u32,
    error:    String,
    at:       DateTime<Utc>,
  ) -> Result<bool> {
    self
      .finish_active(
        job_id,
        "UPDATE jobs
         SET state = 'failed', attempts = ?2, finished_at = ?3,
             lease_expires_at = NULL, last_error = ?4
         WHERE job_id = ?1 AND state = 'active'",
        FinishParams {
          attempts: i64::from(attempts),
          at:       encode_dt(at),
          error:    Some(error),
        },
      )
      .await
  }

  async fn requeue_stalled(
    &self,
    now:               DateTime<Utc>,
    max_stalled_count: u32,
  ) -> Result<Vec<Job>> {
    let now_str   = encode_dt(now);
    let max_stall = i64::from(max_stalled_count);

    let raws: Vec<RawJob> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let ids: Vec<String> = {
          let mut stmt = tx.prepare(
            "SELECT job_id FROM jobs
             WHERE state = 'active' AND lease_expires_at < ?1
             ORDER BY seq",
          )?;
          stmt
            .query_map(rusqlite::params![now_str], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut recovered = Vec::with_capacity(ids.len());
        for id in ids {
          tx.execute(
            "UPDATE jobs
             SET stalled_count    = stalled_count + 1,
                 lease_expires_at = NULL,
                 state       = CASE WHEN stalled_count + 1 > ?2 THEN 'failed' ELSE 'waiting' END,
                 finished_at = CASE WHEN stalled_count + 1 > ?2 THEN ?3 ELSE NULL END,
                 last_error  = CASE WHEN stalled_count + 1 > ?2
                                    THEN 'job stalled more than allowable limit'
                                    ELSE last_error END
             WHERE job_id = ?1",
            rusqlite::params![id, max_stall, now_str],
          )?;
          recovered.push(tx.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
            rusqlite::params![id],
            RawJob::from_row,
          )?);
        }

        tx.commit()?;
        Ok(recovered)
      })
      .await?;

    raws.into_iter().map(RawJob::into_job).collect()
  }

  async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
    let id_str = encode_uuid(job_id);

    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
            rusqlite::params![id_str],
            RawJob::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
    let state_str = state.map(JobState::as_str);

    let raws: Vec<RawJob> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {JOB_COLUMNS} FROM jobs
           WHERE ?1 IS NULL OR state = ?1
           ORDER BY seq"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![state_str], RawJob::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawJob::into_job).collect()
  }
}
