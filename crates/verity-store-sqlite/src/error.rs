//! Error type for `verity-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] verity_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown responsibility: {0:?}")]
  UnknownResponsibility(String),

  #[error("job not found: {0}")]
  JobNotFound(uuid::Uuid),

  #[error("verdict {0} does not belong to the claim being updated")]
  OrphanVerdict(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
