//! Error types for `verity-core`.

use thiserror::Error;

use crate::lifecycle::ClaimStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid claim transition: {from} -> {to}")]
  InvalidTransition { from: ClaimStatus, to: ClaimStatus },

  #[error("claim text must not be empty")]
  EmptyClaimText,

  #[error("confidence {0} is outside 0.0..=1.0")]
  ConfidenceOutOfRange(f64),

  #[error("verdict edit changes nothing")]
  EmptyEdit,

  #[error("ai verdict {0}: disclaimer must be present exactly when unedited")]
  DisclaimerInvariant(uuid::Uuid),

  #[error("invalid job options: {0}")]
  InvalidJobOptions(&'static str),

  #[error("unknown claim status: {0:?}")]
  UnknownStatus(String),

  #[error("unknown verdict label: {0:?}")]
  UnknownLabel(String),

  #[error("unknown job kind: {0:?}")]
  UnknownJobKind(String),

  #[error("unknown job state: {0:?}")]
  UnknownJobState(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
