//! Error type for `verity-engine`.

use thiserror::Error;
use uuid::Uuid;
use verity_core::{analyzer::AnalyzerError, job::JobError};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{what} {id} not found")]
  NotFound { what: &'static str, id: Uuid },

  /// The operation is not valid for the claim's current lifecycle state.
  #[error("invalid state: {0}")]
  InvalidState(String),

  #[error("transient analyzer error: {0}")]
  TransientAnalyzer(String),

  #[error("permanent analyzer error: {0}")]
  PermanentAnalyzer(String),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// Every compare-and-set attempt lost to a concurrent writer.
  #[error("claim {claim_id} kept changing underneath {attempts} write attempts")]
  Conflict { claim_id: Uuid, attempts: u32 },

  /// Stored data violates a domain invariant.
  #[error("data integrity error: {0}")]
  Integrity(#[source] verity_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Queue(#[from] verity_queue::Error),
}

impl Error {
  pub(crate) fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  pub(crate) fn claim_not_found(id: Uuid) -> Self {
    Self::NotFound { what: "claim", id }
  }

  /// Whether running the same operation again may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::TransientAnalyzer(_)
        | Self::Conflict { .. }
        | Self::Store(_)
        | Self::Queue(_)
    )
  }
}

impl From<verity_core::Error> for Error {
  fn from(err: verity_core::Error) -> Self {
    use verity_core::Error as Core;
    match err {
      Core::InvalidTransition { .. } => Self::InvalidState(err.to_string()),
      Core::EmptyClaimText | Core::ConfidenceOutOfRange(_) | Core::EmptyEdit => {
        Self::InvalidInput(err.to_string())
      }
      other => Self::Integrity(other),
    }
  }
}

impl From<AnalyzerError> for Error {
  fn from(err: AnalyzerError) -> Self {
    match err {
      AnalyzerError::Transient(msg) => Self::TransientAnalyzer(msg),
      AnalyzerError::Permanent(msg) => Self::PermanentAnalyzer(msg),
    }
  }
}

impl From<Error> for JobError {
  fn from(err: Error) -> Self {
    if err.is_retryable() {
      JobError::Retryable(err.to_string())
    } else {
      JobError::Permanent(err.to_string())
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
