//! Error type for `verity-queue`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid queue configuration: {0}")]
  Configuration(String),

  #[error(transparent)]
  Core(#[from] verity_core::Error),

  #[error("job store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
