//! Job handlers: the per-kind code the queue dispatches to.

use std::{future::Future, time::Duration};

use futures::future::BoxFuture;
use uuid::Uuid;
use verity_core::job::{JobError, JobPayload};

/// The attempt a handler is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
  pub job_id:  Uuid,
  /// 1-based.
  pub attempt: u32,
  /// How long the queue waits for this attempt before abandoning it.
  /// Handlers calling out to slow services should pass it on as a deadline.
  pub timeout: Duration,
}

/// Executes jobs of one kind.
///
/// The returned future is dropped if the job exceeds its timeout, so any
/// in-flight work it owns is cancelled with it.
pub trait JobHandler: Send + Sync + 'static {
  fn handle(&self, payload: JobPayload, ctx: JobContext) -> BoxFuture<'_, Result<(), JobError>>;
}

/// A [`JobHandler`] backed by an async closure.
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
  F: Fn(JobPayload, JobContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
  FnHandler(f)
}

impl<F, Fut> JobHandler for FnHandler<F>
where
  F: Fn(JobPayload, JobContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
  fn handle(&self, payload: JobPayload, ctx: JobContext) -> BoxFuture<'_, Result<(), JobError>> {
    Box::pin((self.0)(payload, ctx))
  }
}
