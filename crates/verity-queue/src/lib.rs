//! A durable background job queue.
//!
//! Jobs are persisted through a [`verity_core::store::JobStore`] before
//! [`JobQueue::enqueue`] returns, dispatched to the handler registered for
//! their kind, retried with backoff on retryable failure and recovered when
//! the worker running them stops heartbeating.

pub mod clock;
pub mod error;
pub mod handler;
pub mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use handler::{JobContext, JobHandler, handler_fn};
pub use queue::{JobOutcome, JobQueue, QueueConfig, QueueHandle};
