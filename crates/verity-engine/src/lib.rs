//! The claim lifecycle engine.
//!
//! [`ClaimWorkflow`] owns every claim transition and the responsibility
//! transfer that happens when a reviewer edits an AI verdict. [`ClaimIntake`]
//! turns submissions into pending claims plus analysis jobs, and
//! [`AiProcessingHandler`] runs those jobs on a [`verity_queue::JobQueue`].

pub mod error;
pub mod handler;
pub mod intake;
pub mod workflow;

pub use error::{Error, Result};
pub use handler::{AiProcessingHandler, FailureRecorder};
pub use intake::ClaimIntake;
pub use workflow::{ClaimWorkflow, WorkflowConfig};
