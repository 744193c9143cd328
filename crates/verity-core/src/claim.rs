//! Claim: a unit of user-submitted factual content moving through the
//! verification pipeline.
//!
//! Claims are never deleted. Every write bumps [`Claim::revision`], which the
//! store uses as a compare-and-set token so that lifecycle operations on the
//! same claim cannot interleave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, lifecycle::ClaimStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
  pub claim_id:          Uuid,
  pub submitter_id:      String,
  pub text:              String,
  pub status:            ClaimStatus,
  /// The analyzer's verdict, if analysis has completed.
  pub ai_verdict_id:     Option<Uuid>,
  /// An independent reviewer verdict, if one was created.
  pub verdict_id:        Option<Uuid>,
  pub assigned_reviewer: Option<String>,
  pub rejection_reason:  Option<String>,
  /// The last analysis failure. Set when the queue gives up on a claim so
  /// reviewers can see it needs manual attention.
  pub last_error:        Option<String>,
  pub revision:          u64,
  pub created_at:        DateTime<Utc>,
  pub updated_at:        DateTime<Utc>,
}

impl Claim {
  /// A pending claim whose automated analysis was abandoned.
  pub fn needs_attention(&self) -> bool {
    self.status == ClaimStatus::Pending && self.last_error.is_some()
  }
}

/// Input to [`crate::store::ClaimStore::create_claim`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClaim {
  pub submitter_id: String,
  pub text:         String,
}

impl NewClaim {
  pub fn new(submitter_id: impl Into<String>, text: impl Into<String>) -> Self {
    Self { submitter_id: submitter_id.into(), text: text.into() }
  }

  /// Reject blank claims before they reach the store.
  pub fn validate(&self) -> Result<()> {
    if self.text.trim().is_empty() {
      return Err(Error::EmptyClaimText);
    }
    Ok(())
  }
}
