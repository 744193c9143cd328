//! The notifier contract. Delivery (email, push, ...) is someone else's
//! problem; the engine only hands over a structured request.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
  ClaimAnalyzed,
  ClaimApproved,
  ClaimRejected,
}

impl fmt::Display for NotificationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::ClaimAnalyzed => "claim_analyzed",
      Self::ClaimApproved => "claim_approved",
      Self::ClaimRejected => "claim_rejected",
    })
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
  pub user_id:    String,
  pub kind:       NotificationKind,
  pub title:      String,
  pub message:    String,
  /// The claim this notification is about.
  pub related_id: Uuid,
}

#[derive(Debug, Clone, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

pub trait Notifier: Send + Sync {
  fn notify(
    &self,
    notification: Notification,
  ) -> impl Future<Output = Result<(), NotifyError>> + Send + '_;
}
