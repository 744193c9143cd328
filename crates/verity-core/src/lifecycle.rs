//! The claim state machine.
//!
//! A claim moves `pending → ai_processed → approved | rejected`, or directly
//! `pending → approved | rejected` when a reviewer bypasses the analyzer.
//! The window during which a queue worker is analysing a claim
//! (`ai_processing`) is never persisted: a claim whose analysis fails must
//! stay `pending`, and persisting the intermediate state would force a
//! regression on failure.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Persisted lifecycle status of a claim.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
  Pending,
  AiProcessed,
  Approved,
  Rejected,
}

impl ClaimStatus {
  pub const ALL: [ClaimStatus; 4] =
    [Self::Pending, Self::AiProcessed, Self::Approved, Self::Rejected];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::AiProcessed => "ai_processed",
      Self::Approved => "approved",
      Self::Rejected => "rejected",
    }
  }

  /// Position in the lifecycle partial order. `approved` and `rejected` are
  /// incomparable siblings and share the top rank.
  pub fn rank(self) -> u8 {
    match self {
      Self::Pending => 0,
      Self::AiProcessed => 1,
      Self::Approved | Self::Rejected => 2,
    }
  }

  pub fn is_terminal(self) -> bool { self.rank() == 2 }

  /// The single transition table for claims. Every transition strictly
  /// increases [`rank`](Self::rank), so no status is ever revisited.
  pub fn can_transition_to(self, next: ClaimStatus) -> bool {
    use ClaimStatus::*;
    matches!(
      (self, next),
      (Pending, AiProcessed)
        | (Pending, Approved)
        | (Pending, Rejected)
        | (AiProcessed, Approved)
        | (AiProcessed, Rejected)
    )
  }

  /// Validate `self → next`, returning `next` on success.
  pub fn transition_to(self, next: ClaimStatus) -> Result<ClaimStatus> {
    if self.can_transition_to(next) {
      Ok(next)
    } else {
      Err(Error::InvalidTransition { from: self, to: next })
    }
  }
}

impl fmt::Display for ClaimStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ClaimStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| Error::UnknownStatus(s.to_owned()))
  }
}
