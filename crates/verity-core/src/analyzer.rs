//! The analyzer contract: claim text in, preliminary verdict out.
//!
//! The analyzer is a black box (a reasoning/search service). Implementations
//! live outside this crate; `verity-worker` ships an HTTP one.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::verdict::{EvidenceSource, VerdictLabel};

/// What the analyzer is asked to assess.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
  pub claim_id:   Uuid,
  pub claim_text: String,
  /// Time left before the queue abandons the attempt. Clients that support
  /// per-request deadlines should honour it.
  #[serde(skip)]
  pub timeout:    Option<Duration>,
}

/// The analyzer's structured answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
  pub label:            VerdictLabel,
  /// 0.0 ..= 1.0
  pub confidence:       f64,
  pub explanation:      String,
  #[serde(default)]
  pub evidence:         Vec<EvidenceSource>,
  #[serde(default = "unknown_version")]
  pub analyzer_version: String,
}

fn unknown_version() -> String { "unknown".to_owned() }

#[derive(Debug, Clone, Error)]
pub enum AnalyzerError {
  /// Network failure, timeout, overload. Worth retrying.
  #[error("transient analyzer error: {0}")]
  Transient(String),

  /// The analyzer rejected the input. Retrying cannot help.
  #[error("permanent analyzer error: {0}")]
  Permanent(String),
}

impl AnalyzerError {
  pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

pub trait Analyzer: Send + Sync {
  fn analyze(
    &self,
    request: AnalysisRequest,
  ) -> impl Future<Output = Result<Analysis, AnalyzerError>> + Send + '_;
}
