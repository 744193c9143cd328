//! Verdict authorship: AI-authored and human-authored verdicts, and the rule
//! that decides who answers for a published outcome.
//!
//! Responsibility is never stored; it is computed from two disjoint facts:
//!
//! - an [`AiVerdict`] exists and was never edited → [`Responsibility::Ai`]
//! - an [`AiVerdict`] was edited, or a human [`Verdict`] exists →
//!   [`Responsibility::Organization`]
//!
//! [`AiVerdict::apply_edit`] is the only place a disclaimer is cleared.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, analyzer::Analysis};

/// Disclaimer attached to unedited AI verdicts when none is configured.
pub const DEFAULT_DISCLAIMER: &str = "This verdict was produced by an \
  automated analyzer and has not been reviewed by our editors. It does not \
  represent a position of the publishing organization.";

// ─── Labels and evidence ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictLabel {
  True,
  MostlyTrue,
  Mixed,
  MostlyFalse,
  False,
  Unverifiable,
}

impl VerdictLabel {
  pub const ALL: [VerdictLabel; 6] = [
    Self::True,
    Self::MostlyTrue,
    Self::Mixed,
    Self::MostlyFalse,
    Self::False,
    Self::Unverifiable,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::True => "true",
      Self::MostlyTrue => "mostly_true",
      Self::Mixed => "mixed",
      Self::MostlyFalse => "mostly_false",
      Self::False => "false",
      Self::Unverifiable => "unverifiable",
    }
  }
}

impl fmt::Display for VerdictLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for VerdictLabel {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|label| label.as_str() == s)
      .ok_or_else(|| Error::UnknownLabel(s.to_owned()))
  }
}

/// A source cited in support of a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSource {
  pub url:     String,
  pub title:   Option<String>,
  pub excerpt: Option<String>,
}

// ─── Responsibility ──────────────────────────────────────────────────────────

/// Which party answers for a published verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Responsibility {
  Ai,
  Organization,
}

impl Responsibility {
  /// Resolve responsibility for a claim from its verdict children.
  ///
  /// Returns `None` while the claim has no verdict at all.
  pub fn resolve(
    ai: Option<&AiVerdict>,
    human: Option<&Verdict>,
  ) -> Option<Responsibility> {
    match (ai, human) {
      (_, Some(_)) => Some(Self::Organization),
      (Some(ai), None) => Some(ai.responsibility()),
      (None, None) => None,
    }
  }
}

// ─── AiVerdict ───────────────────────────────────────────────────────────────

/// The analyzer's assessment of a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiVerdict {
  pub ai_verdict_id:    Uuid,
  pub claim_id:         Uuid,
  pub label:            VerdictLabel,
  pub confidence:       f64,
  pub explanation:      String,
  pub evidence:         Vec<EvidenceSource>,
  pub analyzer_version: String,
  pub edited_by_human:  bool,
  pub edited_by:        Option<String>,
  pub edited_at:        Option<DateTime<Utc>>,
  /// Present (and non-empty) exactly while `edited_by_human` is false.
  pub disclaimer:       Option<String>,
  pub created_at:       DateTime<Utc>,
}

impl AiVerdict {
  /// Build a fresh, unedited verdict from an analyzer result. A blank
  /// `disclaimer` falls back to [`DEFAULT_DISCLAIMER`].
  pub fn new(
    claim_id: Uuid,
    analysis: Analysis,
    disclaimer: &str,
    now: DateTime<Utc>,
  ) -> Result<Self> {
    if !(0.0..=1.0).contains(&analysis.confidence) {
      return Err(Error::ConfidenceOutOfRange(analysis.confidence));
    }
    let disclaimer = match disclaimer.trim() {
      "" => DEFAULT_DISCLAIMER,
      text => text,
    };

    Ok(Self {
      ai_verdict_id: Uuid::new_v4(),
      claim_id,
      label: analysis.label,
      confidence: analysis.confidence,
      explanation: analysis.explanation,
      evidence: analysis.evidence,
      analyzer_version: analysis.analyzer_version,
      edited_by_human: false,
      edited_by: None,
      edited_at: None,
      disclaimer: Some(disclaimer.to_owned()),
      created_at: now,
    })
  }

  pub fn responsibility(&self) -> Responsibility {
    if self.edited_by_human {
      Responsibility::Organization
    } else {
      Responsibility::Ai
    }
  }

  /// Overwrite the verdict with a reviewer's edit and transfer
  /// responsibility to the organization.
  ///
  /// One-way: once applied the disclaimer is gone for good. Re-applying
  /// updates the fields and the editor stamp but never restores it.
  pub fn apply_edit(
    &mut self,
    editor_id: &str,
    edit: &VerdictEdit,
    at: DateTime<Utc>,
  ) -> Result<()> {
    if edit.is_empty() {
      return Err(Error::EmptyEdit);
    }
    if let Some(label) = edit.label {
      self.label = label;
    }
    if let Some(explanation) = &edit.explanation {
      self.explanation.clone_from(explanation);
    }
    if let Some(evidence) = &edit.evidence {
      self.evidence.clone_from(evidence);
    }
    self.edited_by_human = true;
    self.edited_by = Some(editor_id.to_owned());
    self.edited_at = Some(at);
    self.disclaimer = None;
    Ok(())
  }

  /// Check the disclaimer/edited invariant. Stores call this on every read
  /// and write so a corrupt row can never leave authorship ambiguous.
  pub fn validate(&self) -> Result<()> {
    let has_disclaimer =
      self.disclaimer.as_deref().is_some_and(|d| !d.trim().is_empty());
    if has_disclaimer == self.edited_by_human {
      return Err(Error::DisclaimerInvariant(self.ai_verdict_id));
    }
    if !(0.0..=1.0).contains(&self.confidence) {
      return Err(Error::ConfidenceOutOfRange(self.confidence));
    }
    Ok(())
  }
}

/// A reviewer's changes to an AI verdict. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictEdit {
  pub label:       Option<VerdictLabel>,
  pub explanation: Option<String>,
  pub evidence:    Option<Vec<EvidenceSource>>,
}

impl VerdictEdit {
  pub fn is_empty(&self) -> bool {
    self.label.is_none() && self.explanation.is_none() && self.evidence.is_none()
  }
}

// ─── Verdict (human) ─────────────────────────────────────────────────────────

/// Reviewer input for an independent verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanVerdictInput {
  pub label:       VerdictLabel,
  pub explanation: String,
  #[serde(default)]
  pub evidence:    Vec<EvidenceSource>,
}

/// A verdict authored by a reviewer without going through the analyzer.
/// Always organization-responsible and final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
  pub verdict_id:     Uuid,
  pub claim_id:       Uuid,
  pub reviewer_id:    String,
  pub label:          VerdictLabel,
  pub explanation:    String,
  pub evidence:       Vec<EvidenceSource>,
  pub responsibility: Responsibility,
  pub is_final:       bool,
  pub created_at:     DateTime<Utc>,
}

impl Verdict {
  pub fn new(
    claim_id: Uuid,
    reviewer_id: &str,
    input: HumanVerdictInput,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      verdict_id: Uuid::new_v4(),
      claim_id,
      reviewer_id: reviewer_id.to_owned(),
      label: input.label,
      explanation: input.explanation,
      evidence: input.evidence,
      responsibility: Responsibility::Organization,
      is_final: true,
      created_at: now,
    }
  }
}
