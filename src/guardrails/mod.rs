//! Multi-layer content guardrails for story text, prompts, and media.
//!
//! The guardrail subsystem is a cascade of independent checks, each of which
//! can contribute [`Violation`] records to the state's append-only
//! `guardrail_violations` reducer:
//!
//! - [`text`] — the three-layer text cascade (provider moderation → PII
//!   detection → LLM deep safety analysis) applied to the user prompt, the
//!   story, and video prompts.
//! - [`image`] — the single-stage vision check applied to each generated
//!   image, with a bounded regenerate-and-recheck retry.
//!
//! Only **hard** violations prevent progression; soft violations are
//! surfaced to the human reviewer. A hard violation cured by a successful
//! media regeneration stays in the audit list but is marked
//! [`superseded`](Violation::superseded) and no longer counts toward the
//! aggregate pass/fail.

pub mod image;
pub mod text;

use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a guardrail finding is.
///
/// Ordered so comparisons like `severity >= Severity::Hard` work naturally.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Surfaced to the reviewer, does not block progression.
    Soft,
    /// Alone disqualifies the content from progressing.
    Hard,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Soft => write!(f, "soft"),
            Severity::Hard => write!(f, "hard"),
        }
    }
}

/// Which part of the pipeline produced a violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSource {
    /// The user's submission prompt (input moderation).
    Input,
    /// The generated story text.
    Story,
    /// A generated image.
    Image,
    /// A video generation prompt.
    VideoPrompt,
}

impl fmt::Display for ViolationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationSource::Input => "input",
            ViolationSource::Story => "story",
            ViolationSource::Image => "image",
            ViolationSource::VideoPrompt => "video_prompt",
        };
        write!(f, "{s}")
    }
}

/// A single guardrail finding.
///
/// Violations accumulate in the state's `guardrail_violations` reducer from
/// every guardrail node, including parallel dispatch units. `media_index`
/// is present for per-media findings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    /// Short machine-readable category, e.g. `"violence_detection"`,
    /// `"pii_email"`, `"image_weapon"`.
    pub category: String,
    /// Human-readable explanation for the reviewer.
    pub detail: String,
    pub source: ViolationSource,
    #[serde(default)]
    pub media_index: Option<u32>,
    /// Detector confidence in \[0.0, 1.0\].
    #[serde(default)]
    pub confidence: f64,
    /// A hard finding from an earlier media pass that a successful
    /// regeneration cured. Kept for audit; excluded from pass/fail.
    #[serde(default)]
    pub superseded: bool,
}

impl Violation {
    /// A hard violation with full confidence.
    #[must_use]
    pub fn hard(
        category: impl Into<String>,
        detail: impl Into<String>,
        source: ViolationSource,
    ) -> Self {
        Self {
            severity: Severity::Hard,
            category: category.into(),
            detail: detail.into(),
            source,
            media_index: None,
            confidence: 1.0,
            superseded: false,
        }
    }

    /// A soft violation with full confidence.
    #[must_use]
    pub fn soft(
        category: impl Into<String>,
        detail: impl Into<String>,
        source: ViolationSource,
    ) -> Self {
        Self {
            severity: Severity::Soft,
            category: category.into(),
            detail: detail.into(),
            source,
            media_index: None,
            confidence: 1.0,
            superseded: false,
        }
    }

    /// Attach a media display index.
    #[must_use]
    pub fn with_index(mut self, index: u32) -> Self {
        self.media_index = Some(index);
        self
    }

    /// Set the detector confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Whether this finding blocks progression.
    #[must_use]
    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Hard
    }

    /// Whether this finding counts toward the aggregate pass/fail:
    /// hard and not cured by a later regeneration pass.
    #[must_use]
    pub fn blocks(&self) -> bool {
        self.is_hard() && !self.superseded
    }
}

/// Split violations into (hard, soft) partitions, preserving order.
/// Superseded hard violations are excluded from the hard partition.
#[must_use]
pub fn partition(violations: &[Violation]) -> (Vec<&Violation>, Vec<&Violation>) {
    let hard = violations.iter().filter(|v| v.blocks()).collect();
    let soft = violations
        .iter()
        .filter(|v| v.severity == Severity::Soft)
        .collect();
    (hard, soft)
}
