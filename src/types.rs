//! Core identifier types for the fablegraph workflow engine.
//!
//! This module defines the fundamental vocabulary shared by the graph,
//! executor, and checkpoint layers: node identifiers, age groups, media
//! kinds, and the externally visible job state machine.
//!
//! # Key Types
//!
//! - [`NodeKind`]: identifies a node in the workflow graph
//! - [`AgeGroup`]: selects the threshold bundle used by guardrail scoring
//! - [`JobStatus`]: the job lifecycle reported to external collaborators
//! - [`MediaKind`]: distinguishes image and video pipelines

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within the workflow graph.
///
/// `Start` and `End` are virtual endpoints: they carry edges but are never
/// executed. Every executable node is a `Named` pipeline stage built
/// through [`named`](Self::named) — the canonical node names of the story
/// graph live in [`crate::story::names`].
///
/// # Persistence
///
/// Checkpoints store node ids as plain stage names, with `"Start"` and
/// `"End"` reserved for the virtual endpoints. [`named`](Self::named) is
/// the single parsing point: [`decode`](Self::decode) and `From<&str>`
/// route through it, so a persisted name can never alias a virtual
/// endpoint.
///
/// # Examples
///
/// ```rust
/// use fablegraph::types::NodeKind;
///
/// let assembler = NodeKind::named("assembler");
/// assert_eq!(assembler.encode(), "assembler");
/// assert_eq!(assembler.name(), Some("assembler"));
/// assert_eq!(NodeKind::decode("assembler"), assembler);
///
/// // Reserved words always resolve to the virtual endpoints.
/// assert!(NodeKind::named("End").is_end());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Virtual entry point. Has no handler; its out-edges form the initial
    /// frontier of every thread.
    Start,

    /// Virtual exit point. Has no handler; routing to `End` terminates a
    /// branch.
    End,

    /// An executable pipeline stage identified by name.
    Named(String),
}

/// Reserved name of the virtual entry endpoint.
const START_NAME: &str = "Start";
/// Reserved name of the virtual exit endpoint.
const END_NAME: &str = "End";

impl NodeKind {
    /// Build a node id from a stage name. The reserved names `"Start"` and
    /// `"End"` resolve to the virtual endpoints; everything else is a
    /// `Named` stage.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            START_NAME => NodeKind::Start,
            END_NAME => NodeKind::End,
            _ => NodeKind::Named(name),
        }
    }

    /// The stage name, or `None` for the virtual endpoints.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeKind::Named(name) => Some(name),
            NodeKind::Start | NodeKind::End => None,
        }
    }

    /// The persisted string form: the stage name itself, or the reserved
    /// endpoint words.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => START_NAME.to_string(),
            NodeKind::End => END_NAME.to_string(),
            NodeKind::Named(name) => name.clone(),
        }
    }

    /// Decode a persisted string form. Total: any non-reserved string is a
    /// stage name, so checkpoints written by newer graph versions still
    /// round-trip (the registry validation rejects stages this engine does
    /// not know).
    pub fn decode(s: &str) -> Self {
        Self::named(s)
    }

    /// Returns `true` if this is the virtual [`Start`](Self::Start) node.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the virtual [`End`](Self::End) node.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None if self.is_start() => f.write_str(START_NAME),
            None => f.write_str(END_NAME),
        }
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        Self::named(s)
    }
}

/// Target audience age band. Selects the guardrail threshold bundle and the
/// writing-style instructions used during story generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    /// Ages 3–5: simplest vocabulary, strictest thresholds.
    #[serde(rename = "3-5")]
    Preschool,
    /// Ages 6–8: the platform default.
    #[default]
    #[serde(rename = "6-8")]
    EarlyReader,
    /// Ages 9–12: richer vocabulary, loosest thresholds.
    #[serde(rename = "9-12")]
    MiddleGrade,
}

impl AgeGroup {
    /// The canonical label used in prompts and persisted payloads.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::Preschool => "3-5",
            AgeGroup::EarlyReader => "6-8",
            AgeGroup::MiddleGrade => "9-12",
        }
    }

    /// All supported age groups, youngest first.
    pub const ALL: [AgeGroup; 3] = [
        AgeGroup::Preschool,
        AgeGroup::EarlyReader,
        AgeGroup::MiddleGrade,
    ];
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Which media pipeline a record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Externally visible lifecycle of a workflow thread.
///
/// ```text
/// Queued → Running → { AwaitingReview → Running → terminal } | terminal
/// terminal ∈ { Completed, Rejected, AutoRejected, Failed, Cancelled }
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted; no superstep has committed yet.
    Queued,
    /// The executor is driving the graph.
    Running,
    /// Suspended at the human review gate, waiting for a decision.
    AwaitingReview,
    /// Published after reviewer approval.
    Completed,
    /// Rejected by a human reviewer (or by the review-deadline sweeper).
    Rejected,
    /// Rejected automatically on hard guardrail violations.
    AutoRejected,
    /// A permanent error short-circuited the thread.
    Failed,
    /// Cancelled by the caller before completion.
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal (no further supersteps will run).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Rejected
                | JobStatus::AutoRejected
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::AwaitingReview => "awaiting_review",
            JobStatus::Completed => "completed",
            JobStatus::Rejected => "rejected",
            JobStatus::AutoRejected => "auto_rejected",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_encode_decode_roundtrip() {
        for kind in [
            NodeKind::Start,
            NodeKind::End,
            NodeKind::named("assembler"),
        ] {
            assert_eq!(NodeKind::decode(&kind.encode()), kind);
        }
    }

    #[test]
    fn reserved_names_resolve_to_virtual_endpoints() {
        assert!(NodeKind::named("Start").is_start());
        assert!(NodeKind::named("End").is_end());
        assert_eq!(NodeKind::named("Start").name(), None);
        assert_eq!(
            NodeKind::decode("publisher"),
            NodeKind::Named("publisher".into())
        );
        assert_eq!(NodeKind::decode("publisher").name(), Some("publisher"));
    }

    #[test]
    fn age_group_labels() {
        assert_eq!(AgeGroup::Preschool.label(), "3-5");
        assert_eq!(AgeGroup::default(), AgeGroup::EarlyReader);
        let json = serde_json::to_string(&AgeGroup::MiddleGrade).unwrap();
        assert_eq!(json, "\"9-12\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::AwaitingReview.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
