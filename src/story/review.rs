//! Review-phase nodes: the suspension gate, publication, and the rejection
//! terminals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::guardrails::Violation;
use crate::node::{NodeContext, NodeError, NodeHandler, NodeOutput, StatePatch};
use crate::providers::ProviderSet;
use crate::state::{EvaluationScores, StoryState};
use crate::types::AgeGroup;

use super::evaluation::SYSTEM_GUARDRAIL_REVIEWER;

/// Decision string a reviewer sends to approve publication.
pub const DECISION_APPROVED: &str = "approved";
/// Decision string for an explicit rejection.
pub const DECISION_REJECTED: &str = "rejected";
/// Decision recorded when guardrails auto-reject without human review.
pub const DECISION_AUTO_REJECTED: &str = "auto_rejected";

/// The decision value supplied on resume.
///
/// Unknown or missing decisions deserialize as rejections: a malformed
/// review can never publish content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewDecision {
    #[serde(default = "default_decision")]
    pub decision: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub reviewer_id: String,
    /// Machine-readable cause for synthetic rejections (e.g. `"timeout"`).
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_decision() -> String {
    DECISION_REJECTED.to_string()
}

impl ReviewDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.decision == DECISION_APPROVED
    }
}

/// The payload surfaced to the human reviewer while the thread is
/// suspended: everything needed to judge the story without touching the
/// engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewPacket {
    pub job_id: String,
    pub story_title: Option<String>,
    pub story_text: Option<String>,
    pub age_group: AgeGroup,
    pub evaluation_scores: Option<EvaluationScores>,
    pub guardrail_passed: Option<bool>,
    pub guardrail_summary: Option<String>,
    pub guardrail_violations: Vec<Violation>,
    pub image_urls: Vec<String>,
    pub video_urls: Vec<String>,
}

impl ReviewPacket {
    #[must_use]
    pub fn from_state(state: &StoryState) -> Self {
        Self {
            job_id: state.job_id.clone(),
            story_title: state.story_title.clone(),
            story_text: state.story_text.clone(),
            age_group: state.age_group,
            evaluation_scores: state.evaluation_scores.clone(),
            guardrail_passed: state.guardrail_passed,
            guardrail_summary: state.guardrail_summary.clone(),
            guardrail_violations: state.guardrail_violations.clone(),
            image_urls: state.image_urls.clone(),
            video_urls: state.video_urls.clone(),
        }
    }
}

/// Human-in-the-loop gate.
///
/// On first entry it builds the [`ReviewPacket`] and suspends the thread —
/// the packet is checkpointed with the snapshot and surfaced to the caller.
/// On resume the same node re-enters with the decision value in its context
/// and records the reviewer's verdict; routing then sends approved threads
/// to the publisher and everything else to `mark_rejected`.
pub struct HumanReviewGate;

#[async_trait]
impl NodeHandler for HumanReviewGate {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        match &ctx.resume {
            None => {
                ctx.emit("review", "entering human review gate, suspending")?;
                let packet = ReviewPacket::from_state(state);
                let payload =
                    serde_json::to_value(packet).map_err(|source| NodeError::Schema {
                        what: "review packet",
                        source,
                    })?;
                Ok(NodeOutput::Suspend(payload))
            }
            Some(value) => {
                let decision: ReviewDecision = serde_json::from_value(value.clone())
                    .unwrap_or_else(|_| ReviewDecision {
                        decision: DECISION_REJECTED.into(),
                        comment: "malformed review decision".into(),
                        reviewer_id: String::new(),
                        reason: None,
                    });
                ctx.emit(
                    "review",
                    format!(
                        "review decision received: {} (reviewer {})",
                        decision.decision,
                        if decision.reviewer_id.is_empty() {
                            "unknown"
                        } else {
                            &decision.reviewer_id
                        }
                    ),
                )?;
                Ok(StatePatch {
                    review_decision: Some(decision.decision),
                    review_comment: Some(decision.comment),
                    reviewer_id: Some(decision.reviewer_id),
                    ..Default::default()
                }
                .into())
            }
        }
    }
}

/// Promotes approved media from staging to production storage and rewrites
/// the canonical URLs. Terminal `Completed`.
pub struct Publisher {
    providers: ProviderSet,
}

impl Publisher {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }

    async fn promote(
        &self,
        urls: &[String],
        job_id: &str,
        kind: &str,
        extension: &str,
    ) -> Result<Vec<String>, NodeError> {
        let mut published = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let bytes = self
                .providers
                .blobs
                .get(url)
                .await
                .map_err(|e| NodeError::provider("blob_store", e))?;
            let production_url = self
                .providers
                .blobs
                .put(
                    &format!("published/{job_id}/{kind}-{index}.{extension}"),
                    &bytes,
                )
                .await
                .map_err(|e| NodeError::provider("blob_store", e))?;
            published.push(production_url);
        }
        Ok(published)
    }
}

#[async_trait]
impl NodeHandler for Publisher {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        ctx.emit("publish", "promoting approved story to production storage")?;

        let image_urls = self
            .promote(&state.image_urls, &state.job_id, "image", "png")
            .await?;
        let video_urls = self
            .promote(&state.video_urls, &state.job_id, "video", "mp4")
            .await?;

        ctx.emit(
            "publish",
            format!(
                "published {} image(s), {} video(s)",
                image_urls.len(),
                video_urls.len()
            ),
        )?;
        Ok(StatePatch {
            image_urls: Some(image_urls),
            video_urls: Some(video_urls),
            ..Default::default()
        }
        .into())
    }
}

/// Terminal for hard guardrail violations: records the system decision.
/// No human review happened — the system decided automatically.
pub struct MarkAutoRejected;

#[async_trait]
impl NodeHandler for MarkAutoRejected {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let summary = state
            .guardrail_summary
            .as_deref()
            .unwrap_or("No summary available");
        ctx.emit("review", "auto-rejected on hard guardrail violations")?;
        Ok(StatePatch {
            review_decision: Some(DECISION_AUTO_REJECTED.into()),
            review_comment: Some(format!("Auto-rejected by guardrails.\n{summary}")),
            reviewer_id: Some(SYSTEM_GUARDRAIL_REVIEWER.into()),
            ..Default::default()
        }
        .into())
    }
}

/// Terminal for human rejections. The reviewer's verdict is already in
/// state from the review gate; this node only closes the thread.
pub struct MarkRejected;

#[async_trait]
impl NodeHandler for MarkRejected {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        ctx.emit(
            "review",
            format!(
                "rejected by reviewer {}",
                state.reviewer_id.as_deref().unwrap_or("unknown")
            ),
        )?;
        Ok(StatePatch::default().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_decision_defaults_to_rejection() {
        let decision: ReviewDecision = serde_json::from_value(json!({})).unwrap();
        assert_eq!(decision.decision, DECISION_REJECTED);
        assert!(!decision.is_approved());
    }

    #[test]
    fn approved_decision_roundtrip() {
        let decision: ReviewDecision = serde_json::from_value(json!({
            "decision": "approved",
            "comment": "lovely",
            "reviewer_id": "rev-7",
        }))
        .unwrap();
        assert!(decision.is_approved());
        assert_eq!(decision.reviewer_id, "rev-7");
    }

    #[test]
    fn packet_mirrors_state() {
        let mut state = StoryState::builder("job-3", "a kind dragon").build();
        state.story_title = Some("The Kind Dragon".into());
        state.image_urls = vec!["blob://a".into(), "blob://b".into()];
        state.guardrail_passed = Some(true);

        let packet = ReviewPacket::from_state(&state);
        assert_eq!(packet.job_id, "job-3");
        assert_eq!(packet.image_urls.len(), 2);
        assert_eq!(packet.guardrail_passed, Some(true));
    }
}
