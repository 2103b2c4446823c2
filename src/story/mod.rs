//! The fixed story generation workflow.
//!
//! [`story_workflow`] wires the graph driven by the engine:
//!
//! ```text
//!                     input_moderator
//!                           │
//!               ┌── input safe? ──┐
//!               │no               │yes
//!      mark_auto_rejected    story_writer
//!               │               ├──► image_prompter ──┐
//!              END              └──► video_prompter ──┤
//!                                                     ▼
//!                           ┌──► generate_single_image (×N) ──┐
//!                           └──► generate_single_video (×M) ──┤
//!                                                             ▼
//!                                                         assembler
//!                                                             │
//!                                       guardrail fan-out (dispatch)
//!                                     /       |          |          \
//!                         story_eval  story_guard  img_guard(×N)  vid_guard(×M)
//!                                     \       |          |          /
//!                                       guardrail_aggregator (fan-in)
//!                                                             │
//!                                       ┌── hard violations? ──┐
//!                                       │yes (auto-reject)     │no
//!                              mark_auto_rejected      human_review_gate
//!                                       │                      │
//!                                      END           ┌── decision? ──┐
//!                                                    │               │
//!                                              [approved]       [rejected]
//!                                                    │               │
//!                                               publisher      mark_rejected
//!                                                    │               │
//!                                                   END             END
//! ```
//!
//! Prompter parallelism is two static edges from the writer; generator and
//! guardrail fan-outs are dynamic dispatch routers; the assembler and the
//! aggregator are fan-in sinks; the review gate suspends.

pub mod evaluation;
pub mod generation;
pub mod review;

use std::sync::Arc;

use crate::graph::{
    DispatchOverlay, DispatchUnit, GraphBuilder, GraphError, Route, Workflow,
};
use crate::providers::ProviderSet;
use crate::registry::NodeSpec;
use crate::runtime::EngineConfig;
use crate::state::StoryState;
use crate::types::{JobStatus, NodeKind};

use evaluation::{
    GuardrailAggregator, ImageGuardrail, InputModerator, StoryEvaluator, StoryGuardrail,
    VideoGuardrail,
};
use generation::{
    Assembler, ImageGenerator, ImagePrompter, StoryWriter, VideoGenerator, VideoPrompter,
};
use review::{HumanReviewGate, MarkAutoRejected, MarkRejected, Publisher};

/// Canonical node names of the story graph.
pub mod names {
    pub const INPUT_MODERATOR: &str = "input_moderator";
    pub const STORY_WRITER: &str = "story_writer";
    pub const IMAGE_PROMPTER: &str = "image_prompter";
    pub const VIDEO_PROMPTER: &str = "video_prompter";
    pub const GENERATE_SINGLE_IMAGE: &str = "generate_single_image";
    pub const GENERATE_SINGLE_VIDEO: &str = "generate_single_video";
    pub const ASSEMBLER: &str = "assembler";
    pub const STORY_EVALUATOR: &str = "story_evaluator";
    pub const STORY_GUARDRAIL: &str = "story_guardrail";
    pub const IMAGE_GUARDRAIL: &str = "image_guardrail_with_retry";
    pub const VIDEO_GUARDRAIL: &str = "video_guardrail_with_retry";
    pub const GUARDRAIL_AGGREGATOR: &str = "guardrail_aggregator";
    pub const HUMAN_REVIEW_GATE: &str = "human_review_gate";
    pub const PUBLISHER: &str = "publisher";
    pub const MARK_REJECTED: &str = "mark_rejected";
    pub const MARK_AUTO_REJECTED: &str = "mark_auto_rejected";
}

fn node(name: &str) -> NodeKind {
    NodeKind::named(name)
}

/// One dispatch unit per media guardrail check: the canonical URL plus the
/// prompt that generated it (for regeneration).
fn media_guardrail_units(
    target: &str,
    urls: &[String],
    prompts: &[crate::state::ScenePrompt],
) -> Vec<DispatchUnit> {
    urls.iter()
        .enumerate()
        .map(|(index, url)| {
            DispatchUnit::new(
                target,
                DispatchOverlay {
                    index: index as u32,
                    prompt: prompts
                        .get(index)
                        .map(|scene| scene.prompt.clone())
                        .unwrap_or_default(),
                    description: String::new(),
                    media_url: Some(url.clone()),
                },
            )
        })
        .collect()
}

/// Build the compiled story workflow around the injected providers.
pub fn story_workflow(
    providers: ProviderSet,
    config: &EngineConfig,
) -> Result<Workflow, GraphError> {
    use names::*;

    let auto_reject = config.auto_reject_on_hard_fail;

    GraphBuilder::new()
        // ── Nodes ──
        .add_node(
            NodeSpec::linear(node(INPUT_MODERATOR)),
            InputModerator::new(providers.clone()),
        )
        .add_node(
            NodeSpec::linear(node(STORY_WRITER)),
            StoryWriter::new(providers.clone()),
        )
        .add_node(
            NodeSpec::linear(node(IMAGE_PROMPTER)),
            ImagePrompter::new(providers.clone()),
        )
        .add_node(
            NodeSpec::linear(node(VIDEO_PROMPTER)),
            VideoPrompter::new(providers.clone()),
        )
        .add_node(
            NodeSpec::fan_out_target(node(GENERATE_SINGLE_IMAGE)),
            ImageGenerator::new(providers.clone()),
        )
        .add_node(
            NodeSpec::fan_out_target(node(GENERATE_SINGLE_VIDEO)),
            VideoGenerator::new(providers.clone()),
        )
        .add_node(NodeSpec::fan_in_sink(node(ASSEMBLER)), Assembler)
        .add_node(
            NodeSpec::linear(node(STORY_EVALUATOR)),
            StoryEvaluator::new(providers.clone()),
        )
        .add_node(
            NodeSpec::linear(node(STORY_GUARDRAIL)),
            StoryGuardrail::new(providers.clone(), config.clone()),
        )
        .add_node(
            NodeSpec::fan_out_target(node(IMAGE_GUARDRAIL)),
            ImageGuardrail::new(providers.clone(), config.clone()),
        )
        .add_node(
            NodeSpec::fan_out_target(node(VIDEO_GUARDRAIL)),
            VideoGuardrail::new(providers.clone(), config.clone()),
        )
        .add_node(
            NodeSpec::fan_in_sink(node(GUARDRAIL_AGGREGATOR)),
            GuardrailAggregator,
        )
        .add_node(NodeSpec::linear(node(HUMAN_REVIEW_GATE)), HumanReviewGate)
        .add_node(
            NodeSpec::linear(node(PUBLISHER)).terminal(JobStatus::Completed),
            Publisher::new(providers.clone()),
        )
        .add_node(
            NodeSpec::linear(node(MARK_REJECTED)).terminal(JobStatus::Rejected),
            MarkRejected,
        )
        .add_node(
            NodeSpec::linear(node(MARK_AUTO_REJECTED)).terminal(JobStatus::AutoRejected),
            MarkAutoRejected,
        )
        // ── Entry ──
        .add_edge(NodeKind::Start, node(INPUT_MODERATOR))
        // input_moderator → story_writer (safe) | mark_auto_rejected (blocked)
        .add_router(
            node(INPUT_MODERATOR),
            Arc::new(|state: &StoryState| {
                if state.input_moderation_passed == Some(false) {
                    Route::to(names::MARK_AUTO_REJECTED)
                } else {
                    Route::to(names::STORY_WRITER)
                }
            }),
        )
        // story_writer → both prompters, always in parallel
        .add_edge(node(STORY_WRITER), node(IMAGE_PROMPTER))
        .add_edge(node(STORY_WRITER), node(VIDEO_PROMPTER))
        // Each prompter fans out only over its own prompt list; an empty
        // list routes straight to the assembler (the fan-in is satisfied
        // once remaining work drains — no synthetic unit).
        .add_router(
            node(IMAGE_PROMPTER),
            Arc::new(|state: &StoryState| {
                if state.image_prompts.is_empty() {
                    return Route::to(names::ASSEMBLER);
                }
                Route::Dispatch(
                    state
                        .image_prompts
                        .iter()
                        .enumerate()
                        .map(|(index, scene)| {
                            DispatchUnit::new(
                                names::GENERATE_SINGLE_IMAGE,
                                DispatchOverlay {
                                    index: index as u32,
                                    prompt: scene.prompt.clone(),
                                    description: scene.description.clone(),
                                    media_url: None,
                                },
                            )
                        })
                        .collect(),
                )
            }),
        )
        .add_router(
            node(VIDEO_PROMPTER),
            Arc::new(|state: &StoryState| {
                if state.video_prompts.is_empty() {
                    return Route::to(names::ASSEMBLER);
                }
                Route::Dispatch(
                    state
                        .video_prompts
                        .iter()
                        .enumerate()
                        .map(|(index, scene)| {
                            DispatchUnit::new(
                                names::GENERATE_SINGLE_VIDEO,
                                DispatchOverlay {
                                    index: index as u32,
                                    prompt: scene.prompt.clone(),
                                    description: scene.description.clone(),
                                    media_url: None,
                                },
                            )
                        })
                        .collect(),
                )
            }),
        )
        // All generators fan in to the assembler.
        .add_edge(node(GENERATE_SINGLE_IMAGE), node(ASSEMBLER))
        .add_edge(node(GENERATE_SINGLE_VIDEO), node(ASSEMBLER))
        // assembler → the evaluation cluster, all in parallel: evaluator,
        // story guardrail, one image guardrail per image, one video
        // guardrail per video.
        .add_router(
            node(ASSEMBLER),
            Arc::new(|state: &StoryState| {
                let mut units = vec![
                    DispatchUnit::bare(names::STORY_EVALUATOR),
                    DispatchUnit::bare(names::STORY_GUARDRAIL),
                ];
                units.extend(media_guardrail_units(
                    names::IMAGE_GUARDRAIL,
                    &state.image_urls,
                    &state.image_prompts,
                ));
                units.extend(media_guardrail_units(
                    names::VIDEO_GUARDRAIL,
                    &state.video_urls,
                    &state.video_prompts,
                ));
                Route::Dispatch(units)
            }),
        )
        // The whole cluster fans in to the aggregator.
        .add_edge(node(STORY_EVALUATOR), node(GUARDRAIL_AGGREGATOR))
        .add_edge(node(STORY_GUARDRAIL), node(GUARDRAIL_AGGREGATOR))
        .add_edge(node(IMAGE_GUARDRAIL), node(GUARDRAIL_AGGREGATOR))
        .add_edge(node(VIDEO_GUARDRAIL), node(GUARDRAIL_AGGREGATOR))
        // aggregator → auto-reject on hard violations, else human review.
        .add_router(
            node(GUARDRAIL_AGGREGATOR),
            Arc::new(move |state: &StoryState| {
                if state.guardrail_passed == Some(false) && auto_reject {
                    Route::to(names::MARK_AUTO_REJECTED)
                } else {
                    Route::to(names::HUMAN_REVIEW_GATE)
                }
            }),
        )
        // review decision → publish or reject.
        .add_router(
            node(HUMAN_REVIEW_GATE),
            Arc::new(|state: &StoryState| {
                if state.review_decision.as_deref() == Some(review::DECISION_APPROVED) {
                    Route::to(names::PUBLISHER)
                } else {
                    Route::to(names::MARK_REJECTED)
                }
            }),
        )
        // Terminals.
        .add_edge(node(PUBLISHER), NodeKind::End)
        .add_edge(node(MARK_REJECTED), NodeKind::End)
        .add_edge(node(MARK_AUTO_REJECTED), NodeKind::End)
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ScenePrompt;

    #[test]
    fn media_guardrail_units_pair_urls_with_prompts() {
        let urls = vec!["blob://0".to_string(), "blob://1".to_string()];
        let prompts = vec![
            ScenePrompt {
                description: "d0".into(),
                prompt: "p0".into(),
            },
            ScenePrompt {
                description: "d1".into(),
                prompt: "p1".into(),
            },
        ];
        let units = media_guardrail_units(names::IMAGE_GUARDRAIL, &urls, &prompts);
        assert_eq!(units.len(), 2);
        let overlay = units[1].overlay.as_ref().unwrap();
        assert_eq!(overlay.index, 1);
        assert_eq!(overlay.prompt, "p1");
        assert_eq!(overlay.media_url.as_deref(), Some("blob://1"));
    }

    #[test]
    fn missing_prompt_defaults_to_empty() {
        let urls = vec!["blob://only".to_string()];
        let units = media_guardrail_units(names::VIDEO_GUARDRAIL, &urls, &[]);
        assert_eq!(units[0].overlay.as_ref().unwrap().prompt, "");
    }
}
