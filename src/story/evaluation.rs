//! Evaluation-phase nodes: input moderation, quality scoring, text and
//! media guardrails, and the guardrail aggregator.

use async_trait::async_trait;
use serde::Deserialize;

use crate::guardrails::image::{build_image_violations, check_image};
use crate::guardrails::text::{moderation_layer, run_text_cascade};
use crate::guardrails::{partition, Violation, ViolationSource};
use crate::node::{
    decode_structured, NodeContext, NodeError, NodeHandler, NodeOutput, StatePatch,
};
use crate::providers::ProviderSet;
use crate::runtime::EngineConfig;
use crate::state::{EvaluationScores, MediaBinding, StoryState};
use crate::types::MediaKind;

/// Reviewer id recorded on guardrail auto-rejections.
pub const SYSTEM_GUARDRAIL_REVIEWER: &str = "system_guardrail";

/// Weights for the evaluator's overall score.
const WEIGHT_MORAL: f64 = 0.25;
const WEIGHT_THEME: f64 = 0.20;
const WEIGHT_EMOTIONAL: f64 = 0.25;
const WEIGHT_AGE: f64 = 0.20;
const WEIGHT_EDUCATIONAL: f64 = 0.10;

/// Prevention layer: moderates the user's prompt before any generation.
///
/// A hard violation sets `input_moderation_passed = false`, which routes the
/// thread straight to `mark_auto_rejected` without invoking any model.
pub struct InputModerator {
    providers: ProviderSet,
}

impl InputModerator {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeHandler for InputModerator {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        ctx.emit("moderation", "moderating user prompt")?;
        let violations =
            moderation_layer(&state.prompt, ViolationSource::Input, None, &self.providers)
                .await?;

        let passed = !violations.iter().any(Violation::is_hard);
        let summary = if passed {
            None
        } else {
            let details: Vec<&str> = violations.iter().map(|v| v.detail.as_str()).collect();
            Some(format!("Input prompt blocked: {}", details.join("; ")))
        };
        ctx.emit(
            "moderation",
            if passed {
                "input moderation passed".to_string()
            } else {
                format!("input blocked with {} violation(s)", violations.len())
            },
        )?;

        Ok(StatePatch {
            input_moderation_passed: Some(passed),
            guardrail_summary: summary,
            guardrail_violations: violations,
            ..Default::default()
        }
        .into())
    }
}

#[derive(Debug, Deserialize)]
struct StoryEvalOutput {
    moral_score: f64,
    theme_appropriateness: f64,
    emotional_positivity: f64,
    age_appropriateness: f64,
    educational_value: f64,
    #[serde(default)]
    evaluation_summary: String,
}

/// LLM quality scoring of the story. Sole writer of `evaluation_scores`;
/// produces no violations.
pub struct StoryEvaluator {
    providers: ProviderSet,
}

impl StoryEvaluator {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeHandler for StoryEvaluator {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let story_text = state
            .story_text
            .as_deref()
            .ok_or(NodeError::MissingInput { what: "story text" })?;
        let story_title = state.story_title.as_deref().unwrap_or_default();
        ctx.emit("evaluation", "scoring story quality")?;

        let system = format!(
            "You are a children's content quality evaluator for a kids story platform.\n\
             Score the following story on each dimension from 1 to 10.\n\
             Target age group: {}.\n\n\
             Scoring rubric:\n\
             - moral_score: Does the story teach positive values?\n\
             - theme_appropriateness: Is the theme suitable and developmentally appropriate?\n\
             - emotional_positivity: Does the story evoke warmth, joy, hope, and comfort?\n\
             - age_appropriateness: Are vocabulary and complexity right for the age?\n\
             - educational_value: Does the child learn something valuable?\n\n\
             Be strict — this content goes directly to children. Provide an honest \
             evaluation_summary with specific examples from the story.",
            state.age_group
        );
        let user = format!("Title: {story_title}\n\n{story_text}");

        let value = self
            .providers
            .text
            .complete_structured(&system, &user)
            .await
            .map_err(|e| NodeError::provider("text_llm", e))?;
        let output: StoryEvalOutput = decode_structured("story evaluation", value)?;

        let weighted = output.moral_score * WEIGHT_MORAL
            + output.theme_appropriateness * WEIGHT_THEME
            + output.emotional_positivity * WEIGHT_EMOTIONAL
            + output.age_appropriateness * WEIGHT_AGE
            + output.educational_value * WEIGHT_EDUCATIONAL;
        let overall = (weighted * 100.0).round() / 100.0;

        ctx.emit("evaluation", format!("overall score {overall}/10"))?;
        Ok(StatePatch {
            evaluation_scores: Some(EvaluationScores {
                moral_score: output.moral_score,
                theme_appropriateness: output.theme_appropriateness,
                emotional_positivity: output.emotional_positivity,
                age_appropriateness: output.age_appropriateness,
                educational_value: output.educational_value,
                overall_score: overall,
                evaluation_summary: output.evaluation_summary,
            }),
            ..Default::default()
        }
        .into())
    }
}

/// Full three-layer text cascade on the story body.
pub struct StoryGuardrail {
    providers: ProviderSet,
    config: EngineConfig,
}

impl StoryGuardrail {
    #[must_use]
    pub fn new(providers: ProviderSet, config: EngineConfig) -> Self {
        Self { providers, config }
    }
}

#[async_trait]
impl NodeHandler for StoryGuardrail {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let story_text = state
            .story_text
            .as_deref()
            .ok_or(NodeError::MissingInput { what: "story text" })?;
        ctx.emit("guardrail", "running story text cascade")?;

        let violations = run_text_cascade(
            story_text,
            ViolationSource::Story,
            None,
            state.age_group,
            &self.providers,
            &self.config,
        )
        .await?;

        let hard = violations.iter().filter(|v| v.is_hard()).count();
        ctx.emit(
            "guardrail",
            format!(
                "story cascade complete: {hard} hard, {} soft",
                violations.len() - hard
            ),
        )?;
        Ok(StatePatch::with_violations(violations).into())
    }
}

/// Vision safety check for one image, with regenerate-and-recheck retry.
///
/// The retry loop lives inside this node rather than as a graph cycle: each
/// image retries independently in parallel and the graph stays acyclic.
/// Hard violations cured by a successful regeneration are kept in the
/// violation list but marked superseded; if every allowed pass fails, the
/// node raises the permanent `media_guardrail_exhausted` error and the
/// thread settles as `Failed`.
pub struct ImageGuardrail {
    providers: ProviderSet,
    config: EngineConfig,
}

impl ImageGuardrail {
    #[must_use]
    pub fn new(providers: ProviderSet, config: EngineConfig) -> Self {
        Self { providers, config }
    }
}

#[async_trait]
impl NodeHandler for ImageGuardrail {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let overlay = ctx.overlay()?.clone();
        let index = overlay.index;
        let mut current_url = overlay.media_url.clone().ok_or(NodeError::MissingInput {
            what: "media url in overlay",
        })?;
        let max_retries = self.config.media_retry_max;
        let mut all_violations: Vec<Violation> = Vec::new();

        for attempt in 0..=max_retries {
            if ctx.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            ctx.emit(
                "guardrail",
                format!(
                    "checking image {index} (pass {}/{})",
                    attempt + 1,
                    max_retries + 1
                ),
            )?;

            let safety = check_image(&current_url, state.age_group, &self.providers).await?;
            let attempt_violations = build_image_violations(&safety, index);
            let has_hard = attempt_violations.iter().any(Violation::is_hard);

            if !has_hard {
                // This pass is clean: earlier hard findings were cured by
                // regeneration and no longer count toward pass/fail.
                for violation in &mut all_violations {
                    if violation.is_hard() {
                        violation.superseded = true;
                    }
                }
                all_violations.extend(attempt_violations);
                ctx.emit(
                    "guardrail",
                    format!("image {index} passed on pass {}", attempt + 1),
                )?;
                return Ok(StatePatch {
                    guardrail_violations: all_violations,
                    image_bindings: vec![MediaBinding {
                        index,
                        url: current_url,
                        attempts: attempt + 1,
                    }],
                    ..Default::default()
                }
                .into());
            }

            all_violations.extend(attempt_violations);
            if attempt < max_retries {
                ctx.emit(
                    "guardrail",
                    format!("image {index} failed checks, regenerating"),
                )?;
                let reference = self
                    .providers
                    .image
                    .generate(&overlay.prompt)
                    .await
                    .map_err(|e| NodeError::provider("image_gen", e))?;
                let bytes = self
                    .providers
                    .blobs
                    .get(&reference)
                    .await
                    .map_err(|e| NodeError::provider("blob_store", e))?;
                current_url = self
                    .providers
                    .blobs
                    .put(
                        &format!(
                            "stories/{}/image-{index}-r{}.png",
                            state.job_id,
                            attempt + 1
                        ),
                        &bytes,
                    )
                    .await
                    .map_err(|e| NodeError::provider("blob_store", e))?;
            }
        }

        Err(NodeError::MediaGuardrailExhausted {
            media: MediaKind::Image,
            index,
            attempts: max_retries + 1,
        })
    }
}

/// Safety check for one video, with regenerate-and-recheck retry.
///
/// The check itself is the three-layer text cascade on the generation
/// prompt (frame sampling is a declared extension point). On a hard
/// violation the video is regenerated and re-checked, same as the image
/// path: hard findings cured by a pass that comes back clean are kept but
/// marked superseded, and exhausting every allowed pass raises the
/// permanent `media_guardrail_exhausted` error that settles the thread as
/// `Failed`.
pub struct VideoGuardrail {
    providers: ProviderSet,
    config: EngineConfig,
}

impl VideoGuardrail {
    #[must_use]
    pub fn new(providers: ProviderSet, config: EngineConfig) -> Self {
        Self { providers, config }
    }
}

#[async_trait]
impl NodeHandler for VideoGuardrail {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let overlay = ctx.overlay()?.clone();
        let index = overlay.index;
        let mut current_url = overlay.media_url.clone().ok_or(NodeError::MissingInput {
            what: "media url in overlay",
        })?;
        let max_retries = self.config.media_retry_max;
        let mut all_violations: Vec<Violation> = Vec::new();

        for attempt in 0..=max_retries {
            if ctx.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            ctx.emit(
                "guardrail",
                format!(
                    "moderating video {index} prompt (pass {}/{})",
                    attempt + 1,
                    max_retries + 1
                ),
            )?;

            let attempt_violations = run_text_cascade(
                &overlay.prompt,
                ViolationSource::VideoPrompt,
                Some(index),
                state.age_group,
                &self.providers,
                &self.config,
            )
            .await?;
            let has_hard = attempt_violations.iter().any(Violation::is_hard);

            if !has_hard {
                for violation in &mut all_violations {
                    if violation.is_hard() {
                        violation.superseded = true;
                    }
                }
                all_violations.extend(attempt_violations);
                ctx.emit(
                    "guardrail",
                    format!("video {index} passed on pass {}", attempt + 1),
                )?;
                return Ok(StatePatch {
                    guardrail_violations: all_violations,
                    video_bindings: vec![MediaBinding {
                        index,
                        url: current_url,
                        attempts: attempt + 1,
                    }],
                    ..Default::default()
                }
                .into());
            }

            all_violations.extend(attempt_violations);
            if attempt < max_retries {
                ctx.emit(
                    "guardrail",
                    format!("video {index} failed checks, regenerating"),
                )?;
                let reference = self
                    .providers
                    .video
                    .generate(&overlay.prompt)
                    .await
                    .map_err(|e| NodeError::provider("video_gen", e))?;
                let bytes = self
                    .providers
                    .blobs
                    .get(&reference)
                    .await
                    .map_err(|e| NodeError::provider("blob_store", e))?;
                current_url = self
                    .providers
                    .blobs
                    .put(
                        &format!(
                            "stories/{}/video-{index}-r{}.mp4",
                            state.job_id,
                            attempt + 1
                        ),
                        &bytes,
                    )
                    .await
                    .map_err(|e| NodeError::provider("blob_store", e))?;
            }
        }

        Err(NodeError::MediaGuardrailExhausted {
            media: MediaKind::Video,
            index,
            attempts: max_retries + 1,
        })
    }
}

/// Fan-in of the evaluation cluster: partitions violations, computes the
/// aggregate pass/fail from final-pass outcomes, builds the reviewer
/// summary, and rewrites the canonical URL lists from final bindings.
pub struct GuardrailAggregator;

#[async_trait]
impl NodeHandler for GuardrailAggregator {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let (hard, soft) = partition(&state.guardrail_violations);
        let passed = hard.is_empty();

        let mut image_bindings = state.image_bindings.clone();
        image_bindings.sort_by_key(|b| b.index);
        let mut video_bindings = state.video_bindings.clone();
        video_bindings.sort_by_key(|b| b.index);

        let mut summary_parts: Vec<String> = Vec::new();
        if let Some(scores) = &state.evaluation_scores {
            summary_parts.push(format!(
                "Overall Quality Score: {}/10",
                scores.overall_score
            ));
            if !scores.evaluation_summary.is_empty() {
                summary_parts.push(format!("   {}", scores.evaluation_summary));
            }
            summary_parts.push(String::new());
        }
        if !hard.is_empty() {
            summary_parts.push(format!(
                "{} HARD violation(s) — will trigger auto-reject:",
                hard.len()
            ));
            for v in &hard {
                summary_parts.push(format!(
                    "  - [{}] ({}{}) confidence={:.2}: {}",
                    v.category,
                    v.source,
                    v.media_index.map(|i| format!(" #{i}")).unwrap_or_default(),
                    v.confidence,
                    v.detail
                ));
            }
        }
        if !soft.is_empty() {
            summary_parts.push(format!(
                "{} SOFT warning(s) — for reviewer awareness:",
                soft.len()
            ));
            for v in &soft {
                summary_parts.push(format!(
                    "  - [{}] ({}{}): {}",
                    v.category,
                    v.source,
                    v.media_index.map(|i| format!(" #{i}")).unwrap_or_default(),
                    v.detail
                ));
            }
        }
        if state.guardrail_violations.is_empty() {
            summary_parts.push("All guardrails passed — no violations detected.".into());
        }

        ctx.emit(
            "guardrail",
            format!(
                "aggregation complete: passed={passed}, {} hard, {} soft",
                hard.len(),
                soft.len()
            ),
        )?;

        Ok(StatePatch {
            guardrail_passed: Some(passed),
            guardrail_summary: Some(summary_parts.join("\n")),
            // Final media bindings replace the staging URLs; regenerated
            // items carry their regenerated reference here.
            image_urls: Some(image_bindings.into_iter().map(|b| b.url).collect()),
            video_urls: Some(video_bindings.into_iter().map(|b| b.url).collect()),
            ..Default::default()
        }
        .into())
    }
}
