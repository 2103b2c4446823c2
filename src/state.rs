//! Typed workflow state for story generation threads.
//!
//! The engine keeps one [`StoryState`] per thread. Nodes never mutate it
//! directly: they receive an immutable snapshot and return a
//! [`StatePatch`](crate::node::StatePatch) that the executor merges at the
//! superstep barrier, according to the per-field merge rules declared in
//! [`FIELDS`].
//!
//! # Field classes
//!
//! - **Last-writer-wins scalars** — set by at most one node per superstep
//!   (parallel siblings writing the same scalar is a programming error).
//! - **Append-only reducers** — list fields that accumulate contributions
//!   from parallel dispatch units. Merging is concatenation, which is
//!   associative and commutative at the multiset level; records carry their
//!   own `index` so downstream consumers can sort explicitly.
//!
//! # Examples
//!
//! ```rust
//! use fablegraph::state::StoryState;
//! use fablegraph::types::AgeGroup;
//!
//! let state = StoryState::builder("job-1", "a mouse finds cheese")
//!     .age_group(AgeGroup::EarlyReader)
//!     .num_illustrations(2)
//!     .generate_images(true)
//!     .build();
//!
//! assert_eq!(state.job_id, "job-1");
//! assert!(state.story_text.is_none());
//! assert!(state.image_metadata.is_empty());
//! ```

use serde::{Deserialize, Serialize};

use crate::guardrails::Violation;
use crate::types::AgeGroup;

/// One scene extracted from the story by a media prompter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenePrompt {
    /// What is happening in the scene, for reviewer context.
    pub description: String,
    /// The generation prompt handed to the media port.
    pub prompt: String,
}

/// One generated media item, appended by a generator dispatch unit.
///
/// Parallel units complete in arbitrary order; `index` is the display-order
/// key downstream consumers must sort by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub index: u32,
    pub url: String,
    pub prompt: String,
    pub description: String,
}

/// Final `index → url` binding produced by a media guardrail node after any
/// retry has settled. The aggregator sorts bindings to rebuild the canonical
/// URL lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaBinding {
    pub index: u32,
    pub url: String,
    /// How many generation passes this item took (1 = first pass clean).
    pub attempts: u32,
}

/// LLM quality scores produced by the story evaluator, 1–10 per dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub moral_score: f64,
    pub theme_appropriateness: f64,
    pub emotional_positivity: f64,
    pub age_appropriateness: f64,
    pub educational_value: f64,
    /// Weighted combination of the five dimensions.
    pub overall_score: f64,
    pub evaluation_summary: String,
}

/// The canonical state of one story generation thread.
///
/// See the module docs for the merge discipline. Scalar `Option` fields are
/// `None` until their owning node runs; reducer `Vec` fields start empty and
/// only ever grow (until the aggregator rewrites the canonical URL lists
/// from final bindings).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryState {
    // ── Submission (set once at intake) ──
    pub job_id: String,
    pub prompt: String,
    pub age_group: AgeGroup,
    pub num_illustrations: u32,
    pub generate_images: bool,
    pub generate_videos: bool,

    // ── Story generation ──
    pub story_text: Option<String>,
    pub story_title: Option<String>,

    // ── Media prompting (each list written once by its prompter) ──
    #[serde(default)]
    pub image_prompts: Vec<ScenePrompt>,
    #[serde(default)]
    pub video_prompts: Vec<ScenePrompt>,

    // ── Canonical media URLs, display-ordered.
    //    Written by the assembler, rewritten by the guardrail aggregator
    //    from final bindings (regenerated items replace originals). ──
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub video_urls: Vec<String>,

    // ── Reducer fields: fan-out contributions, merged by concatenation ──
    #[serde(default)]
    pub image_metadata: Vec<MediaMetadata>,
    #[serde(default)]
    pub video_metadata: Vec<MediaMetadata>,
    #[serde(default)]
    pub guardrail_violations: Vec<Violation>,
    #[serde(default)]
    pub image_bindings: Vec<MediaBinding>,
    #[serde(default)]
    pub video_bindings: Vec<MediaBinding>,

    // ── Evaluation & guardrail outcome ──
    pub evaluation_scores: Option<EvaluationScores>,
    pub input_moderation_passed: Option<bool>,
    pub guardrail_passed: Option<bool>,
    pub guardrail_summary: Option<String>,

    // ── Review outcome ──
    pub review_decision: Option<String>,
    pub review_comment: Option<String>,
    pub reviewer_id: Option<String>,

    // ── Failure detail, captured in the terminal snapshot ──
    pub error: Option<String>,
}

impl StoryState {
    /// Start building an initial state for submission.
    #[must_use]
    pub fn builder(job_id: impl Into<String>, prompt: impl Into<String>) -> StoryStateBuilder {
        StoryStateBuilder {
            job_id: job_id.into(),
            prompt: prompt.into(),
            age_group: AgeGroup::default(),
            num_illustrations: 3,
            generate_images: true,
            generate_videos: false,
        }
    }

    /// Image prompts sorted view is not needed: prompts are written once in
    /// order. Media metadata, however, arrives from parallel units; this
    /// returns a copy sorted by display index.
    #[must_use]
    pub fn image_metadata_sorted(&self) -> Vec<MediaMetadata> {
        let mut items = self.image_metadata.clone();
        items.sort_by_key(|m| m.index);
        items
    }

    /// Video metadata sorted by display index.
    #[must_use]
    pub fn video_metadata_sorted(&self) -> Vec<MediaMetadata> {
        let mut items = self.video_metadata.clone();
        items.sort_by_key(|m| m.index);
        items
    }
}

/// Builder for the initial submission state.
///
/// ```rust
/// use fablegraph::state::StoryState;
/// use fablegraph::types::AgeGroup;
///
/// let state = StoryState::builder("job-42", "a lighthouse keeper's cat")
///     .age_group(AgeGroup::MiddleGrade)
///     .num_illustrations(4)
///     .generate_videos(true)
///     .build();
/// assert_eq!(state.num_illustrations, 4);
/// ```
#[derive(Debug)]
pub struct StoryStateBuilder {
    job_id: String,
    prompt: String,
    age_group: AgeGroup,
    num_illustrations: u32,
    generate_images: bool,
    generate_videos: bool,
}

impl StoryStateBuilder {
    #[must_use]
    pub fn age_group(mut self, age_group: AgeGroup) -> Self {
        self.age_group = age_group;
        self
    }

    #[must_use]
    pub fn num_illustrations(mut self, count: u32) -> Self {
        self.num_illustrations = count;
        self
    }

    #[must_use]
    pub fn generate_images(mut self, enabled: bool) -> Self {
        self.generate_images = enabled;
        self
    }

    #[must_use]
    pub fn generate_videos(mut self, enabled: bool) -> Self {
        self.generate_videos = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> StoryState {
        StoryState {
            job_id: self.job_id,
            prompt: self.prompt,
            age_group: self.age_group,
            num_illustrations: self.num_illustrations,
            generate_images: self.generate_images,
            generate_videos: self.generate_videos,
            ..StoryState::default()
        }
    }
}

/// Merge rule for a state field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldRule {
    /// A patch value overwrites the current value. At most one node writes
    /// the field per superstep.
    LastWriterWins,
    /// Patch contributions are concatenated onto the existing list.
    Append,
}

/// Descriptor for one field of [`StoryState`].
#[derive(Clone, Copy, Debug)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub rule: FieldRule,
}

/// The merge-rule table for every mutable field of [`StoryState`].
///
/// [`StatePatch::apply`](crate::node::StatePatch::apply) is the single merge
/// function; it dispatches on these rules. Submission fields (`job_id`,
/// `prompt`, `age_group`, counts, flags) are set at intake and never
/// patched, so they do not appear here.
pub const FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor { name: "story_text", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "story_title", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "image_prompts", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "video_prompts", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "image_urls", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "video_urls", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "image_metadata", rule: FieldRule::Append },
    FieldDescriptor { name: "video_metadata", rule: FieldRule::Append },
    FieldDescriptor { name: "guardrail_violations", rule: FieldRule::Append },
    FieldDescriptor { name: "image_bindings", rule: FieldRule::Append },
    FieldDescriptor { name: "video_bindings", rule: FieldRule::Append },
    FieldDescriptor { name: "evaluation_scores", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "input_moderation_passed", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "guardrail_passed", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "guardrail_summary", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "review_decision", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "review_comment", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "reviewer_id", rule: FieldRule::LastWriterWins },
    FieldDescriptor { name: "error", rule: FieldRule::LastWriterWins },
];

/// Look up the merge rule for a field by name.
#[must_use]
pub fn field_rule(name: &str) -> Option<FieldRule> {
    FIELDS.iter().find(|d| d.name == name).map(|d| d.rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let state = StoryState::builder("j", "p").build();
        assert_eq!(state.age_group, AgeGroup::EarlyReader);
        assert_eq!(state.num_illustrations, 3);
        assert!(state.generate_images);
        assert!(!state.generate_videos);
    }

    #[test]
    fn metadata_sorted_by_index() {
        let mut state = StoryState::builder("j", "p").build();
        state.image_metadata = vec![
            MediaMetadata {
                index: 2,
                url: "u2".into(),
                prompt: String::new(),
                description: String::new(),
            },
            MediaMetadata {
                index: 0,
                url: "u0".into(),
                prompt: String::new(),
                description: String::new(),
            },
            MediaMetadata {
                index: 1,
                url: "u1".into(),
                prompt: String::new(),
                description: String::new(),
            },
        ];
        let sorted = state.image_metadata_sorted();
        let urls: Vec<_> = sorted.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(urls, vec!["u0", "u1", "u2"]);
    }

    #[test]
    fn descriptor_table_has_no_duplicates() {
        let mut names: Vec<_> = FIELDS.iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), FIELDS.len());
    }

    #[test]
    fn reducer_fields_are_declared_append() {
        for name in [
            "image_metadata",
            "video_metadata",
            "guardrail_violations",
            "image_bindings",
            "video_bindings",
        ] {
            assert_eq!(field_rule(name), Some(FieldRule::Append), "{name}");
        }
        assert_eq!(field_rule("story_text"), Some(FieldRule::LastWriterWins));
        assert_eq!(field_rule("nonexistent"), None);
    }
}
