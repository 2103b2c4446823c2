//! Shared fixtures: scripted fake providers and engine construction.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use fablegraph::providers::{
    BlobStore, ImageGen, Moderation, ProviderError, ProviderSet, RegexPiiDetector, TextLlm,
    VideoGen, VisionLlm,
};
use fablegraph::runtime::{Engine, EngineConfig, InMemoryCheckpointer};
use fablegraph::state::StoryState;
use fablegraph::story::story_workflow;
use fablegraph::types::AgeGroup;

/// Text LLM that answers by recognizing the calling node's system prompt.
pub struct FakeTextLlm {
    pub story: Value,
    pub image_scenes: Value,
    pub video_scenes: Value,
    pub text_safety: Value,
    pub evaluation: Value,
    pub calls: Mutex<Vec<String>>,
}

impl Default for FakeTextLlm {
    fn default() -> Self {
        Self {
            story: json!({
                "title": "The Cheese Quest",
                "story_text": "Pip the mouse sniffed the morning air. Somewhere in the old \
                    farmhouse kitchen, a wheel of golden cheese was waiting. Pip packed a \
                    crumb-sized satchel, waved to the sparrows, and set off on the bravest \
                    little journey of his life.",
            }),
            image_scenes: scenes_value(2, "image"),
            video_scenes: scenes_value(2, "video"),
            text_safety: json!({}),
            evaluation: json!({
                "moral_score": 8.0,
                "theme_appropriateness": 8.0,
                "emotional_positivity": 8.0,
                "age_appropriateness": 8.0,
                "educational_value": 7.0,
                "evaluation_summary": "Warm, gentle, and well paced.",
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTextLlm {
    pub fn with_scene_counts(images: u32, videos: u32) -> Self {
        Self {
            image_scenes: scenes_value(images, "image"),
            video_scenes: scenes_value(videos, "video"),
            ..Default::default()
        }
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Build a `{scenes: [...]}` payload with `count` entries.
pub fn scenes_value(count: u32, media: &str) -> Value {
    let scenes: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "description": format!("{media} scene {i}"),
                "prompt": format!("{media}-prompt-{i}"),
            })
        })
        .collect();
    json!({ "scenes": scenes })
}

#[async_trait]
impl TextLlm for FakeTextLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ProviderError> {
        Ok(String::new())
    }

    async fn complete_structured(
        &self,
        system: &str,
        _user: &str,
    ) -> Result<Value, ProviderError> {
        let (kind, value) = if system.contains("children's story writer") {
            ("story", self.story.clone())
        } else if system.contains("image generation prompts") {
            ("image_scenes", self.image_scenes.clone())
        } else if system.contains("video generation prompts") {
            ("video_scenes", self.video_scenes.clone())
        } else if system.contains("content safety moderator") {
            ("text_safety", self.text_safety.clone())
        } else if system.contains("quality evaluator") {
            ("evaluation", self.evaluation.clone())
        } else {
            return Err(ProviderError::permanent(format!(
                "unexpected system prompt: {system}"
            )));
        };
        self.calls.lock().unwrap().push(kind.to_string());
        Ok(value)
    }
}

/// Vision LLM scripted per exact image URL; unknown URLs analyze clean.
#[derive(Default)]
pub struct FakeVisionLlm {
    responses: Mutex<std::collections::HashMap<String, Value>>,
    pub checked: Mutex<Vec<String>>,
}

impl FakeVisionLlm {
    /// Script the analysis returned for one image URL.
    pub fn flag(&self, url: &str, analysis: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), analysis);
    }
}

#[async_trait]
impl VisionLlm for FakeVisionLlm {
    async fn analyze(&self, image_ref: &str, _system: &str) -> Result<Value, ProviderError> {
        self.checked.lock().unwrap().push(image_ref.to_string());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(image_ref)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

/// Image generator returning deterministic references and recording prompts.
#[derive(Default)]
pub struct FakeImageGen {
    counter: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageGen for FakeImageGen {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("imgref-{n}"))
    }
}

/// Video generator returning deterministic references.
#[derive(Default)]
pub struct FakeVideoGen {
    counter: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl VideoGen for FakeVideoGen {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("vidref-{n}"))
    }
}

/// Moderation scripted by substring: texts containing a needle are flagged
/// with the configured categories. One-shot rules are consumed on their
/// first match, modeling a finding that a regeneration cures.
#[derive(Default)]
pub struct FakeModeration {
    rules: Mutex<Vec<ModerationRule>>,
}

struct ModerationRule {
    needle: String,
    categories: Vec<String>,
    once: bool,
}

impl FakeModeration {
    pub fn flag_containing(&self, needle: &str, categories: &[&str]) {
        self.push_rule(needle, categories, false);
    }

    /// Flag the first matching text only; later checks come back clean.
    pub fn flag_containing_once(&self, needle: &str, categories: &[&str]) {
        self.push_rule(needle, categories, true);
    }

    fn push_rule(&self, needle: &str, categories: &[&str], once: bool) {
        self.rules.lock().unwrap().push(ModerationRule {
            needle: needle.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            once,
        });
    }
}

#[async_trait]
impl Moderation for FakeModeration {
    async fn moderate(&self, text: &str) -> Result<Vec<String>, ProviderError> {
        let mut rules = self.rules.lock().unwrap();
        let mut flagged = Vec::new();
        rules.retain(|rule| {
            if !text.contains(rule.needle.as_str()) {
                return true;
            }
            flagged.extend(rule.categories.clone());
            !rule.once
        });
        Ok(flagged)
    }
}

/// Map-backed blob store. `put` yields `blob://<key>` URLs; `get` returns
/// stored bytes for known URLs and echoes the reference for provider refs.
#[derive(Default)]
pub struct FakeBlobStore {
    storage: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<String, ProviderError> {
        let url = format!("blob://{key}");
        self.storage.lock().unwrap().insert(url.clone(), data.to_vec());
        Ok(url)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(self
            .storage
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| reference.as_bytes().to_vec()))
    }
}

/// The full bundle of scripted fakes behind a [`ProviderSet`].
pub struct FakeProviders {
    pub text: Arc<FakeTextLlm>,
    pub vision: Arc<FakeVisionLlm>,
    pub image: Arc<FakeImageGen>,
    pub video: Arc<FakeVideoGen>,
    pub moderation: Arc<FakeModeration>,
    pub blobs: Arc<FakeBlobStore>,
}

impl Default for FakeProviders {
    fn default() -> Self {
        Self::with_text(FakeTextLlm::default())
    }
}

impl FakeProviders {
    pub fn with_text(text: FakeTextLlm) -> Self {
        Self {
            text: Arc::new(text),
            vision: Arc::new(FakeVisionLlm::default()),
            image: Arc::new(FakeImageGen::default()),
            video: Arc::new(FakeVideoGen::default()),
            moderation: Arc::new(FakeModeration::default()),
            blobs: Arc::new(FakeBlobStore::default()),
        }
    }

    pub fn set(&self) -> ProviderSet {
        ProviderSet {
            text: self.text.clone(),
            vision: self.vision.clone(),
            image: self.image.clone(),
            video: self.video.clone(),
            moderation: self.moderation.clone(),
            pii: Arc::new(RegexPiiDetector),
            blobs: self.blobs.clone(),
        }
    }
}

/// Route engine logs through `tracing` when `RUST_LOG` asks for them.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Compile the story workflow over `fakes` and wrap it in an engine backed
/// by a fresh in-memory checkpoint store.
pub fn story_engine(
    fakes: &FakeProviders,
    config: EngineConfig,
) -> (Engine, Arc<InMemoryCheckpointer>) {
    init_tracing();
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let engine = story_engine_with_store(fakes, config, checkpointer.clone());
    (engine, checkpointer)
}

/// Like [`story_engine`] but sharing an existing store — used to model a
/// fresh process resuming threads another process checkpointed.
pub fn story_engine_with_store(
    fakes: &FakeProviders,
    config: EngineConfig,
    checkpointer: Arc<InMemoryCheckpointer>,
) -> Engine {
    let workflow = story_workflow(fakes.set(), &config).expect("story workflow compiles");
    Engine::new(workflow, checkpointer, config)
}

/// The scenario-1 style submission: images only.
pub fn images_only_state(job_id: &str, prompt: &str, num: u32) -> StoryState {
    StoryState::builder(job_id, prompt)
        .age_group(AgeGroup::EarlyReader)
        .num_illustrations(num)
        .generate_images(true)
        .generate_videos(false)
        .build()
}

/// A videos-only submission.
pub fn videos_only_state(job_id: &str, prompt: &str, num: u32) -> StoryState {
    StoryState::builder(job_id, prompt)
        .age_group(AgeGroup::EarlyReader)
        .num_illustrations(num)
        .generate_images(false)
        .generate_videos(true)
        .build()
}

/// The staged URL a generator produces for video `index` in `job_id`.
pub fn staged_video_url(job_id: &str, index: u32) -> String {
    format!("blob://stories/{job_id}/video-{index}.mp4")
}

/// The staged URL of the first regeneration of video `index`.
pub fn regenerated_video_url(job_id: &str, index: u32) -> String {
    format!("blob://stories/{job_id}/video-{index}-r1.mp4")
}

/// The staged URL a generator produces for `index` in `job_id`.
pub fn staged_image_url(job_id: &str, index: u32) -> String {
    format!("blob://stories/{job_id}/image-{index}.png")
}

/// The staged URL of the first regeneration of image `index`.
pub fn regenerated_image_url(job_id: &str, index: u32) -> String {
    format!("blob://stories/{job_id}/image-{index}-r1.png")
}
