//! Generation-phase nodes: story writing, media prompting, media
//! generation, and assembly.

use async_trait::async_trait;
use serde::Deserialize;

use crate::node::{
    decode_structured, NodeContext, NodeError, NodeHandler, NodeOutput, StatePatch,
};
use crate::providers::ProviderSet;
use crate::state::{MediaMetadata, ScenePrompt, StoryState};
use crate::types::{AgeGroup, MediaKind};

/// Fallback title when the model returns an empty one.
const DEFAULT_STORY_TITLE: &str = "A Wonderful Story";

/// Age-appropriate writing instructions injected into the writer prompt.
fn age_group_instructions(age_group: AgeGroup) -> &'static str {
    match age_group {
        AgeGroup::Preschool => {
            "- Use very simple words (3-4 letter words when possible)\n\
             - Keep sentences short (5-8 words max)\n\
             - Use repetition and rhythm\n\
             - Focus on friendly, safe themes (animals, friendship, helping)\n\
             - Include sensory details (colors, sounds, textures)\n\
             - Make it fun and playful"
        }
        AgeGroup::EarlyReader => {
            "- Use moderate vocabulary (some 5-6 letter words)\n\
             - Sentences can be 8-12 words\n\
             - Include simple dialogue\n\
             - Themes: adventure, friendship, problem-solving, discovery\n\
             - Add some descriptive details\n\
             - Include a clear beginning, middle, and end"
        }
        AgeGroup::MiddleGrade => {
            "- Use richer vocabulary and varied sentence structure\n\
             - Sentences can be 10-15 words\n\
             - Include dialogue and character development\n\
             - Themes: adventure, mystery, growth, overcoming challenges\n\
             - More complex plots with multiple events\n\
             - Include character emotions and motivations"
        }
    }
}

#[derive(Debug, Deserialize)]
struct StoryOutput {
    #[serde(default)]
    title: String,
    story_text: String,
}

/// Generates the story text and title from the submission prompt.
pub struct StoryWriter {
    providers: ProviderSet,
}

impl StoryWriter {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeHandler for StoryWriter {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        ctx.emit("generation", "writing story")?;

        let system = format!(
            "You are a children's story writer. Create an engaging, age-appropriate story.\n\n\
             Age Group: {} years old\n\n\
             Writing Guidelines:\n{}\n\n\
             Requirements:\n\
             - The story should be 300-500 words\n\
             - Include a clear title\n\
             - Make it engaging and fun\n\
             - Ensure it's appropriate for the age group\n\
             - Include vivid scenes that can be illustrated",
            state.age_group,
            age_group_instructions(state.age_group),
        );
        let user = format!(
            "Write a children's story based on this prompt:\n\n{}\n\n\
             Please provide:\n1. A title for the story\n2. The full story text",
            state.prompt
        );

        let value = self
            .providers
            .text
            .complete_structured(&system, &user)
            .await
            .map_err(|e| NodeError::provider("text_llm", e))?;
        let output: StoryOutput = decode_structured("story output", value)?;

        if output.story_text.trim().is_empty() {
            return Err(NodeError::Generation("model returned an empty story".into()));
        }
        let title = if output.title.trim().is_empty() {
            DEFAULT_STORY_TITLE.to_string()
        } else {
            output.title
        };

        ctx.emit(
            "generation",
            format!("story written ({} chars)", output.story_text.len()),
        )?;
        Ok(StatePatch {
            story_title: Some(title),
            story_text: Some(output.story_text),
            ..Default::default()
        }
        .into())
    }
}

#[derive(Debug, Deserialize)]
struct Scene {
    #[serde(default)]
    description: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct ScenesOutput {
    scenes: Vec<Scene>,
}

/// Ask the text LLM for exactly `expected` scenes and validate the count.
/// Too few scenes is a permanent generation error; surplus scenes are
/// truncated.
async fn prompt_scenes(
    providers: &ProviderSet,
    media: MediaKind,
    expected: u32,
    system: &str,
    state: &StoryState,
    ctx: &NodeContext,
) -> Result<Vec<ScenePrompt>, NodeError> {
    let story_text = state
        .story_text
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(NodeError::MissingInput { what: "story text" })?;

    let user = format!(
        "Given this children's story, identify {expected} key scenes that would make great \
         {media} content.\n\nStory:\n{story_text}\n\n\
         For each scene, provide:\n\
         1. A brief scene description (what's happening)\n\
         2. A detailed generation prompt\n\n\
         You must provide exactly {expected} scenes."
    );

    let value = providers
        .text
        .complete_structured(system, &user)
        .await
        .map_err(|e| NodeError::provider("text_llm", e))?;
    let output: ScenesOutput = decode_structured("scene prompts", value)?;
    let mut scenes = output.scenes;

    if (scenes.len() as u32) < expected {
        return Err(NodeError::Generation(format!(
            "only generated {} {media} scene(s), expected {expected}",
            scenes.len()
        )));
    }
    if scenes.len() as u32 > expected {
        ctx.emit(
            "prompting",
            format!(
                "model returned {} {media} scenes when exactly {expected} were requested, truncating",
                scenes.len()
            ),
        )?;
        scenes.truncate(expected as usize);
    }

    Ok(scenes
        .into_iter()
        .map(|scene| ScenePrompt {
            description: scene.description,
            prompt: scene.prompt,
        })
        .collect())
}

/// Extracts key scenes and produces image generation prompts.
pub struct ImagePrompter {
    providers: ProviderSet,
}

impl ImagePrompter {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeHandler for ImagePrompter {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if !state.generate_images {
            ctx.emit("prompting", "image generation disabled, skipping")?;
            return Ok(StatePatch {
                image_prompts: Some(Vec::new()),
                ..Default::default()
            }
            .into());
        }
        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let system = "You are an expert at creating image generation prompts.\n\
             Your task is to identify the most visually interesting and important scenes from \
             a children's story and create detailed, generation-ready prompts for each scene.\n\n\
             Guidelines for prompts:\n\
             - Be specific and descriptive\n\
             - Include style: \"children's book illustration, colorful, whimsical, friendly\"\n\
             - Mention the mood/atmosphere\n\
             - Include key visual elements (characters, setting, actions)\n\
             - Keep prompts under 200 words\n\
             - Make them appropriate for children (no scary or inappropriate content)";

        let prompts = prompt_scenes(
            &self.providers,
            MediaKind::Image,
            state.num_illustrations,
            system,
            state,
            ctx,
        )
        .await?;
        ctx.emit("prompting", format!("{} image prompt(s) ready", prompts.len()))?;
        Ok(StatePatch {
            image_prompts: Some(prompts),
            ..Default::default()
        }
        .into())
    }
}

/// Extracts key scenes and produces video generation prompts.
pub struct VideoPrompter {
    providers: ProviderSet,
}

impl VideoPrompter {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeHandler for VideoPrompter {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if !state.generate_videos {
            ctx.emit("prompting", "video generation disabled, skipping")?;
            return Ok(StatePatch {
                video_prompts: Some(Vec::new()),
                ..Default::default()
            }
            .into());
        }
        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let system = "You are an expert at creating short video generation prompts.\n\
             Identify dynamic moments from a children's story and create detailed prompts for \
             short animated clips.\n\n\
             Guidelines for prompts:\n\
             - Describe motion and action explicitly\n\
             - Include style: \"gentle children's animation, soft colors, friendly\"\n\
             - Keep each clip to a single scene\n\
             - Make them appropriate for children (no scary or inappropriate content)";

        let prompts = prompt_scenes(
            &self.providers,
            MediaKind::Video,
            state.num_illustrations,
            system,
            state,
            ctx,
        )
        .await?;
        ctx.emit("prompting", format!("{} video prompt(s) ready", prompts.len()))?;
        Ok(StatePatch {
            video_prompts: Some(prompts),
            ..Default::default()
        }
        .into())
    }
}

/// Stage a generated media reference into blob storage under a stable key.
async fn stage_media(
    providers: &ProviderSet,
    reference: &str,
    key: &str,
    port: &'static str,
) -> Result<String, NodeError> {
    let bytes = providers
        .blobs
        .get(reference)
        .await
        .map_err(|e| NodeError::provider(port, e))?;
    providers
        .blobs
        .put(key, &bytes)
        .await
        .map_err(|e| NodeError::provider("blob_store", e))
}

/// Generates one image per dispatch unit and appends its metadata record.
pub struct ImageGenerator {
    providers: ProviderSet,
}

impl ImageGenerator {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeHandler for ImageGenerator {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let overlay = ctx.overlay()?.clone();
        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        ctx.emit("generation", format!("generating image {}", overlay.index))?;

        let reference = self
            .providers
            .image
            .generate(&overlay.prompt)
            .await
            .map_err(|e| NodeError::provider("image_gen", e))?;
        let url = stage_media(
            &self.providers,
            &reference,
            &format!("stories/{}/image-{}.png", state.job_id, overlay.index),
            "blob_store",
        )
        .await?;

        ctx.emit("generation", format!("image {} staged at {url}", overlay.index))?;
        Ok(StatePatch {
            image_metadata: vec![MediaMetadata {
                index: overlay.index,
                url,
                prompt: overlay.prompt,
                description: overlay.description,
            }],
            ..Default::default()
        }
        .into())
    }
}

/// Generates one video per dispatch unit and appends its metadata record.
pub struct VideoGenerator {
    providers: ProviderSet,
}

impl VideoGenerator {
    #[must_use]
    pub fn new(providers: ProviderSet) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeHandler for VideoGenerator {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let overlay = ctx.overlay()?.clone();
        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        ctx.emit("generation", format!("generating video {}", overlay.index))?;

        let reference = self
            .providers
            .video
            .generate(&overlay.prompt)
            .await
            .map_err(|e| NodeError::provider("video_gen", e))?;
        let url = stage_media(
            &self.providers,
            &reference,
            &format!("stories/{}/video-{}.mp4", state.job_id, overlay.index),
            "blob_store",
        )
        .await?;

        ctx.emit("generation", format!("video {} staged at {url}", overlay.index))?;
        Ok(StatePatch {
            video_metadata: vec![MediaMetadata {
                index: overlay.index,
                url,
                prompt: overlay.prompt,
                description: overlay.description,
            }],
            ..Default::default()
        }
        .into())
    }
}

/// Fan-in of all media generators: validates counts, sorts by display
/// index, and writes the canonical URL lists.
pub struct Assembler;

#[async_trait]
impl NodeHandler for Assembler {
    async fn run(
        &self,
        state: &StoryState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if let Some(error) = &state.error {
            return Err(NodeError::Generation(format!(
                "cannot assemble story due to earlier error: {error}"
            )));
        }
        if state.story_text.as_deref().unwrap_or("").is_empty() {
            return Err(NodeError::MissingInput { what: "story text" });
        }
        if state.num_illustrations < 1 {
            return Err(NodeError::Generation(
                "num_illustrations must be at least 1".into(),
            ));
        }
        if !state.generate_images && !state.generate_videos {
            return Err(NodeError::Generation(
                "neither image nor video generation was enabled".into(),
            ));
        }

        let expected = state.num_illustrations as usize;
        if state.generate_images && state.image_metadata.len() != expected {
            return Err(NodeError::Generation(format!(
                "expected {expected} image(s) but got {} ({} prompt(s) were generated)",
                state.image_metadata.len(),
                state.image_prompts.len()
            )));
        }
        if state.generate_videos && state.video_metadata.len() != expected {
            return Err(NodeError::Generation(format!(
                "expected {expected} video(s) but got {}",
                state.video_metadata.len()
            )));
        }

        // Parallel units complete in any order; sort by the index each
        // generator embedded in its metadata record.
        let image_urls: Vec<String> = state
            .image_metadata_sorted()
            .into_iter()
            .map(|m| m.url)
            .collect();
        let video_urls: Vec<String> = state
            .video_metadata_sorted()
            .into_iter()
            .map(|m| m.url)
            .collect();

        ctx.emit(
            "assembly",
            format!(
                "assembled {} image(s) and {} video(s)",
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
