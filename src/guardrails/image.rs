//! Single-stage vision safety check for generated images.
//!
//! Each image is analyzed by the vision LLM against the [`ImageSafety`]
//! schema. Findings above their thresholds are hard violations; the media
//! guardrail node pairs this check with a bounded regenerate-and-recheck
//! retry (see `story::evaluation`).

use serde::{Deserialize, Serialize};

use crate::node::{decode_structured, NodeError};
use crate::providers::ProviderSet;
use crate::types::AgeGroup;

use super::{Severity, Violation, ViolationSource};

/// Weapon findings below this confidence are ignored as vision noise.
const WEAPON_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Horror findings below this confidence are ignored.
const HORROR_CONFIDENCE_THRESHOLD: f64 = 0.4;

/// Structured vision-LLM output for one image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSafety {
    #[serde(default)]
    pub nsfw_detected: bool,
    #[serde(default)]
    pub nsfw_confidence: f64,
    #[serde(default)]
    pub weapon_detected: bool,
    #[serde(default)]
    pub weapon_confidence: f64,
    #[serde(default)]
    pub realistic_human_child: bool,
    #[serde(default)]
    pub realistic_child_confidence: f64,
    #[serde(default)]
    pub horror_elements: bool,
    #[serde(default)]
    pub horror_confidence: f64,
    #[serde(default = "default_safe")]
    pub is_safe_for_children: bool,
    #[serde(default)]
    pub explanation: String,
}

fn default_safe() -> bool {
    true
}

/// System prompt for the vision check, parameterized by age group.
#[must_use]
pub fn image_safety_prompt(age_group: AgeGroup) -> String {
    format!(
        "You are a children's content image safety moderator.\n\
         Analyze this image for the following safety concerns:\n\n\
         1. NSFW content: nudity, sexual content, graphic content of any kind\n\
         2. Weapons: guns, knives, swords, bombs, any type of weapon\n\
         3. Realistic human children: photorealistic depictions of real children\n\
         4. Horror elements: gore, blood, skeletons, genuinely scary monsters\n\n\
         This image was generated for a children's story platform targeting ages {age_group}.\n\
         Be thorough and strict. Score confidence from 0.0 (definitely not present) to 1.0 \
         (clearly present). If the image is in a cartoon/illustration style and is generally \
         wholesome, mark is_safe_for_children as true."
    )
}

/// Run the vision check on one image reference.
pub async fn check_image(
    image_url: &str,
    age_group: AgeGroup,
    providers: &ProviderSet,
) -> Result<ImageSafety, NodeError> {
    let value = providers
        .vision
        .analyze(image_url, &image_safety_prompt(age_group))
        .await
        .map_err(|e| NodeError::provider("vision_llm", e))?;
    decode_structured("image safety analysis", value)
}

/// Convert one [`ImageSafety`] analysis into violations for image `index`.
#[must_use]
pub fn build_image_violations(safety: &ImageSafety, index: u32) -> Vec<Violation> {
    let mut violations = Vec::new();

    if safety.nsfw_detected {
        violations.push(Violation {
            severity: Severity::Hard,
            category: "image_nsfw".into(),
            detail: format!("NSFW content detected in image {index}"),
            source: ViolationSource::Image,
            media_index: Some(index),
            confidence: safety.nsfw_confidence,
            superseded: false,
        });
    }

    if safety.weapon_detected && safety.weapon_confidence > WEAPON_CONFIDENCE_THRESHOLD {
        violations.push(Violation {
            severity: Severity::Hard,
            category: "image_weapon".into(),
            detail: format!("Weapon detected in image {index}"),
            source: ViolationSource::Image,
            media_index: Some(index),
            confidence: safety.weapon_confidence,
            superseded: false,
        });
    }

    if safety.realistic_human_child {
        violations.push(Violation {
            severity: Severity::Soft,
            category: "image_realistic_child".into(),
            detail: format!("Realistic human child depiction in image {index}"),
            source: ViolationSource::Image,
            media_index: Some(index),
            confidence: safety.realistic_child_confidence,
            superseded: false,
        });
    }

    if safety.horror_elements && safety.horror_confidence > HORROR_CONFIDENCE_THRESHOLD {
        violations.push(Violation {
            severity: Severity::Hard,
            category: "image_horror".into(),
            detail: format!("Horror elements in image {index}: {}", safety.explanation),
            source: ViolationSource::Image,
            media_index: Some(index),
            confidence: safety.horror_confidence,
            superseded: false,
        });
    }

    violations
}
