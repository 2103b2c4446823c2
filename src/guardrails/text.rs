//! Three-layer text safety cascade.
//!
//! Applied to the user prompt (layer 0 only), the generated story, and each
//! video generation prompt:
//!
//! - **Layer 0 — provider moderation.** Fast pre-filter through the
//!   [`Moderation`](crate::providers::Moderation) port. Every flagged
//!   category becomes a hard violation of that category.
//! - **Layer 1 — PII detection.** Deterministic
//!   [`PiiDetector`](crate::providers::PiiDetector) pass; every hit becomes
//!   a hard `pii_<kind>` violation.
//! - **Layer 2 — LLM deep safety analysis.** Structured [`TextSafety`]
//!   output from the text LLM, scored against the per-age-group thresholds
//!   in [`EngineConfig`].

use serde::{Deserialize, Serialize};

use crate::node::{decode_structured, NodeError};
use crate::providers::ProviderSet;
use crate::runtime::config::EngineConfig;
use crate::types::AgeGroup;

use super::{Severity, Violation, ViolationSource};

/// Fear intensity above this is a hard violation regardless of age band.
const FEAR_HARD_CUTOFF: f64 = 0.7;

/// Weapon-style confidence reported for brand/religious findings, which the
/// LLM flags without a numeric score.
const FLAGGED_CONFIDENCE: f64 = 0.9;

/// Structured safety flags produced by the layer-2 LLM analysis.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextSafety {
    #[serde(default)]
    pub violence_detected: bool,
    #[serde(default)]
    pub violence_severity: f64,
    #[serde(default)]
    pub fear_intensity: f64,
    #[serde(default)]
    pub political_content_detected: bool,
    #[serde(default)]
    pub political_detail: String,
    #[serde(default)]
    pub brand_mentions_found: Vec<String>,
    #[serde(default)]
    pub religious_references_detected: bool,
    #[serde(default)]
    pub religious_detail: String,
    #[serde(default)]
    pub overall_explanation: String,
}

/// System prompt for the layer-2 analysis, parameterized by age group.
#[must_use]
pub fn text_safety_prompt(age_group: AgeGroup) -> String {
    format!(
        "You are a children's content safety moderator.\n\
         Analyze the text for the following safety concerns:\n\n\
         1. Violence: Any physical harm, fighting, weapons, threats (even fantasy violence)\n\
         2. Fear intensity: Scary elements, monsters, dark themes, abandonment, death\n\
         3. Political content: Political figures, parties, ideologies, propaganda\n\
         4. Brand mentions: Real company/product names\n\
         5. Religious references: Specific religious figures, practices, texts, holidays\n\n\
         Score violence_severity and fear_intensity from 0.0 (none) to 1.0 (extreme).\n\
         Be thorough — this content is for children aged {age_group}.\n\
         If something is borderline, err on the side of caution and flag it."
    )
}

/// Layer 0 only: provider moderation of a text. Every flagged category is a
/// hard violation. Used on its own by the input moderator.
pub async fn moderation_layer(
    text: &str,
    source: ViolationSource,
    media_index: Option<u32>,
    providers: &ProviderSet,
) -> Result<Vec<Violation>, NodeError> {
    let categories = providers
        .moderation
        .moderate(text)
        .await
        .map_err(|e| NodeError::provider("moderation", e))?;
    Ok(categories
        .into_iter()
        .map(|category| Violation {
            severity: Severity::Hard,
            detail: format!("moderation flagged category '{category}'"),
            category,
            source,
            media_index,
            confidence: 1.0,
            superseded: false,
        })
        .collect())
}

/// Layer 1: deterministic PII detection. Every hit is hard.
#[must_use]
pub fn pii_layer(
    text: &str,
    source: ViolationSource,
    media_index: Option<u32>,
    providers: &ProviderSet,
) -> Vec<Violation> {
    providers
        .pii
        .detect(text)
        .into_iter()
        .map(|hit| Violation {
            severity: Severity::Hard,
            category: format!("pii_{}", hit.kind),
            detail: format!(
                "PII detected ({}): {} occurrence(s)",
                hit.kind, hit.occurrences
            ),
            source,
            media_index,
            confidence: 1.0,
            superseded: false,
        })
        .collect()
}

/// Convert a layer-2 [`TextSafety`] analysis into violations using the
/// per-age thresholds.
#[must_use]
pub fn build_text_violations(
    safety: &TextSafety,
    source: ViolationSource,
    media_index: Option<u32>,
    age_group: AgeGroup,
    config: &EngineConfig,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if safety.violence_detected {
        let hard = safety.violence_severity > config.violence_hard_threshold(age_group);
        violations.push(Violation {
            severity: if hard { Severity::Hard } else { Severity::Soft },
            category: "violence_detection".into(),
            detail: format!(
                "Violence detected (severity: {:.2}). {}",
                safety.violence_severity, safety.overall_explanation
            ),
            source,
            media_index,
            confidence: safety.violence_severity,
            superseded: false,
        });
    }

    let fear_threshold = config.fear_threshold(age_group);
    if safety.fear_intensity > fear_threshold {
        violations.push(Violation {
            severity: if safety.fear_intensity > FEAR_HARD_CUTOFF {
                Severity::Hard
            } else {
                Severity::Soft
            },
            category: "fear_intensity".into(),
            detail: format!(
                "Fear intensity ({:.2}) exceeds threshold ({fear_threshold})",
                safety.fear_intensity
            ),
            source,
            media_index,
            confidence: safety.fear_intensity,
            superseded: false,
        });
    }

    if safety.political_content_detected {
        violations.push(
            Violation::hard(
                "political_content",
                format!("Political content: {}", safety.political_detail),
                source,
            )
            .with_confidence(1.0),
        );
    }

    if !safety.brand_mentions_found.is_empty() {
        violations.push(
            Violation::soft(
                "brand_mentions",
                format!(
                    "Brand mentions found: {}",
                    safety.brand_mentions_found.join(", ")
                ),
                source,
            )
            .with_confidence(FLAGGED_CONFIDENCE),
        );
    }

    if safety.religious_references_detected {
        violations.push(
            Violation::soft(
                "religious_references",
                format!("Religious references: {}", safety.religious_detail),
                source,
            )
            .with_confidence(FLAGGED_CONFIDENCE),
        );
    }

    // Propagate the media index onto the hard/soft helpers above.
    for v in &mut violations {
        v.media_index = media_index;
    }

    violations
}

/// Run the full three-layer cascade on a text.
pub async fn run_text_cascade(
    text: &str,
    source: ViolationSource,
    media_index: Option<u32>,
    age_group: AgeGroup,
    providers: &ProviderSet,
    config: &EngineConfig,
) -> Result<Vec<Violation>, NodeError> {
    let mut violations = moderation_layer(text, source, media_index, providers).await?;
    violations.extend(pii_layer(text, source, media_index, providers));

    let value = providers
        .text
        .complete_structured(&text_safety_prompt(age_group), text)
        .await
        .map_err(|e| NodeError::provider("text_llm", e))?;
    let safety: TextSafety = decode_structured("text safety analysis", value)?;
    violations.extend(build_text_violations(
        &safety,
        source,
        media_index,
        age_group,
        config,
    ));

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn violence_severity_splits_on_age_threshold() {
        let safety = TextSafety {
            violence_detected: true,
            violence_severity: 0.5,
            ..Default::default()
        };
        // 0.5 > 0.4 (ages 3-5) but not > 0.6 (ages 6-8).
        let young = build_text_violations(
            &safety,
            ViolationSource::Story,
            None,
            AgeGroup::Preschool,
            &config(),
        );
        assert_eq!(young[0].severity, Severity::Hard);

        let older = build_text_violations(
            &safety,
            ViolationSource::Story,
            None,
            AgeGroup::EarlyReader,
            &config(),
        );
        assert_eq!(older[0].severity, Severity::Soft);
    }

    #[test]
    fn fear_below_threshold_is_clean() {
        let safety = TextSafety {
            fear_intensity: 0.35,
            ..Default::default()
        };
        // Threshold for 6-8 is 0.4.
        let violations = build_text_violations(
            &safety,
            ViolationSource::Story,
            None,
            AgeGroup::EarlyReader,
            &config(),
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn extreme_fear_is_hard() {
        let safety = TextSafety {
            fear_intensity: 0.85,
            ..Default::default()
        };
        let violations = build_text_violations(
            &safety,
            ViolationSource::Story,
            None,
            AgeGroup::MiddleGrade,
            &config(),
        );
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Hard);
        assert_eq!(violations[0].category, "fear_intensity");
    }

    #[test]
    fn brand_and_religious_are_soft() {
        let safety = TextSafety {
            brand_mentions_found: vec!["Acme".into()],
            religious_references_detected: true,
            religious_detail: "a holiday".into(),
            ..Default::default()
        };
        let violations = build_text_violations(
            &safety,
            ViolationSource::Story,
            None,
            AgeGroup::EarlyReader,
            &config(),
        );
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.severity == Severity::Soft));
    }

    #[test]
    fn political_is_hard() {
        let safety = TextSafety {
            political_content_detected: true,
            political_detail: "a campaign".into(),
            ..Default::default()
        };
        let violations = build_text_violations(
            &safety,
            ViolationSource::Story,
            Some(2),
            AgeGroup::EarlyReader,
            &config(),
        );
        assert_eq!(violations[0].severity, Severity::Hard);
        assert_eq!(violations[0].media_index, Some(2));
    }
}
