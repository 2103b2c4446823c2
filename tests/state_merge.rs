//! Merge-rule properties: reducer permutation invariance and scalar
//! last-writer-wins semantics.

use proptest::prelude::*;

use fablegraph::guardrails::{Severity, Violation, ViolationSource};
use fablegraph::node::StatePatch;
use fablegraph::state::{
    field_rule, FieldRule, MediaBinding, MediaMetadata, StoryState, FIELDS,
};

fn metadata(index: u32) -> MediaMetadata {
    MediaMetadata {
        index,
        url: format!("u{index}"),
        prompt: format!("p{index}"),
        description: String::new(),
    }
}

fn violation(category: &str, hard: bool) -> Violation {
    Violation {
        severity: if hard { Severity::Hard } else { Severity::Soft },
        category: category.to_string(),
        detail: String::new(),
        source: ViolationSource::Story,
        media_index: None,
        confidence: 1.0,
        superseded: false,
    }
}

/// One simulated fan-out contribution.
#[derive(Clone, Debug)]
struct Contribution {
    index: u32,
    hard: bool,
}

fn patch_for(c: &Contribution) -> StatePatch {
    StatePatch {
        image_metadata: vec![metadata(c.index)],
        guardrail_violations: vec![violation(&format!("cat-{}", c.index), c.hard)],
        image_bindings: vec![MediaBinding {
            index: c.index,
            url: format!("u{}", c.index),
            attempts: 1,
        }],
        ..Default::default()
    }
}

fn apply_in_order(order: &[Contribution]) -> StoryState {
    let mut state = StoryState::builder("job", "prompt").build();
    for c in order {
        patch_for(c).apply(&mut state);
    }
    state
}

/// Canonical multiset view of every reducer field.
fn reducer_multisets(state: &StoryState) -> (Vec<u32>, Vec<String>, Vec<u32>) {
    let mut meta: Vec<u32> = state.image_metadata.iter().map(|m| m.index).collect();
    meta.sort_unstable();
    let mut cats: Vec<String> = state
        .guardrail_violations
        .iter()
        .map(|v| v.category.clone())
        .collect();
    cats.sort();
    let mut bindings: Vec<u32> = state.image_bindings.iter().map(|b| b.index).collect();
    bindings.sort_unstable();
    (meta, cats, bindings)
}

proptest! {
    /// For every permutation of a fan-out's completions, the merged reducer
    /// fields hold the same multiset.
    #[test]
    fn reducer_merge_is_permutation_invariant(
        indexes in prop::collection::vec(0u32..32, 1..10),
        seed in any::<u64>(),
    ) {
        let contributions: Vec<Contribution> = indexes
            .iter()
            .map(|&index| Contribution { index, hard: index % 3 == 0 })
            .collect();

        // A deterministic shuffle derived from the seed.
        let mut shuffled = contributions.clone();
        let mut state = seed;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }

        let in_order = apply_in_order(&contributions);
        let out_of_order = apply_in_order(&shuffled);
        prop_assert_eq!(reducer_multisets(&in_order), reducer_multisets(&out_of_order));
    }

    /// Merging never loses a contribution: the merged length is the sum of
    /// the parts.
    #[test]
    fn reducer_merge_is_lossless(count in 0usize..20) {
        let contributions: Vec<Contribution> = (0..count as u32)
            .map(|index| Contribution { index, hard: false })
            .collect();
        let state = apply_in_order(&contributions);
        prop_assert_eq!(state.image_metadata.len(), count);
        prop_assert_eq!(state.guardrail_violations.len(), count);
        prop_assert_eq!(state.image_bindings.len(), count);
    }
}

#[test]
fn scalar_last_writer_wins_and_none_preserves() {
    let mut state = StoryState::builder("job", "prompt").build();
    StatePatch {
        story_title: Some("First".into()),
        guardrail_passed: Some(false),
        ..Default::default()
    }
    .apply(&mut state);
    StatePatch {
        guardrail_passed: Some(true),
        ..Default::default()
    }
    .apply(&mut state);

    assert_eq!(state.story_title.as_deref(), Some("First"));
    assert_eq!(state.guardrail_passed, Some(true));
}

#[test]
fn descriptor_table_classifies_all_patch_fields() {
    // Every reducer the patch type carries must be declared Append, and
    // every scalar LastWriterWins.
    for (name, rule) in [
        ("image_metadata", FieldRule::Append),
        ("video_metadata", FieldRule::Append),
        ("guardrail_violations", FieldRule::Append),
        ("image_bindings", FieldRule::Append),
        ("video_bindings", FieldRule::Append),
        ("story_text", FieldRule::LastWriterWins),
        ("story_title", FieldRule::LastWriterWins),
        ("image_prompts", FieldRule::LastWriterWins),
        ("video_prompts", FieldRule::LastWriterWins),
        ("image_urls", FieldRule::LastWriterWins),
        ("video_urls", FieldRule::LastWriterWins),
        ("evaluation_scores", FieldRule::LastWriterWins),
        ("input_moderation_passed", FieldRule::LastWriterWins),
        ("guardrail_passed", FieldRule::LastWriterWins),
        ("guardrail_summary", FieldRule::LastWriterWins),
        ("review_decision", FieldRule::LastWriterWins),
        ("review_comment", FieldRule::LastWriterWins),
        ("reviewer_id", FieldRule::LastWriterWins),
        ("error", FieldRule::LastWriterWins),
    ] {
        assert_eq!(field_rule(name), Some(rule), "{name}");
    }
    assert_eq!(FIELDS.len(), 19);
}
