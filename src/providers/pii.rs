//! Regex-based PII detection.
//!
//! Fast, deterministic, no API cost. Covers the kinds of personal data a
//! children's story must never carry: email addresses, phone numbers,
//! social security numbers, and credit card numbers. Patterns are compiled
//! once.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{PiiDetector, PiiHit};

static PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "email",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("email pattern"),
        ),
        (
            "phone",
            Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b")
                .expect("phone pattern"),
        ),
        (
            "ssn",
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"),
        ),
        (
            "credit_card",
            Regex::new(r"\b(?:\d[ -]*?){13,16}\b").expect("credit card pattern"),
        ),
    ]
});

/// The built-in deterministic [`PiiDetector`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexPiiDetector;

impl PiiDetector for RegexPiiDetector {
    fn detect(&self, text: &str) -> Vec<PiiHit> {
        PATTERNS
            .iter()
            .filter_map(|(kind, pattern)| {
                let occurrences = pattern.find_iter(text).count();
                (occurrences > 0).then(|| PiiHit {
                    kind: (*kind).to_string(),
                    occurrences,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_has_no_hits() {
        let hits = RegexPiiDetector.detect("A mouse found a big wheel of cheese.");
        assert!(hits.is_empty());
    }

    #[test]
    fn detects_email_and_ssn() {
        let hits =
            RegexPiiDetector.detect("Write to mouse@cheese.example or file 123-45-6789.");
        let kinds: Vec<_> = hits.iter().map(|h| h.kind.as_str()).collect();
        assert!(kinds.contains(&"email"));
        assert!(kinds.contains(&"ssn"));
    }

    #[test]
    fn counts_occurrences() {
        let hits = RegexPiiDetector.detect("a@b.example and c@d.example");
        let email = hits.iter().find(|h| h.kind == "email").unwrap();
        assert_eq!(email.occurrences, 2);
    }

    #[test]
    fn detection_is_deterministic() {
        let text = "Call (555) 123-4567 twice.";
        assert_eq!(RegexPiiDetector.detect(text), RegexPiiDetector.detect(text));
    }
}
