//! Provider ports: abstract capabilities injected at engine construction.
//!
//! The engine never speaks to a model, moderation API, or object store
//! directly — every external capability is a trait here, implemented by an
//! adapter the host application supplies. Contracts are expressed in terms
//! of inputs and guarantees, not transport.
//!
//! Failures are classified at the port boundary: [`ProviderError::Transient`]
//! faults are retried by the [`retry`] adapter layer (never by the engine);
//! [`ProviderError::Permanent`] faults — including exhausted retries —
//! short-circuit the calling node.
//!
//! Structured output: ports that produce schema-shaped values return
//! `serde_json::Value`; callers decode with
//! [`decode_structured`](crate::node::decode_structured), and a mismatch is
//! a permanent schema error.

pub mod pii;
pub mod retry;

pub use pii::RegexPiiDetector;
pub use retry::{Retried, RetryPolicy};

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a provider port call.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ProviderError {
    /// Worth retrying: rate limits, timeouts, 5xx-class faults.
    #[error("transient provider failure: {message}")]
    #[diagnostic(
        code(fablegraph::provider::transient),
        help("The adapter layer retries these with backoff.")
    )]
    Transient { message: String },

    /// Not worth retrying: invalid request, content refusal, auth failure.
    #[error("permanent provider failure: {message}")]
    #[diagnostic(code(fablegraph::provider::permanent))]
    Permanent { message: String },
}

impl ProviderError {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Whether the adapter layer may retry this failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Text LLM port: free-form completion and structured (schema-shaped)
/// generation.
#[async_trait]
pub trait TextLlm: Send + Sync {
    /// Generate free text from a system and user prompt.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError>;

    /// Generate a structured value the caller decodes against its schema.
    /// A value that fails to decode is a permanent error at the call site.
    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
    ) -> Result<Value, ProviderError>;
}

/// Vision LLM port: structured safety analysis of one image.
#[async_trait]
pub trait VisionLlm: Send + Sync {
    async fn analyze(&self, image_ref: &str, system: &str) -> Result<Value, ProviderError>;
}

/// Image generation port. Returns an opaque reference to the produced image.
#[async_trait]
pub trait ImageGen: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Video generation port. May poll internally; the port hides it.
#[async_trait]
pub trait VideoGen: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Moderation port: returns the flagged category names for a text, empty
/// when clean.
#[async_trait]
pub trait Moderation: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<Vec<String>, ProviderError>;
}

/// One PII finding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PiiHit {
    /// Kind of PII, e.g. `"email"`, `"phone"`, `"ssn"`, `"credit_card"`.
    pub kind: String,
    /// Number of occurrences found.
    pub occurrences: usize,
}

/// Deterministic PII detector. Pure string analysis, no I/O.
pub trait PiiDetector: Send + Sync {
    fn detect(&self, text: &str) -> Vec<PiiHit>;
}

/// Blob storage port for opaque references.
///
/// `get` accepts any reference the pipeline has seen — including
/// provider-side temporary references — so adapters own all transport.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key; returns the stored object's URL.
    async fn put(&self, key: &str, data: &[u8]) -> Result<String, ProviderError>;

    /// Fetch the bytes behind a reference.
    async fn get(&self, reference: &str) -> Result<Vec<u8>, ProviderError>;
}

/// The full set of injected capabilities, shared by every node.
#[derive(Clone)]
pub struct ProviderSet {
    pub text: Arc<dyn TextLlm>,
    pub vision: Arc<dyn VisionLlm>,
    pub image: Arc<dyn ImageGen>,
    pub video: Arc<dyn VideoGen>,
    pub moderation: Arc<dyn Moderation>,
    pub pii: Arc<dyn PiiDetector>,
    pub blobs: Arc<dyn BlobStore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::transient("429").is_transient());
        assert!(!ProviderError::permanent("schema refused").is_transient());
    }
}
