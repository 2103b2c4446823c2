//! Bounded retry with exponential backoff for provider ports.
//!
//! Retry lives here, in the adapter layer, never in the engine: wrap a port
//! in [`Retried`] and inject the wrapper. Transient failures are retried up
//! to the policy's attempt budget with exponential backoff; once the budget
//! is exhausted the last transient failure is surfaced as permanent, which
//! short-circuits the calling node.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ImageGen, Moderation, ProviderError, TextLlm, VideoGen, VisionLlm};

/// Retry budget and backoff shape.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Run `op` under this policy. Permanent errors return immediately;
    /// transient errors are retried with exponential backoff until the
    /// attempt budget runs out, at which point the failure is reclassified
    /// as permanent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;
        let mut last_message = String::new();
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err @ ProviderError::Permanent { .. }) => return Err(err),
                Err(ProviderError::Transient { message }) => {
                    if attempt < attempts {
                        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, %message,
                            "transient provider failure, backing off");
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                    last_message = message;
                }
            }
        }
        Err(ProviderError::permanent(format!(
            "retries exhausted after {attempts} attempt(s): {last_message}"
        )))
    }
}

/// A provider port wrapped with a [`RetryPolicy`].
///
/// Implements every retriable port trait for which the inner type does, so
/// one wrapper serves the whole [`ProviderSet`](super::ProviderSet).
pub struct Retried<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> Retried<P> {
    #[must_use]
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: TextLlm> TextLlm for Retried<P> {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        self.policy.run(|| self.inner.complete(system, user)).await
    }

    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
    ) -> Result<Value, ProviderError> {
        self.policy
            .run(|| self.inner.complete_structured(system, user))
            .await
    }
}

#[async_trait]
impl<P: VisionLlm> VisionLlm for Retried<P> {
    async fn analyze(&self, image_ref: &str, system: &str) -> Result<Value, ProviderError> {
        self.policy.run(|| self.inner.analyze(image_ref, system)).await
    }
}

#[async_trait]
impl<P: ImageGen> ImageGen for Retried<P> {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.policy.run(|| self.inner.generate(prompt)).await
    }
}

#[async_trait]
impl<P: VideoGen> VideoGen for Retried<P> {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.policy.run(|| self.inner.generate(prompt)).await
    }
}

#[async_trait]
impl<P: Moderation> Moderation for Retried<P> {
    async fn moderate(&self, text: &str) -> Result<Vec<String>, ProviderError> {
        self.policy.run(|| self.inner.moderate(text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::transient("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_transient_becomes_permanent() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), _> = policy
            .run(|| async { Err(ProviderError::transient("always down")) })
            .await;
        let err = result.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("retries exhausted"));
    }

    #[tokio::test]
    async fn permanent_fails_fast() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::permanent("bad request")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
