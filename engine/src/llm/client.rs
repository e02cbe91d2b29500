//! Time-bounded, retrying, cancellable wrapper around a reasoning service.

use super::{GenerationRequest, ProviderError, ReasoningService};
use crate::config::LLMConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Calls a [`ReasoningService`] with a per-attempt timeout and a fixed retry
/// budget. Every attempt and every backoff wait races the caller's
/// cancellation token.
#[derive(Clone)]
pub struct ReasoningClient {
    service: Arc<dyn ReasoningService>,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    temperature: f32,
    max_output_tokens: u32,
}

impl ReasoningClient {
    pub fn new(service: Arc<dyn ReasoningService>, config: &LLMConfig) -> Self {
        Self {
            service,
            timeout: config.timeout(),
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Request pre-filled with the configured generation limits
    pub fn request(&self, prompt: impl Into<String>, system: &str) -> GenerationRequest {
        GenerationRequest::new(prompt)
            .with_system(system)
            .with_limits(self.temperature, self.max_output_tokens)
    }

    /// Delay before retry number `attempt` (0-based): `min(base * 2^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Generate with timeout, retries and cancellation.
    ///
    /// Non-retryable errors return immediately. Retryable ones are attempted
    /// `1 + max_retries` times before the last error is returned.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> super::Result<String> {
        let mut attempt = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                result = tokio::time::timeout(self.timeout, self.service.generate(request)) => result,
            };

            let error = match outcome {
                Ok(Ok(text)) => {
                    tracing::debug!(
                        "{} answered on attempt {}",
                        self.service.name(),
                        attempt + 1
                    );
                    return Ok(text);
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.timeout.as_secs()),
            };

            if !error.is_retryable() || attempt >= self.max_retries {
                tracing::warn!(
                    "{} failed after {} attempt(s): {}",
                    self.service.name(),
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            let delay = self.backoff(attempt);
            tracing::debug!(
                "{} attempt {} failed ({}), retrying in {:?}",
                self.service.name(),
                attempt + 1,
                error,
                delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
