//! Reasoning-service abstraction
//!
//! The pipeline consults an external reasoning service in exactly two places:
//! the Planner's fallback classification and the Evaluator's contextual check.
//! Both go through [`ReasoningService`], wrapped by [`client::ReasoningClient`]
//! for timeouts, retries and cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod gemini;

pub use client::ReasoningClient;
pub use gemini::GeminiService;

/// Result type for reasoning-service operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur while talking to a reasoning service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("No credentials configured")]
    NoCredentials,
}

impl ProviderError {
    /// Transient failures worth another attempt after backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_)
                | ProviderError::Network(_)
                | ProviderError::Timeout(_)
                | ProviderError::QuotaExceeded(_)
        )
    }

    /// Failures tied to the credential in use rather than the request
    pub fn rotates_credential(&self) -> bool {
        matches!(
            self,
            ProviderError::Authentication(_) | ProviderError::QuotaExceeded(_)
        )
    }
}

impl From<ProviderError> for sdk::errors::EngineError {
    fn from(err: ProviderError) -> Self {
        use sdk::errors::EngineError;
        match err {
            ProviderError::Timeout(_) => EngineError::ProviderTimeout,
            ProviderError::Cancelled => EngineError::Cancelled,
            ProviderError::NoCredentials => EngineError::CredentialsUnavailable,
            other => EngineError::Provider(other.to_string()),
        }
    }
}

/// One generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instruction: None,
            temperature: 0.1,
            max_output_tokens: 2048,
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_limits(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Text generation backend
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Returns the name of the service (e.g., "gemini")
    fn name(&self) -> &str;

    /// Generate text for a single prompt.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Build the configured reasoning client.
///
/// Returns `None` when the service is disabled, the provider is unknown, or
/// no credential is available; the pipeline then runs on its deterministic
/// paths only.
pub fn client_from_config(
    config: &crate::config::LLMConfig,
    secrets: &crate::secrets::SecretManager,
) -> Option<ReasoningClient> {
    if !config.enabled {
        tracing::info!("Reasoning service disabled by configuration");
        return None;
    }
    if config.provider != "gemini" {
        tracing::warn!("Unknown reasoning provider '{}', running without one", config.provider);
        return None;
    }

    let pool = secrets.load_credentials(config);
    if pool.is_empty() {
        tracing::info!("No reasoning credentials found, running without a reasoning service");
        return None;
    }

    let service: std::sync::Arc<dyn ReasoningService> = std::sync::Arc::new(GeminiService::new(
        config.gemini.clone(),
        std::sync::Arc::new(pool),
    ));
    Some(ReasoningClient::new(service, config))
}

/// Extract a JSON object from model output.
///
/// Handles raw JSON, Markdown-fenced JSON (with or without trailing prose) and
/// an object embedded in prose. Returns `None` when no object parses.
///
/// ```
/// use warden_engine::llm::extract_json;
///
/// let value = extract_json("Sure:\n```json\n{\"task_type\": \"migration\"}\n```").unwrap();
/// assert_eq!(value["task_type"], "migration");
/// ```
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(inner) = extract_fenced_body(trimmed) {
        if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(inner.trim()) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let candidate = extract_balanced_json(&trimmed[start..])?;
    serde_json::from_str(candidate).ok()
}

/// Body of the first Markdown code fence, tolerating trailing prose.
fn extract_fenced_body(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start = fence_start + 3 + after_opening.find('\n')? + 1;
    let body_end = body_start + content[body_start..].find("```")?;

    (body_start < body_end).then(|| &content[body_start..body_end])
}

/// Balanced `{ ... }` prefix of `s`, respecting string literals.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
