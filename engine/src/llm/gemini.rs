use super::{GenerationRequest, ProviderError, ReasoningService};
use crate::config::GeminiConfig;
use crate::secrets::{scrub_secrets, CredentialPool};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Gemini `generateContent` client with credential rotation.
///
/// Authorization and quota failures advance the shared [`CredentialPool`] and
/// retry with the next key. The error is surfaced only after every key in the
/// pool has been tried once for this request.
pub struct GeminiService {
    config: GeminiConfig,
    pool: Arc<CredentialPool>,
    client: reqwest::Client,
}

impl GeminiService {
    pub fn new(config: GeminiConfig, pool: Arc<CredentialPool>) -> Self {
        Self {
            config,
            pool,
            client: reqwest::Client::new(),
        }
    }

    async fn generate_with_key(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> super::Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let mut payload = serde_json::Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": [{ "text": request.prompt }] }]),
        );
        if let Some(system) = &request.system_instruction {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": system }] }),
            );
        }
        payload.insert(
            "generationConfig".to_string(),
            json!({
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens,
            }),
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Network(scrub_secrets(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let text = scrub_secrets(&response.text().await.unwrap_or_default());

            return Err(match status.as_u16() {
                400 | 404 => ProviderError::InvalidRequest(text),
                401 | 403 => ProviderError::Authentication(text),
                429 => ProviderError::QuotaExceeded(text),
                _ => ProviderError::Unavailable(format!("Gemini API error ({}): {}", status, text)),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(scrub_secrets(&e.to_string())))?;

        let parts = data
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| ProviderError::Parse("No candidate content in response".to_string()))?;

        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();

        if text.trim().is_empty() {
            return Err(ProviderError::Parse("Empty candidate text".to_string()));
        }

        Ok(text)
    }
}

#[async_trait]
impl ReasoningService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> super::Result<String> {
        if self.pool.is_empty() {
            return Err(ProviderError::NoCredentials);
        }

        let mut last_error = ProviderError::NoCredentials;
        for _ in 0..self.pool.len() {
            let Some((position, key)) = self.pool.checkout() else {
                break;
            };

            match self.generate_with_key(key.unsecure(), request).await {
                Err(e) if e.rotates_credential() => {
                    if self.pool.advance(position) {
                        tracing::warn!("Gemini rejected credential, rotating: {}", e);
                    } else {
                        tracing::debug!("Credential already rotated by a concurrent request");
                    }
                    last_error = e;
                }
                other => return other,
            }
        }

        tracing::error!("All {} Gemini credential(s) rejected", self.pool.len());
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_pool_fails_fast() {
        let service = GeminiService::new(GeminiConfig::default(), Arc::new(CredentialPool::default()));
        let result = service.generate(&GenerationRequest::new("hi")).await;
        assert_eq!(result.unwrap_err(), ProviderError::NoCredentials);
    }

    #[test]
    fn test_service_name() {
        let service = GeminiService::new(GeminiConfig::default(), Arc::new(CredentialPool::parse("k")));
        assert_eq!(service.name(), "gemini");
    }
}
