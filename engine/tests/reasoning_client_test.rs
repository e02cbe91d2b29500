//! Reasoning client against a mocked Gemini endpoint

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use warden_engine::config::{GeminiConfig, LLMConfig};
use warden_engine::llm::{GeminiService, ProviderError, ReasoningClient, ReasoningService};
use warden_engine::secrets::CredentialPool;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/models/test-model:generateContent";

fn answer(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    }))
}

fn llm_config(max_retries: u32, timeout_secs: u64) -> LLMConfig {
    LLMConfig {
        timeout_secs,
        max_retries,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 40,
        ..LLMConfig::default()
    }
}

fn client(server: &MockServer, keys: &str, config: &LLMConfig) -> (ReasoningClient, Arc<CredentialPool>) {
    let pool = Arc::new(CredentialPool::parse(keys));
    let gemini = GeminiConfig {
        base_url: server.uri(),
        model: "test-model".to_string(),
    };
    let service: Arc<dyn ReasoningService> = Arc::new(GeminiService::new(gemini, Arc::clone(&pool)));
    (ReasoningClient::new(service, config), pool)
}

#[tokio::test]
async fn rejected_credential_rotates_to_next_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .and(query_param("key", "revoked-key"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .and(query_param("key", "live-key"))
        .respond_with(answer("{\"task_type\": \"migration\"}"))
        .expect(2)
        .mount(&server)
        .await;

    let config = llm_config(0, 5);
    let (client, pool) = client(&server, "revoked-key, live-key", &config);
    let request = client.request("classify", "system");

    let text = client.generate(&request, &CancellationToken::new()).await.unwrap();
    assert_eq!(text, "{\"task_type\": \"migration\"}");
    assert_eq!(pool.current().map(|k| k.unsecure().to_string()), Some("live-key".to_string()));

    // The rotation sticks for later requests
    client.generate(&request, &CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn all_credentials_rejected_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let config = llm_config(3, 5);
    let (client, _) = client(&server, "a;b", &config);

    let err = client
        .generate(&client.request("x", "y"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Authentication(_)));
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(answer("recovered"))
        .mount(&server)
        .await;

    let config = llm_config(2, 5);
    let (client, _) = client(&server, "k", &config);

    let text = client
        .generate(&client.request("x", "y"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(text, "recovered");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let config = llm_config(2, 5);
    let (client, _) = client(&server, "k", &config);

    let err = client
        .generate(&client.request("x", "y"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable(_)));
}

#[tokio::test]
async fn slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(answer("late").set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = llm_config(0, 1);
    let (client, _) = client(&server, "k", &config);

    let err = client
        .generate(&client.request("x", "y"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Timeout(1));
}

#[tokio::test]
async fn cancellation_abandons_in_flight_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(answer("late").set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let config = llm_config(2, 30);
    let (client, _) = client(&server, "k", &config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = client
        .generate(&client.request("x", "y"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn api_key_never_appears_in_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(400).set_body_string(format!(
            "bad request for {}{}?key=super-secret-key",
            server.uri(),
            ENDPOINT
        )))
        .mount(&server)
        .await;

    let config = llm_config(0, 5);
    let (client, _) = client(&server, "super-secret-key", &config);

    let err = client
        .generate(&client.request("x", "y"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
    assert!(!err.to_string().contains("super-secret-key"));
}
