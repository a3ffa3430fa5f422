//! Provider transport tests against mock HTTP servers.

use std::sync::Arc;
use std::time::Duration;

use conductor::config::ApiKeys;
use conductor::providers::{
    ChatCompletionsClient, HuggingFaceClient, ProviderClient, ReplicateClient, RetryConfig,
    RetryingProviderClient, build_clients,
};
use conductor::{CallOptions, ConductorError, ModelRef, ProviderKind, ProviderRegistry};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn options() -> CallOptions {
    CallOptions {
        task_type: "caption-generation".into(),
        temperature: 0.7,
        max_tokens: 120,
    }
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "id": "gen-1",
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42 }
    })
}

// ============================================================================
// Chat completions (OpenRouter, Cerebras)
// ============================================================================

#[tokio::test]
async fn openrouter_sends_versioned_model_and_system_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-or-test"))
        .and(header("x-title", "conductor"))
        .and(body_partial_json(json!({
            "model": "qwen/qwen-2.5-7b-instruct:free:2.0.0",
            "max_tokens": 120,
            "messages": [{ "role": "system" }, { "role": "user", "content": "a sunset" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("Golden hour.")))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::openrouter(server.uri(), Some("sk-or-test".into()), TIMEOUT)
        .unwrap()
        .with_header("X-Title", "conductor");
    let model = ModelRef::new("qwen/qwen-2.5-7b-instruct:free").with_version("2.0.0");

    let completion = client.generate("a sunset", &model, &options()).await.unwrap();
    assert_eq!(completion.content, "Golden hour.");
    assert_eq!(completion.tokens, 42);
}

#[tokio::test]
async fn cerebras_sends_only_the_user_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "llama-3.1-8b-instruct",
            "messages": [{ "role": "user", "content": "hello" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("hi")))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::cerebras(server.uri(), None, TIMEOUT).unwrap();
    let completion = client
        .generate("hello", &ModelRef::new("llama-3.1-8b-instruct"), &options())
        .await
        .unwrap();
    assert_eq!(completion.content, "hi");
    assert_eq!(client.kind(), ProviderKind::Cerebras);
}

#[tokio::test]
async fn chat_without_choices_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::cerebras(server.uri(), None, TIMEOUT).unwrap();
    let err = client
        .generate("hello", &ModelRef::new("m"), &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::EmptyResponse));
}

#[tokio::test]
async fn provider_429_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::openrouter(server.uri(), None, TIMEOUT).unwrap();
    let err = client
        .generate("hello", &ModelRef::new("m"), &options())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConductorError::ProviderRateLimited {
            retry_after: Some(d)
        } if d == Duration::from_secs(7)
    ));
    assert!(err.is_transient());
    assert!(!err.is_rate_limit());
}

#[tokio::test]
async fn auth_and_server_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "locked" })))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::cerebras(server.uri(), None, TIMEOUT).unwrap();
    let auth = client
        .generate("x", &ModelRef::new("locked"), &options())
        .await
        .unwrap_err();
    assert!(matches!(auth, ConductorError::AuthenticationFailed));

    let unavailable = client
        .generate("x", &ModelRef::new("open"), &options())
        .await
        .unwrap_err();
    match unavailable {
        ConductorError::Api { status, message } => {
            assert_eq!(status, 503);
            assert!(message.contains("overloaded"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

// ============================================================================
// Hugging Face
// ============================================================================

#[tokio::test]
async fn huggingface_posts_to_model_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/google/gemma-2b-it"))
        .and(header("authorization", "Bearer hf_test"))
        .and(body_partial_json(json!({
            "inputs": "write a haiku",
            "parameters": { "max_new_tokens": 120, "return_full_text": false }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "generated_text": "Quiet pond." }])),
        )
        .mount(&server)
        .await;

    let client = HuggingFaceClient::new(server.uri(), Some("hf_test".into()), TIMEOUT).unwrap();
    let completion = client
        .generate("write a haiku", &ModelRef::new("google/gemma-2b-it"), &options())
        .await
        .unwrap();
    assert_eq!(completion.content, "Quiet pond.");
    assert_eq!(completion.tokens, 0);
}

#[tokio::test]
async fn huggingface_accepts_object_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "generated_text": "one" })))
        .mount(&server)
        .await;

    let client = HuggingFaceClient::new(server.uri(), None, TIMEOUT).unwrap();
    let completion = client.generate("x", &ModelRef::new("m"), &options()).await.unwrap();
    assert_eq!(completion.content, "one");
}

#[tokio::test]
async fn huggingface_empty_array_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = HuggingFaceClient::new(server.uri(), None, TIMEOUT).unwrap();
    let err = client.generate("x", &ModelRef::new("m"), &options()).await.unwrap_err();
    assert!(matches!(err, ConductorError::EmptyResponse));
}

// ============================================================================
// Replicate
// ============================================================================

fn replicate(server: &MockServer) -> ReplicateClient {
    ReplicateClient::new(server.uri(), Some("r8_test".into()), TIMEOUT)
        .unwrap()
        .poll_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn replicate_polls_until_prediction_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predictions"))
        .and(header("authorization", "Token r8_test"))
        .and(body_partial_json(json!({
            "version": "meta/llama-3-8b-instruct",
            "input": { "prompt": "tell a joke", "max_length": 120 }
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "p1", "status": "starting" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "p1", "status": "processing" })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .and(header("authorization", "Token r8_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p1",
            "status": "succeeded",
            "output": ["Why did ", "the model ", "cross the road?"]
        })))
        .mount(&server)
        .await;

    let completion = replicate(&server)
        .generate("tell a joke", &ModelRef::new("meta/llama-3-8b-instruct"), &options())
        .await
        .unwrap();
    assert_eq!(completion.content, "Why did the model cross the road?");
}

#[tokio::test]
async fn replicate_failed_prediction_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p2",
            "status": "failed",
            "error": "CUDA out of memory"
        })))
        .mount(&server)
        .await;

    let err = replicate(&server)
        .generate("x", &ModelRef::new("m"), &options())
        .await
        .unwrap_err();
    match err {
        ConductorError::Api { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "CUDA out of memory");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn replicate_gives_up_after_max_polls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predictions"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "p3", "status": "starting" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "p3", "status": "processing" })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let err = replicate(&server)
        .max_polls(2)
        .generate("x", &ModelRef::new("m"), &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Timeout(_)));
}

// ============================================================================
// Retry decorator
// ============================================================================

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("second time lucky")))
        .mount(&server)
        .await;

    let inner = Arc::new(ChatCompletionsClient::cerebras(server.uri(), None, TIMEOUT).unwrap());
    let client = RetryingProviderClient::new(inner, fast_retry());
    let completion = client.generate("x", &ModelRef::new("m"), &options()).await.unwrap();
    assert_eq!(completion.content, "second time lucky");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let inner = Arc::new(ChatCompletionsClient::cerebras(server.uri(), None, TIMEOUT).unwrap());
    let client = RetryingProviderClient::new(inner, fast_retry());
    let err = client.generate("x", &ModelRef::new("m"), &options()).await.unwrap_err();
    assert!(matches!(err, ConductorError::AuthenticationFailed));
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let inner = Arc::new(ChatCompletionsClient::cerebras(server.uri(), None, TIMEOUT).unwrap());
    let client = RetryingProviderClient::new(inner, fast_retry());
    let err = client.generate("x", &ModelRef::new("m"), &options()).await.unwrap_err();
    assert!(matches!(err, ConductorError::Api { status: 502, .. }));
}

#[test]
fn backoff_doubles_and_caps() {
    let config = RetryConfig::new()
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_millis(350))
        .jitter(false);
    assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
    assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
    assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
    assert_eq!(
        config.effective_delay(0, Some(Duration::from_millis(40))),
        Duration::from_millis(40)
    );
    assert_eq!(
        config.effective_delay(0, Some(Duration::from_secs(60))),
        Duration::from_millis(350)
    );
}

// ============================================================================
// Wiring
// ============================================================================

#[test]
fn build_clients_covers_every_registered_provider() {
    let registry = ProviderRegistry::builtin();
    let keys = ApiKeys::new().with(ProviderKind::OpenRouter, "sk-or");
    let clients = build_clients(&registry, &keys, TIMEOUT, &RetryConfig::default()).unwrap();

    let kinds: Vec<_> = clients.iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, registry.kinds());
}
