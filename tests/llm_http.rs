use hype_poster::config::LlmConfig;
use hype_poster::generation::knowledge::Knowledge;
use hype_poster::generation::prompted::PromptedSettings;
use hype_poster::generation::{ContentGenerator, GenerationError, PromptedGenerator};
use hype_poster::llm::{BackendError, ChatCompletionsBackend, TextBackend};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_PATH: &str = "/v1/chat/completions";

fn backend_for(server: &MockServer) -> ChatCompletionsBackend {
    ChatCompletionsBackend::new(&LlmConfig {
        endpoint: format!("{}{}", server.uri(), CHAT_PATH),
        api_key: "hf_test".to_string(),
        model: "org/test-model".to_string(),
        timeout_secs: 5,
        ..LlmConfig::default()
    })
    .unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ]
    })
}

async fn respond_with(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sends_chat_request_and_returns_trimmed_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer hf_test"))
        .and(body_partial_json(json!({
            "model": "org/test-model",
            "max_tokens": 150,
            "stream": false,
            "messages": [
                { "role": "system", "content": "persona" },
                { "role": "user", "content": "task" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("  Ship it.  ")))
        .expect(1)
        .mount(&server)
        .await;

    let text = backend_for(&server).complete("persona", "task").await.unwrap();
    assert_eq!(text, "Ship it.");
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let cases = [
        (ResponseTemplate::new(401), "unauthorized"),
        (ResponseTemplate::new(403), "unauthorized"),
        (
            ResponseTemplate::new(429).insert_header("retry-after", "17"),
            "rate_limited_17",
        ),
        (ResponseTemplate::new(429), "rate_limited_none"),
        (ResponseTemplate::new(503), "unavailable"),
        (ResponseTemplate::new(504), "unavailable"),
        (ResponseTemplate::new(500).set_body_string("boom"), "unexpected_500"),
    ];

    for (template, expected) in cases {
        let server = MockServer::start().await;
        respond_with(&server, template).await;

        let err = backend_for(&server).complete("s", "u").await.unwrap_err();
        let kind = match &err {
            BackendError::Unauthorized => "unauthorized".to_string(),
            BackendError::RateLimited { retry_after: Some(s) } => format!("rate_limited_{s}"),
            BackendError::RateLimited { retry_after: None } => "rate_limited_none".to_string(),
            BackendError::ServiceUnavailable => "unavailable".to_string(),
            BackendError::UnexpectedStatus { status, message } => {
                assert_eq!(message, "boom");
                format!("unexpected_{status}")
            }
            other => format!("{other:?}"),
        };
        assert_eq!(kind, expected);
    }
}

#[tokio::test]
async fn test_unusable_bodies_are_malformed() {
    for body in [
        ResponseTemplate::new(200).set_body_string("not json"),
        ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })),
        ResponseTemplate::new(200).set_body_json(completion("   ")),
    ] {
        let server = MockServer::start().await;
        respond_with(&server, body).await;

        let err = backend_for(&server).complete("s", "u").await.unwrap_err();
        assert!(
            matches!(err, BackendError::MalformedResponse(_)),
            "unexpected error {err:?}"
        );
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    let backend = ChatCompletionsBackend::new(&LlmConfig {
        endpoint: "http://127.0.0.1:1/v1/chat/completions".to_string(),
        api_key: "hf_test".to_string(),
        timeout_secs: 5,
        ..LlmConfig::default()
    })
    .unwrap();

    let err = backend.complete("s", "u").await.unwrap_err();
    assert!(matches!(err, BackendError::Connection(_)), "unexpected error {err:?}");
}

#[tokio::test]
async fn test_prompted_generator_cleans_backend_output() {
    let server = MockServer::start().await;
    let raw = "\"Most payment rails were built for batch settlement. Real-time money needs real-time \
               risk checks, and that changes how you design everything. 🚀\"";
    respond_with(&server, ResponseTemplate::new(200).set_body_json(completion(raw))).await;

    let generator = PromptedGenerator::new(
        Arc::new(backend_for(&server)),
        Knowledge::builtin(),
        PromptedSettings::default(),
    );

    let candidate = generator.generate().await.unwrap();
    assert!(candidate.text.starts_with("Most payment rails"));
    assert!(candidate.text.ends_with("design everything."));
    assert_eq!(candidate.length, candidate.text.chars().count());
}

#[tokio::test]
async fn test_prompted_generator_does_not_retry_bad_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let generator = PromptedGenerator::new(
        Arc::new(backend_for(&server)),
        Knowledge::builtin(),
        PromptedSettings::default(),
    );

    let err = generator.generate().await.unwrap_err();
    assert!(matches!(err, GenerationError::Unauthorized));
    assert!(err.is_fatal());
}
