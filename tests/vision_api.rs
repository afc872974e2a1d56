//! OpenAI vision client against a mock HTTP server.

use bytes::Bytes;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use waav_companion::core::image::{
    EMPTY_DESCRIPTION, FALLBACK_DESCRIPTION, ImagePayload, OpenAIVision, OpenAIVisionConfig,
    VisionDescriber, VisionRequestError, describe_or_fallback,
};

fn payload() -> ImagePayload {
    ImagePayload {
        data: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0]),
        mime_type: "image/jpeg",
    }
}

fn vision(server: &MockServer) -> OpenAIVision {
    let config = OpenAIVisionConfig::new("sk-test")
        .with_model("gpt-4o-mini")
        .with_base_url(server.uri());
    OpenAIVision::new(config).unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_describe_returns_model_answer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "max_tokens": 150})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("  A cutting board with sliced onions.  ")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let description = vision(&server).describe(&payload()).await.unwrap();
    assert_eq!(description, "A cutting board with sliced onions.");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    let content = &body["messages"][0]["content"];
    assert_eq!(content[0]["type"], "text");
    assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,/9j/4A==");
}

#[tokio::test]
async fn test_empty_answer_uses_placeholder() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
        .mount(&server)
        .await;

    let description = vision(&server).describe(&payload()).await.unwrap();
    assert_eq!(description, EMPTY_DESCRIPTION);
}

#[tokio::test]
async fn test_api_error_falls_back() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = vision(&server);
    match client.describe(&payload()).await {
        Err(VisionRequestError::Api { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("expected API error, got {other:?}"),
    }

    let description = describe_or_fallback(Some(&client), &payload()).await;
    assert_eq!(description, FALLBACK_DESCRIPTION);
}

#[tokio::test]
async fn test_garbage_response_is_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    assert!(matches!(
        vision(&server).describe(&payload()).await,
        Err(VisionRequestError::InvalidResponse(_))
    ));
}
