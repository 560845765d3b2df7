//! HTTP-layer coverage for the `openai_compatible` adapter core, exercised
//! through its `mistral` parameterization against a mocked transport rather
//! than a real endpoint. Mistral is the stand-in here because it's a
//! default-enabled thin wrapper with no wire quirks of its own.

use meridian_core::models::{Message, Request};
use meridian_core::providers::mistral::MistralProvider;
use meridian_core::providers::{Provider, ProviderConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request as WireRequest, Respond, ResponseTemplate};

fn request() -> Request {
    Request::new("r1", "mistral-large-latest").with_message(Message::user("hi"))
}

fn config(base_url: String) -> ProviderConfig {
    ProviderConfig::new("mistral", "test-key")
        .with_base_url(base_url)
        .with_model("mistral-large-latest")
}

#[tokio::test]
async fn single_success_returns_parsed_content_and_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "hello from mistral"}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 42}
        })))
        .mount(&server)
        .await;

    let provider = MistralProvider::new(config(server.uri())).unwrap();
    let response = provider.complete(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.content, "hello from mistral");
    assert_eq!(response.tokens_used, 42);
    assert_eq!(response.finish_reason, meridian_core::FinishReason::Stop);
}

/// Returns 503 on its first two invocations, then a well-formed 200. Counts
/// calls itself rather than leaning on wiremock's own call-count
/// verification, so the assertion is exact and doesn't depend on when that
/// verification runs relative to the test body.
struct FlakyTwiceThenOk {
    calls: Arc<AtomicUsize>,
}

impl Respond for FlakyTwiceThenOk {
    fn respond(&self, _request: &WireRequest) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "recovered"}, "finish_reason": "stop"}],
                "usage": {"total_tokens": 7}
            }))
        }
    }
}

#[tokio::test]
async fn retries_twice_on_503_then_succeeds_on_the_third_call() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlakyTwiceThenOk { calls: Arc::clone(&calls) })
        .mount(&server)
        .await;

    let provider_config = config(server.uri())
        .with_max_retries(3)
        .with_retry_delay(Duration::from_millis(10));
    let provider = MistralProvider::new(provider_config).unwrap();

    let response = provider.complete(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.content, "recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
