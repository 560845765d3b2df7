//! Claude adapter, grounded on the teacher's Anthropic Messages API
//! client: header-based auth (`x-api-key` + `anthropic-version`), system
//! messages folded into the first user turn (Claude has no system role
//! on the wire), and SSE `data: ` framed deltas.

use crate::error::ProviderError;
use crate::models::{Capabilities, FinishReason, Limits, Request, Response, Role, ToolCall};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{estimate_confidence, resolve_max_tokens, Provider, ProviderConfig, StreamResult, ValidationResult};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Claude's output token ceiling, matching `capabilities().limits.max_tokens`.
const MAX_TOKENS_CEILING: u32 = 8192;

pub struct ClaudeProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    id: String,
    content: Vec<ClaudeContent>,
    stop_reason: Option<String>,
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn wire_finish_reason(value: Option<&str>) -> FinishReason {
    match value {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        _ => FinishReason::Empty,
    }
}

impl ClaudeProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let mut headers = config.headers.clone();
        headers.insert("anthropic-version".to_string(), "2023-06-01".to_string());
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            "https://api.anthropic.com",
            &headers,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: config.api_key.clone(),
            },
        )?;
        Ok(Self { http, config })
    }

    /// Claude has no system role on the wire: system text is folded into
    /// the first user turn. Consecutive same-role turns are merged,
    /// since the API rejects back-to-back messages of the same role.
    fn convert_messages(&self, request: &Request) -> Vec<ClaudeMessage> {
        let mut messages = Vec::new();
        let mut system_content = request.prompt.clone();

        for m in &request.messages {
            let role = match m.role {
                Role::System => {
                    if !system_content.is_empty() {
                        system_content.push('\n');
                    }
                    system_content.push_str(&m.content);
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => continue,
            };

            if !system_content.is_empty() && messages.is_empty() && role == "user" {
                messages.push(ClaudeMessage {
                    role: role.to_string(),
                    content: format!("{system_content}\n\n{}", m.content),
                });
                system_content.clear();
                continue;
            }

            if let Some(last) = messages.last_mut() {
                if last.role == role {
                    last.content.push('\n');
                    last.content.push_str(&m.content);
                    continue;
                }
            }
            messages.push(ClaudeMessage {
                role: role.to_string(),
                content: m.content.clone(),
            });
        }

        if !system_content.is_empty() && messages.is_empty() {
            messages.push(ClaudeMessage {
                role: "user".to_string(),
                content: system_content,
            });
        }

        messages
    }

    fn build_request(&self, request: &Request, stream: bool) -> ClaudeRequest {
        ClaudeRequest {
            model: self.config.map_model(&request.model_params.model),
            max_tokens: resolve_max_tokens(request.model_params.max_tokens, MAX_TOKENS_CEILING),
            messages: self.convert_messages(request),
            temperature: request.model_params.temperature,
            top_p: request.model_params.top_p,
            stop_sequences: request.model_params.stop_sequences.clone(),
            stream: stream.then_some(true),
        }
    }
}

#[async_trait::async_trait]
impl Provider for ClaudeProvider {
    fn id(&self) -> &str {
        "claude"
    }

    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Result<Response, ProviderError> {
        let wire = self.build_request(request, false);
        let start = Instant::now();

        let retry_config = crate::retry::RetryConfig {
            max_retries: self.config.max_retries,
            initial_delay: self.config.retry_delay,
            ..Default::default()
        };
        let parsed: ClaudeResponse =
            crate::retry::execute_with_auth_retry(&retry_config, cancel, || async {
                self.http.post_json("/v1/messages", &wire).await
            })
            .await?;

        let content = parsed.content.into_iter().map(|c| c.text).collect::<Vec<_>>().join("");
        let finish_reason = wire_finish_reason(parsed.stop_reason.as_deref());
        let confidence = estimate_confidence(0.85, finish_reason, content.len());

        Ok(Response {
            id: parsed.id,
            request_id: request.id.clone(),
            provider_id: "claude".to_string(),
            provider_name: "claude".to_string(),
            content,
            confidence,
            tokens_used: parsed.usage.input_tokens + parsed.usage.output_tokens,
            response_time_ms: start.elapsed().as_millis() as u64,
            finish_reason,
            tool_calls: Vec::<ToolCall>::new(),
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
            selected: false,
            selection_score: 0.0,
        }
        .clamp_confidence())
    }

    async fn complete_stream(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<StreamResult, ProviderError> {
        let wire = self.build_request(request, true);
        let request_id = request.id.clone();
        let cancel = cancel.clone();

        let response = self.http.post_json_raw("/v1/messages", &wire).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let stream = stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut emitted_content = false;

            loop {
                let next = tokio::select! {
                    chunk = futures::StreamExt::next(&mut bytes_stream) => chunk,
                    _ = cancel.cancelled() => return,
                };
                let Some(chunk_result) = next else { break };
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ProviderError::Http(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    let Some(json_str) = line.strip_prefix("data: ") else { continue };
                    if json_str.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(json_str) {
                        Ok(event) => {
                            if let Some(text) = event.get("delta").and_then(|d| d.get("text")).and_then(|t| t.as_str()) {
                                if !text.is_empty() {
                                    emitted_content = true;
                                    yield Ok(chunk_response(&request_id, text.to_string()));
                                }
                            }
                            if event.get("type").and_then(|t| t.as_str()) == Some("message_stop") {
                                let finish_reason = if emitted_content { FinishReason::Stop } else { FinishReason::Empty };
                                yield Ok(terminal_response(&request_id, finish_reason));
                                return;
                            }
                        }
                        Err(_) => continue,
                    }
                }
            }
            let finish_reason = if emitted_content { FinishReason::Stop } else { FinishReason::Empty };
            yield Ok(terminal_response(&request_id, finish_reason));
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let probe = ClaudeRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 1,
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: "ping".to_string(),
            }],
            temperature: Some(0.0),
            top_p: None,
            stop_sequences: Vec::new(),
            stream: Some(false),
        };
        self.http.post_json::<_, serde_json::Value>("/v1/messages", &probe).await?;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported_models: vec![
                "claude-opus-4-20250514".to_string(),
                "claude-sonnet-4-20250514".to_string(),
                "claude-3-5-sonnet-20241022".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
            ],
            supported_features: vec!["chat".to_string(), "streaming".to_string(), "tools".to_string()],
            supported_request_types: vec!["completion".to_string()],
            supports_streaming: true,
            supports_function_calling: true,
            supports_vision: true,
            supports_tools: true,
            supports_search: false,
            supports_reasoning: true,
            supports_code_completion: true,
            supports_code_analysis: true,
            supports_code_refactoring: true,
            limits: Limits {
                max_tokens: Some(8192),
                max_input_length: Some(200_000),
                max_output_length: Some(8192),
                max_concurrent_requests: None,
            },
            metadata: Default::default(),
        }
    }

    fn validate_config(&self) -> ValidationResult {
        let mut messages = Vec::new();
        if self.config.api_key.trim().is_empty() {
            messages.push("claude: api_key must not be empty".to_string());
        }
        self.config.validate_common(&mut messages);
        ValidationResult::from_messages(messages)
    }
}

fn chunk_response(request_id: &str, content: String) -> Response {
    Response {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        provider_id: "claude".to_string(),
        provider_name: "claude".to_string(),
        content,
        confidence: 0.85,
        tokens_used: 0,
        response_time_ms: 0,
        finish_reason: FinishReason::Empty,
        tool_calls: Vec::new(),
        metadata: Default::default(),
        created_at: chrono::Utc::now(),
        selected: false,
        selection_score: 0.0,
    }
}

fn terminal_response(request_id: &str, finish_reason: FinishReason) -> Response {
    Response {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        provider_id: "claude".to_string(),
        provider_name: "claude".to_string(),
        content: String::new(),
        confidence: 0.0,
        tokens_used: 0,
        response_time_ms: 0,
        finish_reason,
        tool_calls: Vec::new(),
        metadata: Default::default(),
        created_at: chrono::Utc::now(),
        selected: false,
        selection_score: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new(ProviderConfig::new("claude", "test-key")).unwrap()
    }

    #[test]
    fn system_prompt_folds_into_first_user_message() {
        let req = Request::new("r1", "claude-3-5-sonnet-20241022")
            .with_prompt("be terse")
            .with_message(Message::user("hi"));
        let messages = provider().convert_messages(&req);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        assert!(messages[0].content.starts_with("be terse"));
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let req = Request::new("r1", "m")
            .with_message(Message::user("first"))
            .with_message(Message::user("second"));
        let messages = provider().convert_messages(&req);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("first"));
        assert!(messages[0].content.contains("second"));
    }

    #[test]
    fn wire_finish_reason_maps_stop_sequence_and_max_tokens() {
        assert_eq!(wire_finish_reason(Some("end_turn")), FinishReason::Stop);
        assert_eq!(wire_finish_reason(Some("max_tokens")), FinishReason::Length);
    }

    #[test]
    fn validate_config_rejects_blank_key() {
        let provider = ClaudeProvider::new(ProviderConfig::new("claude", "").with_model("claude-3-5-sonnet-20241022")).unwrap();
        assert!(!provider.validate_config().valid);
    }

    #[test]
    fn validate_config_rejects_missing_model() {
        let provider = ClaudeProvider::new(ProviderConfig::new("claude", "test-key")).unwrap();
        let result = provider.validate_config();
        assert!(!result.valid);
        assert!(result.messages.iter().any(|m| m.contains("model")));
    }

    #[test]
    fn validate_config_accepts_fully_configured_provider() {
        let provider = ClaudeProvider::new(ProviderConfig::new("claude", "test-key").with_model("claude-3-5-sonnet-20241022")).unwrap();
        assert!(provider.validate_config().valid);
    }
}
