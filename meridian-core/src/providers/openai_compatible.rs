//! Shared core for every backend that speaks the OpenAI chat-completions
//! wire format (DeepSeek, Qwen, Cerebras, Fireworks, Zen, ZAI all proxy or
//! clone it). Grounded on the teacher's `groq.rs`, which is the closest
//! existing adapter to an unmodified OpenAI-compatible client: Bearer
//! auth, `/chat/completions`, SSE streaming framed as `data: ` lines
//! terminated by `[DONE]`.
//!
//! Each concrete provider (see `deepseek`, `qwen`, `cerebras`,
//! `fireworks`, `zen`, `zai`) is a thin wrapper supplying its own default
//! base URL and confidence base, so the adapter still reads as one
//! file/struct per backend.

use crate::error::ProviderError;
use crate::models::{Capabilities, FinishReason, Limits, Request, Response, Role, ToolCall};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{
    estimate_confidence, resolve_max_tokens, Provider, ProviderConfig, StreamResult, ValidationResult,
    DEFAULT_MAX_TOKENS_CEILING,
};
use async_stream::stream as async_stream;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn wire_messages(request: &Request) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.prompt.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: request.prompt.clone(),
        });
    }
    for m in &request.messages {
        messages.push(WireMessage {
            role: wire_role(m.role),
            content: m.content.clone(),
        });
    }
    messages
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

impl ChatCompletionRequest {
    fn from_neutral(request: &Request, model: String, stream: bool) -> Self {
        Self {
            model,
            messages: wire_messages(request),
            max_tokens: resolve_max_tokens(request.model_params.max_tokens, DEFAULT_MAX_TOKENS_CEILING),
            temperature: request.model_params.temperature,
            top_p: request.model_params.top_p,
            stop: request.model_params.stop_sequences.clone(),
            stream: stream.then_some(true),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    delta: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

fn wire_finish_reason(value: Option<&str>) -> FinishReason {
    match value {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some("tool_calls") => FinishReason::ToolCalls,
        _ => FinishReason::Empty,
    }
}

/// One backend's static parameters: its api-facing name, default base
/// URL, and the confidence base its responses should start from.
pub struct OpenAiCompatibleSpec {
    pub provider_id: &'static str,
    pub default_base_url: &'static str,
    pub confidence_base: f64,
    pub supported_models: &'static [&'static str],
}

pub struct OpenAiCompatibleProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
    spec: OpenAiCompatibleSpec,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig, spec: OpenAiCompatibleSpec) -> Result<Self, ProviderError> {
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            spec.default_base_url,
            &config.headers,
            AuthStrategy::Bearer {
                token: config.api_key.clone(),
            },
        )?;
        Ok(Self { http, config, spec })
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        self.spec.provider_id
    }

    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Result<Response, ProviderError> {
        let model = self.config.map_model(&request.model_params.model);
        let wire = ChatCompletionRequest::from_neutral(request, model, false);
        let start = Instant::now();

        let retry_config = crate::retry::RetryConfig {
            max_retries: self.config.max_retries,
            initial_delay: self.config.retry_delay,
            ..Default::default()
        };
        let body: ChatCompletionResponse =
            crate::retry::execute_with_auth_retry(&retry_config, cancel, || async {
                self.http.post_json("/chat/completions", &wire).await
            })
            .await?;

        let choice = body.choices.into_iter().next().unwrap_or(Choice {
            message: None,
            delta: None,
            finish_reason: None,
        });
        let content = choice.message.and_then(|m| m.content).unwrap_or_default();
        let finish_reason = wire_finish_reason(choice.finish_reason.as_deref());
        let confidence = estimate_confidence(self.spec.confidence_base, finish_reason, content.len());

        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            provider_id: self.spec.provider_id.to_string(),
            provider_name: self.spec.provider_id.to_string(),
            content,
            confidence,
            tokens_used: body.usage.map(|u| u.total_tokens).unwrap_or_default(),
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
        let model = self.config.map_model(&request.model_params.model);
        let wire = ChatCompletionRequest::from_neutral(request, model, true);
        let request_id = request.id.clone();
        let provider_id = self.spec.provider_id.to_string();
        let confidence_base = self.spec.confidence_base;
        let cancel = cancel.clone();

        let raw = self.http.post_json_raw("/chat/completions", &wire).await?;
        if !raw.status().is_success() {
            return Err(map_error_response(raw).await);
        }

        let stream = async_stream! {
            let mut bytes_stream = raw.bytes_stream();
            let mut buffer = String::new();
            let mut emitted_content = false;

            loop {
                if cancel.is_cancelled() {
                    return;
                }
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
                    if line.is_empty() {
                        continue;
                    }
                    let Some(json_str) = line.strip_prefix("data: ") else { continue };
                    if json_str == "[DONE]" {
                        let finish_reason = if emitted_content { FinishReason::Stop } else { FinishReason::Empty };
                        yield Ok(terminal_chunk(&request_id, &provider_id, finish_reason));
                        return;
                    }
                    match serde_json::from_str::<ChatCompletionResponse>(json_str) {
                        Ok(parsed) => {
                            if let Some(choice) = parsed.choices.into_iter().next() {
                                let delta = choice.delta.and_then(|d| d.content).unwrap_or_default();
                                if !delta.is_empty() {
                                    emitted_content = true;
                                    yield Ok(delta_chunk(&request_id, &provider_id, delta, confidence_base));
                                }
                            }
                        }
                        Err(_) => continue,
                    }
                }
            }
            let finish_reason = if emitted_content { FinishReason::Stop } else { FinishReason::Empty };
            yield Ok(terminal_chunk(&request_id, &provider_id, finish_reason));
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.http.get_ok("/models").await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported_models: self.spec.supported_models.iter().map(|s| s.to_string()).collect(),
            supported_features: vec!["chat".to_string(), "streaming".to_string()],
            supported_request_types: vec!["completion".to_string()],
            supports_streaming: true,
            supports_function_calling: false,
            supports_vision: false,
            supports_tools: false,
            supports_search: false,
            supports_reasoning: false,
            supports_code_completion: false,
            supports_code_analysis: false,
            supports_code_refactoring: false,
            limits: Limits::default(),
            metadata: Default::default(),
        }
    }

    fn validate_config(&self) -> ValidationResult {
        let mut messages = Vec::new();
        if self.config.api_key.trim().is_empty() {
            messages.push(format!("{}: api_key must not be empty", self.spec.provider_id));
        }
        self.config.validate_common(&mut messages);
        ValidationResult::from_messages(messages)
    }
}

fn delta_chunk(request_id: &str, provider_id: &str, content: String, confidence_base: f64) -> Response {
    Response {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        provider_id: provider_id.to_string(),
        provider_name: provider_id.to_string(),
        content,
        confidence: confidence_base,
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

fn terminal_chunk(request_id: &str, provider_id: &str, finish_reason: FinishReason) -> Response {
    Response {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        provider_id: provider_id.to_string(),
        provider_name: provider_id.to_string(),
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

    #[test]
    fn wire_finish_reason_maps_known_values() {
        assert_eq!(wire_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(wire_finish_reason(Some("length")), FinishReason::Length);
        assert_eq!(wire_finish_reason(None), FinishReason::Empty);
    }

    #[test]
    fn wire_messages_prepends_system_prompt() {
        let req = Request::new("r", "m")
            .with_prompt("be terse")
            .with_message(crate::models::Message::user("hi"));
        let messages = wire_messages(&req);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }
}
