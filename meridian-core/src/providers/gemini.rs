//! Gemini adapter, grounded on the teacher's client: plain `reqwest::Client`
//! (not the shared `HttpProviderClient`, since auth is a bare
//! `x-goog-api-key` header and the path embeds the model name), NDJSON
//! streaming rather than SSE framing.

use crate::error::ProviderError;
use crate::models::{Capabilities, FinishReason, Limits, Request, Response, Role, ToolCall};
use crate::providers::{estimate_confidence, resolve_max_tokens, Provider, ProviderConfig, StreamResult, ValidationResult};
use async_stream::stream;
use reqwest::Client;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Gemini's output token ceiling, matching `capabilities().limits.max_tokens`.
const MAX_TOKENS_CEILING: u32 = 8192;

pub struct GeminiProvider {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

#[derive(serde::Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(serde::Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(serde::Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(serde::Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(serde::Deserialize)]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

fn wire_finish_reason(value: Option<&str>) -> FinishReason {
    match value {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") => FinishReason::Safety,
        Some("RECITATION") => FinishReason::Recitation,
        _ => FinishReason::Empty,
    }
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Ok(Self { client, config, base_url })
    }

    fn build_headers(&self) -> Result<reqwest::header::HeaderMap, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Content-Type", "application/json".parse().unwrap());
        let key_value = self.config.api_key.parse().map_err(|_| ProviderError::Configuration {
            message: "api key contains invalid header characters".to_string(),
        })?;
        headers.insert("x-goog-api-key", key_value);
        for (key, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (key.parse::<reqwest::header::HeaderName>(), value.parse()) {
                headers.insert(name, value);
            }
        }
        Ok(headers)
    }

    fn to_gemini_request(&self, request: &Request) -> GeminiRequest {
        let mut contents = Vec::with_capacity(request.messages.len() + 1);
        if !request.prompt.is_empty() {
            contents.push(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: request.prompt.clone() }],
            });
        }
        for m in &request.messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System | Role::Tool => "user",
            };
            contents.push(GeminiContent {
                role: role.to_string(),
                parts: vec![GeminiPart { text: m.content.clone() }],
            });
        }

        GeminiRequest {
            contents,
            generation_config: Some(GeminiGenerationConfig {
                temperature: request.model_params.temperature,
                max_output_tokens: Some(resolve_max_tokens(request.model_params.max_tokens, MAX_TOKENS_CEILING) as i32),
                top_p: request.model_params.top_p,
            }),
        }
    }

    async fn handle_error_response(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status();
        match response.text().await {
            Ok(body) => {
                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str().map(String::from)))
                    .unwrap_or(body);
                match status.as_u16() {
                    401 => ProviderError::InvalidApiKey,
                    403 => ProviderError::Api { code: 403, message },
                    404 => ProviderError::ModelNotFound { model: "unknown".to_string() },
                    429 => ProviderError::RateLimit,
                    500..=599 => ProviderError::ServiceUnavailable,
                    code => ProviderError::Api { code, message },
                }
            }
            Err(_) => ProviderError::Api { code: status.as_u16(), message: "failed to read error body".to_string() },
        }
    }
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Result<Response, ProviderError> {
        let model = self.config.map_model(&request.model_params.model);
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        let headers = self.build_headers()?;
        let wire = self.to_gemini_request(request);
        let start = Instant::now();

        let retry_config = crate::retry::RetryConfig {
            max_retries: self.config.max_retries,
            initial_delay: self.config.retry_delay,
            ..Default::default()
        };
        let parsed: GeminiResponse =
            crate::retry::execute_with_auth_retry(&retry_config, cancel, || async {
                let resp = self.client.post(&url).headers(headers.clone()).json(&wire).send().await?;
                if !resp.status().is_success() {
                    return Err(self.handle_error_response(resp).await);
                }
                Ok(resp.json::<GeminiResponse>().await?)
            })
            .await?;

        let candidate = parsed.candidates.into_iter().next();
        let content = candidate
            .as_ref()
            .map(|c| c.content.parts.iter().map(|p| p.text.clone()).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        let finish_reason = wire_finish_reason(candidate.and_then(|c| c.finish_reason).as_deref());
        let tokens_used = parsed.usage_metadata.map(|u| u.total_token_count).unwrap_or_default();
        let confidence = estimate_confidence(0.85, finish_reason, content.len());

        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            provider_id: "gemini".to_string(),
            provider_name: "gemini".to_string(),
            content,
            confidence,
            tokens_used,
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
        let url = format!("{}/models/{model}:streamGenerateContent", self.base_url);
        let headers = self.build_headers()?;
        let wire = self.to_gemini_request(request);
        let request_id = request.id.clone();
        let cancel = cancel.clone();

        let response = self.client.post(&url).headers(headers).json(&wire).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error_response(response).await);
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
                    Err(e) => { yield Err(ProviderError::Http(e)); return; }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().trim_start_matches(',').trim_start_matches('[').trim_end_matches(']').to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<GeminiResponse>(&line) {
                        Ok(parsed) => {
                            for candidate in parsed.candidates {
                                let text = candidate.content.parts.iter().map(|p| p.text.clone()).collect::<Vec<_>>().join("");
                                if !text.is_empty() {
                                    emitted_content = true;
                                    yield Ok(chunk_response(&request_id, text));
                                }
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
        let url = format!("{}/models", self.base_url);
        let headers = self.build_headers()?;
        let response = self.client.get(&url).headers(headers).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.handle_error_response(response).await)
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported_models: vec![
                "gemini-1.5-pro".to_string(),
                "gemini-1.5-flash".to_string(),
                "gemini-1.0-pro".to_string(),
            ],
            supported_features: vec!["chat".to_string(), "streaming".to_string(), "vision".to_string()],
            supported_request_types: vec!["completion".to_string()],
            supports_streaming: true,
            supports_function_calling: false,
            supports_vision: true,
            supports_tools: false,
            supports_search: true,
            supports_reasoning: false,
            supports_code_completion: true,
            supports_code_analysis: true,
            supports_code_refactoring: false,
            limits: Limits {
                max_tokens: Some(8192),
                max_input_length: Some(1_000_000),
                max_output_length: Some(8192),
                max_concurrent_requests: None,
            },
            metadata: Default::default(),
        }
    }

    fn validate_config(&self) -> ValidationResult {
        let mut messages = Vec::new();
        if self.config.api_key.trim().is_empty() {
            messages.push("gemini: api_key must not be empty".to_string());
        }
        self.config.validate_common(&mut messages);
        ValidationResult::from_messages(messages)
    }
}

fn chunk_response(request_id: &str, content: String) -> Response {
    Response {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        provider_id: "gemini".to_string(),
        provider_name: "gemini".to_string(),
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
        provider_id: "gemini".to_string(),
        provider_name: "gemini".to_string(),
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

    fn provider() -> GeminiProvider {
        GeminiProvider::new(ProviderConfig::new("gemini", "key")).unwrap()
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let req = Request::new("r", "gemini-1.5-pro").with_message(Message::assistant("hi"));
        let wire = provider().to_gemini_request(&req);
        assert_eq!(wire.contents[0].role, "model");
    }

    #[test]
    fn system_prompt_becomes_leading_user_turn() {
        let req = Request::new("r", "gemini-1.5-pro").with_prompt("be terse");
        let wire = provider().to_gemini_request(&req);
        assert_eq!(wire.contents[0].role, "user");
        assert_eq!(wire.contents[0].parts[0].text, "be terse");
    }

    #[test]
    fn finish_reason_maps_safety_and_max_tokens() {
        assert_eq!(wire_finish_reason(Some("SAFETY")), FinishReason::Safety);
        assert_eq!(wire_finish_reason(Some("MAX_TOKENS")), FinishReason::Length);
    }
}
