//! Ollama adapter: talks to a local daemon with no auth, its own
//! `/api/chat` wire shape, and newline-delimited JSON streaming (each
//! line a whole JSON object, not an SSE `data: ` frame).

use crate::error::ProviderError;
use crate::models::{Capabilities, FinishReason, Limits, Request, Response, Role};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{
    estimate_confidence, resolve_max_tokens, Provider, ProviderConfig, StreamResult, ValidationResult,
    DEFAULT_MAX_TOKENS_CEILING,
};
use async_stream::stream;
use serde_json::json;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct OllamaProvider {
    http: HttpProviderClient,
    config: ProviderConfig,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "user",
    }
}

fn wire_messages(request: &Request) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.prompt.is_empty() {
        messages.push(json!({ "role": "system", "content": request.prompt }));
    }
    for m in &request.messages {
        messages.push(json!({ "role": wire_role(m.role), "content": m.content }));
    }
    messages
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            "http://localhost:11434",
            &config.headers,
            AuthStrategy::None,
        )?;
        Ok(Self { http, config })
    }
}

#[async_trait::async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Result<Response, ProviderError> {
        let model = self.config.map_model(&request.model_params.model);
        let wire = json!({
            "model": model,
            "messages": wire_messages(request),
            "stream": false,
            "options": {
                "temperature": request.model_params.temperature.unwrap_or(0.7),
                "num_predict": resolve_max_tokens(request.model_params.max_tokens, DEFAULT_MAX_TOKENS_CEILING),
            }
        });
        let start = Instant::now();

        let retry_config = crate::retry::RetryConfig {
            max_retries: self.config.max_retries,
            initial_delay: self.config.retry_delay,
            ..Default::default()
        };
        let body: serde_json::Value = crate::retry::execute(&retry_config, cancel, || async {
            self.http.post_json("/api/chat", &wire).await
        })
        .await?;

        let content = body["message"]["content"].as_str().unwrap_or_default().to_string();
        let done = body["done"].as_bool().unwrap_or(true);
        let finish_reason = if done { FinishReason::Stop } else { FinishReason::Empty };
        let prompt_tokens = body["prompt_eval_count"].as_u64().unwrap_or(0);
        let eval_tokens = body["eval_count"].as_u64().unwrap_or(0);
        let confidence = estimate_confidence(0.8, finish_reason, content.len());

        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            provider_id: "ollama".to_string(),
            provider_name: "ollama".to_string(),
            content,
            confidence,
            tokens_used: (prompt_tokens + eval_tokens) as u32,
            response_time_ms: start.elapsed().as_millis() as u64,
            finish_reason,
            tool_calls: Vec::new(),
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
        let wire = json!({
            "model": model,
            "messages": wire_messages(request),
            "stream": true,
            "options": {
                "temperature": request.model_params.temperature.unwrap_or(0.7),
                "num_predict": resolve_max_tokens(request.model_params.max_tokens, DEFAULT_MAX_TOKENS_CEILING),
            }
        });
        let request_id = request.id.clone();
        let cancel = cancel.clone();

        let response = self.http.post_json_raw("/api/chat", &wire).await?;
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
                    Err(e) => { yield Err(ProviderError::Http(e)); return; }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&line) else { continue };
                    if let Some(content) = parsed["message"]["content"].as_str() {
                        if !content.is_empty() {
                            emitted_content = true;
                            yield Ok(delta_response(&request_id, content.to_string()));
                        }
                    }
                    if parsed["done"].as_bool().unwrap_or(false) {
                        let finish_reason = if emitted_content { FinishReason::Stop } else { FinishReason::Empty };
                        yield Ok(terminal_response(&request_id, finish_reason));
                        return;
                    }
                }
            }
            let finish_reason = if emitted_content { FinishReason::Stop } else { FinishReason::Empty };
            yield Ok(terminal_response(&request_id, finish_reason));
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.http.get_ok("/api/tags").await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported_models: vec!["llama2".to_string(), "llama2:70b".to_string(), "codellama".to_string(), "mistral".to_string()],
            supported_features: vec!["chat".to_string(), "streaming".to_string()],
            supported_request_types: vec!["completion".to_string()],
            supports_streaming: true,
            supports_function_calling: false,
            supports_vision: false,
            supports_tools: false,
            supports_search: false,
            supports_reasoning: false,
            supports_code_completion: true,
            supports_code_analysis: false,
            supports_code_refactoring: false,
            limits: Limits::default(),
            metadata: Default::default(),
        }
    }

    fn validate_config(&self) -> ValidationResult {
        let mut messages = Vec::new();
        self.config.validate_common(&mut messages);
        ValidationResult::from_messages(messages)
    }
}

fn delta_response(request_id: &str, content: String) -> Response {
    Response {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        provider_id: "ollama".to_string(),
        provider_name: "ollama".to_string(),
        content,
        confidence: 0.8,
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
        provider_id: "ollama".to_string(),
        provider_name: "ollama".to_string(),
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
    fn validate_config_never_requires_an_api_key() {
        let provider = OllamaProvider::new(ProviderConfig::new("ollama", "").with_model("llama2")).unwrap();
        assert!(provider.validate_config().valid);
    }

    #[test]
    fn validate_config_rejects_missing_model() {
        let provider = OllamaProvider::new(ProviderConfig::new("ollama", "")).unwrap();
        let result = provider.validate_config();
        assert!(!result.valid);
        assert!(result.messages.iter().any(|m| m.contains("model")));
    }

    #[test]
    fn wire_messages_maps_tool_role_to_user() {
        let req = Request::new("r", "llama2").with_message(crate::models::Message {
            role: Role::Tool,
            content: "result".to_string(),
        });
        let messages = wire_messages(&req);
        assert_eq!(messages[0]["role"], "user");
    }
}
