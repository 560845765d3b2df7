//! The neutral request/response shapes every provider adapter converts
//! to and from. These are deliberately smaller than any one backend's wire
//! format: each adapter owns its own wire structs privately and translates
//! at the edge (see `providers::claude` for the clearest example).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a single turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling/shape parameters, common across every backend even though each
/// adapter maps field names differently on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
}

/// A function an adapter may offer to the model as a callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    None,
    Auto,
    Required,
    #[serde(rename = "")]
    Unset,
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice::Unset
    }
}

/// A neutral completion request. Immutable once built: adapters read it,
/// none mutate the caller's copy in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    /// System-role text, prepended by adapters ahead of `messages` per the
    /// backend's own system-message convention (or folded into the first
    /// user turn when the backend has none, e.g. Claude).
    pub prompt: String,
    pub messages: Vec<Message>,
    pub model_params: ModelParams,
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

impl Request {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: String::new(),
            messages: Vec::new(),
            model_params: ModelParams {
                model: model.into(),
                ..Default::default()
            },
            tools: Vec::new(),
            tool_choice: ToolChoice::Unset,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

/// Why a response (or stream) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Safety,
    Recitation,
    Error,
    #[serde(rename = "")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// A neutral completion response. Streaming chunks reuse this exact shape:
/// a content-bearing chunk carries only the delta in `content` with
/// `finish_reason = Empty`; the terminal chunk carries empty `content` and
/// the real finish reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub request_id: String,
    pub provider_id: String,
    pub provider_name: String,
    pub content: String,
    pub confidence: f64,
    pub tokens_used: u32,
    pub response_time_ms: u64,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub selected: bool,
    pub selection_score: f64,
}

impl Response {
    /// Clamp `confidence` into `[0, 1]`. Every adapter's confidence
    /// heuristic must route through this before returning a `Response`.
    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }

    /// A chunk is content-bearing if it carries non-empty text. Used by the
    /// circuit breaker's streaming wrap and by streaming consumers counting
    /// emitted chunks.
    pub fn is_content_bearing(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Hard request-size/throughput limits an adapter reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limits {
    pub max_tokens: Option<u32>,
    pub max_input_length: Option<u32>,
    pub max_output_length: Option<u32>,
    pub max_concurrent_requests: Option<u32>,
}

/// Static, I/O-free description of what an adapter supports. `capabilities()`
/// must never perform network access to answer this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub supported_models: Vec<String>,
    pub supported_features: Vec<String>,
    pub supported_request_types: Vec<String>,
    pub supports_streaming: bool,
    pub supports_function_calling: bool,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub supports_search: bool,
    pub supports_reasoning: bool,
    pub supports_code_completion: bool,
    pub supports_code_analysis: bool,
    pub supports_code_refactoring: bool,
    pub limits: Limits,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::system("hi").role, Role::System);
        assert_eq!(Message::assistant("hi").role, Role::Assistant);
    }

    #[test]
    fn request_builder_accumulates_messages() {
        let req = Request::new("r1", "gpt").with_message(Message::user("hi"));
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.id, "r1");
    }

    #[test]
    fn tool_choice_unset_serializes_as_empty_string() {
        let json = serde_json::to_string(&ToolChoice::Unset).unwrap();
        assert_eq!(json, "\"\"");
        let back: ToolChoice = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ToolChoice::Unset);
    }

    #[test]
    fn clamp_confidence_bounds_to_unit_interval() {
        let resp = response_fixture(1.7).clamp_confidence();
        assert_eq!(resp.confidence, 1.0);
        let resp = response_fixture(-0.3).clamp_confidence();
        assert_eq!(resp.confidence, 0.0);
    }

    #[test]
    fn content_bearing_detection() {
        let mut resp = response_fixture(0.5);
        assert!(resp.is_content_bearing());
        resp.content.clear();
        assert!(!resp.is_content_bearing());
    }

    fn response_fixture(confidence: f64) -> Response {
        Response {
            id: "x".into(),
            request_id: "r1".into(),
            provider_id: "p".into(),
            provider_name: "p".into(),
            content: "hello".into(),
            confidence,
            tokens_used: 0,
            response_time_ms: 0,
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            selected: false,
            selection_score: 0.0,
        }
    }
}
