//! Provider abstraction layer: the trait every backend adapter
//! implements, shared adapter configuration, and the factory that turns a
//! [`ProviderConfig`] into a boxed [`Provider`].
//!
//! Circuit breaking and lazy construction are intentionally *not* part of
//! this trait: they wrap a built `Provider` from the outside
//! (`circuit_breaker::CircuitBreaker::call`, `lazy::LazyProvider`) rather
//! than being implemented per adapter, so every backend gets identical
//! failure-handling semantics for free.

use crate::error::ProviderError;
pub use crate::models::Capabilities;
use crate::models::{FinishReason, Request, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod cerebras;
pub mod claude;
pub mod deepseek;
pub mod fireworks;
pub mod gemini;
pub mod http_client;
pub mod mistral;
pub mod ollama;
pub mod openai_compatible;
pub mod openrouter;
pub mod qwen;
pub mod zai;
pub mod zen;

pub type StreamResult = futures::stream::BoxStream<'static, Result<Response, ProviderError>>;

/// Interface every backend adapter implements. Adapters translate
/// [`Request`]/[`Response`] to and from their own wire format; everything
/// above this trait (retry, circuit breaking, health monitoring, lazy
/// construction, ensemble fan-out) is provider-agnostic.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier for this adapter instance, used as the key into
    /// the circuit breaker manager, health monitor and lazy registry.
    fn id(&self) -> &str;

    /// Run one non-streaming completion. `cancel` must be honored both
    /// while waiting on the network and during any internal retry
    /// backoff.
    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Result<Response, ProviderError>;

    /// Run one streaming completion. Each yielded `Response` is either a
    /// content-bearing delta (`finish_reason: Empty`) or the terminal
    /// chunk (empty `content`, the real `finish_reason`).
    async fn complete_stream(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<StreamResult, ProviderError>;

    /// Cheap liveness probe, e.g. an unauthenticated or low-cost endpoint.
    /// Used by the health monitor's periodic loop and `force_check`.
    async fn health_check(&self) -> Result<(), ProviderError>;

    /// Static capabilities. Must not perform network access.
    fn capabilities(&self) -> Capabilities;

    /// Validate that this adapter's configuration (API key present, base
    /// URL well-formed, model configured, and so on) is usable before the
    /// first request. Pure: collects every applicable reason rather than
    /// failing fast on the first one.
    fn validate_config(&self) -> ValidationResult;
}

/// Outcome of [`Provider::validate_config`]. `valid` is always
/// `messages.is_empty()`; kept as an explicit field so callers reading the
/// result don't have to re-derive it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub messages: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { valid: true, messages: Vec::new() }
    }

    pub fn from_messages(messages: Vec<String>) -> Self {
        Self { valid: messages.is_empty(), messages }
    }
}

/// Shared configuration every adapter is constructed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: Option<String>,
    /// Default model id used when a request doesn't name one; also the
    /// value `validate_config` requires to be non-blank.
    pub model: String,
    #[serde(with = "crate::common::duration_serde")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "crate::common::duration_serde")]
    pub retry_delay: Duration,
    pub rate_limit: Option<RateLimit>,
    pub model_mapping: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub enabled: bool,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: None,
            model: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            rate_limit: None,
            model_mapping: HashMap::new(),
            headers: HashMap::new(),
            enabled: true,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_model_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.model_mapping.insert(from.into(), to.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Resolve the wire model id for a request: an empty `model` falls back
    /// to this config's default, then `model_mapping` is applied on top.
    pub fn map_model(&self, model: &str) -> String {
        let effective = if model.is_empty() { self.model.as_str() } else { model };
        self.model_mapping
            .get(effective)
            .cloned()
            .unwrap_or_else(|| effective.to_string())
    }

    /// Shared checks every adapter's `validate_config` runs: non-blank
    /// `model`, and a non-blank `base_url` when one is set at all. Adapters
    /// that require an API key additionally check `api_key` themselves,
    /// since `ollama`'s local transport does not.
    fn validate_common(&self, messages: &mut Vec<String>) {
        if self.model.trim().is_empty() {
            messages.push(format!("{}: model must not be empty", self.name));
        }
        if matches!(&self.base_url, Some(base_url) if base_url.trim().is_empty()) {
            messages.push(format!("{}: base_url must not be empty when set", self.name));
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

/// Request/latency/cost counters an adapter may keep alongside the
/// health monitor's own consecutive-failure bookkeeping. Kept for
/// operational visibility; nothing in the orchestration path reads this
/// to make admission decisions.
#[derive(Debug, Clone)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub tokens_processed: u64,
    pub cost_usd: f64,
    pub rate_limit_hits: u64,
    pub last_request: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_latency_ms: 0.0,
            tokens_processed: 0,
            cost_usd: 0.0,
            rate_limit_hits: 0,
            last_request: None,
        }
    }
}

impl ProviderMetrics {
    pub fn record(&mut self, success: bool, latency_ms: u64, tokens: u32, cost: f64) {
        self.total_requests += 1;
        self.last_request = Some(chrono::Utc::now());
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        let alpha = 0.1;
        self.average_latency_ms = alpha * latency_ms as f64 + (1.0 - alpha) * self.average_latency_ms;
        self.tokens_processed += tokens as u64;
        self.cost_usd += cost;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Coarse, uncalibrated confidence estimate shared by every adapter:
/// start from `base` (0.8 for most backends, 0.85 for the stronger
/// flagship ones), adjust by `finish_reason`, and add a small bonus as
/// `content_len` crosses 100 and 500 characters. Callers must still run
/// the result through `Response::clamp_confidence`.
pub fn estimate_confidence(base: f64, finish_reason: FinishReason, content_len: usize) -> f64 {
    let mut score = base
        + match finish_reason {
            FinishReason::Stop => 0.1,
            FinishReason::Length => -0.1,
            FinishReason::ContentFilter | FinishReason::Safety => -0.3,
            FinishReason::Recitation => -0.2,
            _ => 0.0,
        };
    if content_len > 500 {
        score += 0.05;
    } else if content_len > 100 {
        score += 0.02;
    }
    score
}

/// Default `max_tokens` when a request doesn't set one, and the hard
/// ceiling adapters cap an explicit value to absent a stricter per-model
/// limit of their own.
pub const DEFAULT_MAX_TOKENS_CEILING: u32 = 4096;

/// Resolve the wire `max_tokens` for a request: missing becomes
/// [`DEFAULT_MAX_TOKENS_CEILING`], present is capped at `ceiling`.
pub fn resolve_max_tokens(requested: Option<u32>, ceiling: u32) -> u32 {
    requested.unwrap_or(DEFAULT_MAX_TOKENS_CEILING).min(ceiling)
}

/// Build the adapter named by `config.name`. Feature flags gate which
/// adapters are compiled in; a disabled or unknown name is a
/// configuration error, not a panic.
pub fn create_provider(config: ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    match config.name.as_str() {
        #[cfg(feature = "claude")]
        "claude" => Ok(Box::new(claude::ClaudeProvider::new(config)?)),
        #[cfg(feature = "deepseek")]
        "deepseek" => Ok(Box::new(deepseek::DeepSeekProvider::new(config)?)),
        #[cfg(feature = "gemini")]
        "gemini" => Ok(Box::new(gemini::GeminiProvider::new(config)?)),
        #[cfg(feature = "qwen")]
        "qwen" => Ok(Box::new(qwen::QwenProvider::new(config)?)),
        #[cfg(feature = "mistral")]
        "mistral" => Ok(Box::new(mistral::MistralProvider::new(config)?)),
        #[cfg(feature = "cerebras")]
        "cerebras" => Ok(Box::new(cerebras::CerebrasProvider::new(config)?)),
        #[cfg(feature = "fireworks")]
        "fireworks" => Ok(Box::new(fireworks::FireworksProvider::new(config)?)),
        #[cfg(feature = "openrouter")]
        "openrouter" => Ok(Box::new(openrouter::OpenRouterProvider::new(config)?)),
        #[cfg(feature = "ollama")]
        "ollama" => Ok(Box::new(ollama::OllamaProvider::new(config)?)),
        #[cfg(feature = "zen")]
        "zen" => Ok(Box::new(zen::ZenProvider::new(config)?)),
        #[cfg(feature = "zai")]
        "zai" => Ok(Box::new(zai::ZaiProvider::new(config)?)),
        other => Err(ProviderError::Configuration {
            message: format!("unknown or disabled provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_mapping_falls_back_to_identity() {
        let config = ProviderConfig::new("claude", "key").with_model_mapping("gpt-4", "claude-3-opus");
        assert_eq!(config.map_model("gpt-4"), "claude-3-opus");
        assert_eq!(config.map_model("unmapped"), "unmapped");
    }

    #[test]
    fn unknown_provider_name_is_a_configuration_error() {
        let err = create_provider(ProviderConfig::new("not-a-real-provider", "key")).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration { .. }));
    }

    #[test]
    fn metrics_success_rate_defaults_to_one_with_no_requests() {
        assert_eq!(ProviderMetrics::default().success_rate(), 1.0);
    }

    #[test]
    fn confidence_heuristic_applies_finish_reason_and_length_bonus() {
        let base = estimate_confidence(0.8, FinishReason::Stop, 10);
        assert!((base - 0.9).abs() < 1e-9);
        let long = estimate_confidence(0.8, FinishReason::Stop, 600);
        assert!((long - 0.95).abs() < 1e-9);
        let filtered = estimate_confidence(0.8, FinishReason::ContentFilter, 10);
        assert!((filtered - 0.5).abs() < 1e-9);
    }
}
