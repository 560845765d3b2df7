//! # Meridian Core
//!
//! A multi-provider LLM orchestration core: a neutral request/response
//! model, per-provider adapters, and the resilience layer wrapped around
//! them — retry with backoff, circuit breakers, background health
//! monitoring, lazy provider construction, and ensemble fan-out.
//!
//! ## Overview
//!
//! - **Neutral model** ([`models`]): `Request`/`Response` every adapter
//!   translates to and from its own wire format.
//! - **Adapters** ([`providers`]): one module per backend, all behind the
//!   same [`providers::Provider`] trait.
//! - **Retry** ([`retry`]): status/error classification plus exponential
//!   backoff with jitter, usable standalone or from inside an adapter.
//! - **Circuit breaking** ([`circuit_breaker`], [`circuit_breaker_manager`]):
//!   per-provider `Closed`/`Open`/`HalfOpen` admission control.
//! - **Health monitoring** ([`health`]): background probing with hysteresis
//!   thresholds and an aggregate cluster-health view.
//! - **Lazy construction** ([`lazy`]): defer and memoize provider
//!   construction, with bounded retries on first use.
//! - **Ensemble execution** ([`ensemble`]): fan a request out to N
//!   providers and select the most confident response.
//!
//! ## Example
//!
//! ```no_run
//! use meridian_core::models::Request;
//! use meridian_core::providers::{create_provider, ProviderConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProviderConfig::new("claude", "sk-ant-...").with_model("claude-3-5-sonnet-20241022");
//! let provider = create_provider(config)?;
//! let request = Request::new("req-1", "claude-3-5-sonnet-20241022").with_prompt("hello");
//! let response = provider.complete(&request, &CancellationToken::new()).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod circuit_breaker_manager;
pub mod common;
pub mod ensemble;
pub mod error;
pub mod health;
pub mod lazy;
pub mod models;
pub mod providers;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use circuit_breaker_manager::CircuitBreakerManager;
pub use ensemble::{run_ensemble, EnsembleResult};
pub use error::{OrchestratorError, ProviderError, Result};
pub use health::{HealthListener, HealthMonitor, HealthMonitorConfig, HealthStatus, ProviderHealth};
pub use lazy::{LazyProvider, LazyProviderConfig, LazyProviderRegistry};
pub use models::{
    Capabilities, FinishReason, Limits, Message, ModelParams, Request, Response, Role, ToolCall,
    ToolChoice, ToolDef,
};
pub use providers::{create_provider, Provider, ProviderConfig, ProviderMetrics, RateLimit, ValidationResult};
pub use retry::RetryConfig;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        let user_msg = Message::user("Hello, world!");
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.content, "Hello, world!");

        let assistant_msg = Message::assistant("Hi there!");
        assert_eq!(assistant_msg.role, Role::Assistant);

        let system_msg = Message::system("You are a helpful assistant.");
        assert_eq!(system_msg.role, Role::System);
    }

    #[test]
    fn provider_config_defaults() {
        let config = ProviderConfig::new("test-provider", "test-key");
        assert_eq!(config.name, "test-provider");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.timeout.as_secs(), 30);
        assert_eq!(config.max_retries, 3);
        assert!(config.enabled);
    }

    #[test]
    fn unknown_provider_name_is_rejected_at_the_top_level() {
        let err = create_provider(ProviderConfig::new("not-a-real-provider", "key")).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration { .. }));
    }
}
