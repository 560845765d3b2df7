//! Error types for the orchestration core.
//!
//! Two tiers, mirroring the two layers that can fail: [`ProviderError`] is
//! raised by a single adapter's HTTP/parse path; [`OrchestratorError`] is
//! raised by the wrappers that sit above it (breaker, lazy provider,
//! ensemble) and wraps a `ProviderError` whenever one escapes from an
//! adapter. Keeping them distinct lets a breaker or lazy provider attach
//! context (which provider, which admission state) without the adapter
//! needing to know it is wrapped.

use thiserror::Error;

/// Errors surfaced by a single provider adapter.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (connection reset, DNS, TLS, etc).
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream returned a non-2xx status this adapter doesn't special-case.
    #[error("upstream api error {code}: {message}")]
    Api { code: u16, message: String },

    /// Upstream returned 401 (after the one-shot auth retry already ran).
    #[error("invalid or expired api key")]
    InvalidApiKey,

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// Upstream returned 429.
    #[error("rate limited by upstream")]
    RateLimit,

    /// Upstream returned 5xx.
    #[error("upstream service unavailable")]
    ServiceUnavailable,

    #[error("request timed out")]
    Timeout,

    /// The caller's cancellation token fired before completion.
    #[error("request cancelled")]
    Cancelled,

    #[error("failed to parse upstream response: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("feature not supported by this provider: {feature}")]
    NotSupported { feature: String },
}

impl ProviderError {
    /// The HTTP status code this error was derived from, when there is one.
    /// Used by the retry classifier and by adapters reporting health.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Api { code, .. } => Some(*code),
            ProviderError::InvalidApiKey => Some(401),
            ProviderError::RateLimit => Some(429),
            ProviderError::ServiceUnavailable => Some(503),
            _ => None,
        }
    }

    /// True for errors that should never be retried regardless of status,
    /// per the retry engine's classifier (cancellation/deadline-exceeded).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderError::Cancelled | ProviderError::Timeout)
    }
}

/// Errors surfaced by the orchestration layer sitting above individual
/// adapters: the circuit breaker, the lazy provider, and the ensemble
/// executor.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("circuit breaker open for provider '{provider_id}'")]
    CircuitOpen { provider_id: String },

    #[error("circuit breaker half-open probe limit reached for provider '{provider_id}'")]
    HalfOpenRejected { provider_id: String },

    /// Returned by every delegated call on a lazy provider whose factory
    /// failed to construct the underlying adapter.
    #[error("provider '{provider_id}' not available: {cause}")]
    ProviderNotAvailable { provider_id: String, cause: String },

    #[error("ensemble requires at least one provider")]
    EnsembleEmpty,

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_status_codes() {
        assert_eq!(ProviderError::InvalidApiKey.status_code(), Some(401));
        assert_eq!(ProviderError::RateLimit.status_code(), Some(429));
        assert_eq!(ProviderError::ServiceUnavailable.status_code(), Some(503));
        assert_eq!(ProviderError::Timeout.status_code(), None);
    }

    #[test]
    fn terminal_errors_never_retry() {
        assert!(ProviderError::Cancelled.is_terminal());
        assert!(ProviderError::Timeout.is_terminal());
        assert!(!ProviderError::RateLimit.is_terminal());
    }

    #[test]
    fn orchestrator_error_wraps_provider_error() {
        let err: OrchestratorError = ProviderError::RateLimit.into();
        assert!(matches!(
            err,
            OrchestratorError::Provider(ProviderError::RateLimit)
        ));
    }
}
