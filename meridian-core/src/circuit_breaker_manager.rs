//! Registry of per-provider circuit breakers.
//!
//! The teacher has no equivalent of this; grounded on
//! `flyingrobots-ninelives`'s `circuit_breaker_registry.rs` for the
//! register/get/stats-aggregation shape, layered over this crate's own
//! [`CircuitBreaker`].

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    /// Register a breaker for `provider_id`. Replaces any existing breaker
    /// registered under the same id.
    pub fn register(&self, provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let provider_id = provider_id.into();
        let breaker = Arc::new(CircuitBreaker::new(provider_id.clone(), config));
        self.breakers.insert(provider_id, Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(provider_id).map(|e| Arc::clone(e.value()))
    }

    pub fn unregister(&self, provider_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(provider_id).map(|(_, v)| v)
    }

    pub fn get_all_stats(&self) -> Vec<CircuitStats> {
        self.breakers.iter().map(|e| e.value().stats()).collect()
    }

    /// Ids of providers whose breaker is `Closed` or `HalfOpen` — callers
    /// may attempt these; `Open` breakers are excluded.
    pub fn get_available_providers(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|e| !matches!(e.value().state(), CircuitState::Open))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn register_and_get_round_trips() {
        let manager = CircuitBreakerManager::new();
        manager.register("claude", CircuitBreakerConfig::default());
        assert!(manager.get("claude").is_some());
        assert!(manager.get("missing").is_none());
    }

    #[tokio::test]
    async fn available_providers_excludes_open_breakers() {
        let manager = CircuitBreakerManager::new();
        let healthy = manager.register("healthy", CircuitBreakerConfig::default());
        let failing = manager.register(
            "failing",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        let _ = healthy.call(|| async { Ok::<_, ProviderError>(()) }).await;
        let _ = failing
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;

        let available = manager.get_available_providers();
        assert!(available.contains(&"healthy".to_string()));
        assert!(!available.contains(&"failing".to_string()));
    }

    #[tokio::test]
    async fn reset_all_closes_every_breaker() {
        let manager = CircuitBreakerManager::new();
        let breaker = manager.register(
            "flaky",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        let _ = breaker
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        manager.reset_all();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn unregister_removes_breaker() {
        let manager = CircuitBreakerManager::new();
        manager.register("gone", CircuitBreakerConfig::default());
        assert!(manager.unregister("gone").is_some());
        assert!(manager.get("gone").is_none());
    }
}
