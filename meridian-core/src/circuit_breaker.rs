//! A per-provider circuit breaker: a three-state admission gate with
//! failure accounting, listener notifications, and a streaming-aware
//! success/failure rule.
//!
//! Grounded on the teacher's `CircuitBreaker` (same `Arc<RwLock<state>>`
//! shape, same `call()` wrapper idea) but closing `HalfOpen -> Closed`
//! requires `success_threshold` *consecutive* successes rather than a
//! single one, and adds the listener/manager/streaming pieces the teacher
//! never had.

use crate::common::UNASSIGNED_LISTENER_ID;
use crate::error::{OrchestratorError, ProviderError};
use crate::providers::StreamResult;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const DEFAULT_LISTENER_CAP: usize = 100;
const LISTENER_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(with = "crate::common::duration_serde")]
    pub open_timeout: Duration,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStats {
    pub provider_id: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
}

/// Notified, out-of-band, whenever a breaker transitions state.
#[async_trait::async_trait]
pub trait CircuitBreakerListener: Send + Sync {
    async fn on_state_change(&self, provider_id: &str, from: CircuitState, to: CircuitState);
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    last_failure: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    half_open_admitted: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            last_failure: None,
            last_failure_wall: None,
            last_state_change: Utc::now(),
            half_open_admitted: 0,
        }
    }
}

pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    listeners: RwLock<HashMap<u64, Arc<dyn CircuitBreakerListener>>>,
    next_listener_id: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            inner: RwLock::new(Inner::new()),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().unwrap().state
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.read().unwrap();
        CircuitStats {
            provider_id: self.provider_id.clone(),
            state: inner.state,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            consecutive_successes: inner.consecutive_successes,
            consecutive_failures: inner.consecutive_failures,
            last_failure: inner.last_failure_wall,
            last_state_change: inner.last_state_change,
        }
    }

    /// Add a listener. Returns `UNASSIGNED_LISTENER_ID` (0) once the
    /// listener cap (~100) is reached instead of growing unbounded.
    pub fn add_listener(&self, listener: Arc<dyn CircuitBreakerListener>) -> u64 {
        let mut listeners = self.listeners.write().unwrap();
        if listeners.len() >= DEFAULT_LISTENER_CAP {
            return UNASSIGNED_LISTENER_ID;
        }
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        listeners.insert(id, listener);
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.listeners.write().unwrap().remove(&id);
    }

    /// Admission check and any state mutation it implies (Open -> HalfOpen
    /// after the timeout, admitting one probe) happen here, under the same
    /// exclusive section.
    fn try_acquire(&self) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write().unwrap();
        inner.total_requests += 1;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.open_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_admitted = 1;
                    Ok(())
                } else {
                    Err(OrchestratorError::CircuitOpen {
                        provider_id: self.provider_id.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < self.config.half_open_max_requests {
                    inner.half_open_admitted += 1;
                    Ok(())
                } else {
                    Err(OrchestratorError::HalfOpenRejected {
                        provider_id: self.provider_id.clone(),
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.write().unwrap();
            inner.total_successes += 1;
            inner.consecutive_failures = 0;
            match inner.state {
                CircuitState::Closed => None,
                CircuitState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        let from = inner.state;
                        self.transition(&mut inner, CircuitState::Closed);
                        inner.consecutive_failures = 0;
                        inner.consecutive_successes = 0;
                        Some((from, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };
        if let Some((from, to)) = transition {
            self.notify_listeners(from, to);
        }
    }

    fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.write().unwrap();
            inner.total_failures += 1;
            inner.consecutive_successes = 0;
            inner.consecutive_failures += 1;
            inner.last_failure = Some(Instant::now());
            inner.last_failure_wall = Some(Utc::now());
            match inner.state {
                CircuitState::Closed => {
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        let from = inner.state;
                        self.transition(&mut inner, CircuitState::Open);
                        Some((from, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    let from = inner.state;
                    self.transition(&mut inner, CircuitState::Open);
                    inner.consecutive_successes = 0;
                    Some((from, CircuitState::Open))
                }
                CircuitState::Open => None,
            }
        };
        if let Some((from, to)) = transition {
            self.notify_listeners(from, to);
        }
    }

    /// Caller must already hold the write lock; only updates the state and
    /// timestamp fields, never the counters (those are the caller's job so
    /// the semantics of each transition stay in one place above).
    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        inner.state = to;
        inner.last_state_change = Utc::now();
    }

    fn notify_listeners(&self, from: CircuitState, to: CircuitState) {
        let snapshot: Vec<Arc<dyn CircuitBreakerListener>> =
            self.listeners.read().unwrap().values().cloned().collect();
        let provider_id = self.provider_id.clone();
        for listener in snapshot {
            let provider_id = provider_id.clone();
            tokio::spawn(async move {
                let fut = listener.on_state_change(&provider_id, from, to);
                if tokio::time::timeout(LISTENER_NOTIFY_TIMEOUT, fut)
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        provider_id = %provider_id,
                        "circuit breaker listener notification timed out, abandoning"
                    );
                }
            });
        }
    }

    /// Force the breaker back to `Closed` with zeroed counters, regardless
    /// of prior state.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.write().unwrap();
            let from = inner.state;
            *inner = Inner::new();
            if from != CircuitState::Closed {
                Some((from, CircuitState::Closed))
            } else {
                None
            }
        };
        if let Some((from, to)) = transition {
            self.notify_listeners(from, to);
        }
    }

    /// Gate a single-shot completion through the breaker.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err.into())
            }
        }
    }
}

impl CircuitBreaker {
    /// Gate a streaming completion through the breaker. The admission gate
    /// is consulted before the sequence handle is returned; the wrapper
    /// then observes the sequence and records success iff at least one
    /// content-bearing chunk was produced and the stream ended without
    /// error, otherwise records failure.
    pub async fn call_stream<F, Fut>(
        self: &Arc<Self>,
        operation: F,
    ) -> Result<StreamResult, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StreamResult, ProviderError>>,
    {
        self.try_acquire()?;
        let inner_stream = match operation().await {
            Ok(s) => s,
            Err(err) => {
                self.record_failure();
                return Err(err.into());
            }
        };

        let breaker = Arc::clone(self);
        let wrapped = async_stream::stream! {
            let mut saw_content = false;
            let mut saw_error = false;
            futures::pin_mut!(inner_stream);
            while let Some(item) = inner_stream.next().await {
                match &item {
                    Ok(resp) => {
                        if resp.is_content_bearing() {
                            saw_content = true;
                        }
                    }
                    Err(_) => saw_error = true,
                }
                yield item;
            }
            if saw_content && !saw_error {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        };

        Ok(Box::pin(wrapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test-provider", config)
    }

    #[tokio::test]
    async fn closed_breaker_passes_through() {
        let b = breaker(CircuitBreakerConfig::default());
        let result = b.call(|| async { Ok::<_, ProviderError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_consecutive_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let b = breaker(config);
        for _ in 0..2 {
            let _ = b
                .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
                .await;
            assert_eq!(b.state(), CircuitState::Closed);
        }
        let _ = b
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_invoking_provider() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let b = breaker(config);
        let _ = b
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        assert_eq!(b.state(), CircuitState::Open);

        let mut invoked = false;
        let result = b
            .call(|| {
                invoked = true;
                async { Ok::<_, ProviderError>(()) }
            })
            .await;
        assert!(!invoked);
        assert!(matches!(result, Err(OrchestratorError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_requires_consecutive_successes_to_close() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            open_timeout: Duration::from_millis(1),
            half_open_max_requests: 5,
        };
        let b = breaker(config);
        let _ = b
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;

        let _ = b.call(|| async { Ok::<_, ProviderError>(()) }).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let _ = b.call(|| async { Ok::<_, ProviderError>(()) }).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            open_timeout: Duration::from_millis(1),
            half_open_max_requests: 5,
        };
        let b = breaker(config);
        let _ = b
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = b.call(|| async { Ok::<_, ProviderError>(()) }).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let _ = b
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_rejects_beyond_max_requests() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 10,
            open_timeout: Duration::from_millis(1),
            half_open_max_requests: 1,
        };
        let b = breaker(config);
        let _ = b
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // first admission transitions to half-open and consumes the single slot
        let _ = b.call(|| async { Ok::<_, ProviderError>(()) }).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let result = b.call(|| async { Ok::<_, ProviderError>(()) }).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::HalfOpenRejected { .. })
        ));
    }

    #[tokio::test]
    async fn reset_returns_to_closed_with_zeroed_counters() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let b = breaker(config);
        let _ = b
            .call(|| async { Err::<(), _>(ProviderError::ServiceUnavailable) })
            .await;
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        let stats = b.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.total_failures, 0);
    }

    #[test]
    fn listener_cap_returns_unassigned_sentinel() {
        struct Noop;
        #[async_trait::async_trait]
        impl CircuitBreakerListener for Noop {
            async fn on_state_change(&self, _: &str, _: CircuitState, _: CircuitState) {}
        }
        let b = breaker(CircuitBreakerConfig::default());
        for _ in 0..DEFAULT_LISTENER_CAP {
            let id = b.add_listener(Arc::new(Noop));
            assert_ne!(id, UNASSIGNED_LISTENER_ID);
        }
        let overflow_id = b.add_listener(Arc::new(Noop));
        assert_eq!(overflow_id, UNASSIGNED_LISTENER_ID);
    }
}
