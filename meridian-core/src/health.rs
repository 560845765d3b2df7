//! Background health monitoring across registered providers.
//!
//! Absent from the teacher beyond the `ProviderHealth`/`HealthStatus` types
//! already declared in `providers::mod`; built fresh here, grounded on those
//! types and on the `tokio::spawn` periodic-task idiom used elsewhere in the
//! teacher's gateway crate for background loops.

use crate::providers::Provider;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Unknown
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_fails: u32,
    pub consecutive_successes: u32,
    pub latency_ms: Option<u64>,
    pub check_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

impl ProviderHealth {
    fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    #[serde(with = "crate::common::duration_serde")]
    pub check_interval: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    #[serde(with = "crate::common::duration_serde")]
    pub per_check_timeout: Duration,
    pub enabled: bool,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            per_check_timeout: Duration::from_secs(10),
            enabled: true,
        }
    }
}

#[async_trait::async_trait]
pub trait HealthListener: Send + Sync {
    async fn on_status_change(&self, provider_id: &str, from: HealthStatus, to: HealthStatus);
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    providers: DashMap<String, Arc<dyn Provider>>,
    health: DashMap<String, ProviderHealth>,
    listeners: Mutex<Vec<Arc<dyn HealthListener>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            providers: DashMap::new(),
            health: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        })
    }

    pub fn register_provider(&self, id: impl Into<String>, provider: Arc<dyn Provider>) {
        let id = id.into();
        self.providers.insert(id.clone(), provider);
        self.health
            .entry(id.clone())
            .or_insert_with(|| ProviderHealth::new(id));
    }

    pub fn unregister_provider(&self, id: &str) {
        self.providers.remove(id);
        self.health.remove(id);
    }

    pub fn add_listener(&self, listener: Arc<dyn HealthListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Start the background polling loop. A no-op if `config.enabled` is
    /// false or the loop is already running.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.check_interval);
            loop {
                interval.tick().await;
                monitor.check_all().await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn check_all(&self) {
        let ids: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        let checks = ids.into_iter().map(|id| self.check_one(id));
        futures::future::join_all(checks).await;
    }

    async fn check_one(&self, id: String) {
        let Some(provider) = self.providers.get(&id).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let start = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.config.per_check_timeout, provider.health_check())
            .await
            .unwrap_or(Err(crate::error::ProviderError::Timeout));
        let latency_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => self.apply_success(&id, Some(latency_ms)),
            Err(e) => self.apply_failure(&id, Some(latency_ms), e.to_string()),
        }
    }

    /// Manually report a successful outcome observed by the caller (e.g. a
    /// live request that happened to succeed), applying the same transition
    /// rules as a background probe.
    pub fn record_success(&self, id: &str) {
        self.apply_success(id, None);
    }

    pub fn record_failure(&self, id: &str, error: impl Into<String>) {
        self.apply_failure(id, None, error.into());
    }

    fn apply_success(&self, id: &str, latency_ms: Option<u64>) {
        let transition = {
            let mut entry = self
                .health
                .entry(id.to_string())
                .or_insert_with(|| ProviderHealth::new(id));
            let prior = entry.status;
            entry.check_count += 1;
            entry.success_count += 1;
            entry.consecutive_fails = 0;
            entry.consecutive_successes += 1;
            entry.last_check = Some(Utc::now());
            entry.last_success = Some(Utc::now());
            if let Some(ms) = latency_ms {
                entry.latency_ms = Some(ms);
            }
            if prior == HealthStatus::Unknown || entry.consecutive_successes >= self.config.healthy_threshold {
                entry.status = HealthStatus::Healthy;
            }
            if entry.status != prior {
                Some((prior, entry.status))
            } else {
                None
            }
        };
        if let Some((from, to)) = transition {
            self.notify(id, from, to);
        }
    }

    fn apply_failure(&self, id: &str, latency_ms: Option<u64>, error: String) {
        let transition = {
            let mut entry = self
                .health
                .entry(id.to_string())
                .or_insert_with(|| ProviderHealth::new(id));
            let prior = entry.status;
            entry.check_count += 1;
            entry.failure_count += 1;
            entry.consecutive_successes = 0;
            entry.consecutive_fails += 1;
            entry.last_check = Some(Utc::now());
            entry.last_error = Some(error);
            if let Some(ms) = latency_ms {
                entry.latency_ms = Some(ms);
            }
            if entry.consecutive_fails >= self.config.unhealthy_threshold {
                entry.status = HealthStatus::Unhealthy;
            } else if prior == HealthStatus::Healthy {
                entry.status = HealthStatus::Degraded;
            }
            if entry.status != prior {
                Some((prior, entry.status))
            } else {
                None
            }
        };
        if let Some((from, to)) = transition {
            self.notify(id, from, to);
        }
    }

    fn notify(&self, id: &str, from: HealthStatus, to: HealthStatus) {
        let snapshot: Vec<Arc<dyn HealthListener>> = self.listeners.lock().unwrap().clone();
        let id = id.to_string();
        for listener in snapshot {
            let id = id.clone();
            tokio::spawn(async move {
                listener.on_status_change(&id, from, to).await;
            });
        }
    }

    pub fn get_health(&self, id: &str) -> Option<ProviderHealth> {
        self.health.get(id).map(|e| e.value().clone())
    }

    pub fn get_all_health(&self) -> Vec<ProviderHealth> {
        self.health.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_healthy_providers(&self) -> Vec<String> {
        self.health
            .iter()
            .filter(|e| e.value().status == HealthStatus::Healthy)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn is_healthy(&self, id: &str) -> bool {
        self.health
            .get(id)
            .map(|e| e.value().status == HealthStatus::Healthy)
            .unwrap_or(false)
    }

    /// Synchronously probe one provider, bypassing the periodic schedule.
    pub async fn force_check(&self, id: &str) -> Option<ProviderHealth> {
        if !self.providers.contains_key(id) {
            return None;
        }
        self.check_one(id.to_string()).await;
        self.get_health(id)
    }

    pub fn get_aggregate_health(&self) -> HealthStatus {
        let statuses: Vec<HealthStatus> = self.health.iter().map(|e| e.value().status).collect();
        if statuses.is_empty() {
            return HealthStatus::Unknown;
        }
        let all_healthy = statuses.iter().all(|s| *s == HealthStatus::Healthy);
        let all_unhealthy = statuses.iter().all(|s| *s == HealthStatus::Unhealthy);
        let any_healthy = statuses.iter().any(|s| *s == HealthStatus::Healthy);
        if all_healthy {
            HealthStatus::Healthy
        } else if all_unhealthy {
            HealthStatus::Unhealthy
        } else if any_healthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            check_interval: Duration::from_secs(3600),
            healthy_threshold: 2,
            unhealthy_threshold: 1,
            per_check_timeout: Duration::from_secs(1),
            enabled: false,
        }
    }

    #[test]
    fn unknown_becomes_healthy_on_first_success() {
        let monitor = HealthMonitor::new(config());
        monitor.record_success("p1");
        assert_eq!(monitor.get_health("p1").unwrap().status, HealthStatus::Healthy);
    }

    #[test]
    fn failure_beyond_threshold_marks_unhealthy() {
        let monitor = HealthMonitor::new(HealthMonitorConfig {
            unhealthy_threshold: 1,
            ..config()
        });
        monitor.record_failure("p1", "boom");
        assert_eq!(monitor.get_health("p1").unwrap().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn healthy_provider_degrades_before_going_unhealthy() {
        let monitor = HealthMonitor::new(HealthMonitorConfig {
            unhealthy_threshold: 3,
            healthy_threshold: 1,
            ..config()
        });
        monitor.record_success("p1");
        assert_eq!(monitor.get_health("p1").unwrap().status, HealthStatus::Healthy);
        monitor.record_failure("p1", "blip");
        assert_eq!(monitor.get_health("p1").unwrap().status, HealthStatus::Degraded);
        monitor.record_failure("p1", "blip");
        monitor.record_failure("p1", "blip");
        assert_eq!(monitor.get_health("p1").unwrap().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn aggregate_health_rules() {
        let monitor = HealthMonitor::new(HealthMonitorConfig {
            unhealthy_threshold: 1,
            healthy_threshold: 1,
            ..config()
        });
        monitor.record_success("a");
        monitor.record_success("b");
        monitor.record_failure("c", "down");
        assert_eq!(monitor.get_aggregate_health(), HealthStatus::Degraded);
        assert_eq!(monitor.get_healthy_providers().len(), 2);
    }

    #[test]
    fn aggregate_health_all_healthy() {
        let monitor = HealthMonitor::new(config());
        monitor.record_success("a");
        monitor.record_success("b");
        assert_eq!(monitor.get_aggregate_health(), HealthStatus::Healthy);
    }

    #[test]
    fn aggregate_health_empty_is_unknown() {
        let monitor = HealthMonitor::new(config());
        assert_eq!(monitor.get_aggregate_health(), HealthStatus::Unknown);
    }
}
