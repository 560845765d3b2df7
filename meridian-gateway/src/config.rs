//! TOML-backed configuration for the gateway binary.
//!
//! Grounded on the teacher's `config.rs` (`Config::load`/`validate`/
//! `apply_env_overrides` shape), narrowed to the settings this gateway
//! actually owns: server bind address, the provider fleet, and the
//! circuit-breaker/health-monitor tuning knobs. The teacher's cache,
//! routing-strategy, auth, and plugin sections have no counterpart here.

use crate::error::GatewayError;
use meridian_core::{CircuitBreakerConfig, HealthMonitorConfig, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "meridian_core::common::duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// One entry per backend to wire up; `ProviderConfig.name` selects the
    /// adapter via `meridian_core::providers::create_provider`.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub health: HealthMonitorConfig,
}

impl GatewayConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: GatewayConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = env::var("GATEWAY_PORT") {
            if let Ok(port) = port_str.parse() {
                self.server.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.server.host.is_empty() {
            return Err(GatewayError::Config {
                message: "server host must not be empty".to_string(),
            });
        }
        if self.server.port == 0 {
            return Err(GatewayError::Config {
                message: "server port must be nonzero".to_string(),
            });
        }
        if self.providers.is_empty() {
            return Err(GatewayError::Config {
                message: "at least one provider must be configured".to_string(),
            });
        }
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(GatewayError::Config {
                    message: "provider name must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_provider_list() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_a_configured_provider() {
        let mut config = GatewayConfig::default();
        config.providers.push(ProviderConfig::new("claude", "sk-test"));
        assert!(config.validate().is_ok());
    }
}
