//! Axum application wiring: one `CircuitBreakerManager`, one
//! `HealthMonitor`, one `LazyProviderRegistry`, shared behind an `AppState`
//! and exposed through two routes.
//!
//! Grounded on the teacher's `server.rs` (`AppState`/`create_server` shape,
//! `ServiceBuilder` timeout layer), with every middleware layer the teacher
//! composes here beyond timeout (CORS, auth, metrics, plugin, logging)
//! dropped — none has a counterpart in this gateway's scope.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use meridian_core::providers::{create_provider, Provider};
use meridian_core::{
    CircuitBreakerManager, HealthMonitor, HealthStatus, LazyProvider, LazyProviderConfig,
    LazyProviderRegistry, OrchestratorError, ProviderError, Request, Response,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

pub struct AppState {
    pub providers: LazyProviderRegistry,
    pub breakers: CircuitBreakerManager,
    pub health: Arc<HealthMonitor>,
}

pub async fn create_server(config: GatewayConfig) -> anyhow::Result<Router> {
    let state = Arc::new(build_state(&config));

    let app = Router::new()
        .route("/v1/complete", post(complete))
        .route("/v1/health", get(health))
        .layer(TimeoutLayer::new(config.server.request_timeout))
        .with_state(state);

    Ok(app)
}

fn build_state(config: &GatewayConfig) -> AppState {
    let providers = LazyProviderRegistry::new();
    let breakers = CircuitBreakerManager::new();
    let health = HealthMonitor::new(config.health.clone());

    for provider_config in &config.providers {
        let id = provider_config.name.clone();
        breakers.register(id.clone(), config.circuit_breaker.clone());

        match create_provider(provider_config.clone()) {
            Ok(built) => {
                let built: Arc<dyn Provider> = Arc::from(built);
                health.register_provider(id.clone(), Arc::clone(&built));
                let lazy = LazyProvider::new(id.clone(), LazyProviderConfig::default(), move || {
                    Ok(Arc::clone(&built))
                });
                providers.register(lazy);
                info!(provider = %id, "registered provider");
            }
            Err(e) => {
                warn!(provider = %id, error = %e, "provider failed to construct at startup, deferring to first request");
                let build_config = provider_config.clone();
                let lazy = LazyProvider::new(id.clone(), LazyProviderConfig::default(), move || {
                    create_provider(build_config.clone())
                        .map(|p| Arc::from(p) as Arc<dyn Provider>)
                        .map_err(Into::into)
                });
                providers.register(lazy);
            }
        }
    }

    health.start();

    AppState {
        providers,
        breakers,
        health,
    }
}

/// The lazy provider's construction failures surface as
/// `OrchestratorError::ProviderNotAvailable`; the circuit breaker only
/// understands `ProviderError`, so a not-yet-built provider is reported to
/// it as a service-unavailable failure rather than leaking the richer
/// orchestration error type across that boundary.
fn to_provider_error(err: OrchestratorError) -> ProviderError {
    match err {
        OrchestratorError::Provider(e) => e,
        _ => ProviderError::ServiceUnavailable,
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct CompleteRequest {
    pub provider: String,
    pub request: Request,
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<Response>, GatewayError> {
    let lazy = state
        .providers
        .get(&body.provider)
        .ok_or_else(|| GatewayError::UnknownProvider {
            id: body.provider.clone(),
        })?;
    let breaker = state
        .breakers
        .get(&body.provider)
        .ok_or_else(|| GatewayError::UnknownProvider {
            id: body.provider.clone(),
        })?;
    let cancel = tokio_util::sync::CancellationToken::new();

    let result = breaker
        .call(|| async { lazy.complete(&body.request, &cancel).await.map_err(to_provider_error) })
        .await;

    match &result {
        Ok(_) => state.health.record_success(&body.provider),
        Err(e) => state.health.record_failure(&body.provider, e.to_string()),
    }

    Ok(Json(result?))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    providers: Vec<ProviderHealthEntry>,
}

#[derive(Debug, Serialize)]
struct ProviderHealthEntry {
    id: String,
    status: &'static str,
    consecutive_failures: u32,
}

fn status_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
        HealthStatus::Unknown => "unknown",
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let providers = state
        .health
        .get_all_health()
        .into_iter()
        .map(|p| ProviderHealthEntry {
            id: p.provider_id.clone(),
            status: status_label(p.status),
            consecutive_failures: p.consecutive_fails,
        })
        .collect();

    Json(HealthResponse {
        status: status_label(state.health.get_aggregate_health()),
        providers,
    })
}
