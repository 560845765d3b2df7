//! Gateway-level error type and its HTTP response mapping.
//!
//! Grounded on the teacher's `gateway_error.rs::GatewayError`, narrowed to
//! the variants this gateway can actually produce: the two-tier
//! `meridian_core` error plus a handful of gateway-local conditions
//! (configuration, routing with no available provider).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use meridian_core::OrchestratorError;
use meridian_core::ProviderError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("orchestration error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("no provider configured with id {id}")]
    UnknownProvider { id: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            GatewayError::Orchestrator(OrchestratorError::Provider(e)) => provider_status(e),
            GatewayError::Orchestrator(OrchestratorError::CircuitOpen { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "circuit_open")
            }
            GatewayError::Orchestrator(OrchestratorError::HalfOpenRejected { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "half_open_rejected")
            }
            GatewayError::Orchestrator(OrchestratorError::ProviderNotAvailable { .. }) => {
                (StatusCode::NOT_FOUND, "provider_not_available")
            }
            GatewayError::Orchestrator(OrchestratorError::EnsembleEmpty) => {
                (StatusCode::BAD_REQUEST, "ensemble_empty")
            }
            GatewayError::Orchestrator(OrchestratorError::InvalidRequest { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            GatewayError::Orchestrator(OrchestratorError::Configuration { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            GatewayError::Provider(e) => provider_status(e),
            GatewayError::UnknownProvider { .. } => (StatusCode::NOT_FOUND, "unknown_provider"),
            GatewayError::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

fn provider_status(err: &ProviderError) -> (StatusCode, &'static str) {
    match err {
        ProviderError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
        ProviderError::RateLimit => (StatusCode::TOO_MANY_REQUESTS, "rate_limit"),
        ProviderError::ModelNotFound { .. } => (StatusCode::NOT_FOUND, "model_not_found"),
        ProviderError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
        ProviderError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        ProviderError::Cancelled => (StatusCode::INTERNAL_SERVER_ERROR, "cancelled"),
        ProviderError::Configuration { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        ProviderError::Api { code, .. } => (
            StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY),
            "upstream_api_error",
        ),
        _ => (StatusCode::BAD_GATEWAY, "provider_error"),
    }
}
