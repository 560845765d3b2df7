//! Integration coverage for the health route, exercised over a real HTTP
//! stack via `axum-test` rather than calling the handler function directly.

use axum_test::TestServer;
use meridian_core::ProviderConfig;
use meridian_gateway::config::GatewayConfig;
use meridian_gateway::server::create_server;

fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.providers.push(ProviderConfig::new("claude", "sk-test-key"));
    config
}

#[tokio::test]
async fn health_endpoint_reports_configured_providers() {
    let app = create_server(test_config()).await.unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server.get("/v1/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body["status"].is_string());
    let providers = body["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["id"], "claude");
}

#[tokio::test]
async fn complete_rejects_an_unknown_provider() {
    let app = create_server(test_config()).await.unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server
        .post("/v1/complete")
        .json(&serde_json::json!({
            "provider": "not-registered",
            "request": {
                "id": "r1",
                "prompt": "",
                "messages": [{"role": "user", "content": "hi"}],
                "model_params": {"model": "claude-3-5-sonnet-20241022"},
                "tools": [],
            }
        }))
        .await;

    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}
