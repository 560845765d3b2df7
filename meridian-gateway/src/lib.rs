//! Composition root wiring `meridian-core` providers behind a small HTTP
//! surface: one configured set of backends, fronted by circuit breaking,
//! lazy construction, and background health monitoring, exposed as
//! `POST /v1/complete` and `GET /v1/health`. No dashboard, no websocket
//! push, no plugin pipeline, no JWT auth — those are the teacher's
//! gateway-specific surfaces and have no counterpart here.
//!
//! ```no_run
//! use meridian_gateway::config::GatewayConfig;
//! use meridian_gateway::server::create_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::load("config.toml")?;
//!     config.validate()?;
//!     let app = create_server(config).await?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::{create_server, AppState};
