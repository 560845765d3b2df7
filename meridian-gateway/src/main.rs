//! Gateway binary entry point.
//!
//! Grounded on the teacher's `main.rs` (clap `Args`, tracing init, config
//! load/validate, bind-and-serve sequence), narrowed to the two flags this
//! gateway actually reads.

use clap::Parser;
use meridian_gateway::{config::GatewayConfig, server::create_server};
use std::net::SocketAddr;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let config = GatewayConfig::load(&args.config)?;
    config.validate()?;

    let host = config.server.host.clone();
    let port = config.server.port;
    let app = create_server(config).await?;

    let addr = SocketAddr::new(host.parse()?, port);
    tracing::info!(%addr, "starting gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
