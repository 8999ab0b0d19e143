//! Payment-gated tiered access gateway HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p rtap-gateway --release
//!
//! # Run with custom config path
//! cargo run -p rtap-gateway -- --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p rtap-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `8402`)
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::Method;
use clap::Parser;
use rtap::store::TokenStore;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use rtap_gateway::config::GatewayConfig;
use rtap_gateway::handlers::{GatewayState, gateway_router};
use rtap_gateway::sweeper::spawn_sweeper;
use rtap_gateway::util::SigDown;

/// Payment-gated tiered access gateway.
#[derive(Parser, Debug)]
#[command(name = "rtap-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing with RUST_LOG env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("Gateway failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load_from(&cli.config)?;
    let table = Arc::new(config.tier_table()?);
    let registry = Arc::new(config.registry(Arc::clone(&table))?);
    tracing::info!(
        host = %config.host,
        port = config.port,
        tiers = table.len(),
        endpoints = registry.endpoints().len(),
        "Loaded configuration"
    );
    if registry.endpoints().is_empty() {
        tracing::warn!("No endpoints configured, /gateway will answer 404");
    }

    let store = Arc::new(TokenStore::new(config.store.capacity));
    let mut state = GatewayState::new(
        Arc::clone(&table),
        Arc::clone(&store),
        registry,
        config.upstream_proxy(),
    );
    match config.settlement_client()? {
        Some(client) => {
            let reject_unknown = config.settlement.as_ref().is_some_and(|s| s.reject_unknown);
            tracing::info!(
                url = %client.validate_url(),
                reject_unknown,
                "Using remote settlement verification"
            );
            state = state.with_verifier(Arc::new(client), reject_unknown);
        }
        None => {
            tracing::warn!("No settlement service configured, payments are checked against policy only");
        }
    }

    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();
    let sweeper = spawn_sweeper(
        Arc::clone(&store),
        Duration::from_secs(config.store.sweep_interval_secs),
        shutdown.clone(),
    );

    let app = Router::new()
        .merge(gateway_router(Arc::new(state)))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    sig_down.recv().await;
    sweeper.await?;
    tracing::info!("Gateway shut down gracefully");
    Ok(())
}
