//! Gateway service: HTTP front for the upstream KPI reports.
//!
//! See [`gateway::config`] for the environment it reads.

use std::sync::Arc;

use anyhow::Result;
use contract::SystemClock;
use gateway::{config::GatewayConfig, forwarder::Gateway, secrets::SecretsClient, AppState};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gateway=info".parse()?),
        )
        .json()
        .init();

    let secrets = SecretsClient::from_env(reqwest::Client::new());
    let cfg = GatewayConfig::from_env(&secrets).await;
    info!(config = ?cfg, "gateway configuration resolved");

    let http = Gateway::http_client(cfg.timeout)?;
    let state = Arc::new(AppState::from_config(&cfg, http, Arc::new(SystemClock)));

    let app = gateway::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&cfg.addr).await?;
    info!(addr = %cfg.addr, "gateway listening");

    axum::serve(listener, app).await?;

    Ok(())
}
