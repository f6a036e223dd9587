//! Integration gateway for the upstream hospital KPI service.
//!
//! Acquires and caches one bearer token per process, normalizes and
//! defaults per-endpoint parameters, forwards them as request headers and
//! folds every outcome into a uniform [`contract::Envelope`].

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod forwarder;
pub mod handlers;
pub mod models;
pub mod params;
pub mod secrets;
pub mod token;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use contract::Clock;

use crate::{
    auth::UpstreamAuth,
    config::GatewayConfig,
    forwarder::Gateway,
    token::{TokenCache, TokenProvider, TokenSource},
};

// ------------------------------------------------------------------ //
//  Shared application state                                           //
// ------------------------------------------------------------------ //

/// Shared state injected into every Axum handler via `State`.
pub struct AppState {
    pub gateway: Gateway,
}

impl AppState {
    /// Wire the real upstream auth client behind the token cache.
    pub fn from_config(
        cfg: &GatewayConfig,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let source = UpstreamAuth::new(
            http.clone(),
            cfg.base_url.clone(),
            cfg.username.clone(),
            cfg.password.clone(),
        );
        Self::with_source(cfg, http, clock, Arc::new(source))
    }

    /// Same wiring with any token source.
    pub fn with_source(
        cfg: &GatewayConfig,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
        source: Arc<dyn TokenSource>,
    ) -> Self {
        let tokens = Arc::new(TokenProvider::new(TokenCache::new(clock.clone()), source));
        Self {
            gateway: Gateway::new(http, cfg.base_url.clone(), cfg.user_agent.clone(), tokens, clock),
        }
    }
}

/// All gateway routes. Layers (trace, CORS) are added by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/mhpl", get(handlers::list_endpoints))
        .route(
            "/api/mhpl/:endpoint_id",
            get(handlers::get_kpi).post(handlers::post_kpi),
        )
        .route(
            "/api/authentication",
            post(handlers::issue_token).delete(handlers::revoke_token),
        )
        .with_state(state)
}
