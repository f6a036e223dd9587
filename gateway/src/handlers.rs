//! Axum HTTP handlers for the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use contract::{endpoints::ENDPOINTS, Envelope};
use serde_json::{Map, Value};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    models::{EndpointInfo, HealthResponse, TokenIssueResponse},
    AppState,
};

// ------------------------------------------------------------------ //
//  /health                                                            //
// ------------------------------------------------------------------ //

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ------------------------------------------------------------------ //
//  /api/mhpl                                                          //
// ------------------------------------------------------------------ //

/// GET /api/mhpl
pub async fn list_endpoints() -> Json<Vec<EndpointInfo>> {
    Json(
        ENDPOINTS
            .iter()
            .map(|e| EndpointInfo {
                id: e.id,
                name: e.name,
                description: e.description,
                upstream_path: e.upstream_path,
            })
            .collect(),
    )
}

/// GET /api/mhpl/:endpoint_id: parameters from the query string.
pub async fn get_kpi(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Envelope> {
    let raw = query_to_map(query);
    Json(forward(&state, &endpoint_id, raw).await)
}

/// POST /api/mhpl/:endpoint_id: query merged with a JSON object body;
/// body keys win. A missing or non-object body is ignored.
pub async fn post_kpi(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Json<Envelope> {
    let mut raw = query_to_map(query);
    match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(fields)) => raw.extend(fields),
        Ok(_) => {}
        Err(_) if body.is_empty() => {}
        Err(e) => warn!(endpoint_id = %endpoint_id, error = %e, "ignoring unparsable request body"),
    }
    Json(forward(&state, &endpoint_id, raw).await)
}

async fn forward(state: &AppState, endpoint_id: &str, raw: Map<String, Value>) -> Envelope {
    let span = info_span!("kpi_request", request_id = %Uuid::new_v4(), endpoint_id);
    async {
        let envelope = state.gateway.handle(endpoint_id, &raw).await;
        info!(success = envelope.success, status = envelope.status, "kpi request processed");
        envelope
    }
    .instrument(span)
    .await
}

fn query_to_map(query: HashMap<String, String>) -> Map<String, Value> {
    query.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
}

// ------------------------------------------------------------------ //
//  /api/authentication                                                //
// ------------------------------------------------------------------ //

/// POST /api/authentication: cached token when usable, else a fresh one.
pub async fn issue_token(State(state): State<Arc<AppState>>) -> Json<TokenIssueResponse> {
    let resp = match state.gateway.tokens().resolve().await {
        Ok((token, origin)) => {
            info!(source = ?origin, token = %token.redacted(), "token issued");
            TokenIssueResponse {
                success: true,
                token: Some(token.value),
                expires_at_epoch_ms: Some(token.expires_at_ms),
                source: Some(origin),
                error: None,
                status_from_upstream: None,
            }
        }
        Err(e) => TokenIssueResponse {
            success: false,
            token: None,
            expires_at_epoch_ms: None,
            source: None,
            status_from_upstream: e.status(),
            error: Some(e.to_string()),
        },
    };
    Json(resp)
}

/// DELETE /api/authentication: forget the cached token.
pub async fn revoke_token(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.gateway.tokens().invalidate();
    info!("cached bearer token discarded");
    Json(serde_json::json!({ "success": true }))
}
