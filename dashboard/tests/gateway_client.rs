//! The HTTP gateway client and the orchestrator against a stub gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use contract::{Clock, Envelope, ManualClock};
use dashboard::{
    cache::{ClientCache, MemorySnapshotStore},
    client::{FetchError, HttpGatewayClient, KpiGateway, TokenSource},
    filters::{FilterStore, GlobalFilters},
    overrides::ParamMap,
    LoadOutcome, Orchestrator,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

// 2025-03-15T12:00:00Z
const NOW: i64 = 1_742_040_000_000;

// ------------------------------------------------------------------ //
//  Stub gateway                                                       //
// ------------------------------------------------------------------ //

#[derive(Default)]
struct Stub {
    bodies: Mutex<Vec<(String, Value)>>,
    auth_calls: AtomicUsize,
}

async fn stub_kpi(
    State(stub): State<Arc<Stub>>,
    Path(endpoint_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Envelope> {
    stub.bodies.lock().unwrap().push((endpoint_id.clone(), body));
    let envelope = match endpoint_id.as_str() {
        "mhpl0007" => Envelope::ok(
            200,
            json!({"totals": {"occupancy_rate": 64, "total_beds": 80}, "alerts": {"occupancy_below_standard": "true"}}),
        ),
        "mhpl0009" => Envelope::ok(200, json!({"totals": [{"total_loss_value": 1200}]})),
        "mhpl0004" => Envelope::failure(401, "Upstream request failed").with_upstream(401, "Unauthorized", "expired"),
        _ => Envelope::failure(502, "Upstream request failed"),
    };
    Json(envelope)
}

async fn stub_auth(State(stub): State<Arc<Stub>>) -> Json<Value> {
    stub.auth_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "success": true,
        "token": "header.payload.signature",
        "expiresAtEpochMs": NOW + 3_600_000,
        "source": "upstream"
    }))
}

async fn spawn_stub(stub: Arc<Stub>) -> String {
    let app = Router::new()
        .route("/api/mhpl/:endpoint_id", post(stub_kpi))
        .route("/api/authentication", post(stub_auth))
        .with_state(stub);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base_url: &str, clock: Arc<ManualClock>) -> HttpGatewayClient {
    HttpGatewayClient::new(reqwest::Client::new(), base_url, clock)
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //

#[tokio::test]
async fn fetch_posts_params_and_returns_data() {
    let stub = Arc::new(Stub::default());
    let url = spawn_stub(stub.clone()).await;
    let gw = client(&url, Arc::new(ManualClock::new(NOW)));

    let mut params = ParamMap::new();
    params.insert("Threshold".into(), "75".into());
    let data = gw.fetch("mhpl0007", &params).await.unwrap();
    assert_eq!(data["totals"]["occupancy_rate"], 64);

    let bodies = stub.bodies.lock().unwrap();
    assert_eq!(bodies[0].0, "mhpl0007");
    assert_eq!(bodies[0].1, json!({"Threshold": "75"}));
}

#[tokio::test]
async fn failed_envelope_becomes_api_error() {
    let stub = Arc::new(Stub::default());
    let url = spawn_stub(stub).await;
    let gw = client(&url, Arc::new(ManualClock::new(NOW)));

    match gw.fetch("mhpl0004", &ParamMap::new()).await {
        Err(FetchError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Upstream request failed");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn ensure_token_reuses_the_issued_token() {
    let stub = Arc::new(Stub::default());
    let url = spawn_stub(stub.clone()).await;
    let clock = Arc::new(ManualClock::new(NOW));
    let gw = client(&url, clock.clone());

    let first = gw.ensure_token().await;
    assert_eq!(first.source, TokenSource::Generated);
    assert_eq!(first.token.as_deref(), Some("header.payload.signature"));

    let second = gw.ensure_token().await;
    assert_eq!(second.source, TokenSource::Cached);
    assert_eq!(stub.auth_calls.load(Ordering::SeqCst), 1);

    // Inside the one-minute margin the token is no longer trusted.
    clock.set(NOW + 3_600_000 - 30_000);
    assert_eq!(gw.ensure_token().await.source, TokenSource::Generated);
    assert_eq!(stub.auth_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_gateway_reports_failed_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let gw = client(&url, Arc::new(ManualClock::new(NOW)));
    let status = gw.ensure_token().await;
    assert_eq!(status.source, TokenSource::Failed);
    assert!(status.token.is_none());
    assert!(matches!(
        gw.fetch("mhpl0001", &ParamMap::new()).await,
        Err(FetchError::Transport(_))
    ));
}

#[tokio::test]
async fn full_load_over_http() {
    let stub = Arc::new(Stub::default());
    let url = spawn_stub(stub.clone()).await;
    let clock = Arc::new(ManualClock::new(NOW));
    let store = MemorySnapshotStore::new();

    let gw = Arc::new(client(&url, clock.clone()));
    let cache = ClientCache::new(Arc::new(store.clone()), clock.clone());
    let filters = Arc::new(FilterStore::loaded(GlobalFilters::for_today(clock.today())));
    let orch = Orchestrator::new(gw, cache, clock).with_filters(filters);

    let LoadOutcome::Completed(report) = orch.full_load().await else {
        panic!("load was skipped");
    };
    assert_eq!(report.succeeded, ["mhpl0007", "mhpl0009"]);
    assert_eq!(report.failed.len(), 8);

    let view = orch.view();
    let bed = view.kpis.iter().find(|k| k.id == "bed-occupancy").unwrap();
    assert_eq!(bed.value, json!("64%"));
    assert_eq!(bed.alert.as_ref().map(|a| a.threshold), Some(70.0));
    assert!(view.kpis.iter().any(|k| k.id == "medicine-waste"));
    assert!(store.get().is_some());

    let bodies = stub.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 10);
    let (_, sent) = bodies.iter().find(|(id, _)| id == "mhpl0007").unwrap();
    assert_eq!(sent["Threshold"], "70");
    assert_eq!(sent["StartDate"], "2025-03-01");
    assert_eq!(stub.auth_calls.load(Ordering::SeqCst), 1);
}
