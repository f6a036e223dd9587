//! End-to-end tests: the real gateway router against a stub upstream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use contract::{Envelope, SystemClock};
use gateway::{config::GatewayConfig, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

// ------------------------------------------------------------------ //
//  Stub upstream                                                      //
// ------------------------------------------------------------------ //

struct Stub {
    auth_status: u16,
    kpi_status: u16,
    kpi_body: String,
    token: String,
    auth_calls: AtomicUsize,
    seen: Mutex<Vec<HeaderMap>>,
}

impl Stub {
    fn new() -> Self {
        let exp = chrono::Utc::now().timestamp() + 3_600;
        let claims = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
        Self {
            auth_status: 200,
            kpi_status: 200,
            kpi_body: r#"{"totals":[{"occupancy_rate":82.5}]}"#.to_string(),
            token: format!("hdr.{claims}.sig"),
            auth_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    fn last_headers(&self) -> HeaderMap {
        self.seen.lock().unwrap().last().cloned().expect("no upstream kpi call")
    }

    fn kpi_calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

async fn stub_auth(State(stub): State<Arc<Stub>>, headers: HeaderMap) -> (StatusCode, String) {
    stub.auth_calls.fetch_add(1, Ordering::SeqCst);
    let basic = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(basic.starts_with("Basic "));
    let status = StatusCode::from_u16(stub.auth_status).unwrap();
    if status.is_success() {
        (status, json!({ "Token": stub.token }).to_string())
    } else {
        (status, "invalid credentials".to_string())
    }
}

async fn stub_kpi(State(stub): State<Arc<Stub>>, headers: HeaderMap) -> (StatusCode, String) {
    stub.seen.lock().unwrap().push(headers);
    (StatusCode::from_u16(stub.kpi_status).unwrap(), stub.kpi_body.clone())
}

async fn spawn_stub(stub: Arc<Stub>) -> String {
    let app = Router::new()
        .route("/ords/xapi/auth/token", post(stub_auth))
        .route("/ords/xapi/xapp/:id", get(stub_kpi))
        .route("/xapi/xapp/:id", get(stub_kpi))
        .with_state(stub);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ------------------------------------------------------------------ //
//  Helpers                                                            //
// ------------------------------------------------------------------ //

async fn gateway_for(stub: &Arc<Stub>) -> Router {
    let base = spawn_stub(stub.clone()).await;
    let cfg = GatewayConfig::from_vars(|k| (k == "MHPL_BASE_URL").then(|| base.clone()));
    let state = AppState::from_config(&cfg, reqwest::Client::new(), Arc::new(SystemClock));
    gateway::router(Arc::new(state))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn kpi(app: &Router, uri: &str) -> Envelope {
    let (status, body) = call(app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_value(body).unwrap()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //

#[tokio::test]
async fn parameters_travel_as_headers() {
    let stub = Arc::new(Stub::new());
    let app = gateway_for(&stub).await;

    let env = kpi(&app, "/api/mhpl/mhpl0007?PageSize=0&PageNumber=2&Ward=%20A%20").await;
    assert!(env.success);
    assert_eq!(env.status_from_upstream, Some(200));
    assert_eq!(env.data, Some(json!({"totals": [{"occupancy_rate": 82.5}]})));

    let h = stub.last_headers();
    let bearer = format!("Bearer {}", stub.token);
    assert_eq!(header(&h, "authorization"), Some(bearer.as_str()));
    assert_eq!(header(&h, "accept"), Some("application/json"));
    assert_eq!(header(&h, "content-type"), Some("application/json"));
    assert_eq!(header(&h, "user-agent"), Some("MHPL-Proxy/1.0"));
    assert_eq!(header(&h, "cache-control"), Some("no-store"));
    assert_eq!(header(&h, "threshold"), Some("70"));
    assert_eq!(header(&h, "ward"), Some("A"));
    assert!(header(&h, "startdate").is_some());
    assert!(header(&h, "enddate").is_some());
    assert!(h.get("pagesize").is_none());
    assert!(h.get("pagenumber").is_none());
}

#[tokio::test]
async fn token_is_acquired_once_and_reused() {
    let stub = Arc::new(Stub::new());
    let app = gateway_for(&stub).await;

    kpi(&app, "/api/mhpl/mhpl0001").await;
    kpi(&app, "/api/mhpl/mhpl0002").await;
    kpi(&app, "/api/mhpl/mhpl0010").await;

    assert_eq!(stub.auth_calls(), 1);
    assert_eq!(stub.kpi_calls(), 3);
}

#[tokio::test]
async fn unknown_endpoint_makes_no_upstream_calls() {
    let stub = Arc::new(Stub::new());
    let app = gateway_for(&stub).await;

    let env = kpi(&app, "/api/mhpl/mhplXXXX").await;
    assert!(!env.success);
    assert_eq!(env.status, 400);
    assert_eq!(env.error.as_deref(), Some("Unknown MHPL endpointId: mhplXXXX"));
    assert_eq!(stub.auth_calls(), 0);
    assert_eq!(stub.kpi_calls(), 0);
}

#[tokio::test]
async fn upstream_401_passes_through_with_diagnostics() {
    let stub = Arc::new(Stub {
        kpi_status: 401,
        kpi_body: "token expired".into(),
        ..Stub::new()
    });
    let app = gateway_for(&stub).await;

    let env = kpi(&app, "/api/mhpl/mhpl0004").await;
    assert!(!env.success);
    assert_eq!(env.status, 401);
    assert_eq!(env.status_from_upstream, Some(401));
    assert_eq!(env.raw_body.as_deref(), Some("token expired"));
    assert!(env.request_url.unwrap().ends_with("/ords/xapi/xapp/mhpl0004"));
    assert_eq!(env.request_params.unwrap()["PatCat"], "IPD,OPD");
}

#[tokio::test]
async fn other_upstream_errors_collapse_to_502() {
    let stub = Arc::new(Stub {
        kpi_status: 500,
        kpi_body: "ORA-00942".into(),
        ..Stub::new()
    });
    let app = gateway_for(&stub).await;

    let env = kpi(&app, "/api/mhpl/mhpl0005").await;
    assert_eq!(env.status, 502);
    assert_eq!(env.status_from_upstream, Some(500));
    assert_eq!(env.raw_body.as_deref(), Some("ORA-00942"));
}

#[tokio::test]
async fn non_json_body_is_wrapped() {
    let stub = Arc::new(Stub {
        kpi_body: "no rows".into(),
        ..Stub::new()
    });
    let app = gateway_for(&stub).await;

    let env = kpi(&app, "/api/mhpl/mhpl0008").await;
    assert!(env.success);
    assert_eq!(env.data, Some(json!({"raw": "no rows"})));
}

#[tokio::test]
async fn rejected_auth_is_not_cached() {
    let stub = Arc::new(Stub {
        auth_status: 401,
        ..Stub::new()
    });
    let app = gateway_for(&stub).await;

    let env = kpi(&app, "/api/mhpl/mhpl0001").await;
    assert_eq!(env.status, 500);
    assert_eq!(env.error.as_deref(), Some("Failed to obtain bearer token"));
    assert!(env.details.unwrap().contains("401"));

    kpi(&app, "/api/mhpl/mhpl0001").await;
    assert_eq!(stub.auth_calls(), 2);
    assert_eq!(stub.kpi_calls(), 0);
}

#[tokio::test]
async fn post_body_overrides_query() {
    let stub = Arc::new(Stub::new());
    let app = gateway_for(&stub).await;

    let (_, body) = call(
        &app,
        "POST",
        "/api/mhpl/mhpl0003?PatCat=OPD&Division=Dhaka",
        Some(json!({"PatCat": "IPD", "District": ["Dhaka", "Gazipur"]})),
    )
    .await;
    assert_eq!(body["success"], true);

    let h = stub.last_headers();
    assert_eq!(header(&h, "patcat"), Some("IPD"));
    assert_eq!(header(&h, "division"), Some("Dhaka"));
    assert_eq!(header(&h, "district"), Some("Dhaka,Gazipur"));
}

#[tokio::test]
async fn post_with_invalid_body_uses_query_only() {
    let stub = Arc::new(Stub::new());
    let app = gateway_for(&stub).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/mhpl/mhpl0006?InsuranceProviders=Green%20Delta")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let h = stub.last_headers();
    assert_eq!(header(&h, "insuranceproviders"), Some("Green Delta"));
}

#[tokio::test]
async fn authentication_route_reports_token_source() {
    let stub = Arc::new(Stub::new());
    let app = gateway_for(&stub).await;

    let (_, first) = call(&app, "POST", "/api/authentication", None).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["source"], "upstream");
    assert_eq!(first["token"], stub.token.as_str());
    assert!(first["expiresAtEpochMs"].as_i64().unwrap() > 0);

    let (_, second) = call(&app, "POST", "/api/authentication", None).await;
    assert_eq!(second["source"], "cache");
    assert_eq!(stub.auth_calls(), 1);

    let (_, revoked) = call(&app, "DELETE", "/api/authentication", None).await;
    assert_eq!(revoked["success"], true);

    let (_, third) = call(&app, "POST", "/api/authentication", None).await;
    assert_eq!(third["source"], "upstream");
    assert_eq!(stub.auth_calls(), 2);
}

#[tokio::test]
async fn health_and_endpoint_listing() {
    let stub = Arc::new(Stub::new());
    let app = gateway_for(&stub).await;

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (_, list) = call(&app, "GET", "/api/mhpl", None).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 10);
    assert_eq!(list[6]["id"], "mhpl0007");
    assert_eq!(list[6]["name"], "IPD Bed Occupancy");
}
