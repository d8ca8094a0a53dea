//! In-process stand-in for the remote API, served by axum on an ephemeral port.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use encephalon_rs::{Config, EncephalonClient};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const TOKEN: &str = "test-token";
pub const REPORT_UUID: &str = "report-1";
pub const DICOM_CONTENT: &[u8] = b"DICM fake pixel data";

#[derive(Default)]
pub struct MockState {
    /// Statuses returned by successive scan fetches, the last one repeats.
    pub scan_script: Mutex<VecDeque<&'static str>>,
    pub scan_fetches: AtomicUsize,
    pub failure_state: Mutex<Option<String>>,
    /// Report fetches answered 503 before a report is served.
    pub report_failures: AtomicUsize,
    pub report_fetches: AtomicUsize,
    /// `(path and query, Authorization header)` of every request.
    pub requests: Mutex<Vec<(String, String)>>,
    pub webhooks: Mutex<Vec<Value>>,
    pub webhooks_created: AtomicUsize,
    pub uploads: Mutex<Vec<Bytes>>,
}

impl MockState {
    pub fn with_script(statuses: &[&'static str]) -> Self {
        MockState {
            scan_script: Mutex::new(statuses.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn with_webhooks(urls: &[&str]) -> Self {
        let state = MockState::default();
        *state.webhooks.lock().unwrap() = urls.iter().map(|url| webhook_json(url)).collect();
        state
    }

    fn record(&self, uri: &Uri, headers: &HeaderMap) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let path = uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        self.requests.lock().unwrap().push((path, authorization));
    }

    /// Authorization header sent with the first request whose path starts with `prefix`.
    pub fn authorization_for(&self, prefix: &str) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| path.starts_with(prefix))
            .map(|(_, authorization)| authorization.clone())
    }

    pub fn fetches(&self) -> usize {
        self.scan_fetches.load(Ordering::SeqCst)
    }

    fn next_status(&self) -> &'static str {
        let mut script = self.scan_script.lock().unwrap();
        match script.len() {
            0 => "PENDING",
            1 => script[0],
            _ => script.pop_front().unwrap_or("PENDING"),
        }
    }
}

fn webhook_json(url: &str) -> Value {
    json!({
        "uuid": uuid::Uuid::new_v4().to_string(),
        "url": url,
        "token": "whsec-1",
        "created_at": "2024-05-02T10:00:00Z",
        "is_active": true,
    })
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found." }))).into_response()
}

async fn list_studies(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(&uri, &headers);
    Json(json!({ "count": 0, "next": null, "previous": null, "results": [] }))
}

async fn create_study(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record(&uri, &headers);
    body["uuid"] = json!(uuid::Uuid::new_v4().to_string());
    (StatusCode::CREATED, Json(body))
}

async fn get_study(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.record(&uri, &headers);
    if id == "missing" {
        return not_found();
    }
    Json(json!({ "uuid": id, "name": "John Doe", "age": 45 })).into_response()
}

async fn upload_dicom(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    state.record(&uri, &headers);
    state.uploads.lock().unwrap().push(body);
    (
        StatusCode::CREATED,
        Json(json!({ "uuid": uuid::Uuid::new_v4().to_string(), "name": "plax.dcm" })),
    )
}

async fn download_dicom(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Path((_uuid, _filename)): Path<(String, String)>,
) -> Vec<u8> {
    state.record(&uri, &headers);
    DICOM_CONTENT.to_vec()
}

async fn create_scan(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record(&uri, &headers);
    let study = body["study"].as_str().unwrap_or_default().to_string();
    if study == "empty-study" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Study has no DICOM file" })),
        )
            .into_response();
    }
    let product = body.get("product").cloned().unwrap_or(json!("ECHOMEASURE"));
    (
        StatusCode::CREATED,
        Json(json!({
            "uuid": uuid::Uuid::new_v4().to_string(),
            "study": study,
            "product": product,
            "status": "PENDING",
            "report": null,
            "number_of_available_dicoms": 4,
            "number_of_dicoms_scanned": 0,
        })),
    )
        .into_response()
}

async fn get_scan(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Json<Value> {
    state.record(&uri, &headers);
    state.scan_fetches.fetch_add(1, Ordering::SeqCst);
    let status = state.next_status();
    let scanned = match status {
        "PENDING" => 0,
        "STARTED" => 2,
        _ => 4,
    };
    let report = match status {
        "COMPLETED" => json!(REPORT_UUID),
        _ => Value::Null,
    };
    let failure_state = match status {
        "FAILED" => json!(state.failure_state.lock().unwrap().clone()),
        _ => Value::Null,
    };
    Json(json!({
        "uuid": id,
        "study": "study-1",
        "product": "ECHOMEASURE",
        "status": status,
        "report": report,
        "number_of_available_dicoms": 4,
        "number_of_dicoms_scanned": scanned,
        "state": failure_state,
    }))
}

async fn get_report(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.record(&uri, &headers);
    state.report_fetches.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .report_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::SERVICE_UNAVAILABLE, "report not ready").into_response();
    }
    if id != REPORT_UUID {
        return not_found();
    }
    Json(json!({
        "uuid": id,
        "version": "1.3.0",
        "study": { "uuid": "study-1", "name": "John Doe" },
        "conclusions": "Normal left ventricular size and function.",
        "enumerated_conclusions": [{ "order": 1, "text": "Normal LV size." }],
        "diameter_measurements": [{
            "measurement": { "key": "lvidd", "acronym": "LVIDd", "units": "cm", "low_range": 3.9, "high_range": 5.3 },
            "value": 4.6,
            "flag": false,
        }],
        "segmentation_measurements": [],
        "pathology_conclusions": [],
        "quality_scores": { "plax": 0.92 },
    }))
    .into_response()
}

async fn list_webhooks(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.record(&uri, &headers);
    let page: usize = params
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);
    // One endpoint per page to exercise pagination.
    let webhooks = state.webhooks.lock().unwrap();
    let results: Vec<Value> = webhooks.iter().skip(page - 1).take(1).cloned().collect();
    let next = if page < webhooks.len() {
        json!(format!("http://remote/api/v2/webhook/?page={}", page + 1))
    } else {
        Value::Null
    };
    Json(json!({
        "count": webhooks.len(),
        "next": next,
        "previous": null,
        "results": results,
    }))
}

async fn create_webhook(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record(&uri, &headers);
    state.webhooks_created.fetch_add(1, Ordering::SeqCst);
    let created = webhook_json(body["url"].as_str().unwrap_or_default());
    state.webhooks.lock().unwrap().push(created.clone());
    (StatusCode::CREATED, Json(created))
}

async fn version(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(&uri, &headers);
    Json(json!({ "version": "2.4.1" }))
}

pub fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/v2/studies/", get(list_studies).post(create_study))
        .route("/api/v2/studies/{id}/", get(get_study))
        .route("/api/v2/dicoms/", axum::routing::post(upload_dicom))
        .route("/api/v2/idempotent_dicom/", axum::routing::post(upload_dicom))
        .route(
            "/api/v2/dicoms/file/{uuid}/{filename}/",
            get(download_dicom),
        )
        .route("/api/v2/scans/", axum::routing::post(create_scan))
        .route("/api/v2/scans/{id}/", get(get_scan))
        .route("/api/v2/reports/{id}/", get(get_report))
        .route("/api/v2/webhook/", get(list_webhooks).post(create_webhook))
        .route("/api/v2/version", get(version))
        .with_state(state)
}

/// Serves `router` on an ephemeral port until dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        TestServer {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// The mock remote together with a client pointed at it.
pub struct MockRemote {
    pub state: Arc<MockState>,
    pub client: EncephalonClient,
    pub server: TestServer,
}

impl MockRemote {
    pub async fn start(state: MockState) -> Self {
        let state = Arc::new(state);
        let server = TestServer::start(router(Arc::clone(&state))).await;
        let config = Config::new(server.base_url(), TOKEN)
            .unwrap()
            .with_request_timeout(Duration::from_secs(5));
        let client = EncephalonClient::new(config).unwrap();
        MockRemote {
            state,
            client,
            server,
        }
    }
}

/// Base url of a port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
