//! In-process stand-in for the queue and media endpoints.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use port_sync::SyncConfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const MEDIA_ID: &str = "media-1";
pub const UPLOAD_ID: &str = "upload-1";
pub const SINGLE_MEDIA_ID: &str = "media-single";

#[derive(Default)]
pub struct FakeState {
    pub base_url: Mutex<String>,
    /// Status and body served by the queue endpoint.
    pub queue_response: Mutex<Option<(u16, String)>>,
    /// `Authorization` header of every authenticated request.
    pub auth_headers: Mutex<Vec<String>>,
    pub begin_bodies: Mutex<Vec<Value>>,
    /// Part number -> remaining forced failures.
    pub part_failures: Mutex<HashMap<u32, u32>>,
    pub part_attempts: Mutex<HashMap<u32, u32>>,
    pub part_auth: Mutex<Vec<Option<String>>>,
    pub stored_parts: Mutex<BTreeMap<u32, Vec<u8>>>,
    pub complete_bodies: Mutex<Vec<Value>>,
    pub abort_bodies: Mutex<Vec<Value>>,
    pub abort_status: Mutex<Option<u16>>,
    /// URLs handed out by begin are cut short by this many entries.
    pub drop_urls: Mutex<usize>,
    pub form_uploads: Mutex<Vec<(String, Vec<u8>)>>,
    /// Each part PUT is held this long before it is answered.
    pub part_delay_ms: Mutex<u64>,
    pub parts_in_flight: Mutex<u32>,
    pub peak_parts_in_flight: Mutex<u32>,
}

impl FakeState {
    pub fn set_queue(&self, status: u16, body: &str) {
        *self.queue_response.lock() = Some((status, body.to_string()));
    }

    pub fn fail_part(&self, part: u32, times: u32) {
        self.part_failures.lock().insert(part, times);
    }

    pub fn attempts(&self, part: u32) -> u32 {
        self.part_attempts.lock().get(&part).copied().unwrap_or(0)
    }

    pub fn peak_parts_in_flight(&self) -> u32 {
        *self.peak_parts_in_flight.lock()
    }
}

pub struct FakeServer {
    pub base_url: String,
    pub state: Arc<FakeState>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());

        let app = Router::new()
            .route("/messages/queue", get(queue))
            .route("/media/multipart/begin", post(begin))
            .route("/media/multipart/complete", post(complete))
            .route("/media/multipart/abort", post(abort))
            .route("/media/presign", post(presign))
            .route("/bucket", post(bucket))
            .route("/parts/:part", put(upload_part))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let base_url = format!("http://127.0.0.1:{}", port);
        *state.base_url.lock() = base_url.clone();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    /// Client settings pointed at this server with fast retries.
    pub fn config(&self, part_size: u64) -> SyncConfig {
        SyncConfig {
            part_size,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            request_timeout_secs: 5,
            ..SyncConfig::with_base_url(&self.base_url)
        }
    }
}

fn record_auth(state: &FakeState, headers: &HeaderMap) {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.auth_headers.lock().push(value);
}

async fn queue(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> impl IntoResponse {
    record_auth(&state, &headers);
    let (status, body) = state
        .queue_response
        .lock()
        .clone()
        .unwrap_or((200, String::new()));
    (StatusCode::from_u16(status).unwrap(), body)
}

async fn begin(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    record_auth(&state, &headers);
    let parts = body["parts"].as_u64().unwrap_or(0) as usize;
    state.begin_bodies.lock().push(body);

    let base = state.base_url.lock().clone();
    let count = parts.saturating_sub(*state.drop_urls.lock());
    let urls: Vec<String> = (1..=count).map(|n| format!("{base}/parts/{n}")).collect();
    Json(json!({ "mediaId": MEDIA_ID, "uploadId": UPLOAD_ID, "urls": urls }))
}

async fn upload_part(
    State(state): State<Arc<FakeState>>,
    Path(part): Path<u32>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    *state.part_attempts.lock().entry(part).or_insert(0) += 1;
    {
        let mut in_flight = state.parts_in_flight.lock();
        *in_flight += 1;
        let mut peak = state.peak_parts_in_flight.lock();
        *peak = (*peak).max(*in_flight);
    }
    let delay = *state.part_delay_ms.lock();
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
    *state.parts_in_flight.lock() -= 1;
    state.part_auth.lock().push(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    {
        let mut failures = state.part_failures.lock();
        if let Some(remaining) = failures.get_mut(&part) {
            if *remaining > 0 {
                *remaining -= 1;
                return (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new()).into_response();
            }
        }
    }

    state.stored_parts.lock().insert(part, body.to_vec());
    let mut out = HeaderMap::new();
    out.insert(header::ETAG, format!("\"etag-{part}\"").parse().unwrap());
    (StatusCode::OK, out).into_response()
}

async fn complete(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    record_auth(&state, &headers);
    state.complete_bodies.lock().push(body);
    Json(json!({}))
}

async fn abort(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    record_auth(&state, &headers);
    state.abort_bodies.lock().push(body);
    let status = state.abort_status.lock().unwrap_or(200);
    StatusCode::from_u16(status).unwrap()
}

async fn presign(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> impl IntoResponse {
    record_auth(&state, &headers);
    let base = state.base_url.lock().clone();
    Json(json!({
        "statusCode": 200,
        "body": {
            "url": {
                "url": format!("{base}/bucket"),
                "fields": { "key": "uploads/k1", "policy": "p0l1cy" }
            },
            "mediaId": SINGLE_MEDIA_ID
        }
    }))
}

async fn bucket(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.form_uploads.lock().push((content_type, body.to_vec()));
    StatusCode::NO_CONTENT
}
