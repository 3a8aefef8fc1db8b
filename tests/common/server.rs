//! Local AI service for HTTP-level tests
//!
//! Serves the chat stream as server-sent events plus the QR / login
//! endpoints, and records what the client sent.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: &'static str,
    pub query: HashMap<String, String>,
    pub uid: Option<String>,
    pub credential: Option<String>,
    pub body: Option<Value>,
}

#[derive(Clone)]
struct ServerState {
    frames: Arc<Vec<String>>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    status_calls: Arc<AtomicUsize>,
    fail_invite: bool,
}

pub struct TestServer {
    pub base_url: String,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    status_calls: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Serve `frames` on every chat request
    pub async fn start(frames: &[&str]) -> Self {
        Self::start_with(frames, false).await
    }

    /// Like `start`, but the invite endpoint answers 500
    pub async fn start_with(frames: &[&str], fail_invite: bool) -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let status_calls = Arc::new(AtomicUsize::new(0));
        let state = ServerState {
            frames: Arc::new(frames.iter().map(|f| f.to_string()).collect()),
            captured: captured.clone(),
            status_calls: status_calls.clone(),
            fail_invite,
        };

        let app = Router::new()
            .route("/api/ai/chat", get(chat_get).post(chat_post))
            .route("/api/ai/config/getLoginQrCode", get(login_qr))
            .route("/api/ai/config/getLoginStatus", get(login_status))
            .route("/api/ai/config/getInviteQrCode", get(invite_qr))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            captured,
            status_calls,
            task,
        }
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().clone()
    }

    pub fn login_status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn frame_stream(frames: &[String]) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events: Vec<Result<Event, Infallible>> = frames
        .iter()
        .map(|frame| Ok(Event::default().data(frame.as_str())))
        .collect();
    Sse::new(futures::stream::iter(events))
}

async fn chat_get(
    State(state): State<ServerState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.captured.lock().push(CapturedRequest {
        method: "GET",
        query,
        uid: header(&headers, "uid"),
        credential: header(&headers, "dbhub"),
        body: None,
    });
    frame_stream(&state.frames)
}

async fn chat_post(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.captured.lock().push(CapturedRequest {
        method: "POST",
        query: HashMap::new(),
        uid: header(&headers, "uid"),
        credential: header(&headers, "dbhub"),
        body: Some(body),
    });
    frame_stream(&state.frames)
}

async fn login_qr() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "wechatQrCodeUrl": "https://qr.test/login.png",
            "token": "tok-1",
            "tip": "Scan with your phone"
        }
    }))
}

/// Issues a key on the second check
async fn login_status(
    State(state): State<ServerState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let calls = state.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if query.get("token").map(String::as_str) != Some("tok-1") || calls < 2 {
        return Json(json!({ "success": true, "data": {} }));
    }
    Json(json!({ "success": true, "data": { "apiKey": "sk-live" } }))
}

async fn invite_qr(State(state): State<ServerState>) -> Result<Json<Value>, StatusCode> {
    if state.fail_invite {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({
        "wechatQrCodeUrl": "https://qr.test/invite.png",
        "tip": "Invite a friend"
    })))
}
