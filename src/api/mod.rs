//! HTTP API: remote helper bridge, frame ingestion, library and settings
//!
//! Helpers connect over Server-Sent Events and post results back; callers
//! post commands and wait for the first result. Default port: 4173

mod bridge;
mod library;
mod settings;

use crate::broker::{BrokerError, CommandBroker};
use crate::pose::{FrameInput, HandFrame, LibraryError, SharedLibrary};
use crate::router::SharedRouter;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Default API port
pub const DEFAULT_API_PORT: u16 = 4173;

/// Default SSE ping interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Default request body limit (frames can be large)
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for API handlers
pub struct ApiState {
    /// Remote helper sessions
    pub broker: CommandBroker,
    pub router: SharedRouter,
    pub library: SharedLibrary,
    /// Frames pushed by the detector, consumed by the main loop
    pub frames: mpsc::Sender<FrameInput>,
    /// Primary hand of the latest processed frame, used for capture
    pub latest_hand: Arc<RwLock<Option<HandFrame>>>,
    pub ping_interval: Duration,
}

pub type SharedState = Arc<ApiState>;

/// API error response: `{error}` with a status code
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, e.to_string())
    }
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        let status = match e {
            LibraryError::SnapshotNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        warn!("Rejected request body: {}", e.body_text());
        Self::bad_request("Invalid JSON body.")
    }
}

/// Build the API router
pub fn build_router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/bridge/status", get(bridge::status))
        .route("/api/bridge/stream", get(bridge::stream))
        .route("/api/bridge/command", post(bridge::command))
        .route("/api/bridge/result", post(bridge::result))
        .route("/api/frames", post(settings::push_frame))
        .route("/api/library", get(library::export).delete(library::clear_all))
        .route("/api/library/import", post(library::import))
        .route("/api/library/slots/:slot/label", put(library::set_label))
        .route("/api/library/slots/:slot/capture", post(library::capture))
        .route("/api/library/slots/:slot", delete(library::clear_slot))
        .route("/api/library/snapshots", get(library::list_snapshots).post(library::create_snapshot))
        .route("/api/library/snapshots/:id/restore", post(library::restore_snapshot))
        .route("/api/settings", get(settings::get_settings).put(settings::put_settings))
        .route("/api/settings/armed", post(settings::set_armed))
        .route("/api/availability", get(settings::availability))
        .route("/api/actions", get(settings::list_actions))
        .route("/api/health", get(health_check))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found.")
}

/// Start the API server
pub async fn start_server(state: SharedState, port: u16, max_body_bytes: usize) -> Result<()> {
    let router = build_router(state, max_body_bytes);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("🌐 Gesture bridge API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capabilities::ConsoleCapabilities;
    use crate::events::EventHub;
    use crate::pose::{LibraryOptions, PoseLibrary};
    use crate::router::{Router as ActionRouter, StaticConfirmer};
    use crate::store::{MemoryStore, SharedStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    pub(crate) struct TestApp {
        pub app: Router,
        pub state: SharedState,
        pub frames: mpsc::Receiver<FrameInput>,
    }

    pub(crate) fn test_app() -> TestApp {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let events = EventHub::default();
        let broker = CommandBroker::new(Duration::from_millis(500));
        let library = Arc::new(RwLock::new(PoseLibrary::new(
            LibraryOptions::default(),
            store.clone(),
            Some(events.clone()),
        )));
        let router = Arc::new(
            ActionRouter::new(
                Arc::new(ConsoleCapabilities::new("test")),
                Arc::new(StaticConfirmer::new(true)),
                broker.clone(),
                events,
                store,
            )
            .with_library(library.clone()),
        );
        let (frames_tx, frames) = mpsc::channel(8);

        let state = Arc::new(ApiState {
            broker,
            router,
            library,
            frames: frames_tx,
            latest_hand: Arc::new(RwLock::new(None)),
            ping_interval: DEFAULT_PING_INTERVAL,
        });

        TestApp {
            app: build_router(state.clone(), DEFAULT_MAX_BODY_BYTES),
            state,
            frames,
        }
    }

    pub(crate) async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = test_app();
        let (status, body) = send(&app.app, "GET", "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found.");
    }

    #[tokio::test]
    async fn test_invalid_json_is_400() {
        let app = test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/bridge/command")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed() {
        let app = test_app();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/bridge/command")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }
}
