//! Router settings, availability, action catalog and frame ingestion

use super::{ApiError, SharedState};
use crate::pose::FrameInput;
use crate::router::{AvailabilityReport, RouterSettings, CATALOG};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
pub struct ArmedBody {
    armed: bool,
}

/// GET /api/settings
pub async fn get_settings(State(state): State<SharedState>) -> Json<RouterSettings> {
    Json(state.router.settings())
}

/// PUT /api/settings - shallow merge over the current settings, then normalize
pub async fn put_settings(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RouterSettings>, ApiError> {
    let Json(patch) = body?;
    let Value::Object(patch) = patch else {
        return Err(ApiError::bad_request("Settings must be a JSON object."));
    };

    let mut merged = serde_json::to_value(state.router.settings())
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if let Value::Object(current) = &mut merged {
        current.extend(patch);
    }

    let next = state.router.update_settings(&merged);
    info!("⚙️  Router settings updated (safety mode: {:?})", next.safety_mode);
    Ok(Json(next))
}

/// POST /api/settings/armed
pub async fn set_armed(
    State(state): State<SharedState>,
    body: Result<Json<ArmedBody>, JsonRejection>,
) -> Result<Json<RouterSettings>, ApiError> {
    let Json(body) = body?;
    Ok(Json(state.router.set_armed(body.armed)))
}

/// GET /api/availability
pub async fn availability(State(state): State<SharedState>) -> Json<AvailabilityReport> {
    Json(state.router.check_availability().await)
}

/// GET /api/actions
pub async fn list_actions() -> Json<Vec<Value>> {
    let actions = CATALOG
        .iter()
        .map(|spec| {
            json!({
                "id": spec.id.as_str(),
                "label": spec.label,
                "description": spec.description,
                "scopes": spec.scopes,
                "capabilities": spec.capabilities.iter().map(|cap| cap.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(actions)
}

/// POST /api/frames - hand a detector frame to the pipeline
pub async fn push_frame(
    State(state): State<SharedState>,
    body: Result<Json<FrameInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(frame) = body?;
    let hands = frame.hands.len();

    match state.frames.try_send(frame) {
        Ok(()) => {
            debug!("Queued frame with {} hand(s)", hands);
            Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "hands": hands }))))
        }
        Err(TrySendError::Full(_)) => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Frame queue is full.",
        )),
        Err(TrySendError::Closed(_)) => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Frame pipeline is not running.",
        )),
    }
}
