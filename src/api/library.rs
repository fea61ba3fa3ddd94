//! Pose library endpoints: export/import, labels, capture, snapshots

use super::{ApiError, SharedState};
use crate::pose::{LibraryState, SnapshotSummary};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LabelBody {
    label: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureBody {
    #[serde(default)]
    detector_info: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotBody {
    #[serde(default)]
    reason: Option<String>,
}

/// GET /api/library
pub async fn export(State(state): State<SharedState>) -> Json<LibraryState> {
    Json(state.library.read().export_state())
}

/// POST /api/library/import - replace the whole library
pub async fn import(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<LibraryState>, ApiError> {
    let Json(document) = body?;
    let imported = state.library.write().import_state(&document)?;
    info!("📥 Imported pose library ({} slots)", imported.slots.len());
    Ok(Json(imported))
}

/// DELETE /api/library
pub async fn clear_all(State(state): State<SharedState>) -> Json<Value> {
    state.library.write().clear_all();
    Json(json!({ "ok": true }))
}

/// PUT /api/library/slots/:slot/label
pub async fn set_label(
    State(state): State<SharedState>,
    Path(slot): Path<usize>,
    body: Result<Json<LabelBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let label = state.library.write().set_slot_label(slot, &body.label)?;
    Ok(Json(json!({ "ok": true, "slotIndex": slot, "label": label })))
}

/// DELETE /api/library/slots/:slot
pub async fn clear_slot(State(state): State<SharedState>, Path(slot): Path<usize>) -> Result<Json<Value>, ApiError> {
    state.library.write().clear_slot(slot)?;
    Ok(Json(json!({ "ok": true, "slotIndex": slot })))
}

/// POST /api/library/slots/:slot/capture - store the latest primary hand as a sample
pub async fn capture(
    State(state): State<SharedState>,
    Path(slot): Path<usize>,
    body: Option<Json<CaptureBody>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let hand = state
        .latest_hand
        .read()
        .clone()
        .ok_or_else(|| ApiError::bad_request("No hand detected in the latest frame."))?;
    let detector_info = body.and_then(|Json(body)| body.detector_info);

    let mut library = state.library.write();
    let sample = library.capture_at(slot, &hand, detector_info)?;
    let sample_count = library.sample_counts().get(slot).copied().unwrap_or(0);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "slotIndex": slot,
            "label": sample.label,
            "sampleId": sample.sample_id,
            "sampleCount": sample_count,
        })),
    ))
}

/// GET /api/library/snapshots
pub async fn list_snapshots(State(state): State<SharedState>) -> Json<Vec<SnapshotSummary>> {
    Json(state.library.read().list_snapshots())
}

/// POST /api/library/snapshots - forced manual snapshot
pub async fn create_snapshot(
    State(state): State<SharedState>,
    body: Option<Json<SnapshotBody>>,
) -> (StatusCode, Json<Value>) {
    let reason = body
        .and_then(|Json(body)| body.reason)
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| "manual".to_string());
    let id = state.library.write().capture_snapshot(&reason, true);
    (StatusCode::CREATED, Json(json!({ "ok": true, "id": id, "reason": reason })))
}

/// POST /api/library/snapshots/:id/restore
pub async fn restore_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<LibraryState>, ApiError> {
    let restored = state.library.write().restore_snapshot(&id)?;
    Ok(Json(restored))
}
