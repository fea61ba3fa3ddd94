//! Remote helper bridge endpoints
//!
//! - `GET  /api/bridge/status?session=<id>`
//! - `GET  /api/bridge/stream?session=<id>` (SSE: `ready`, `ping`, `command`)
//! - `POST /api/bridge/command` `{sessionId, command}`
//! - `POST /api/bridge/result` `{sessionId, commandId, result}`

use super::{ApiError, SharedState};
use crate::broker::{sanitize_session_id, BridgeStatus, BrokerError, Command};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::sse::{Event, Sse},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    session: Option<String>,
}

/// First non-blank string (or number) among `keys`
fn field(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match body.get(*key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// GET /api/bridge/status
pub async fn status(State(state): State<SharedState>, Query(query): Query<SessionQuery>) -> Json<BridgeStatus> {
    Json(state.broker.status(query.session.as_deref()))
}

/// GET /api/bridge/stream - helper push channel
pub async fn stream(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connection = state.broker.connect(query.session.as_deref());
    debug!(
        "SSE helper {} attached to session '{}'",
        connection.helper_id(),
        connection.session_id()
    );

    let events = connection.map(|event| {
        Ok::<_, Infallible>(Event::default().event(event.name()).data(event.data().to_string()))
    });

    let period = state.ping_interval;
    let pings = IntervalStream::new(tokio::time::interval_at(tokio::time::Instant::now() + period, period)).map(|_| {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        Ok::<_, Infallible>(Event::default().event("ping").data(json!({ "timestamp": timestamp }).to_string()))
    });

    Sse::new(events.merge(pings))
}

/// POST /api/bridge/command - dispatch and wait for the first helper result
pub async fn command(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let session = field(&body, &["sessionId", "targetSessionId"]);

    let command = match body.get("command") {
        Some(raw @ Value::Object(_)) => serde_json::from_value::<Command>(raw.clone())
            .map_err(|e| ApiError::bad_request(format!("Invalid command: {}", e)))?,
        _ => Command::default(),
    };

    let outcome = state.broker.dispatch(session.as_deref(), command).await?;
    Ok(Json(json!({
        "ok": true,
        "sessionId": outcome.session_id,
        "commandId": outcome.command_id,
        "result": outcome.result,
    })))
}

/// POST /api/bridge/result - helper posts the outcome of a command
pub async fn result(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let session_id = sanitize_session_id(field(&body, &["sessionId", "targetSessionId"]).as_deref());
    let command_id = field(&body, &["commandId", "id"]).ok_or(BrokerError::MissingCommandId)?;

    let result = body.get("result").cloned().unwrap_or_else(|| body.clone());
    if !state.broker.resolve(Some(&session_id), &command_id, result) {
        return Err(BrokerError::NotFound {
            session_id,
            command_id,
        }
        .into());
    }

    Ok(Json(json!({
        "ok": true,
        "sessionId": session_id,
        "commandId": command_id,
    })))
}
