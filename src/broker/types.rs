//! Wire types of the remote bridge

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Session used when the caller supplies none (or only invalid characters)
pub const DEFAULT_SESSION_ID: &str = "default";

/// Maximum length of a sanitized session id
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Default deadline of a pending command
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 15_000;

/// Keep `[A-Za-z0-9._-]`, cap at 64 chars, fall back to `default`
pub fn sanitize_session_id(raw: Option<&str>) -> String {
    let cleaned: String = raw
        .unwrap_or("")
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(MAX_SESSION_ID_LEN)
        .collect();

    if cleaned.is_empty() {
        DEFAULT_SESSION_ID.to_string()
    } else {
        cleaned
    }
}

/// Command forwarded to helpers
///
/// Only `action` is required. Everything besides the envelope fields is kept
/// verbatim in `payload` and flattened back on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Command ids arrive as strings or bare numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(de::Error::custom(format!("command id must be a string or number, got {}", other))),
    }
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Trimmed action, if any
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref().map(str::trim).filter(|action| !action.is_empty())
    }
}

/// Result posted by a helper: `{ok, output, meta, errorCode?, errorMessage?}`
///
/// The broker does not interpret it.
pub type CommandResult = Value;

/// Snapshot of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub ok: bool,
    pub session_id: String,
    pub helpers_connected: usize,
    pub pending_commands: usize,
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
}

/// Payload of a `command` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub session_id: String,
    pub command: Command,
}

/// Event pushed to a connected helper
#[derive(Debug, Clone, PartialEq)]
pub enum HelperEvent {
    Ready(BridgeStatus),
    Command(CommandEnvelope),
}

impl HelperEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            HelperEvent::Ready(_) => "ready",
            HelperEvent::Command(_) => "command",
        }
    }

    pub fn data(&self) -> Value {
        let data = match self {
            HelperEvent::Ready(status) => serde_json::to_value(status),
            HelperEvent::Command(envelope) => serde_json::to_value(envelope),
        };
        data.unwrap_or(Value::Null)
    }
}

/// Broker failures, each with its HTTP status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Missing command.action.")]
    MissingAction,

    #[error("Missing commandId.")]
    MissingCommandId,

    #[error("No target helper connected for session \"{session_id}\".")]
    NoHelper { session_id: String },

    #[error("Duplicate command id: {command_id}")]
    Conflict { command_id: String },

    #[error("Remote helper timed out waiting for result.")]
    Timeout { command_id: String },

    #[error("No pending command found for id \"{command_id}\" in session \"{session_id}\".")]
    NotFound { session_id: String, command_id: String },

    #[error("Remote command was dropped before a result arrived.")]
    Dropped,
}

impl BrokerError {
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::MissingAction | BrokerError::MissingCommandId => 400,
            BrokerError::NotFound { .. } => 404,
            BrokerError::NoHelper { .. } | BrokerError::Conflict { .. } => 409,
            BrokerError::Timeout { .. } => 504,
            BrokerError::Dropped => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id(None), "default");
        assert_eq!(sanitize_session_id(Some("   ")), "default");
        assert_eq!(sanitize_session_id(Some("!!!")), "default");
        assert_eq!(sanitize_session_id(Some(" desk-1.main_A ")), "desk-1.main_A");
        assert_eq!(sanitize_session_id(Some("a b/c?d")), "abcd");
        assert_eq!(sanitize_session_id(Some(&"x".repeat(100))).len(), 64);
    }

    #[test]
    fn test_command_id_accepts_numbers() {
        let command: Command = serde_json::from_value(json!({ "id": 42, "action": "read" })).unwrap();
        assert_eq!(command.id.as_deref(), Some("42"));
        assert!(command.payload.get("id").is_none());

        let command: Command = serde_json::from_value(json!({ "id": null, "action": "read" })).unwrap();
        assert!(command.id.is_none());

        assert!(serde_json::from_value::<Command>(json!({ "id": [1], "action": "read" })).is_err());
    }

    #[test]
    fn test_command_keeps_extra_fields() {
        let command: Command = serde_json::from_value(json!({
            "action": "remote_read_screenshot_summarize",
            "poseSlot": 1,
            "options": {"timeoutMs": 15000}
        }))
        .unwrap();

        assert_eq!(command.action(), Some("remote_read_screenshot_summarize"));
        assert!(command.id.is_none());
        assert_eq!(command.payload["poseSlot"], 1);

        let wire = serde_json::to_value(&command).unwrap();
        assert_eq!(wire["options"]["timeoutMs"], 15000);
        assert!(wire.get("id").is_none());
    }

    #[test]
    fn test_blank_action_is_missing() {
        assert_eq!(Command::new("  ").action(), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(BrokerError::MissingAction.status_code(), 400);
        assert_eq!(BrokerError::NoHelper { session_id: "s".into() }.status_code(), 409);
        assert_eq!(BrokerError::Conflict { command_id: "c".into() }.status_code(), 409);
        assert_eq!(BrokerError::Timeout { command_id: "c".into() }.status_code(), 504);
        assert_eq!(
            BrokerError::NotFound {
                session_id: "s".into(),
                command_id: "c".into()
            }
            .status_code(),
            404
        );
    }
}
