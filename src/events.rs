//! Typed event fan-out
//!
//! Each event kind has its own broadcast channel. Emitting never blocks and
//! never fails: events sent while nobody is subscribed are dropped.

use crate::pose::SnapshotSummary;
use crate::router::actions::ActionId;
use crate::router::payload::{ModifierState, TriggerPayload};
use crate::trigger::TriggerFired;
use crate::router::text::truncate;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default per-channel buffer
pub const DEFAULT_CAPACITY: usize = 256;

/// A runner finished successfully
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResultEvent {
    pub pose_slot: usize,
    pub pose_label: String,
    pub action_id: ActionId,
    pub base_action_id: ActionId,
    pub modifier: ModifierState,
    pub output: String,
    pub meta: Value,
    pub elapsed_ms: u64,
}

/// A runner failed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionErrorEvent {
    pub pose_slot: usize,
    pub pose_label: String,
    pub action_id: ActionId,
    pub base_action_id: ActionId,
    pub modifier: ModifierState,
    pub message: String,
}

/// A fired trigger was not executed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEvent {
    pub pose_slot: Option<usize>,
    pub action_id: ActionId,
    pub reason: String,
}

/// Free-form progress line for operators
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub message: String,
}

/// Template library changes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LibraryEvent {
    #[serde(rename_all = "camelCase")]
    SampleCaptured {
        slot_index: usize,
        sample_id: String,
        sample_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    LabelUpdated { slot_index: usize, label: String },
    #[serde(rename_all = "camelCase")]
    SlotCleared { slot_index: usize },
    LibraryCleared,
    StateImported { labels: Vec<String> },
    SnapshotCreated { snapshot: SnapshotSummary },
    SnapshotRestored { snapshot: SnapshotSummary },
}

/// One broadcast channel per event kind
#[derive(Clone)]
pub struct EventHub {
    pub fired: broadcast::Sender<TriggerFired>,
    pub dispatched: broadcast::Sender<TriggerPayload>,
    pub result: broadcast::Sender<ActionResultEvent>,
    pub error: broadcast::Sender<ActionErrorEvent>,
    pub skipped: broadcast::Sender<SkippedEvent>,
    pub status: broadcast::Sender<StatusEvent>,
    pub library: broadcast::Sender<LibraryEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            fired: broadcast::channel(capacity).0,
            dispatched: broadcast::channel(capacity).0,
            result: broadcast::channel(capacity).0,
            error: broadcast::channel(capacity).0,
            skipped: broadcast::channel(capacity).0,
            status: broadcast::channel(capacity).0,
            library: broadcast::channel(capacity).0,
        }
    }

    pub fn emit_fired(&self, event: TriggerFired) {
        let _ = self.fired.send(event);
    }

    pub fn emit_dispatched(&self, event: TriggerPayload) {
        let _ = self.dispatched.send(event);
    }

    pub fn emit_result(&self, event: ActionResultEvent) {
        let _ = self.result.send(event);
    }

    pub fn emit_error(&self, event: ActionErrorEvent) {
        let _ = self.error.send(event);
    }

    pub fn emit_skipped(&self, event: SkippedEvent) {
        let _ = self.skipped.send(event);
    }

    pub fn emit_status(&self, message: impl Into<String>) {
        let _ = self.status.send(StatusEvent {
            message: message.into(),
        });
    }

    pub fn emit_library(&self, event: LibraryEvent) {
        let _ = self.library.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Unwrap a broadcast receive; `None` once the channel is closed
fn received<T>(result: Result<T, RecvError>, channel: &str) -> Option<Option<T>> {
    match result {
        Ok(event) => Some(Some(event)),
        Err(RecvError::Lagged(missed)) => {
            warn!("⚠️  Event log lagged on '{}' channel, {} event(s) dropped", channel, missed);
            Some(None)
        }
        Err(RecvError::Closed) => None,
    }
}

/// Log every hub event until the hub is dropped
pub fn spawn_event_log(hub: &EventHub) -> JoinHandle<()> {
    let mut fired = hub.fired.subscribe();
    let mut result = hub.result.subscribe();
    let mut error = hub.error.subscribe();
    let mut skipped = hub.skipped.subscribe();
    let mut status = hub.status.subscribe();
    let mut library = hub.library.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = fired.recv() => match received(event, "fired") {
                    Some(Some(event)) => info!(
                        "✋ Trigger '{}' fired (slot {:?}, held {} ms)",
                        event.trigger.id,
                        event.hand.pose_slot(),
                        event.held_ms
                    ),
                    Some(None) => {}
                    None => break,
                },
                event = result.recv() => match received(event, "result") {
                    Some(Some(event)) => info!(
                        "✅ {} for {} finished in {} ms: {}",
                        event.action_id,
                        event.pose_label,
                        event.elapsed_ms,
                        truncate(&event.output, 160)
                    ),
                    Some(None) => {}
                    None => break,
                },
                event = error.recv() => match received(event, "error") {
                    Some(Some(event)) => warn!("❌ {} for {} failed: {}", event.action_id, event.pose_label, event.message),
                    Some(None) => {}
                    None => break,
                },
                event = skipped.recv() => match received(event, "skipped") {
                    Some(Some(event)) => info!("⏭️  Skipped {} (slot {:?}): {}", event.action_id, event.pose_slot, event.reason),
                    Some(None) => {}
                    None => break,
                },
                event = status.recv() => match received(event, "status") {
                    Some(Some(event)) => debug!("Status: {}", event.message),
                    Some(None) => {}
                    None => break,
                },
                event = library.recv() => match received(event, "library") {
                    Some(Some(event)) => debug!("Library: {:?}", event),
                    Some(None) => {}
                    None => break,
                },
            }
        }
        debug!("Event log stopped");
    })
}
