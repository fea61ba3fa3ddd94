//! Per-session helper channels and pending commands

use super::types::{BridgeStatus, BrokerError, CommandResult, HelperEvent};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) type HelperSender = mpsc::UnboundedSender<HelperEvent>;
pub(crate) type ResultSender = oneshot::Sender<Result<CommandResult, BrokerError>>;

/// One in-flight command awaiting its first result
pub(crate) struct PendingCommand {
    pub sender: ResultSender,
    pub created_at: i64,
    pub deadline: Instant,
    pub timer: JoinHandle<()>,
}

/// Helpers and pending commands of one session id
pub struct BridgeSession {
    pub(crate) helpers: HashMap<u64, HelperSender>,
    pub(crate) pending: HashMap<String, PendingCommand>,
    updated_at: i64,
}

impl BridgeSession {
    pub(crate) fn new() -> Self {
        Self {
            helpers: HashMap::new(),
            pending: HashMap::new(),
            updated_at: now_ms(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// No helpers and nothing pending
    pub fn is_idle(&self) -> bool {
        self.helpers.is_empty() && self.pending.is_empty()
    }

    pub fn helpers_connected(&self) -> usize {
        self.helpers.len()
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub(crate) fn status(&self, session_id: &str) -> BridgeStatus {
        BridgeStatus {
            ok: true,
            session_id: session_id.to_string(),
            helpers_connected: self.helpers.len(),
            pending_commands: self.pending.len(),
            updated_at: self.updated_at,
        }
    }

    /// Push to every helper; closed channels are skipped
    ///
    /// Returns how many helpers accepted the event.
    pub(crate) fn broadcast(&self, event: &HelperEvent) -> usize {
        self.helpers
            .values()
            .filter(|sender| sender.send(event.clone()).is_ok())
            .count()
    }

    /// Remove a pending entry and stop its timer
    pub(crate) fn take_pending(&mut self, command_id: &str) -> Option<PendingCommand> {
        let pending = self.pending.remove(command_id)?;
        pending.timer.abort();
        self.touch();
        Some(pending)
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
