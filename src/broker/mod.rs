//! Session-scoped command broker for remote helpers
//!
//! Helpers connect to a session and receive every command dispatched to it.
//! A caller's command waits on a single-resolution channel until the first
//! helper posts a result, or until its deadline expires. Later results for the
//! same id report "not found". Sessions are created on first use and dropped
//! as soon as they have neither helpers nor pending commands.

mod session;
mod types;

pub use session::BridgeSession;
pub use types::*;

use session::{now_ms, PendingCommand};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

static COMMAND_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_command_id() -> String {
    let counter = COMMAND_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("cmd-{}-{:08x}", now_ms(), counter)
}

/// Pending command as shown to operators
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSummary {
    pub command_id: String,
    pub created_at: i64,
    pub remaining: Duration,
}

struct BrokerInner {
    sessions: Mutex<HashMap<String, BridgeSession>>,
    timeout: Duration,
    next_helper: AtomicU64,
}

/// Injectable session registry; cheap to clone
#[derive(Clone)]
pub struct CommandBroker {
    inner: Arc<BrokerInner>,
}

impl CommandBroker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                sessions: Mutex::new(HashMap::new()),
                timeout,
                next_helper: AtomicU64::new(1),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Register a helper channel; the connection sees `ready` first
    pub fn connect(&self, session_id: Option<&str>) -> HelperConnection {
        let session_id = sanitize_session_id(session_id);
        let helper_id = self.inner.next_helper.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        {
            let mut sessions = self.inner.sessions.lock();
            let session = sessions.entry(session_id.clone()).or_insert_with(BridgeSession::new);
            session.helpers.insert(helper_id, sender.clone());
            session.touch();
            let _ = sender.send(HelperEvent::Ready(session.status(&session_id)));
            info!(
                "🔗 Helper {} connected to session '{}' ({} connected)",
                helper_id,
                session_id,
                session.helpers_connected()
            );
        }

        HelperConnection {
            broker: self.clone(),
            session_id,
            helper_id,
            receiver,
        }
    }

    /// Remove a helper channel; pending commands are unaffected
    pub fn disconnect(&self, session_id: &str, helper_id: u64) {
        let mut sessions = self.inner.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        if session.helpers.remove(&helper_id).is_some() {
            session.touch();
            info!("🔌 Helper {} left session '{}'", helper_id, session_id);
        }
        if session.is_idle() {
            sessions.remove(session_id);
            debug!("Session '{}' is idle, dropped", session_id);
        }
    }

    /// Validate, register and broadcast a command
    ///
    /// Checks run in order: missing action, no helper connected, duplicate
    /// pending id. A rejected command leaves no pending entry behind.
    pub fn submit(&self, session_id: Option<&str>, mut command: Command) -> Result<PendingResult, BrokerError> {
        let session_id = sanitize_session_id(session_id);
        if command.action().is_none() {
            return Err(BrokerError::MissingAction);
        }

        let mut sessions = self.inner.sessions.lock();
        let Some(session) = sessions.get_mut(&session_id).filter(|s| s.helpers_connected() > 0) else {
            return Err(BrokerError::NoHelper { session_id });
        };

        let command_id = command
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_command_id);
        if session.pending.contains_key(&command_id) {
            return Err(BrokerError::Conflict { command_id });
        }

        command.id = Some(command_id.clone());
        if command.timestamp.as_deref().map_or(true, |ts| ts.trim().is_empty()) {
            command.timestamp = Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        }
        command.session_id = Some(session_id.clone());

        let (sender, receiver) = oneshot::channel();
        let timer = {
            let broker = self.clone();
            let session_id = session_id.clone();
            let command_id = command_id.clone();
            let timeout = self.inner.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                broker.expire(&session_id, &command_id);
            })
        };

        session.pending.insert(
            command_id.clone(),
            PendingCommand {
                sender,
                created_at: now_ms(),
                deadline: Instant::now() + self.inner.timeout,
                timer,
            },
        );
        session.touch();

        let delivered = session.broadcast(&HelperEvent::Command(CommandEnvelope {
            session_id: session_id.clone(),
            command,
        }));
        debug!(
            "Command {} dispatched to {} helper(s) in session '{}'",
            command_id, delivered, session_id
        );

        Ok(PendingResult {
            session_id,
            command_id,
            receiver,
        })
    }

    /// Submit and wait for the first result
    pub async fn dispatch(&self, session_id: Option<&str>, command: Command) -> Result<DispatchOutcome, BrokerError> {
        let pending = self.submit(session_id, command)?;
        let session_id = pending.session_id.clone();
        let command_id = pending.command_id.clone();
        let result = pending.wait().await?;

        Ok(DispatchOutcome {
            session_id,
            command_id,
            result,
        })
    }

    /// Fulfil a pending command; `false` when nothing is pending under that id
    pub fn resolve(&self, session_id: Option<&str>, command_id: &str, result: CommandResult) -> bool {
        let session_id = sanitize_session_id(session_id);
        let mut sessions = self.inner.sessions.lock();
        let Some(session) = sessions.get_mut(&session_id) else {
            debug!("Result for {} has no session '{}'", command_id, session_id);
            return false;
        };
        let Some(pending) = session.take_pending(command_id.trim()) else {
            debug!("Result for {} is late or unknown in session '{}'", command_id, session_id);
            return false;
        };

        let _ = pending.sender.send(Ok(result));
        if session.is_idle() {
            sessions.remove(&session_id);
        }
        true
    }

    fn expire(&self, session_id: &str, command_id: &str) {
        let mut sessions = self.inner.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        let Some(pending) = session.pending.remove(command_id) else {
            return;
        };
        session.touch();

        warn!(
            "⏱️  Command {} in session '{}' timed out after {:?}",
            command_id, session_id, self.inner.timeout
        );
        let _ = pending.sender.send(Err(BrokerError::Timeout {
            command_id: command_id.to_string(),
        }));
        if session.is_idle() {
            sessions.remove(session_id);
        }
    }

    /// Session counts; never creates a session
    pub fn status(&self, session_id: Option<&str>) -> BridgeStatus {
        let session_id = sanitize_session_id(session_id);
        let sessions = self.inner.sessions.lock();
        match sessions.get(&session_id) {
            Some(session) => session.status(&session_id),
            None => BridgeStatus {
                ok: true,
                session_id,
                helpers_connected: 0,
                pending_commands: 0,
                updated_at: now_ms(),
            },
        }
    }

    pub fn pending(&self, session_id: Option<&str>) -> Vec<PendingSummary> {
        let session_id = sanitize_session_id(session_id);
        let sessions = self.inner.sessions.lock();
        let now = Instant::now();
        let mut pending: Vec<PendingSummary> = sessions
            .get(&session_id)
            .map(|session| {
                session
                    .pending
                    .iter()
                    .map(|(id, entry)| PendingSummary {
                        command_id: id.clone(),
                        created_at: entry.created_at,
                        remaining: entry.deadline.saturating_duration_since(now),
                    })
                    .collect()
            })
            .unwrap_or_default();
        pending.sort_by_key(|entry| entry.created_at);
        pending
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }
}

impl Default for CommandBroker {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS))
    }
}

/// Successful round trip
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub session_id: String,
    pub command_id: String,
    pub result: CommandResult,
}

/// Handle on a submitted command
pub struct PendingResult {
    pub session_id: String,
    pub command_id: String,
    receiver: oneshot::Receiver<Result<CommandResult, BrokerError>>,
}

impl PendingResult {
    pub async fn wait(self) -> Result<CommandResult, BrokerError> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Dropped),
        }
    }
}

/// Receiving end of a helper channel; disconnects on drop
pub struct HelperConnection {
    broker: CommandBroker,
    session_id: String,
    helper_id: u64,
    receiver: mpsc::UnboundedReceiver<HelperEvent>,
}

impl HelperConnection {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn helper_id(&self) -> u64 {
        self.helper_id
    }

    pub async fn recv(&mut self) -> Option<HelperEvent> {
        self.receiver.recv().await
    }
}

impl Stream for HelperConnection {
    type Item = HelperEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<HelperEvent>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for HelperConnection {
    fn drop(&mut self) {
        self.broker.disconnect(&self.session_id, self.helper_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker() -> CommandBroker {
        CommandBroker::new(Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS))
    }

    #[tokio::test]
    async fn test_no_helper_creates_no_pending_entry() {
        let broker = broker();
        let err = broker
            .submit(Some("s1"), Command::new("read").with_id("c1"))
            .err()
            .unwrap();
        assert_eq!(err, BrokerError::NoHelper { session_id: "s1".into() });
        assert_eq!(broker.status(Some("s1")).pending_commands, 0);
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_action_checked_first() {
        let broker = broker();
        let err = broker.submit(Some("s1"), Command::default()).err().unwrap();
        assert_eq!(err, BrokerError::MissingAction);
    }

    #[tokio::test]
    async fn test_duplicate_pending_id_conflicts() {
        let broker = broker();
        let _helper = broker.connect(Some("s1"));

        let _first = broker.submit(Some("s1"), Command::new("read").with_id("c1")).unwrap();
        let err = broker
            .submit(Some("s1"), Command::new("read").with_id("c1"))
            .err()
            .unwrap();
        assert_eq!(err, BrokerError::Conflict { command_id: "c1".into() });
        assert_eq!(broker.status(Some("s1")).pending_commands, 1);
    }

    #[tokio::test]
    async fn test_resolve_before_dispatch_is_not_found() {
        let broker = broker();
        assert!(!broker.resolve(Some("s1"), "c1", json!({"ok": true})));
        let _helper = broker.connect(Some("s1"));
        assert!(!broker.resolve(Some("s1"), "c1", json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_helper_receives_ready_then_command() {
        let broker = broker();
        let mut helper = broker.connect(Some("desk"));

        match helper.recv().await.unwrap() {
            HelperEvent::Ready(status) => {
                assert_eq!(status.session_id, "desk");
                assert_eq!(status.helpers_connected, 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        let pending = broker.submit(Some("desk"), Command::new("ping")).unwrap();
        assert!(pending.command_id.starts_with("cmd-"));

        match helper.recv().await.unwrap() {
            HelperEvent::Command(envelope) => {
                assert_eq!(envelope.session_id, "desk");
                assert_eq!(envelope.command.id.as_deref(), Some(pending.command_id.as_str()));
                assert_eq!(envelope.command.session_id.as_deref(), Some("desk"));
                assert!(envelope.command.timestamp.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_result_wins() {
        let broker = broker();
        let _a = broker.connect(Some("s1"));
        let _b = broker.connect(Some("s1"));

        let pending = broker.submit(Some("s1"), Command::new("read").with_id("c1")).unwrap();
        assert!(broker.resolve(Some("s1"), "c1", json!({"ok": true, "output": "first"})));
        assert!(!broker.resolve(Some("s1"), "c1", json!({"ok": true, "output": "second"})));

        let result = pending.wait().await.unwrap();
        assert_eq!(result["output"], "first");
        assert_eq!(broker.status(Some("s1")).pending_commands, 0);
    }

    #[tokio::test]
    async fn test_dispatch_round_trip() {
        let broker = broker();
        let mut helper = broker.connect(Some("s1"));
        helper.recv().await.unwrap();

        let responder = {
            let broker = broker.clone();
            tokio::spawn(async move {
                if let Some(HelperEvent::Command(envelope)) = helper.recv().await {
                    let id = envelope.command.id.unwrap();
                    broker.resolve(Some("s1"), &id, json!({"ok": true, "output": "done"}));
                }
                helper
            })
        };

        let outcome = broker.dispatch(Some("s1"), Command::new("read")).await.unwrap();
        assert_eq!(outcome.session_id, "s1");
        assert_eq!(outcome.result["output"], "done");
        drop(responder.await.unwrap());
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_purges_entry() {
        let broker = CommandBroker::new(Duration::from_millis(15_000));
        let _helper = broker.connect(Some("s1"));

        let pending = broker.submit(Some("s1"), Command::new("read").with_id("c1")).unwrap();
        assert_eq!(broker.pending(Some("s1")).len(), 1);

        let err = pending.wait().await.unwrap_err();
        assert_eq!(err, BrokerError::Timeout { command_id: "c1".into() });
        assert_eq!(err.status_code(), 504);
        assert_eq!(broker.status(Some("s1")).pending_commands, 0);
        assert!(!broker.resolve(Some("s1"), "c1", json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_pending_and_gc_runs_when_idle() {
        let broker = broker();
        let helper = broker.connect(Some("s1"));
        let _pending = broker.submit(Some("s1"), Command::new("read").with_id("c1")).unwrap();

        drop(helper);
        let status = broker.status(Some("s1"));
        assert_eq!(status.helpers_connected, 0);
        assert_eq!(status.pending_commands, 1);
        assert_eq!(broker.session_count(), 1);

        assert!(broker.resolve(Some("s1"), "c1", json!({"ok": true})));
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn test_status_does_not_create_session() {
        let broker = broker();
        let status = broker.status(Some("  ghost  "));
        assert_eq!(status.session_id, "ghost");
        assert_eq!(status.helpers_connected, 0);
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let broker = broker();
        let _a = broker.connect(Some("a"));
        let _b = broker.connect(Some("b"));

        let _pending = broker.submit(Some("a"), Command::new("read").with_id("same")).unwrap();
        assert!(broker.submit(Some("b"), Command::new("read").with_id("same")).is_ok());
        assert!(!broker.resolve(Some("c"), "same", json!({})));
    }
}
