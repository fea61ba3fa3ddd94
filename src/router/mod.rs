//! Router module - turns fired pose triggers into actions
//!
//! The Router is the central orchestrator that:
//! - Resolves the pose slot, label and mapped action of a trigger
//! - Applies the secondary-hand modifier and the safety gate
//! - Runs at most one action at a time against the host capabilities
//! - Falls back from the agent run to a plain page summary when needed
//! - Reports progress, results, errors and skips on the event hub

pub mod actions;
pub mod modifier;
pub mod payload;
mod runners;
pub mod safety;
pub mod settings;
pub mod text;

pub use actions::{ActionId, ActionSpec, CATALOG};
pub use payload::{ModifierSource, ModifierState, TriggerPayload};
pub use runners::{ActionContext, ActionOutput};
pub use safety::{Confirmer, GateDecision, SafetyGate, StaticConfirmer};
pub use settings::{RouterSettings, SafetyMode};


use crate::broker::CommandBroker;
use crate::capabilities::{ActionError, Capabilities, Capability};
use crate::events::{ActionErrorEvent, ActionResultEvent, EventHub, SkippedEvent};
use crate::pose::migrate::default_slot_label;
use crate::pose::SharedLibrary;
use crate::store::SharedStore;
use crate::trigger::TriggerFired;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a trigger ended up
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    Completed(ActionResultEvent),
    Failed(ActionErrorEvent),
    Skipped(SkippedEvent),
}

impl RouteOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RouteOutcome::Completed(_))
    }
}

/// Result of a capability probe
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    pub ok: bool,
    pub host: String,
    pub capabilities: Vec<Capability>,
    pub remote_session_id: String,
    pub remote_helpers_connected: usize,
    pub message: String,
}

/// Clears the in-flight flag when the action ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Main router: settings, gate and capability host for one operator
pub struct Router {
    /// Current settings (persisted on every change)
    pub(crate) settings: RwLock<RouterSettings>,
    /// Host integration used by every runner
    pub(crate) capabilities: Arc<dyn Capabilities>,
    /// Answers confirm-each prompts
    pub(crate) confirmer: Arc<dyn Confirmer>,
    /// Remote helper broker
    pub(crate) broker: CommandBroker,
    pub(crate) events: EventHub,
    pub(crate) store: SharedStore,
    /// Source of pose labels when the trigger carries none
    pub(crate) library: Option<SharedLibrary>,
    pub(crate) gate: SafetyGate,
    pub(crate) in_flight: AtomicBool,
}

pub type SharedRouter = Arc<Router>;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl Router {
    /// Create a router with settings loaded from `store`
    pub fn new(
        capabilities: Arc<dyn Capabilities>,
        confirmer: Arc<dyn Confirmer>,
        broker: CommandBroker,
        events: EventHub,
        store: SharedStore,
    ) -> Self {
        let settings = RouterSettings::load(&store);
        info!(
            "🧭 Router ready on host '{}' ({} mapped poses, {:?})",
            capabilities.name(),
            settings.mapping.values().filter(|action| !action.is_none()).count(),
            settings.safety_mode
        );

        Self {
            settings: RwLock::new(settings),
            capabilities,
            confirmer,
            broker,
            events,
            store,
            library: None,
            gate: SafetyGate::new(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Use the template library for pose labels
    pub fn with_library(mut self, library: SharedLibrary) -> Self {
        self.library = Some(library);
        self
    }

    pub fn settings(&self) -> RouterSettings {
        self.settings.read().clone()
    }

    /// Normalize, apply and persist a settings document
    pub fn update_settings(&self, raw: &Value) -> RouterSettings {
        self.replace_settings(RouterSettings::normalize(raw))
    }

    pub fn replace_settings(&self, next: RouterSettings) -> RouterSettings {
        {
            let mut settings = self.settings.write();
            if settings.armed != next.armed || settings.safety_mode != next.safety_mode {
                self.gate.reset();
            }
            *settings = next.clone();
        }
        next.save(&self.store);
        debug!("Router settings updated");
        next
    }

    /// Arm or disarm cooldown mode
    pub fn set_armed(&self, armed: bool) -> RouterSettings {
        let mut next = self.settings();
        next.armed = armed;
        let next = self.replace_settings(next);
        self.events
            .emit_status(if armed { "Cooldown mode armed." } else { "Cooldown mode disarmed." });
        next
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn broker(&self) -> &CommandBroker {
        &self.broker
    }

    /// Library label for `slot`, or the default `pose_N`
    pub fn pose_label(&self, slot: usize) -> String {
        match &self.library {
            Some(library) => library.read().slot_label(slot),
            None => default_slot_label(slot),
        }
    }

    /// Probe the host and the remote session, and report on the status channel
    pub async fn check_availability(&self) -> AvailabilityReport {
        let available = self.capabilities.probe();
        let session_id = self.settings.read().remote_bridge.session_id.clone();
        let helpers = self.broker.status(Some(&session_id)).helpers_connected;

        let ok = available.contains(Capability::Model) && available.contains(Capability::ActiveTabRead);
        let remote = format!("remote.session={} remote.helpers={}", session_id, helpers);
        let message = if ok {
            let flags = Capability::ALL
                .iter()
                .map(|cap| format!("{}={}", cap, if available.contains(*cap) { "yes" } else { "no" }))
                .collect::<Vec<_>>()
                .join(" ");
            format!("Capabilities detected on {}. {} {}", self.capabilities.name(), flags, remote)
        } else {
            format!(
                "Model and page capabilities not detected on {}. Remote and voice actions may still work. {}",
                self.capabilities.name(),
                remote
            )
        };

        if ok {
            info!("✅ {}", message);
        } else {
            warn!("⚠️  {}", message);
        }
        self.events.emit_status(message.clone());

        AvailabilityReport {
            ok,
            host: self.capabilities.name().to_string(),
            capabilities: available.iter().collect(),
            remote_session_id: session_id,
            remote_helpers_connected: helpers,
            message,
        }
    }

    /// Route a trigger straight from the trigger engine
    pub async fn handle_fired(&self, fired: &TriggerFired) -> RouteOutcome {
        self.events.emit_fired(fired.clone());
        self.handle_payload(TriggerPayload::from_fired(fired)).await
    }

    /// Resolve, gate and run the action for one trigger
    pub async fn handle_payload(&self, payload: TriggerPayload) -> RouteOutcome {
        self.events.emit_dispatched(payload.clone());

        let Some(pose_slot) = payload.pose_slot() else {
            return self.skip(None, ActionId::None, "No pose slot on trigger payload.".to_string());
        };

        let pose_label = payload
            .pose_label()
            .map(str::to_string)
            .unwrap_or_else(|| self.pose_label(pose_slot));
        let settings = self.settings();
        let routing = modifier::resolve_routing(&settings, &payload, pose_slot);
        let action = routing.action_id;

        if action.is_none() {
            return self.skip(Some(pose_slot), ActionId::None, format!("No action mapped for pose {}.", pose_slot));
        }

        // Held across the gate so a pending confirmation blocks other firings
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return self.skip(Some(pose_slot), action, "Previous action still running.".to_string());
        };

        let decision = self
            .gate
            .check(
                &settings,
                self.confirmer.as_ref(),
                action,
                pose_slot,
                &pose_label,
                &routing.modifier,
                now_ms(),
            )
            .await;
        if let GateDecision::Skip(reason) = decision {
            return self.skip(Some(pose_slot), action, reason);
        }

        let spec = action.spec();
        let modifier_tag = match (routing.modifier.detected, routing.modifier.gesture) {
            (true, Some(gesture)) => format!(" (modifier: {})", gesture.as_str()),
            _ => String::new(),
        };
        self.events.emit_status(format!(
            "Running {} for pose {} ({}){}...",
            spec.label, pose_slot, pose_label, modifier_tag
        ));
        info!("🎯 Pose {} ({}) -> {}", pose_slot, pose_label, action);

        let context = ActionContext {
            payload,
            pose_slot,
            pose_label,
            base_action_id: routing.base_action_id,
            modifier: routing.modifier,
            settings,
        };
        let started = Instant::now();

        match self.execute(action, &context).await {
            Ok(result) => {
                let outcome = self.complete(&context, action, result, started);
                self.events
                    .emit_status(format!("Completed {} for pose {}.", spec.label, context.pose_slot));
                outcome
            }
            Err(error) if action == ActionId::AgentRunBrief && error.allows_agent_fallback() => {
                self.run_agent_fallback(&context, error, started).await
            }
            Err(error) => self.fail(&context, action, error.to_string()),
        }
    }

    /// Capability check, permission request, then the runner itself
    async fn execute(&self, action: ActionId, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        actions::ensure_capabilities(action, &self.capabilities.probe())?;
        self.capabilities.ensure_permissions(action.spec().scopes).await?;
        self.run_action(action, context).await
    }

    async fn run_agent_fallback(&self, context: &ActionContext, error: ActionError, started: Instant) -> RouteOutcome {
        let action = ActionId::AgentRunBrief;
        let fallback = ActionId::ReadSummarize;
        warn!("⚠️  agent.run unavailable ({}), falling back to {}", error, fallback);
        self.events
            .emit_status("agent.run unavailable; falling back to Read page + summarize.");

        match self.execute(fallback, context).await {
            Ok(mut result) => {
                if let Value::Object(meta) = &mut result.meta {
                    meta.insert("fallbackFrom".into(), json!(action));
                    meta.insert("fallbackActionId".into(), json!(fallback));
                    meta.insert("fallbackReason".into(), json!(error.to_string()));
                }
                let outcome = self.complete(context, action, result, started);
                self.events.emit_status(format!(
                    "Completed {} for pose {} using fallback.",
                    action.label(),
                    context.pose_slot
                ));
                outcome
            }
            Err(fallback_error) => self.fail(
                context,
                action,
                format!("Primary action failed: {}. Fallback failed: {}.", error, fallback_error),
            ),
        }
    }

    fn complete(&self, context: &ActionContext, action: ActionId, result: ActionOutput, started: Instant) -> RouteOutcome {
        let event = ActionResultEvent {
            pose_slot: context.pose_slot,
            pose_label: context.pose_label.clone(),
            action_id: action,
            base_action_id: context.base_action_id,
            modifier: context.modifier.clone(),
            output: result.output,
            meta: result.meta,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!("✅ {} finished for pose {} in {}ms", action, context.pose_slot, event.elapsed_ms);
        self.events.emit_result(event.clone());
        RouteOutcome::Completed(event)
    }

    fn fail(&self, context: &ActionContext, action: ActionId, message: String) -> RouteOutcome {
        warn!("❌ {} failed for pose {}: {}", action, context.pose_slot, message);
        let event = ActionErrorEvent {
            pose_slot: context.pose_slot,
            pose_label: context.pose_label.clone(),
            action_id: action,
            base_action_id: context.base_action_id,
            modifier: context.modifier.clone(),
            message,
        };
        self.events.emit_error(event.clone());
        self.events
            .emit_status(format!("Action failed for pose {}: {}", event.pose_slot, event.message));
        RouteOutcome::Failed(event)
    }

    fn skip(&self, pose_slot: Option<usize>, action_id: ActionId, reason: String) -> RouteOutcome {
        debug!("Skipped trigger (pose {:?}, {}): {}", pose_slot, action_id, reason);
        let event = SkippedEvent {
            pose_slot,
            action_id,
            reason,
        };
        self.events.emit_skipped(event.clone());
        RouteOutcome::Skipped(event)
    }
}
