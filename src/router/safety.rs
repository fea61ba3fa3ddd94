//! Safety gate: per-action confirmation or armed per-slot cooldown

use super::actions::ActionId;
use super::payload::ModifierState;
use super::settings::{RouterSettings, SafetyMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Answers confirm-each prompts
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Gives the same answer to every prompt
pub struct StaticConfirmer {
    answer: bool,
}

impl StaticConfirmer {
    pub fn new(answer: bool) -> Self {
        Self { answer }
    }
}

#[async_trait]
impl Confirmer for StaticConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        info!("❓ {} -> {}", prompt.replace('\n', " | "), if self.answer { "yes" } else { "no" });
        self.answer
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Skip(String),
}

/// Prompt shown for confirm-each mode
pub fn confirmation_prompt(action: ActionId, slot: usize, pose_label: &str, modifier: &ModifierState) -> String {
    let spec = action.spec();
    let mut lines = vec![
        format!("Run \"{}\" for pose {} ({})?", spec.label, slot, pose_label),
        if spec.description.is_empty() {
            "No action description.".to_string()
        } else {
            spec.description.to_string()
        },
        if spec.scopes.is_empty() {
            "Scopes: none".to_string()
        } else {
            format!("Scopes: {}", spec.scopes.join(", "))
        },
    ];

    if modifier.detected {
        lines.push(format!(
            "Modifier: {} ({} hand)",
            modifier.gesture.map_or("unknown", |gesture| gesture.as_str()),
            modifier.handedness.map_or("unknown", |hand| hand.as_str())
        ));
    }
    lines.join("\n")
}

/// Remembers when each slot last passed in cooldown mode
#[derive(Default)]
pub struct SafetyGate {
    last_run_at: Mutex<HashMap<usize, u64>>,
}

impl SafetyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn check(
        &self,
        settings: &RouterSettings,
        confirmer: &dyn Confirmer,
        action: ActionId,
        slot: usize,
        pose_label: &str,
        modifier: &ModifierState,
        now_ms: u64,
    ) -> GateDecision {
        match settings.safety_mode {
            SafetyMode::ConfirmEach => {
                let prompt = confirmation_prompt(action, slot, pose_label, modifier);
                if confirmer.confirm(&prompt).await {
                    GateDecision::Pass
                } else {
                    GateDecision::Skip("Action rejected in confirmation dialog.".to_string())
                }
            }
            SafetyMode::Cooldown => self.check_cooldown(settings, slot, now_ms),
        }
    }

    fn check_cooldown(&self, settings: &RouterSettings, slot: usize, now_ms: u64) -> GateDecision {
        if !settings.armed {
            return GateDecision::Skip("Cooldown mode is not armed.".to_string());
        }

        let mut last_run_at = self.last_run_at.lock();
        if let Some(last) = last_run_at.get(&slot) {
            let elapsed = now_ms.saturating_sub(*last);
            if elapsed < settings.cooldown_ms {
                let remaining = (settings.cooldown_ms - elapsed) as f64 / 1000.0;
                debug!("Pose {} blocked, {}ms elapsed", slot, elapsed);
                return GateDecision::Skip(format!("Pose {} is cooling down ({:.1}s left).", slot, remaining));
            }
        }

        last_run_at.insert(slot, now_ms);
        GateDecision::Pass
    }

    /// Forget all cooldown history (e.g. after re-arming)
    pub fn reset(&self) {
        self.last_run_at.lock().clear();
    }
}
