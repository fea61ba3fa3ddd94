//! Hold/cooldown trigger engine
//!
//! Each trigger definition owns a small state machine (idle, holding, cooling)
//! fed once per frame. A trigger fires when a matching hand has been held for
//! `hold_ms`, at least `cooldown_ms` has passed since the last firing, and the
//! match has been released since then. A pose that stays up never re-fires.

use crate::pose::{Gesture, HandFrame, Handedness};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Hold time used when a definition omits one
pub const DEFAULT_HOLD_MS: u64 = 500;
/// Cooldown used when a definition omits one
pub const DEFAULT_COOLDOWN_MS: u64 = 1200;

/// Which hand may satisfy a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandFilter {
    #[default]
    Any,
    Left,
    Right,
}

impl HandFilter {
    pub fn accepts(&self, handedness: Handedness) -> bool {
        match self {
            HandFilter::Any => true,
            HandFilter::Left => handedness == Handedness::Left,
            HandFilter::Right => handedness == Handedness::Right,
        }
    }
}

/// What the router should do when the trigger fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub default_action_id: Option<String>,
}

/// Static trigger configuration
///
/// Exactly one of `pose_slot` and `gesture` selects the hands that count as a
/// match; configuration validation enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub id: String,
    #[serde(default)]
    pub pose_slot: Option<usize>,
    #[serde(default)]
    pub gesture: Option<Gesture>,
    #[serde(default)]
    pub hand: HandFilter,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub action: Option<TriggerAction>,
}

fn default_hold_ms() -> u64 {
    DEFAULT_HOLD_MS
}

fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}

impl TriggerDefinition {
    /// Trigger bound to a template slot
    pub fn for_slot(id: impl Into<String>, slot: usize) -> Self {
        Self {
            id: id.into(),
            pose_slot: Some(slot),
            gesture: None,
            hand: HandFilter::Any,
            hold_ms: DEFAULT_HOLD_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            action: None,
        }
    }

    /// Trigger bound to a static gesture label
    pub fn for_gesture(id: impl Into<String>, gesture: Gesture) -> Self {
        Self {
            pose_slot: None,
            gesture: Some(gesture),
            ..Self::for_slot(id, 0)
        }
    }

    pub fn with_timing(mut self, hold_ms: u64, cooldown_ms: u64) -> Self {
        self.hold_ms = hold_ms;
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_hand(mut self, hand: HandFilter) -> Self {
        self.hand = hand;
        self
    }

    pub fn with_action(mut self, kind: &str, default_action_id: &str) -> Self {
        self.action = Some(TriggerAction {
            kind: kind.to_string(),
            default_action_id: Some(default_action_id.to_string()),
        });
        self
    }

    /// Whether `hand` satisfies this trigger's pose and handedness filters
    pub fn matches(&self, hand: &HandFrame) -> bool {
        let pose_ok = match (self.pose_slot, self.gesture) {
            (Some(slot), _) => hand.pose_slot() == Some(slot),
            (None, Some(gesture)) => hand.has_gesture(gesture),
            (None, None) => false,
        };
        pose_ok && self.hand.accepts(hand.handedness)
    }
}

/// Runtime state of one trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerState {
    /// When the current continuous match began
    pub started_at: Option<u64>,
    /// False between a firing and the next loss of match
    pub ready: bool,
    pub last_fired_at: Option<u64>,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self {
            started_at: None,
            ready: true,
            last_fired_at: None,
        }
    }
}

/// Emitted once per firing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerFired {
    pub trigger: TriggerDefinition,
    /// The hand that satisfied the trigger
    pub hand: HandFrame,
    /// Every hand visible in the frame
    pub hands: Vec<HandFrame>,
    pub held_ms: u64,
    pub timestamp: u64,
}

/// Per-trigger hold/cooldown state machines
#[derive(Debug, Default)]
pub struct TriggerEngine {
    triggers: Vec<TriggerDefinition>,
    states: HashMap<String, TriggerState>,
}

impl TriggerEngine {
    pub fn new(definitions: Vec<TriggerDefinition>) -> Self {
        let mut engine = Self::default();
        engine.register(definitions);
        engine
    }

    /// Replace all definitions and reset their state
    pub fn register(&mut self, definitions: Vec<TriggerDefinition>) {
        self.states = definitions
            .iter()
            .map(|trigger| (trigger.id.clone(), TriggerState::default()))
            .collect();
        self.triggers = definitions;
    }

    pub fn triggers(&self) -> &[TriggerDefinition] {
        &self.triggers
    }

    pub fn state(&self, trigger_id: &str) -> Option<TriggerState> {
        self.states.get(trigger_id).copied()
    }

    /// Advance every trigger by one frame and collect the firings
    pub fn process_frame(&mut self, timestamp: u64, hands: &[HandFrame]) -> Vec<TriggerFired> {
        let mut fired = Vec::new();

        for trigger in &self.triggers {
            let Some(state) = self.states.get_mut(&trigger.id) else {
                continue;
            };

            let Some(hand) = hands.iter().find(|hand| trigger.matches(hand)) else {
                state.started_at = None;
                state.ready = true;
                continue;
            };

            let started_at = *state.started_at.get_or_insert(timestamp);
            if !state.ready {
                continue;
            }

            let held_ms = timestamp.saturating_sub(started_at);
            let cooldown_ready = state
                .last_fired_at
                .map_or(true, |last| timestamp.saturating_sub(last) >= trigger.cooldown_ms);

            if held_ms >= trigger.hold_ms && cooldown_ready {
                state.last_fired_at = Some(timestamp);
                state.ready = false;

                debug!("Trigger '{}' fired after {}ms hold", trigger.id, held_ms);
                fired.push(TriggerFired {
                    trigger: trigger.clone(),
                    hand: hand.clone(),
                    hands: hands.to_vec(),
                    held_ms,
                    timestamp,
                });
            }
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{ClassifierMetrics, MatchSource, PoseFeature, PoseMatch};

    fn hand(handedness: Handedness, slot: Option<usize>, gestures: Vec<Gesture>) -> HandFrame {
        HandFrame {
            landmarks: Vec::new(),
            handedness,
            detection_score: 0.9,
            gestures,
            metrics: ClassifierMetrics::default(),
            feature: PoseFeature::default(),
            pose_match: slot.map(|slot_index| PoseMatch {
                slot_index,
                label: format!("pose_{}", slot_index),
                distance: 0.05,
                vector_distance: 0.05,
                pair_distance: 0.05,
                sample_count: 1,
                matched_sample_id: None,
                source: MatchSource::TemplateSamples,
            }),
        }
    }

    fn slot_engine() -> TriggerEngine {
        TriggerEngine::new(vec![TriggerDefinition::for_slot("t", 0).with_timing(100, 200)])
    }

    #[test]
    fn test_fires_exactly_when_hold_is_reached() {
        let mut engine = slot_engine();
        let hands = vec![
            hand(Handedness::Right, Some(0), vec![]),
            hand(Handedness::Left, None, vec![Gesture::Fist]),
        ];

        for t in [0, 40, 80, 99] {
            assert!(engine.process_frame(t, &hands).is_empty(), "fired early at t={}", t);
        }

        let fired = engine.process_frame(100, &hands);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].held_ms, 100);
        assert_eq!(fired[0].timestamp, 100);
        assert_eq!(fired[0].hands.len(), 2);
        assert_eq!(fired[0].hand.pose_slot(), Some(0));
    }

    #[test]
    fn test_held_pose_does_not_refire() {
        let mut engine = slot_engine();
        let hands = vec![hand(Handedness::Right, Some(0), vec![])];

        engine.process_frame(0, &hands);
        assert_eq!(engine.process_frame(100, &hands).len(), 1);

        // Still held well past the cooldown
        for t in [150, 300, 500, 1000] {
            assert!(engine.process_frame(t, &hands).is_empty());
        }
    }

    #[test]
    fn test_release_restarts_hold() {
        let mut engine = slot_engine();
        let hands = vec![hand(Handedness::Right, Some(0), vec![])];

        engine.process_frame(0, &hands);
        assert_eq!(engine.process_frame(100, &hands).len(), 1);
        assert!(engine.process_frame(150, &hands).is_empty());

        // Released, then presented again at t=250
        assert!(engine.process_frame(200, &[]).is_empty());
        let state = engine.state("t").unwrap();
        assert_eq!(state.started_at, None);
        assert!(state.ready);

        assert!(engine.process_frame(250, &hands).is_empty());
        // Cooldown is satisfied at t=300 but the hold is not
        assert!(engine.process_frame(300, &hands).is_empty());
        let fired = engine.process_frame(350, &hands);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].held_ms, 100);
    }

    #[test]
    fn test_cooldown_blocks_quick_refire() {
        let mut engine = TriggerEngine::new(vec![
            TriggerDefinition::for_slot("t", 0).with_timing(0, 500)
        ]);
        let hands = vec![hand(Handedness::Right, Some(0), vec![])];

        assert_eq!(engine.process_frame(0, &hands).len(), 1);
        engine.process_frame(10, &[]);
        assert!(engine.process_frame(20, &hands).is_empty());
        assert_eq!(engine.process_frame(500, &hands).len(), 1);
    }

    #[test]
    fn test_hold_starts_while_not_ready() {
        let mut engine = slot_engine();
        let hands = vec![hand(Handedness::Right, Some(0), vec![])];

        engine.process_frame(0, &hands);
        engine.process_frame(100, &hands);
        let state = engine.state("t").unwrap();
        assert!(!state.ready);
        assert_eq!(state.started_at, Some(0));
        assert_eq!(state.last_fired_at, Some(100));
    }

    #[test]
    fn test_hand_filter_and_gesture_trigger() {
        let mut engine = TriggerEngine::new(vec![
            TriggerDefinition::for_gesture("pinch-left", Gesture::Pinch)
                .with_timing(0, 0)
                .with_hand(HandFilter::Left),
        ]);

        let right = vec![hand(Handedness::Right, None, vec![Gesture::Pinch])];
        assert!(engine.process_frame(0, &right).is_empty());

        let left = vec![hand(Handedness::Left, None, vec![Gesture::Pinch])];
        assert_eq!(engine.process_frame(10, &left).len(), 1);
    }

    #[test]
    fn test_register_resets_state() {
        let mut engine = slot_engine();
        let hands = vec![hand(Handedness::Right, Some(0), vec![])];
        engine.process_frame(0, &hands);
        engine.process_frame(100, &hands);

        engine.register(vec![TriggerDefinition::for_slot("t", 0)]);
        assert_eq!(engine.state("t"), Some(TriggerState::default()));
        assert!(engine.state("missing").is_none());
    }

    #[test]
    fn test_definition_defaults_from_yaml() {
        let def: TriggerDefinition = serde_yaml::from_str(
            "id: pose-0-trigger\npose_slot: 0\naction:\n  type: pose-action\n  default_action_id: read_summarize\n",
        )
        .unwrap();
        assert_eq!(def.hold_ms, DEFAULT_HOLD_MS);
        assert_eq!(def.cooldown_ms, DEFAULT_COOLDOWN_MS);
        assert_eq!(def.hand, HandFilter::Any);
        assert_eq!(
            def.action.unwrap().default_action_id.as_deref(),
            Some("read_summarize")
        );
    }
}
