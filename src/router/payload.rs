//! Routing view of a fired trigger

use crate::pose::{Gesture, HandFrame, Handedness, PoseMatch};
use crate::trigger::{TriggerAction, TriggerFired};
use serde::Serialize;

/// Where a detected modifier came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModifierSource {
    #[default]
    None,
    SecondaryHand,
    Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierState {
    pub detected: bool,
    pub gesture: Option<Gesture>,
    pub expected_gesture: Option<Gesture>,
    pub handedness: Option<Handedness>,
    pub source: ModifierSource,
}

/// Per-hand digest; `is_primary` marks the hand that satisfied the trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandSummary {
    pub handedness: Handedness,
    pub gestures: Vec<Gesture>,
    pub pose_slot: Option<usize>,
    pub score: f64,
    pub is_primary: bool,
}

impl HandSummary {
    fn new(hand: &HandFrame, is_primary: bool) -> Self {
        Self {
            handedness: hand.handedness,
            gestures: hand.gestures.clone(),
            pose_slot: hand.pose_slot(),
            score: hand.detection_score,
            is_primary,
        }
    }
}

/// Everything the router needs to know about one firing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    pub trigger_id: String,
    /// Trigger gesture, else the matched pose label
    pub gesture: Option<String>,
    pub trigger_pose_slot: Option<usize>,
    pub action: Option<TriggerAction>,
    pub handedness: Handedness,
    pub timestamp: String,
    pub held_ms: u64,
    pub pose: Option<PoseMatch>,
    pub hands: Vec<HandSummary>,
    /// Fist on an opposite non-primary hand; refined by the router's modifier config
    pub modifier: ModifierState,
}

impl TriggerPayload {
    pub fn from_fired(fired: &TriggerFired) -> Self {
        let pose = fired.hand.pose_match.clone();

        let hands = if fired.hands.is_empty() {
            vec![HandSummary::new(&fired.hand, true)]
        } else {
            let primary = fired.hands.iter().position(|hand| *hand == fired.hand);
            fired
                .hands
                .iter()
                .enumerate()
                .map(|(index, hand)| HandSummary::new(hand, Some(index) == primary))
                .collect()
        };

        Self {
            trigger_id: fired.trigger.id.clone(),
            gesture: fired
                .trigger
                .gesture
                .map(|gesture| gesture.as_str().to_string())
                .or_else(|| pose.as_ref().map(|pose| pose.label.clone())),
            trigger_pose_slot: fired.trigger.pose_slot,
            action: fired.trigger.action.clone(),
            handedness: fired.hand.handedness,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            held_ms: fired.held_ms,
            modifier: default_modifier(fired.hand.handedness, &hands),
            pose,
            hands,
        }
    }

    /// Matched slot, else the trigger's configured slot
    pub fn pose_slot(&self) -> Option<usize> {
        self.pose.as_ref().map(|pose| pose.slot_index).or(self.trigger_pose_slot)
    }

    /// Non-blank label of the matched pose
    pub fn pose_label(&self) -> Option<&str> {
        self.pose
            .as_ref()
            .map(|pose| pose.label.trim())
            .filter(|label| !label.is_empty())
    }
}

/// Fist on a non-primary hand of the other handedness
///
/// An unknown primary accepts any other hand.
fn default_modifier(primary: Handedness, hands: &[HandSummary]) -> ModifierState {
    hands
        .iter()
        .filter(|hand| !hand.is_primary)
        .filter(|hand| primary == Handedness::Unknown || hand.handedness != primary)
        .find(|hand| hand.gestures.contains(&Gesture::Fist))
        .map(|hand| ModifierState {
            detected: true,
            gesture: Some(Gesture::Fist),
            expected_gesture: None,
            handedness: Some(hand.handedness),
            source: ModifierSource::SecondaryHand,
        })
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pose::{ClassifierMetrics, MatchSource, PoseFeature};
    use crate::trigger::TriggerDefinition;

    pub(crate) fn hand(handedness: Handedness, gestures: &[Gesture], slot: Option<usize>, score: f64) -> HandFrame {
        HandFrame {
            landmarks: Vec::new(),
            handedness,
            detection_score: score,
            gestures: gestures.to_vec(),
            metrics: ClassifierMetrics::default(),
            feature: PoseFeature::default(),
            pose_match: slot.map(|slot_index| PoseMatch {
                slot_index,
                label: format!("slot{}", slot_index),
                distance: 0.05,
                vector_distance: 0.04,
                pair_distance: 0.09,
                sample_count: 2,
                matched_sample_id: None,
                source: MatchSource::TemplateSamples,
            }),
        }
    }

    pub(crate) fn fired(primary: HandFrame, others: Vec<HandFrame>) -> TriggerFired {
        let slot = primary.pose_slot().unwrap_or(0);
        let mut hands = vec![primary.clone()];
        hands.extend(others);
        TriggerFired {
            trigger: TriggerDefinition::for_slot(format!("pose-{}-trigger", slot), slot),
            hand: primary,
            hands,
            held_ms: 420,
            timestamp: 1_000,
        }
    }

    #[test]
    fn test_payload_marks_primary_and_default_modifier() {
        let primary = hand(Handedness::Right, &[Gesture::ThumbsUp], Some(0), 0.9);
        let other = hand(Handedness::Left, &[Gesture::Fist], None, 0.8);
        let payload = TriggerPayload::from_fired(&fired(primary, vec![other]));

        assert_eq!(payload.trigger_id, "pose-0-trigger");
        assert_eq!(payload.pose_slot(), Some(0));
        assert_eq!(payload.pose_label(), Some("slot0"));
        assert_eq!(payload.gesture.as_deref(), Some("slot0"));
        assert!(payload.hands[0].is_primary);
        assert!(!payload.hands[1].is_primary);
        assert!(payload.modifier.detected);
        assert_eq!(payload.modifier.handedness, Some(Handedness::Left));
        assert_eq!(payload.modifier.source, ModifierSource::SecondaryHand);
    }

    #[test]
    fn test_same_hand_fist_is_not_a_default_modifier() {
        let primary = hand(Handedness::Right, &[Gesture::ThumbsUp], Some(0), 0.9);
        let other = hand(Handedness::Right, &[Gesture::Fist], None, 0.8);
        let payload = TriggerPayload::from_fired(&fired(primary, vec![other]));
        assert!(!payload.modifier.detected);

        let primary = hand(Handedness::Unknown, &[Gesture::ThumbsUp], Some(0), 0.9);
        let other = hand(Handedness::Unknown, &[Gesture::Fist], None, 0.8);
        let payload = TriggerPayload::from_fired(&fired(primary, vec![other]));
        assert!(payload.modifier.detected);
    }

    #[test]
    fn test_slot_falls_back_to_trigger() {
        let primary = hand(Handedness::Unknown, &[], None, 0.5);
        let payload = TriggerPayload::from_fired(&fired(primary, Vec::new()));
        assert_eq!(payload.pose_slot(), Some(0));
        assert_eq!(payload.pose_label(), None);
        assert!(!payload.modifier.detected);
    }

    #[test]
    fn test_empty_hand_list_uses_trigger_hand() {
        let primary = hand(Handedness::Left, &[Gesture::Victory], Some(2), 0.7);
        let mut event = fired(primary, Vec::new());
        event.hands.clear();

        let payload = TriggerPayload::from_fired(&event);
        assert_eq!(payload.hands.len(), 1);
        assert!(payload.hands[0].is_primary);
    }
}
