//! Secondary-hand modifier and action resolution

use super::actions::ActionId;
use super::payload::{ModifierSource, ModifierState, TriggerPayload};
use super::settings::{ModifierConfig, RouterSettings};
use crate::pose::Handedness;
use serde::Serialize;

/// Concrete action chosen for a firing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    pub base_action_id: ActionId,
    pub action_id: ActionId,
    pub modifier: ModifierState,
}

/// Look for the slot's expected gesture on a hand other than the primary
///
/// A secondary hand must differ in handedness from the primary, unless the
/// primary's handedness is unknown. Failing that, a payload-level modifier
/// with the same gesture is accepted.
pub fn resolve_modifier(config: &ModifierConfig, payload: &TriggerPayload, slot: usize) -> ModifierState {
    if !config.enabled {
        return ModifierState::default();
    }

    let expected = config.expected_gesture(slot);
    let primary = payload.handedness;

    let secondary = payload
        .hands
        .iter()
        .filter(|hand| !hand.is_primary)
        .filter(|hand| primary == Handedness::Unknown || hand.handedness != primary)
        .find(|hand| hand.gestures.contains(&expected));

    if let Some(hand) = secondary {
        return ModifierState {
            detected: true,
            gesture: Some(expected),
            expected_gesture: Some(expected),
            handedness: Some(hand.handedness),
            source: ModifierSource::SecondaryHand,
        };
    }

    if payload.modifier.detected && payload.modifier.gesture == Some(expected) {
        return ModifierState {
            detected: true,
            gesture: Some(expected),
            expected_gesture: Some(expected),
            handedness: Some(payload.modifier.handedness.unwrap_or(Handedness::Unknown)),
            source: ModifierSource::Payload,
        };
    }

    ModifierState {
        expected_gesture: Some(expected),
        ..Default::default()
    }
}

/// Base action for the slot, swapped for the alternate when a modifier is held
///
/// An alternate of `none` keeps the base action.
pub fn resolve_routing(settings: &RouterSettings, payload: &TriggerPayload, slot: usize) -> Routing {
    let base_action_id = settings.action_for(slot);
    let modifier = resolve_modifier(&settings.modifier, payload, slot);

    let alternate = settings.modifier.alternate_action(slot);
    let action_id = if modifier.detected && !alternate.is_none() {
        alternate
    } else {
        base_action_id
    };

    Routing {
        base_action_id,
        action_id,
        modifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Gesture;
    use crate::router::payload::tests::{fired, hand};

    fn payload(primary: Handedness, others: &[(Handedness, Gesture)]) -> TriggerPayload {
        let others = others
            .iter()
            .map(|(handedness, gesture)| hand(*handedness, &[*gesture], None, 0.8))
            .collect();
        TriggerPayload::from_fired(&fired(hand(primary, &[Gesture::ThumbsUp], Some(0), 0.9), others))
    }

    #[test]
    fn test_opposite_hand_fist_routes_to_alternate() {
        let settings = RouterSettings::default();
        let routing = resolve_routing(&settings, &payload(Handedness::Right, &[(Handedness::Left, Gesture::Fist)]), 0);

        assert_eq!(routing.base_action_id, ActionId::ReadSummarize);
        assert_eq!(routing.action_id, ActionId::ResearchAgentAlt);
        assert!(routing.modifier.detected);
        assert_eq!(routing.modifier.gesture, Some(Gesture::Fist));
        assert_eq!(routing.modifier.handedness, Some(Handedness::Left));
        assert_eq!(routing.modifier.source, ModifierSource::SecondaryHand);
    }

    #[test]
    fn test_same_handedness_is_not_a_modifier() {
        let settings = RouterSettings::default();
        let event = payload(Handedness::Right, &[(Handedness::Right, Gesture::Fist)]);
        assert!(!event.modifier.detected);

        let routing = resolve_routing(&settings, &event, 0);
        assert!(!routing.modifier.detected);
        assert_eq!(routing.modifier.expected_gesture, Some(Gesture::Fist));
        assert_eq!(routing.action_id, ActionId::ReadSummarize);
    }

    #[test]
    fn test_unknown_primary_accepts_any_other_hand() {
        let settings = RouterSettings::default();
        let routing = resolve_routing(&settings, &payload(Handedness::Unknown, &[(Handedness::Unknown, Gesture::Pinch)]), 1);

        assert_eq!(routing.modifier.gesture, Some(Gesture::Pinch));
        assert_eq!(routing.action_id, ActionId::ScreenshotAnalyzeAlt);
    }

    #[test]
    fn test_wrong_gesture_keeps_base_action() {
        let settings = RouterSettings::default();
        let routing = resolve_routing(&settings, &payload(Handedness::Right, &[(Handedness::Left, Gesture::Victory)]), 1);
        assert!(!routing.modifier.detected);
        assert_eq!(routing.action_id, ActionId::ScreenshotAnalyze);
    }

    #[test]
    fn test_none_alternate_falls_back_to_base() {
        let mut settings = RouterSettings::default();
        settings.modifier.per_pose_alt_action.insert(0, ActionId::None);

        let routing = resolve_routing(&settings, &payload(Handedness::Right, &[(Handedness::Left, Gesture::Fist)]), 0);
        assert!(routing.modifier.detected);
        assert_eq!(routing.action_id, ActionId::ReadSummarize);
    }

    #[test]
    fn test_disabled_modifier_reports_nothing() {
        let mut settings = RouterSettings::default();
        settings.modifier.enabled = false;

        let routing = resolve_routing(&settings, &payload(Handedness::Right, &[(Handedness::Left, Gesture::Fist)]), 0);
        assert_eq!(routing.modifier, ModifierState::default());
        assert_eq!(routing.action_id, ActionId::ReadSummarize);
    }

    #[test]
    fn test_payload_modifier_is_honoured() {
        let settings = RouterSettings::default();
        let mut event = payload(Handedness::Right, &[]);
        event.modifier = ModifierState {
            detected: true,
            gesture: Some(Gesture::Fist),
            handedness: None,
            expected_gesture: None,
            source: ModifierSource::SecondaryHand,
        };

        let routing = resolve_routing(&settings, &event, 2);
        assert_eq!(routing.modifier.source, ModifierSource::Payload);
        assert_eq!(routing.modifier.handedness, Some(Handedness::Unknown));
        assert_eq!(routing.action_id, ActionId::ConversationLiveElevenlabs);
    }
}
