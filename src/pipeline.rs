//! Per-frame processing: classify, featurize, match, trigger
//!
//! Runs synchronously once per detector frame on the main loop. Template
//! matches take precedence; when no template is close enough, the static
//! gesture-to-slot classes supply a `default-gesture` match.

use crate::pose::{FrameInput, Gesture, HandFrame, MatchSource, PoseLibrary, PoseMatch, SharedLibrary};
use crate::trigger::{TriggerDefinition, TriggerEngine, TriggerFired};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Static gesture assigned to a template slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseClass {
    pub slot: usize,
    pub gesture: Gesture,
}

/// Built-in slot classes: thumbs up, open palm, victory
pub fn default_pose_classes() -> Vec<PoseClass> {
    vec![
        PoseClass { slot: 0, gesture: Gesture::ThumbsUp },
        PoseClass { slot: 1, gesture: Gesture::OpenPalm },
        PoseClass { slot: 2, gesture: Gesture::Victory },
    ]
}

/// Hand with the highest detection score
pub fn primary_hand(hands: &[HandFrame]) -> Option<&HandFrame> {
    hands
        .iter()
        .max_by(|a, b| a.detection_score.total_cmp(&b.detection_score))
}

/// Closest pose match across all hands
pub fn best_match(hands: &[HandFrame]) -> Option<&PoseMatch> {
    hands
        .iter()
        .filter_map(|hand| hand.pose_match.as_ref())
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

/// First class, in slot order, whose gesture the hand shows
fn default_gesture_match(hand: &HandFrame, classes: &[PoseClass], library: &PoseLibrary) -> Option<PoseMatch> {
    let mut ordered: Vec<&PoseClass> = classes.iter().collect();
    ordered.sort_by_key(|class| class.slot);

    ordered
        .into_iter()
        .filter(|class| class.slot < library.max_poses())
        .find(|class| hand.has_gesture(class.gesture))
        .map(|class| PoseMatch {
            slot_index: class.slot,
            label: library.slot_label(class.slot),
            distance: 0.0,
            vector_distance: 0.0,
            pair_distance: 0.0,
            sample_count: library.slot(class.slot).map_or(0, |slot| slot.samples.len()),
            matched_sample_id: None,
            source: MatchSource::DefaultGesture,
        })
}

pub struct FramePipeline {
    library: SharedLibrary,
    triggers: TriggerEngine,
    pose_classes: Vec<PoseClass>,
    latest_hands: Vec<HandFrame>,
    last_timestamp: u64,
}

impl FramePipeline {
    pub fn new(library: SharedLibrary, triggers: Vec<TriggerDefinition>, pose_classes: Vec<PoseClass>) -> Self {
        Self {
            library,
            triggers: TriggerEngine::new(triggers),
            pose_classes,
            latest_hands: Vec::new(),
            last_timestamp: 0,
        }
    }

    /// Process one frame and return the triggers it fired
    ///
    /// `now_ms` stands in for frames that carry no timestamp.
    pub fn process(&mut self, frame: FrameInput, now_ms: u64) -> Vec<TriggerFired> {
        let timestamp = frame.timestamp.unwrap_or(now_ms);

        let hands: Vec<HandFrame> = {
            let library = self.library.read();
            frame
                .hands
                .into_iter()
                .map(|detected| {
                    let mut hand = HandFrame::analyze(detected);
                    hand.pose_match = library
                        .match_hand(&hand.feature)
                        .or_else(|| default_gesture_match(&hand, &self.pose_classes, &library));
                    hand
                })
                .collect()
        };

        trace!(
            "Frame {}: {} hand(s), best match {:?}",
            timestamp,
            hands.len(),
            best_match(&hands).map(|m| m.slot_index)
        );

        let fired = self.triggers.process_frame(timestamp, &hands);
        self.latest_hands = hands;
        self.last_timestamp = timestamp;
        fired
    }

    /// Hands seen in the most recent frame
    pub fn latest_hands(&self) -> &[HandFrame] {
        &self.latest_hands
    }

    /// Primary hand of the most recent frame, used for capture
    pub fn capture_candidate(&self) -> Option<HandFrame> {
        primary_hand(&self.latest_hands).cloned()
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::classifier::tests::synthetic_hand;
    use crate::pose::{DetectedHand, Handedness, LibraryOptions};
    use crate::store::MemoryStore;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn shared_library() -> SharedLibrary {
        Arc::new(RwLock::new(PoseLibrary::new(
            LibraryOptions::default(),
            Arc::new(MemoryStore::new()),
            None,
        )))
    }

    fn detected(fingers: [bool; 5], handedness: Handedness, score: f64) -> DetectedHand {
        DetectedHand {
            landmarks: synthetic_hand(fingers),
            handedness,
            score,
        }
    }

    fn frame(timestamp: u64, hands: Vec<DetectedHand>) -> FrameInput {
        FrameInput {
            timestamp: Some(timestamp),
            hands,
        }
    }

    #[test]
    fn test_default_gesture_fallback() {
        let mut pipeline = FramePipeline::new(shared_library(), Vec::new(), default_pose_classes());
        let victory = detected([false, true, true, false, false], Handedness::Right, 0.9);

        pipeline.process(frame(0, vec![victory]), 0);
        let hand = &pipeline.latest_hands()[0];
        let found = hand.pose_match.as_ref().unwrap();
        assert_eq!(found.slot_index, 2);
        assert_eq!(found.label, "peace");
        assert_eq!(found.source, MatchSource::DefaultGesture);
        assert_eq!(found.distance, 0.0);
    }

    #[test]
    fn test_fist_has_no_default_slot() {
        let mut pipeline = FramePipeline::new(shared_library(), Vec::new(), default_pose_classes());
        pipeline.process(frame(0, vec![detected([false; 5], Handedness::Left, 0.9)]), 0);
        assert!(pipeline.latest_hands()[0].pose_match.is_none());
    }

    #[test]
    fn test_template_match_wins_over_gesture() {
        let library = shared_library();
        let fist = detected([false; 5], Handedness::Right, 0.9);
        library
            .write()
            .capture_at(1, &HandFrame::analyze(fist.clone()), None)
            .unwrap();

        let mut pipeline = FramePipeline::new(library, Vec::new(), default_pose_classes());
        pipeline.process(frame(0, vec![fist]), 0);

        let found = pipeline.latest_hands()[0].pose_match.as_ref().unwrap();
        assert_eq!(found.slot_index, 1);
        assert_eq!(found.source, MatchSource::TemplateSamples);
    }

    #[test]
    fn test_fires_trigger_after_hold() {
        let triggers = vec![TriggerDefinition::for_slot("pose-0-trigger", 0).with_timing(420, 1200)];
        let mut pipeline = FramePipeline::new(shared_library(), triggers, default_pose_classes());
        let thumbs_up = || detected([true, false, false, false, false], Handedness::Right, 0.9);

        assert!(pipeline.process(frame(1000, vec![thumbs_up()]), 0).is_empty());
        assert!(pipeline.process(frame(1200, vec![thumbs_up()]), 0).is_empty());
        let fired = pipeline.process(frame(1420, vec![thumbs_up()]), 0);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].trigger.id, "pose-0-trigger");
        assert_eq!(fired[0].held_ms, 420);
    }

    #[test]
    fn test_missing_timestamp_uses_clock() {
        let mut pipeline = FramePipeline::new(shared_library(), Vec::new(), default_pose_classes());
        pipeline.process(FrameInput::default(), 777);
        assert_eq!(pipeline.last_timestamp(), 777);
        assert!(pipeline.capture_candidate().is_none());
    }

    #[test]
    fn test_primary_and_best_helpers() {
        let mut pipeline = FramePipeline::new(shared_library(), Vec::new(), default_pose_classes());
        pipeline.process(
            frame(
                0,
                vec![
                    detected([false; 5], Handedness::Left, 0.4),
                    detected([true; 5], Handedness::Right, 0.95),
                ],
            ),
            0,
        );

        let primary = pipeline.capture_candidate().unwrap();
        assert_eq!(primary.handedness, Handedness::Right);
        assert_eq!(best_match(pipeline.latest_hands()).unwrap().slot_index, 1);
    }
}
