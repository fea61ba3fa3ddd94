//! Threshold-based gesture classification
//!
//! Works in image space (y grows downward). Several labels may hold at once;
//! a pinch suppresses open_palm, fist and victory.

use super::types::{joint, ClassifierMetrics, FingerStates, Gesture, Handedness, LandmarkPoint, LANDMARK_COUNT};

/// Thumb-index tip distance below which a pinch is reported
pub const PINCH_THRESHOLD: f64 = 0.06;

/// How far above the wrist the thumb tip must be to count as raised
const THUMB_RAISED_MARGIN: f64 = 0.03;

/// How far above the wrist the thumb tip must be for thumbs_up
const THUMBS_UP_MARGIN: f64 = 0.05;

/// Gesture labels plus the measurements behind them
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
    pub gestures: Vec<Gesture>,
    pub metrics: ClassifierMetrics,
}

fn is_finger_extended(landmarks: &[LandmarkPoint], tip: usize, pip: usize, mcp: usize) -> bool {
    landmarks[tip].y < landmarks[pip].y && landmarks[pip].y < landmarks[mcp].y
}

fn is_thumb_extended(landmarks: &[LandmarkPoint], handedness: Handedness) -> bool {
    let tip = landmarks[joint::THUMB_TIP];
    let ip = landmarks[joint::THUMB_IP];
    let mcp = landmarks[joint::THUMB_MCP];
    let wrist = landmarks[joint::WRIST];

    let horizontal = match handedness {
        Handedness::Right => tip.x < ip.x && ip.x < mcp.x,
        Handedness::Left | Handedness::Unknown => tip.x > ip.x && ip.x > mcp.x,
    };
    let vertical = tip.y < wrist.y - THUMB_RAISED_MARGIN;

    horizontal || vertical
}

/// Classify one hand's landmarks into gesture labels
pub fn classify(landmarks: &[LandmarkPoint], handedness: Handedness) -> Classification {
    if landmarks.len() < LANDMARK_COUNT {
        return Classification::default();
    }

    let fingers = FingerStates {
        thumb: is_thumb_extended(landmarks, handedness),
        index: is_finger_extended(landmarks, joint::INDEX_TIP, joint::INDEX_PIP, joint::INDEX_MCP),
        middle: is_finger_extended(landmarks, joint::MIDDLE_TIP, joint::MIDDLE_PIP, joint::MIDDLE_MCP),
        ring: is_finger_extended(landmarks, joint::RING_TIP, joint::RING_PIP, joint::RING_MCP),
        pinky: is_finger_extended(landmarks, joint::PINKY_TIP, joint::PINKY_PIP, joint::PINKY_MCP),
    };

    let pinch_distance = landmarks[joint::THUMB_TIP].distance(&landmarks[joint::INDEX_TIP]);
    let is_pinch = pinch_distance < PINCH_THRESHOLD;
    let extended_count = fingers.extended_count();

    let is_open_palm = extended_count >= 4 && !is_pinch;
    let is_fist = extended_count == 0 && !is_pinch;
    let is_victory = fingers.index && fingers.middle && !fingers.ring && !fingers.pinky && !is_pinch;
    let is_thumbs_up = fingers.thumb
        && !fingers.index
        && !fingers.middle
        && !fingers.ring
        && !fingers.pinky
        && landmarks[joint::THUMB_TIP].y < landmarks[joint::WRIST].y - THUMBS_UP_MARGIN;

    let gestures = [
        (is_pinch, Gesture::Pinch),
        (is_victory, Gesture::Victory),
        (is_thumbs_up, Gesture::ThumbsUp),
        (is_open_palm, Gesture::OpenPalm),
        (is_fist, Gesture::Fist),
    ]
    .into_iter()
    .filter_map(|(holds, gesture)| holds.then_some(gesture))
    .collect();

    Classification {
        gestures,
        metrics: ClassifierMetrics {
            pinch_distance,
            extended_count,
            fingers: Some(fingers),
        },
    }
}
