//! Migration of persisted pose library documents
//!
//! Accepted shapes, oldest first:
//! - a bare array of slots
//! - `{labels, poses}` or `{version, labels, slots}` objects
//! - a slot that is a single sample instead of `{samples: [...]}`
//! - samples whose feature lives under `estimation` and detector data under `mediapipe`
//!
//! Anything unusable is dropped: invalid samples vanish, a slot left without
//! samples becomes empty, and a document without a slot array yields `None`.

use super::types::{Handedness, LandmarkPoint, PoseFeature, PoseSample, PoseSlot};
use serde_json::Value;

/// Labels and slots recovered from a persisted document
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedState {
    pub labels: Vec<String>,
    pub slots: Vec<Option<PoseSlot>>,
}

/// Trimmed label, or `fallback` when blank
pub fn sanitize_label(value: Option<&str>, fallback: &str) -> String {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => fallback.to_string(),
    }
}

/// Label used for a slot nobody has named
pub fn default_slot_label(slot_index: usize) -> String {
    format!("pose_{}", slot_index)
}

/// Bring any accepted document shape to the current model
///
/// `current_labels` supplies the fallback for missing or blank labels.
pub fn normalize_state(raw: &Value, max_poses: usize, current_labels: &[String]) -> Option<NormalizedState> {
    let (raw_slots, raw_labels) = match raw {
        Value::Array(slots) => (slots, None),
        Value::Object(map) => {
            let slots = map
                .get("slots")
                .and_then(Value::as_array)
                .or_else(|| map.get("poses").and_then(Value::as_array))?;
            (slots, map.get("labels").and_then(Value::as_array))
        }
        _ => return None,
    };

    let labels: Vec<String> = (0..max_poses)
        .map(|index| {
            let fallback = current_labels
                .get(index)
                .cloned()
                .unwrap_or_else(|| default_slot_label(index));
            let requested = raw_labels.and_then(|labels| labels.get(index)).and_then(Value::as_str);
            sanitize_label(requested, &fallback)
        })
        .collect();

    let slots = (0..max_poses)
        .map(|index| {
            raw_slots
                .get(index)
                .and_then(|value| normalize_slot(value, index, &labels[index]))
        })
        .collect();

    Some(NormalizedState { labels, slots })
}

fn normalize_slot(value: &Value, slot_index: usize, label: &str) -> Option<PoseSlot> {
    if value.is_null() {
        return None;
    }

    if let Some(raw_samples) = value.get("samples").and_then(Value::as_array) {
        let samples: Vec<PoseSample> = raw_samples
            .iter()
            .enumerate()
            .filter_map(|(sample_index, sample)| normalize_sample(sample, slot_index, label, sample_index))
            .collect();

        let last_captured = samples.last()?.captured_at.clone();
        let updated_at = value
            .get("updatedAt")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(last_captured);

        return Some(PoseSlot {
            slot_index,
            label: label.to_string(),
            samples,
            updated_at,
        });
    }

    let sample = normalize_sample(value, slot_index, label, 0)?;
    Some(PoseSlot {
        slot_index,
        label: label.to_string(),
        updated_at: sample.captured_at.clone(),
        samples: vec![sample],
    })
}

fn normalize_sample(value: &Value, slot_index: usize, label: &str, sample_index: usize) -> Option<PoseSample> {
    let raw_landmarks: Vec<LandmarkPoint> =
        serde_json::from_value(value.get("rawLandmarks")?.clone()).ok()?;

    let feature_value = value.get("feature").or_else(|| value.get("estimation"))?;
    let feature: PoseFeature = serde_json::from_value(feature_value.clone()).ok()?;
    if feature.is_empty() {
        return None;
    }

    let captured_at = match value.get("capturedAt") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => super::types::iso_now(),
    };

    let sample_id = value
        .get("sampleId")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("slot-{}-sample-{}-{}", slot_index, sample_index, captured_at));

    let handedness = value
        .get("handedness")
        .and_then(Value::as_str)
        .map(Handedness::parse)
        .unwrap_or_default();

    let detector_info = value
        .get("detectorInfo")
        .or_else(|| value.get("mediapipe"))
        .filter(|info| !info.is_null())
        .cloned();

    Some(PoseSample {
        sample_id,
        slot_index,
        label: label.to_string(),
        captured_at,
        handedness,
        handedness_score: value.get("handednessScore").and_then(Value::as_f64).unwrap_or(0.0),
        raw_landmarks,
        feature,
        detector_info,
    })
}
