//! Landmark normalization and pose feature extraction
//!
//! Features are invariant to hand position and uniform scale. In-plane rotation
//! is deliberately kept: orientation separates otherwise similar poses.

use super::types::{joint, LandmarkPoint, PairDistances, PoseFeature, LANDMARK_COUNT};

/// Minimum normalization scale
const SCALE_FLOOR: f64 = 1e-6;

/// Decimal places kept in embeddings and pair distances
const PRECISION: i32 = 6;

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

/// Translate to the wrist and scale by the largest point norm
///
/// Returns an empty vector when fewer than 21 landmarks are supplied.
pub fn normalize_landmarks(landmarks: &[LandmarkPoint]) -> Vec<LandmarkPoint> {
    if landmarks.len() < LANDMARK_COUNT {
        return Vec::new();
    }

    let wrist = landmarks[joint::WRIST];
    let translated: Vec<LandmarkPoint> = landmarks
        .iter()
        .map(|p| LandmarkPoint::new(p.x - wrist.x, p.y - wrist.y, p.z - wrist.z))
        .collect();

    let scale = translated
        .iter()
        .map(LandmarkPoint::norm)
        .fold(SCALE_FLOOR, f64::max);

    translated
        .into_iter()
        .map(|p| LandmarkPoint::new(p.x / scale, p.y / scale, p.z / scale))
        .collect()
}

/// Flatten points into an `[x0, y0, z0, x1, ...]` embedding
pub fn flatten_landmarks(landmarks: &[LandmarkPoint]) -> Vec<f64> {
    landmarks
        .iter()
        .flat_map(|p| [p.x, p.y, p.z])
        .map(|v| round_to(v, PRECISION))
        .collect()
}

/// Derive the full pose feature from raw landmarks
pub fn extract_features(landmarks: &[LandmarkPoint]) -> PoseFeature {
    let normalized = normalize_landmarks(landmarks);
    if normalized.is_empty() {
        return PoseFeature::default();
    }

    let dist = |a: usize, b: usize| round_to(normalized[a].distance(&normalized[b]), PRECISION);
    let pair_distances = PairDistances {
        thumb_index: dist(joint::THUMB_TIP, joint::INDEX_TIP),
        index_middle: dist(joint::INDEX_TIP, joint::MIDDLE_TIP),
        middle_ring: dist(joint::MIDDLE_TIP, joint::RING_TIP),
        ring_pinky: dist(joint::RING_TIP, joint::PINKY_TIP),
        wrist_middle_tip: dist(joint::WRIST, joint::MIDDLE_TIP),
    };

    let embedding = flatten_landmarks(&normalized);
    let normalized_landmarks = normalized
        .iter()
        .map(|p| {
            LandmarkPoint::new(
                round_to(p.x, PRECISION),
                round_to(p.y, PRECISION),
                round_to(p.z, PRECISION),
            )
        })
        .collect();

    PoseFeature {
        normalized_landmarks,
        embedding,
        pair_distances: Some(pair_distances),
    }
}

/// Mean absolute difference between two embeddings
///
/// Infinite when the lengths differ or either side is empty.
pub fn embedding_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::INFINITY;
    }

    let total: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    total / a.len() as f64
}

/// Mean absolute difference over the pair-distance keys
pub fn pair_distance(a: Option<&PairDistances>, b: Option<&PairDistances>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let lhs = a.values();
            let rhs = b.values();
            let total: f64 = lhs.iter().zip(rhs.iter()).map(|(x, y)| (x - y).abs()).sum();
            total / lhs.len() as f64
        }
        _ => f64::INFINITY,
    }
}
