//! Hand and pose type definitions
//!
//! Defines the landmark, gesture, feature and template types shared by the
//! feature extractor, the classifier, the template library and the trigger engine.

use serde::{Deserialize, Serialize};

/// Number of landmarks the detector yields per hand
pub const LANDMARK_COUNT: usize = 21;

/// Landmark indices used by the geometry code
pub mod joint {
    pub const WRIST: usize = 0;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_TIP: usize = 20;
}

/// One 3-D keypoint, image-normalized or relative
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkPoint {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl LandmarkPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &LandmarkPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance from the origin
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Which hand the detector believes it saw
///
/// Detector labels such as `"Left"` or `"right-hand"` are folded into the
/// three canonical values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Handedness {
    Left,
    Right,
    #[default]
    Unknown,
}

impl Handedness {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("left") {
            Handedness::Left
        } else if lower.contains("right") {
            Handedness::Right
        } else {
            Handedness::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Left => "left",
            Handedness::Right => "right",
            Handedness::Unknown => "unknown",
        }
    }
}

impl From<String> for Handedness {
    fn from(raw: String) -> Self {
        Handedness::parse(&raw)
    }
}

impl From<Handedness> for String {
    fn from(hand: Handedness) -> Self {
        hand.as_str().to_string()
    }
}

impl std::fmt::Display for Handedness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete gesture labels produced by the geometric classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Pinch,
    Fist,
    OpenPalm,
    ThumbsUp,
    Victory,
}

impl Gesture {
    pub const ALL: [Gesture; 5] = [
        Gesture::Fist,
        Gesture::Pinch,
        Gesture::OpenPalm,
        Gesture::ThumbsUp,
        Gesture::Victory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Pinch => "pinch",
            Gesture::Fist => "fist",
            Gesture::OpenPalm => "open_palm",
            Gesture::ThumbsUp => "thumbs_up",
            Gesture::Victory => "victory",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL.into_iter().find(|g| g.as_str() == trimmed)
    }
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Neighbouring fingertip distances plus wrist-to-middle-tip, in normalized units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairDistances {
    pub thumb_index: f64,
    pub index_middle: f64,
    pub middle_ring: f64,
    pub ring_pinky: f64,
    pub wrist_middle_tip: f64,
}

impl PairDistances {
    pub fn values(&self) -> [f64; 5] {
        [
            self.thumb_index,
            self.index_middle,
            self.middle_ring,
            self.ring_pinky,
            self.wrist_middle_tip,
        ]
    }
}

/// Position-invariant geometry of one hand
///
/// An empty feature (no landmarks, no embedding) means "no confident hand".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseFeature {
    #[serde(default)]
    pub normalized_landmarks: Vec<LandmarkPoint>,
    #[serde(default)]
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub pair_distances: Option<PairDistances>,
}

impl PoseFeature {
    pub fn is_empty(&self) -> bool {
        self.embedding.is_empty()
    }
}

/// Per-finger extension state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FingerStates {
    pub thumb: bool,
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

impl FingerStates {
    pub fn extended_count(&self) -> usize {
        [self.thumb, self.index, self.middle, self.ring, self.pinky]
            .iter()
            .filter(|extended| **extended)
            .count()
    }
}

/// Raw measurements behind a classification, kept for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierMetrics {
    /// Thumb-tip to index-tip distance (infinite when landmarks are missing)
    pub pinch_distance: f64,
    pub extended_count: usize,
    pub fingers: Option<FingerStates>,
}

impl Default for ClassifierMetrics {
    fn default() -> Self {
        Self {
            pinch_distance: f64::INFINITY,
            extended_count: 0,
            fingers: None,
        }
    }
}

/// Where a pose match came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchSource {
    TemplateSamples,
    DefaultGesture,
}

/// Result of matching one hand against the template library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseMatch {
    pub slot_index: usize,
    pub label: String,
    /// Slot score (top-k mean of weighted sample distances)
    pub distance: f64,
    /// Embedding distance of the single closest sample
    pub vector_distance: f64,
    /// Pair-distance difference of the single closest sample
    pub pair_distance: f64,
    pub sample_count: usize,
    pub matched_sample_id: Option<String>,
    pub source: MatchSource,
}

/// One hand as reported by the external landmark detector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectedHand {
    #[serde(default)]
    pub landmarks: Vec<LandmarkPoint>,
    #[serde(default)]
    pub handedness: Handedness,
    #[serde(default)]
    pub score: f64,
}

/// One detector tick: every hand visible in a frame (possibly none)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameInput {
    /// Frame timestamp in milliseconds; the receiver's clock is used when absent
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub hands: Vec<DetectedHand>,
}

/// A detected hand enriched with everything the pipeline derived for this frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandFrame {
    pub landmarks: Vec<LandmarkPoint>,
    pub handedness: Handedness,
    pub detection_score: f64,
    pub gestures: Vec<Gesture>,
    pub metrics: ClassifierMetrics,
    #[serde(skip)]
    pub feature: PoseFeature,
    pub pose_match: Option<PoseMatch>,
}

impl HandFrame {
    pub fn has_gesture(&self, gesture: Gesture) -> bool {
        self.gestures.contains(&gesture)
    }

    pub fn pose_slot(&self) -> Option<usize> {
        self.pose_match.as_ref().map(|m| m.slot_index)
    }
}

/// One captured template instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseSample {
    pub sample_id: String,
    pub slot_index: usize,
    pub label: String,
    pub captured_at: String,
    pub handedness: Handedness,
    #[serde(default)]
    pub handedness_score: f64,
    pub raw_landmarks: Vec<LandmarkPoint>,
    pub feature: PoseFeature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector_info: Option<serde_json::Value>,
}

/// A named bucket of samples; samples are kept in capture order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseSlot {
    pub slot_index: usize,
    pub label: String,
    pub samples: Vec<PoseSample>,
    pub updated_at: String,
}

/// ISO-8601 timestamp with millisecond precision
pub fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handedness_parse_detector_labels() {
        assert_eq!(Handedness::parse("Left"), Handedness::Left);
        assert_eq!(Handedness::parse("RIGHT hand"), Handedness::Right);
        assert_eq!(Handedness::parse(""), Handedness::Unknown);

        let parsed: Handedness = serde_json::from_str("\"Right\"").unwrap();
        assert_eq!(parsed, Handedness::Right);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"right\"");
    }

    #[test]
    fn test_gesture_round_trip_names() {
        for gesture in Gesture::ALL {
            assert_eq!(Gesture::parse(gesture.as_str()), Some(gesture));
        }
        assert_eq!(Gesture::parse("wave"), None);
    }
}
