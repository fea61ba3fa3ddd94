//! Hand pose analysis
//!
//! Geometry features, threshold gesture classification and the user-trained
//! template library with its snapshot history.

pub mod classifier;
pub mod features;
pub mod library;
pub mod migrate;
pub mod snapshot;
pub mod types;

pub use classifier::{classify, Classification};
pub use features::{embedding_distance, extract_features, pair_distance};
pub use library::{LibraryError, LibraryOptions, PoseLibrary, SharedLibrary};
pub use snapshot::{LibrarySnapshot, LibraryState, SnapshotSummary};
pub use types::*;

impl HandFrame {
    /// Classify and featurize a detected hand; matching is left to the caller
    pub fn analyze(detected: DetectedHand) -> Self {
        let Classification { gestures, metrics } = classify(&detected.landmarks, detected.handedness);
        let feature = extract_features(&detected.landmarks);

        Self {
            landmarks: detected.landmarks,
            handedness: detected.handedness,
            detection_score: detected.score,
            gestures,
            metrics,
            feature,
            pose_match: None,
        }
    }
}
