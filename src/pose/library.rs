//! User-trained pose template library
//!
//! A fixed number of slots, each holding up to `max_samples_per_slot` captured
//! samples in capture order. Every mutation persists the library document,
//! records a deduplicated snapshot and emits a [`LibraryEvent`].

use super::features::{embedding_distance, extract_features, pair_distance, round_to};
use super::migrate::{default_slot_label, normalize_state, sanitize_label};
use super::snapshot::{LibraryState, SnapshotHistory, SnapshotSummary};
use super::types::{iso_now, HandFrame, MatchSource, PoseFeature, PoseMatch, PoseSample, PoseSlot};
use crate::events::{EventHub, LibraryEvent};
use crate::store::{SharedStore, LIBRARY_KEY, SNAPSHOTS_KEY};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_POSES: usize = 3;
pub const DEFAULT_MAX_SAMPLES_PER_SLOT: usize = 24;
pub const DEFAULT_MAX_SNAPSHOTS: usize = 12;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.13;

/// Weight of the embedding term in the per-sample distance
const EMBEDDING_WEIGHT: f64 = 0.8;
/// Weight of the pair-distance term in the per-sample distance
const PAIR_WEIGHT: f64 = 0.2;
/// Number of closest samples averaged into a slot score
const TOP_K: usize = 3;

static SAMPLE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Library handle shared by the frame loop, the HTTP API and the REPL
pub type SharedLibrary = Arc<RwLock<PoseLibrary>>;

#[derive(Debug, Error, PartialEq)]
pub enum LibraryError {
    #[error("Invalid pose slot index: {0}")]
    InvalidSlot(usize),

    #[error("Invalid pose state. Expected slots/poses array.")]
    InvalidState,

    #[error("Hand has no usable landmarks")]
    EmptyFeature,

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),
}

/// Library sizing and seeding
#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub max_poses: usize,
    pub max_samples_per_slot: usize,
    pub max_snapshots: usize,
    pub match_threshold: f64,
    /// Requested slot labels; blanks fall back to `pose_<n>`
    pub labels: Vec<String>,
    /// Document used when nothing is persisted yet
    pub initial_state: Option<Value>,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            max_poses: DEFAULT_MAX_POSES,
            max_samples_per_slot: DEFAULT_MAX_SAMPLES_PER_SLOT,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            labels: vec!["thumbs_up".into(), "palm".into(), "peace".into()],
            initial_state: None,
        }
    }
}

/// Per-sample score while matching
struct SampleScore<'a> {
    sample: &'a PoseSample,
    distance: f64,
    vector_distance: f64,
    pair_distance: f64,
}

pub struct PoseLibrary {
    options: LibraryOptions,
    labels: Vec<String>,
    slots: Vec<Option<PoseSlot>>,
    next_capture_index: usize,
    snapshots: SnapshotHistory,
    store: SharedStore,
    events: Option<EventHub>,
}

impl PoseLibrary {
    /// Load the persisted library (or seed it) and record the startup snapshot
    pub fn new(options: LibraryOptions, store: SharedStore, events: Option<EventHub>) -> Self {
        let max_poses = options.max_poses;
        let labels = (0..max_poses)
            .map(|index| {
                sanitize_label(
                    options.labels.get(index).map(String::as_str),
                    &default_slot_label(index),
                )
            })
            .collect();

        let mut library = Self {
            snapshots: SnapshotHistory::new(options.max_snapshots),
            options,
            labels,
            slots: vec![None; max_poses],
            next_capture_index: 0,
            store,
            events,
        };

        let restored = library.load();
        if !restored {
            library.seed();
        }
        library.load_snapshots();

        let reason = if restored { "session-restored" } else { "seeded-defaults" };
        library.record_snapshot(reason, false, false);

        info!(
            "Pose library ready ({} slots, samples {:?})",
            library.options.max_poses,
            library.sample_counts()
        );
        library
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.options
    }

    pub fn max_poses(&self) -> usize {
        self.options.max_poses
    }

    pub fn slot_label(&self, slot_index: usize) -> String {
        self.labels
            .get(slot_index)
            .cloned()
            .unwrap_or_else(|| default_slot_label(slot_index))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn slots(&self) -> &[Option<PoseSlot>] {
        &self.slots
    }

    pub fn slot(&self, slot_index: usize) -> Option<&PoseSlot> {
        self.slots.get(slot_index).and_then(Option::as_ref)
    }

    pub fn sample_counts(&self) -> Vec<usize> {
        self.slots
            .iter()
            .map(|slot| slot.as_ref().map_or(0, |slot| slot.samples.len()))
            .collect()
    }

    pub fn next_capture_index(&self) -> usize {
        self.next_capture_index
    }

    /// Current state as a `{version, labels, slots}` document
    pub fn export_state(&self) -> LibraryState {
        LibraryState::new(self.labels.clone(), self.slots.clone())
    }

    /// Replace the whole library with an imported document
    pub fn import_state(&mut self, raw: &Value) -> Result<LibraryState, LibraryError> {
        self.apply_import(raw, true, Some("imported-state"))
    }

    fn apply_import(&mut self, raw: &Value, emit: bool, snapshot_reason: Option<&str>) -> Result<LibraryState, LibraryError> {
        let normalized =
            normalize_state(raw, self.options.max_poses, &self.labels).ok_or(LibraryError::InvalidState)?;

        self.labels = normalized.labels;
        self.slots = normalized.slots;
        self.next_capture_index = self.first_empty_slot().unwrap_or(0);
        self.persist();

        if let Some(reason) = snapshot_reason {
            self.record_snapshot(reason, false, emit);
        }
        if emit {
            self.emit(LibraryEvent::StateImported {
                labels: self.labels.clone(),
            });
        }

        Ok(self.export_state())
    }

    fn first_empty_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().map_or(true, |slot| slot.samples.is_empty()))
    }

    fn load(&mut self) -> bool {
        let document = match self.store.load(LIBRARY_KEY) {
            Ok(Some(document)) => document,
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to load pose library, using defaults: {:#}", e);
                return false;
            }
        };

        let Some(normalized) = normalize_state(&document, self.options.max_poses, &self.labels) else {
            warn!("Persisted pose library has an unknown shape, using defaults");
            return false;
        };

        self.labels = normalized.labels;
        self.slots = normalized.slots;
        self.next_capture_index = self.first_empty_slot().unwrap_or(0);
        debug!("Restored pose library with samples {:?}", self.sample_counts());
        true
    }

    fn seed(&mut self) {
        let Some(initial) = self.options.initial_state.clone() else {
            return;
        };
        if let Some(normalized) = normalize_state(&initial, self.options.max_poses, &self.labels) {
            self.labels = normalized.labels;
            self.slots = normalized.slots;
            self.next_capture_index = self.first_empty_slot().unwrap_or(0);
        }
    }

    fn persist(&self) {
        let document = match serde_json::to_value(self.export_state()) {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to serialize pose library: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.save(LIBRARY_KEY, &document) {
            warn!("Failed to persist pose library: {:#}", e);
        }
    }

    fn load_snapshots(&mut self) {
        match self.store.load(SNAPSHOTS_KEY) {
            Ok(Some(document)) => {
                self.snapshots = SnapshotHistory::from_document(
                    &document,
                    self.options.max_snapshots,
                    self.options.max_poses,
                    &self.labels,
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load snapshot history: {:#}", e),
        }
    }

    fn persist_snapshots(&self) {
        if let Err(e) = self.store.save(SNAPSHOTS_KEY, &self.snapshots.to_document()) {
            warn!("Failed to persist snapshot history: {:#}", e);
        }
    }

    fn emit(&self, event: LibraryEvent) {
        if let Some(events) = &self.events {
            events.emit_library(event);
        }
    }

    fn record_snapshot(&mut self, reason: &str, force: bool, emit: bool) -> String {
        let (id, created) = self.snapshots.capture(&self.export_state(), reason, force);
        if created {
            self.persist_snapshots();
            debug!("Captured library snapshot {} ({})", id, reason);
            if emit {
                if let Some(snapshot) = self.snapshots.find(&id) {
                    self.emit(LibraryEvent::SnapshotCreated {
                        snapshot: snapshot.summary(),
                    });
                }
            }
        }
        id
    }

    /// Snapshot the current state; deduplicated against the newest entry unless forced
    pub fn capture_snapshot(&mut self, reason: &str, force: bool) -> String {
        self.record_snapshot(reason, force, true)
    }

    pub fn list_snapshots(&self) -> Vec<SnapshotSummary> {
        self.snapshots.list()
    }

    /// Replace the whole state with a stored snapshot
    pub fn restore_snapshot(&mut self, snapshot_id: &str) -> Result<LibraryState, LibraryError> {
        let selected = self
            .snapshots
            .find(snapshot_id)
            .cloned()
            .ok_or_else(|| LibraryError::SnapshotNotFound(snapshot_id.to_string()))?;

        let document =
            serde_json::to_value(selected.state()).map_err(|_| LibraryError::InvalidState)?;
        let reason = format!("restored:{}", selected.id);
        let state = self.apply_import(&document, false, Some(&reason))?;

        info!("Restored library snapshot {}", selected.id);
        self.emit(LibraryEvent::SnapshotRestored {
            snapshot: selected.summary(),
        });
        Ok(state)
    }

    /// Rename a slot and every sample stored in it
    pub fn set_slot_label(&mut self, slot_index: usize, label: &str) -> Result<String, LibraryError> {
        if slot_index >= self.options.max_poses {
            return Err(LibraryError::InvalidSlot(slot_index));
        }

        let next_label = sanitize_label(Some(label), &self.slot_label(slot_index));
        self.labels[slot_index] = next_label.clone();

        if let Some(slot) = self.slots[slot_index].as_mut() {
            slot.label = next_label.clone();
            for sample in &mut slot.samples {
                sample.slot_index = slot_index;
                sample.label = next_label.clone();
            }
        }

        self.persist();
        self.record_snapshot(&format!("renamed-slot-{}", slot_index), false, true);
        self.emit(LibraryEvent::LabelUpdated {
            slot_index,
            label: next_label.clone(),
        });
        Ok(next_label)
    }

    pub fn clear_all(&mut self) {
        self.slots = vec![None; self.options.max_poses];
        self.next_capture_index = 0;
        self.persist();
        self.record_snapshot("cleared-all-slots", false, true);
        self.emit(LibraryEvent::LibraryCleared);
    }

    pub fn clear_slot(&mut self, slot_index: usize) -> Result<(), LibraryError> {
        if slot_index >= self.options.max_poses {
            return Err(LibraryError::InvalidSlot(slot_index));
        }

        self.slots[slot_index] = None;
        self.next_capture_index = self.first_empty_slot().unwrap_or(0);
        self.persist();
        self.record_snapshot(&format!("cleared-slot-{}", slot_index), false, true);
        self.emit(LibraryEvent::SlotCleared { slot_index });
        Ok(())
    }

    /// Slot the next plain `capture` will write to
    pub fn choose_capture_slot(&self) -> usize {
        self.first_empty_slot().unwrap_or(self.next_capture_index)
    }

    /// Capture into the first empty slot, else the rotating next slot
    pub fn capture(&mut self, hand: &HandFrame, detector_info: Option<Value>) -> Result<PoseSample, LibraryError> {
        let slot_index = self.choose_capture_slot();
        self.capture_at(slot_index, hand, detector_info)
    }

    /// Append a sample built from `hand` to a slot, evicting the oldest over capacity
    pub fn capture_at(
        &mut self,
        slot_index: usize,
        hand: &HandFrame,
        detector_info: Option<Value>,
    ) -> Result<PoseSample, LibraryError> {
        if slot_index >= self.options.max_poses {
            return Err(LibraryError::InvalidSlot(slot_index));
        }

        let feature = if hand.feature.is_empty() {
            extract_features(&hand.landmarks)
        } else {
            hand.feature.clone()
        };
        if feature.is_empty() {
            return Err(LibraryError::EmptyFeature);
        }

        let label = self.slot_label(slot_index);
        let captured_at = iso_now();
        let counter = SAMPLE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let sample = PoseSample {
            sample_id: format!(
                "slot-{}-sample-{}-{:04}",
                slot_index,
                chrono::Utc::now().timestamp_millis(),
                counter % 10_000
            ),
            slot_index,
            label: label.clone(),
            captured_at: captured_at.clone(),
            handedness: hand.handedness,
            handedness_score: round_to(hand.detection_score, 4),
            raw_landmarks: hand.landmarks.clone(),
            feature,
            detector_info,
        };

        let max_samples = self.options.max_samples_per_slot;
        let slot = self.slots[slot_index].get_or_insert_with(|| PoseSlot {
            slot_index,
            label: label.clone(),
            samples: Vec::new(),
            updated_at: captured_at.clone(),
        });
        slot.label = label;
        slot.samples.push(sample.clone());
        if slot.samples.len() > max_samples {
            let excess = slot.samples.len() - max_samples;
            slot.samples.drain(..excess);
        }
        slot.updated_at = captured_at;
        let sample_count = slot.samples.len();

        self.next_capture_index = self
            .first_empty_slot()
            .unwrap_or((slot_index + 1) % self.options.max_poses);

        self.persist();
        self.record_snapshot(&format!("captured-slot-{}", slot_index), false, true);
        self.emit(LibraryEvent::SampleCaptured {
            slot_index,
            sample_id: sample.sample_id.clone(),
            sample_count,
        });

        debug!("Captured sample {} into slot {}", sample.sample_id, slot_index);
        Ok(sample)
    }

    /// Best-matching slot for a hand feature, if within the match threshold
    ///
    /// Each sample scores `0.8 * embedding + 0.2 * pair` distance; a slot
    /// scores the mean of its `min(3, n)` best samples.
    pub fn match_hand(&self, feature: &PoseFeature) -> Option<PoseMatch> {
        if feature.is_empty() {
            return None;
        }

        let mut best: Option<(&PoseSlot, f64, SampleScore)> = None;

        for slot in self.slots.iter().flatten() {
            let mut scores: Vec<SampleScore> = slot
                .samples
                .iter()
                .filter_map(|sample| {
                    let vector_distance = embedding_distance(&feature.embedding, &sample.feature.embedding);
                    let pair = pair_distance(
                        feature.pair_distances.as_ref(),
                        sample.feature.pair_distances.as_ref(),
                    );
                    let distance = vector_distance * EMBEDDING_WEIGHT + pair * PAIR_WEIGHT;
                    distance.is_finite().then_some(SampleScore {
                        sample,
                        distance,
                        vector_distance,
                        pair_distance: pair,
                    })
                })
                .collect();

            if scores.is_empty() {
                continue;
            }

            scores.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            let k = TOP_K.min(scores.len());
            let slot_distance = scores[..k].iter().map(|s| s.distance).sum::<f64>() / k as f64;

            if best.as_ref().map_or(true, |(_, distance, _)| slot_distance < *distance) {
                let best_sample = scores.swap_remove(0);
                best = Some((slot, slot_distance, best_sample));
            }
        }

        let (slot, distance, best_sample) = best?;
        if distance > self.options.match_threshold {
            return None;
        }

        Some(PoseMatch {
            slot_index: slot.slot_index,
            label: slot.label.clone(),
            distance: round_to(distance, 5),
            vector_distance: round_to(best_sample.vector_distance, 5),
            pair_distance: round_to(best_sample.pair_distance, 5),
            sample_count: slot.samples.len(),
            matched_sample_id: Some(best_sample.sample.sample_id.clone()),
            source: MatchSource::TemplateSamples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::features::tests::sample_hand;
    use crate::pose::types::{DetectedHand, Handedness, LandmarkPoint};
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn hand_frame(landmarks: Vec<LandmarkPoint>) -> HandFrame {
        HandFrame::analyze(DetectedHand {
            landmarks,
            handedness: Handedness::Right,
            score: 0.98761,
        })
    }

    fn shifted_hand(offset: f64) -> HandFrame {
        let mut landmarks = sample_hand();
        for point in landmarks.iter_mut().skip(1) {
            point.x += offset;
        }
        hand_frame(landmarks)
    }

    fn library_with(options: LibraryOptions) -> (PoseLibrary, SharedStore) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        (PoseLibrary::new(options, store.clone(), None), store)
    }

    fn library() -> PoseLibrary {
        library_with(LibraryOptions::default()).0
    }

    #[test]
    fn test_fresh_library_is_seeded() {
        let library = library();
        assert_eq!(library.labels(), &["thumbs_up", "palm", "peace"]);
        assert_eq!(library.sample_counts(), vec![0, 0, 0]);

        let snapshots = library.list_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].reason, "seeded-defaults");
    }

    #[test]
    fn test_capture_fills_empty_slots_then_rotates() {
        let mut library = library();
        let hand = hand_frame(sample_hand());

        let slots: Vec<usize> = (0..5)
            .map(|_| library.capture(&hand, None).unwrap().slot_index)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert_eq!(library.sample_counts(), vec![2, 2, 1]);
        assert_eq!(library.next_capture_index(), 2);
    }

    #[test]
    fn test_capture_sample_fields() {
        let mut library = library();
        let sample = library
            .capture_at(1, &hand_frame(sample_hand()), Some(json!({"model": "hands"})))
            .unwrap();

        assert_eq!(sample.label, "palm");
        assert_eq!(sample.handedness, Handedness::Right);
        assert_eq!(sample.handedness_score, 0.9876);
        assert!(sample.sample_id.starts_with("slot-1-sample-"));
        assert_eq!(sample.feature.embedding.len(), 63);
        assert_eq!(library.list_snapshots().last().unwrap().reason, "captured-slot-1");
    }

    #[test]
    fn test_capture_rejects_bad_input() {
        let mut library = library();
        let hand = hand_frame(sample_hand());
        assert_eq!(library.capture_at(3, &hand, None), Err(LibraryError::InvalidSlot(3)));
        assert_eq!(
            library.capture_at(0, &hand_frame(Vec::new()), None),
            Err(LibraryError::EmptyFeature)
        );
    }

    #[test]
    fn test_slot_capacity_keeps_most_recent() {
        let (mut library, _) = library_with(LibraryOptions {
            max_samples_per_slot: 4,
            ..LibraryOptions::default()
        });
        let hand = hand_frame(sample_hand());

        let ids: Vec<String> = (0..7)
            .map(|_| library.capture_at(0, &hand, None).unwrap().sample_id)
            .collect();

        let kept: Vec<String> = library.slot(0).unwrap().samples.iter().map(|s| s.sample_id.clone()).collect();
        assert_eq!(kept, ids[3..].to_vec());
    }

    #[test]
    fn test_rename_relabels_samples() {
        let mut library = library();
        library.capture_at(2, &hand_frame(sample_hand()), None).unwrap();

        assert_eq!(library.set_slot_label(2, "  victory  ").unwrap(), "victory");
        let slot = library.slot(2).unwrap();
        assert_eq!(slot.label, "victory");
        assert!(slot.samples.iter().all(|s| s.label == "victory"));

        // Blank keeps the current label
        assert_eq!(library.set_slot_label(2, "   ").unwrap(), "victory");
        assert_eq!(library.set_slot_label(9, "x"), Err(LibraryError::InvalidSlot(9)));
    }

    #[test]
    fn test_clear_slot_and_all() {
        let mut library = library();
        let hand = hand_frame(sample_hand());
        for _ in 0..3 {
            library.capture(&hand, None).unwrap();
        }

        library.clear_slot(1).unwrap();
        assert_eq!(library.sample_counts(), vec![1, 0, 1]);
        assert_eq!(library.choose_capture_slot(), 1);

        library.clear_all();
        assert_eq!(library.sample_counts(), vec![0, 0, 0]);
        let reasons: Vec<String> = library.list_snapshots().into_iter().map(|s| s.reason).collect();
        assert!(reasons.ends_with(&["cleared-slot-1".to_string(), "cleared-all-slots".to_string()]));
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut library = library();
        library.capture_at(0, &hand_frame(sample_hand()), None).unwrap();
        library.capture_at(0, &shifted_hand(0.02), None).unwrap();
        library.capture_at(2, &shifted_hand(-0.01), None).unwrap();
        library.set_slot_label(1, "wave").unwrap();

        let exported = serde_json::to_value(library.export_state()).unwrap();
        let mut other = self::library();
        let imported = other.import_state(&exported).unwrap();

        assert_eq!(imported, library.export_state());
        assert_eq!(other.export_state(), library.export_state());
        assert_eq!(other.list_snapshots().last().unwrap().reason, "imported-state");
    }

    #[test]
    fn test_import_rejects_malformed_state() {
        let mut library = library();
        assert_eq!(
            library.import_state(&json!({"labels": []})),
            Err(LibraryError::InvalidState)
        );
    }

    #[test]
    fn test_restore_snapshot_replaces_state() {
        let mut library = library();
        let seeded_id = library.list_snapshots()[0].id.clone();
        library.capture_at(0, &hand_frame(sample_hand()), None).unwrap();
        library.set_slot_label(0, "ok").unwrap();

        let state = library.restore_snapshot(&seeded_id).unwrap();
        assert_eq!(state.sample_counts(), vec![0, 0, 0]);
        assert_eq!(library.labels(), &["thumbs_up", "palm", "peace"]);
        assert_eq!(
            library.list_snapshots().last().unwrap().reason,
            format!("restored:{}", seeded_id)
        );

        assert_eq!(
            library.restore_snapshot("missing"),
            Err(LibraryError::SnapshotNotFound("missing".into()))
        );
    }

    #[test]
    fn test_snapshot_dedup_and_force() {
        let mut library = library();
        let before = library.list_snapshots().len();
        let id = library.capture_snapshot("saved", false);
        assert_eq!(library.list_snapshots().len(), before);
        assert_eq!(id, library.list_snapshots()[0].id);

        library.capture_snapshot("saved", true);
        assert_eq!(library.list_snapshots().len(), before + 1);
    }

    #[test]
    fn test_state_survives_restart() {
        let (mut library, store) = library_with(LibraryOptions::default());
        library.capture_at(1, &hand_frame(sample_hand()), None).unwrap();
        library.set_slot_label(1, "open").unwrap();
        let exported = library.export_state();
        drop(library);

        let reopened = PoseLibrary::new(LibraryOptions::default(), store, None);
        assert_eq!(reopened.export_state(), exported);
        assert_eq!(reopened.next_capture_index(), 0);
        let reasons: Vec<String> = reopened.list_snapshots().into_iter().map(|s| s.reason).collect();
        // Restored state equals the newest snapshot, so no duplicate is recorded
        assert_eq!(reasons.last().map(String::as_str), Some("renamed-slot-1"));
    }

    #[test]
    fn test_seed_from_initial_state() {
        let mut seeded = library();
        seeded.capture_at(2, &hand_frame(sample_hand()), None).unwrap();
        let initial = serde_json::to_value(seeded.export_state()).unwrap();

        let (library, _) = library_with(LibraryOptions {
            initial_state: Some(initial),
            ..LibraryOptions::default()
        });
        assert_eq!(library.sample_counts(), vec![0, 0, 1]);
        assert_eq!(library.list_snapshots()[0].reason, "seeded-defaults");
    }

    #[test]
    fn test_match_identical_and_threshold() {
        let mut library = library();
        assert!(library.match_hand(&hand_frame(sample_hand()).feature).is_none());

        library.capture_at(1, &hand_frame(sample_hand()), None).unwrap();
        let found = library.match_hand(&hand_frame(sample_hand()).feature).unwrap();
        assert_eq!(found.slot_index, 1);
        assert_eq!(found.label, "palm");
        assert_eq!(found.distance, 0.0);
        assert_eq!(found.sample_count, 1);
        assert_eq!(found.source, MatchSource::TemplateSamples);
        assert!(found.matched_sample_id.is_some());

        // A wildly different hand is rejected by the threshold
        let mut far = sample_hand();
        for point in far.iter_mut().skip(1) {
            point.y = 1.6 - point.y;
        }
        assert!(library.match_hand(&hand_frame(far).feature).is_none());
        assert!(library.match_hand(&PoseFeature::default()).is_none());
    }

    #[test]
    fn test_match_prefers_closest_slot() {
        let mut library = library();
        library.capture_at(0, &shifted_hand(0.0), None).unwrap();
        library.capture_at(2, &shifted_hand(0.05), None).unwrap();

        let found = library.match_hand(&shifted_hand(0.045).feature).unwrap();
        assert_eq!(found.slot_index, 2);
    }

    fn offset_feature(base: &PoseFeature, offset: f64) -> PoseFeature {
        let pairs = base.pair_distances.map(|mut pairs| {
            pairs.thumb_index += offset;
            pairs.index_middle += offset;
            pairs.middle_ring += offset;
            pairs.ring_pinky += offset;
            pairs.wrist_middle_tip += offset;
            pairs
        });
        PoseFeature {
            normalized_landmarks: base.normalized_landmarks.clone(),
            embedding: base.embedding.iter().map(|v| v + offset).collect(),
            pair_distances: pairs,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_matching_is_monotonic(near in 0.0f64..0.05, extra in 0.0f64..0.05) {
            let (mut library, _) = library_with(LibraryOptions {
                match_threshold: 10.0,
                ..LibraryOptions::default()
            });
            let base = hand_frame(sample_hand());
            library.capture_at(0, &base, None).unwrap();
            library.capture_at(0, &base, None).unwrap();

            let close = library.match_hand(&offset_feature(&base.feature, near)).unwrap();
            let far = library.match_hand(&offset_feature(&base.feature, near + extra)).unwrap();
            prop_assert!(far.distance >= close.distance);
        }
    }
}
