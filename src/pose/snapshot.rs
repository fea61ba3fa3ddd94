//! Bounded history of full library snapshots
//!
//! Each snapshot carries a content signature so that consecutive identical
//! states collapse into one entry.

use super::migrate::normalize_state;
use super::types::PoseSlot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Current schema version of the exported library document
pub const LIBRARY_VERSION: u32 = 2;

static SNAPSHOT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Exported library document: `{version, labels, slots}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryState {
    pub version: u32,
    pub labels: Vec<String>,
    pub slots: Vec<Option<PoseSlot>>,
}

impl LibraryState {
    pub fn new(labels: Vec<String>, slots: Vec<Option<PoseSlot>>) -> Self {
        Self {
            version: LIBRARY_VERSION,
            labels,
            slots,
        }
    }

    /// SHA-256 hex digest of the canonical JSON form
    pub fn signature(&self) -> String {
        match serde_json::to_vec(self) {
            Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
            Err(_) => String::new(),
        }
    }

    pub fn sample_counts(&self) -> Vec<usize> {
        self.slots
            .iter()
            .map(|slot| slot.as_ref().map_or(0, |slot| slot.samples.len()))
            .collect()
    }
}

/// One stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySnapshot {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub reason: String,
    pub labels: Vec<String>,
    pub slots: Vec<Option<PoseSlot>>,
    pub signature: String,
}

impl LibrarySnapshot {
    pub fn state(&self) -> LibraryState {
        LibraryState::new(self.labels.clone(), self.slots.clone())
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            reason: self.reason.clone(),
            labels: self.labels.clone(),
            sample_counts: self.state().sample_counts(),
        }
    }
}

/// Lightweight view of a snapshot for listings and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: String,
    pub created_at: i64,
    pub reason: String,
    pub labels: Vec<String>,
    pub sample_counts: Vec<usize>,
}

fn next_snapshot_id(now_ms: i64) -> String {
    let counter = SNAPSHOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("snapshot-{}-{:04}", now_ms, counter % 10_000)
}

/// FIFO-capped snapshot list
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    entries: VecDeque<LibrarySnapshot>,
    max_snapshots: usize,
}

impl SnapshotHistory {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Rebuild a history from its persisted list
    ///
    /// Entries are migrated like library documents and re-signed; unusable
    /// entries are skipped and only the newest `max_snapshots` are kept.
    pub fn from_document(document: &Value, max_snapshots: usize, max_poses: usize, labels: &[String]) -> Self {
        let mut history = Self::new(max_snapshots);
        let Some(entries) = document.as_array() else {
            return history;
        };

        for entry in entries {
            if let Some(snapshot) = Self::normalize_entry(entry, max_poses, labels) {
                history.push(snapshot);
            }
        }
        history
    }

    fn normalize_entry(entry: &Value, max_poses: usize, labels: &[String]) -> Option<LibrarySnapshot> {
        if !entry.is_object() {
            return None;
        }
        let normalized = normalize_state(entry, max_poses, labels)?;
        let now_ms = chrono::Utc::now().timestamp_millis();

        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| next_snapshot_id(now_ms));
        let created_at = match entry.get("createdAt") {
            Some(Value::Number(number)) => number.as_i64().unwrap_or(now_ms),
            Some(Value::String(text)) => text.trim().parse().unwrap_or(now_ms),
            _ => now_ms,
        };
        let reason = entry
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("saved")
            .to_string();

        let state = LibraryState::new(normalized.labels, normalized.slots);
        Some(LibrarySnapshot {
            id,
            created_at,
            reason,
            signature: state.signature(),
            labels: state.labels,
            slots: state.slots,
        })
    }

    fn push(&mut self, snapshot: LibrarySnapshot) {
        self.entries.push_back(snapshot);
        while self.entries.len() > self.max_snapshots {
            self.entries.pop_front();
        }
    }

    /// Record `state` unless it matches the newest entry
    ///
    /// Returns the id of the new entry, or of the newest entry when deduplicated,
    /// along with whether a new entry was created.
    pub fn capture(&mut self, state: &LibraryState, reason: &str, force: bool) -> (String, bool) {
        let signature = state.signature();
        if let Some(last) = self.entries.back() {
            if !force && last.signature == signature {
                return (last.id.clone(), false);
            }
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let snapshot = LibrarySnapshot {
            id: next_snapshot_id(now_ms),
            created_at: now_ms,
            reason: reason.to_string(),
            labels: state.labels.clone(),
            slots: state.slots.clone(),
            signature,
        };
        let id = snapshot.id.clone();
        self.push(snapshot);
        (id, true)
    }

    pub fn find(&self, id: &str) -> Option<&LibrarySnapshot> {
        self.entries.iter().find(|snapshot| snapshot.id == id)
    }

    pub fn last(&self) -> Option<&LibrarySnapshot> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summaries, oldest first
    pub fn list(&self) -> Vec<SnapshotSummary> {
        self.entries.iter().map(LibrarySnapshot::summary).collect()
    }

    /// Persistable form of the history
    pub fn to_document(&self) -> Value {
        serde_json::to_value(&self.entries).unwrap_or(Value::Array(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels() -> Vec<String> {
        vec!["a".into(), "b".into(), "c".into()]
    }

    fn empty_state(labels: Vec<String>) -> LibraryState {
        LibraryState::new(labels, vec![None, None, None])
    }

    #[test]
    fn test_capture_deduplicates_identical_state() {
        let mut history = SnapshotHistory::new(12);
        let state = empty_state(labels());

        let (first, created) = history.capture(&state, "seeded-defaults", false);
        assert!(created);
        let (second, created) = history.capture(&state, "renamed-slot-0", false);
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(history.len(), 1);

        let (forced, created) = history.capture(&state, "saved", true);
        assert!(created);
        assert_ne!(forced, first);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_capacity_is_fifo() {
        let mut history = SnapshotHistory::new(3);
        for i in 0..5 {
            let state = empty_state(vec![format!("label-{}", i), "b".into(), "c".into()]);
            history.capture(&state, &format!("step-{}", i), false);
        }

        let reasons: Vec<String> = history.list().into_iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec!["step-2", "step-3", "step-4"]);
    }

    #[test]
    fn test_signature_tracks_content() {
        let a = empty_state(labels());
        let b = empty_state(vec!["x".into(), "b".into(), "c".into()]);
        assert_eq!(a.signature(), empty_state(labels()).signature());
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature().len(), 64);
    }

    #[test]
    fn test_document_round_trip_and_repair() {
        let mut history = SnapshotHistory::new(12);
        history.capture(&empty_state(labels()), "seeded-defaults", false);
        let mut doc = history.to_document();

        doc.as_array_mut().unwrap().push(json!({"reason": "legacy", "createdAt": "1700000000000", "poses": []}));
        doc.as_array_mut().unwrap().push(json!("garbage"));
        doc.as_array_mut().unwrap().push(json!({"id": "no-slots"}));

        let restored = SnapshotHistory::from_document(&doc, 12, 3, &labels());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.list()[0].id, history.list()[0].id);

        let legacy = restored.last().unwrap();
        assert_eq!(legacy.reason, "legacy");
        assert_eq!(legacy.created_at, 1_700_000_000_000);
        assert!(legacy.id.starts_with("snapshot-"));
        assert_eq!(legacy.signature, legacy.state().signature());
    }

    #[test]
    fn test_non_array_document_is_empty() {
        let history = SnapshotHistory::from_document(&json!({"oops": true}), 12, 3, &labels());
        assert!(history.is_empty());
    }
}
