//! JSON document persistence
//!
//! The pose library, its snapshot history and the router settings are each
//! stored as one JSON document under a fixed key. Documents are independently
//! loadable and saveable.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Key of the pose library document
pub const LIBRARY_KEY: &str = "pose-library.v2";
/// Key of the snapshot history document
pub const SNAPSHOTS_KEY: &str = "pose-snapshots.v1";
/// Key of the router settings document
pub const SETTINGS_KEY: &str = "router-settings.v2";

/// Prefix for document keys in the sled database
const DOCUMENT_PREFIX: &str = "doc:";

/// Storage backend for JSON documents
pub trait DocumentStore: Send + Sync {
    /// Load the document stored under `key`, if any
    fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the document stored under `key`
    fn save(&self, key: &str, document: &Value) -> Result<()>;
}

/// Shared handle to a document store
pub type SharedStore = Arc<dyn DocumentStore>;

/// Documents kept in an embedded sled database
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) the database under `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        let path = dir.join("state.sled");
        let db = sled::open(&path)
            .with_context(|| format!("Failed to open sled database: {}", path.display()))?;
        info!("Opened state database at {}", path.display());
        Ok(Self { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }
}

impl DocumentStore for SledStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let full_key = format!("{}{}", DOCUMENT_PREFIX, key);
        let Some(bytes) = self
            .db
            .get(full_key.as_bytes())
            .with_context(|| format!("Failed to read document '{}'", key))?
        else {
            return Ok(None);
        };

        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse document '{}'", key))?;
        Ok(Some(value))
    }

    fn save(&self, key: &str, document: &Value) -> Result<()> {
        let full_key = format!("{}{}", DOCUMENT_PREFIX, key);
        let bytes = serde_json::to_vec(document).context("Failed to serialize document")?;
        self.db
            .insert(full_key.as_bytes(), bytes)
            .with_context(|| format!("Failed to persist document '{}'", key))?;
        self.db.flush().context("Failed to flush sled database")?;
        debug!("Saved document '{}'", key);
        Ok(())
    }
}

/// In-process store used by tests and `--no-persist`
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a document (e.g. a legacy layout)
    pub fn with_document(self, key: &str, document: Value) -> Self {
        self.documents.write().insert(key.to_string(), document);
        self
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.documents.read().get(key).cloned())
    }

    fn save(&self, key: &str, document: &Value) -> Result<()> {
        self.documents.write().insert(key.to_string(), document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load(SETTINGS_KEY).unwrap().is_none());

        store.save(SETTINGS_KEY, &json!({"armed": true})).unwrap();
        assert_eq!(store.load(SETTINGS_KEY).unwrap(), Some(json!({"armed": true})));
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let temp = tempdir().unwrap();

        {
            let store = SledStore::open(temp.path()).unwrap();
            store.save(LIBRARY_KEY, &json!({"version": 2, "slots": []})).unwrap();
        }

        let store = SledStore::open(temp.path()).unwrap();
        let doc = store.load(LIBRARY_KEY).unwrap().unwrap();
        assert_eq!(doc["version"], 2);
        assert!(store.load(SNAPSHOTS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_sled_store_rejects_corrupt_document() {
        let temp = tempdir().unwrap();
        let db = sled::open(temp.path().join("test.sled")).unwrap();
        db.insert(format!("{}{}", DOCUMENT_PREFIX, SETTINGS_KEY).as_bytes(), b"{not json".to_vec())
            .unwrap();

        let store = SledStore::from_db(db);
        assert!(store.load(SETTINGS_KEY).is_err());
    }
}
