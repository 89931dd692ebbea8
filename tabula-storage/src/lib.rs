//! Tabula Storage - Scoped Persistence
//!
//! Two independently scoped key-value stores back the engine: a
//! global-scoped store for configuration that survives across conversations,
//! and a conversation-scoped store for table state, cursor and snapshots.
//! Each holds a single JSON blob under [`DATA_KEY`].

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tabula_core::{ConversationData, GlobalConfig, StorageError, TabulaError, TabulaResult};

/// Key under which both scopes store their blob.
pub const DATA_KEY: &str = "tabula_v1";

// ============================================================================
// STORE TRAIT
// ============================================================================

/// A scoped key-value store holding JSON values.
pub trait KeyValueStore: Send + Sync {
    /// Get a value, `None` if the key was never saved.
    fn load(&self, key: &str) -> TabulaResult<Option<Value>>;

    /// Replace the value under a key.
    fn save(&self, key: &str, value: Value) -> TabulaResult<()>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> TabulaResult<Option<Value>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> TabulaResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// JSON FILE STORE
// ============================================================================

/// One pretty-printed JSON file per key inside a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self, key: &str) -> TabulaResult<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| StorageError::ReadFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let value = serde_json::from_str(&contents).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(value))
    }

    fn save(&self, key: &str, value: Value) -> TabulaResult<()> {
        let write_failed = |e: std::io::Error| StorageError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        std::fs::create_dir_all(&self.dir).map_err(write_failed)?;
        let contents = serde_json::to_string_pretty(&value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(write_failed)?;
        std::fs::rename(&tmp, &path).map_err(write_failed)?;
        Ok(())
    }
}

// ============================================================================
// TYPED REPOSITORIES
// ============================================================================

fn load_typed<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> TabulaResult<T> {
    match store.load(key)? {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|e| {
            TabulaError::from(StorageError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            })
        }),
    }
}

fn save_typed<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> TabulaResult<()> {
    let value = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.save(key, value)
}

/// Global configuration in the global-scoped store.
#[derive(Clone)]
pub struct ConfigRepository {
    store: Arc<dyn KeyValueStore>,
}

impl ConfigRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Saved configuration, or defaults when nothing was saved.
    /// Missing top-level keys also take their defaults.
    pub fn load_or_default(&self) -> TabulaResult<GlobalConfig> {
        load_typed(self.store.as_ref(), DATA_KEY)
    }

    pub fn save(&self, config: &GlobalConfig) -> TabulaResult<()> {
        save_typed(self.store.as_ref(), DATA_KEY, config)
    }
}

/// Table state, cursor and snapshot log in the conversation-scoped store.
#[derive(Clone)]
pub struct ConversationRepository {
    store: Arc<dyn KeyValueStore>,
}

impl ConversationRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load_or_default(&self) -> TabulaResult<ConversationData> {
        load_typed(self.store.as_ref(), DATA_KEY)
    }

    /// Replace the whole blob in one write.
    pub fn save(&self, data: &ConversationData) -> TabulaResult<()> {
        save_typed(self.store.as_ref(), DATA_KEY, data)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_core::{Row, SyncCursor, TableSchema};

    fn sample_data() -> ConversationData {
        let mut data = ConversationData::default();
        data.tables
            .set_rows("tasks", vec![Row::new().with("id", "1").with("status", "done")]);
        data.cursor = SyncCursor::new(4);
        data.cursor.mark_synced("tasks", 9);
        data
    }

    #[test]
    fn test_memory_store_load_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.load("absent").expect("load"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.save("k", json!(1)).expect("save");
        assert_eq!(other.load("k").expect("load"), Some(json!(1)));
        assert!(other.contains("k"));
    }

    #[test]
    fn test_file_store_overwrites_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("nested"));

        assert_eq!(store.load(DATA_KEY).expect("load"), None);
        store.save(DATA_KEY, json!({"v": 1})).expect("save");
        store.save(DATA_KEY, json!({"v": 2})).expect("save");

        let reopened = JsonFileStore::new(dir.path().join("nested"));
        assert_eq!(reopened.load(DATA_KEY).expect("load"), Some(json!({"v": 2})));
        assert!(!store.path_for(DATA_KEY).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let store = JsonFileStore::new("/tmp/tabula");
        assert_eq!(
            store.path_for("../chat:1"),
            PathBuf::from("/tmp/tabula/___chat_1.json")
        );
    }

    #[test]
    fn test_file_store_corrupt_blob_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for(DATA_KEY), "{not json").expect("write");

        let result = store.load(DATA_KEY);
        assert!(matches!(
            result,
            Err(TabulaError::Storage(StorageError::Serialization { .. }))
        ));
    }

    #[test]
    fn test_conversation_repository_default_then_saved() {
        let repo = ConversationRepository::new(Arc::new(MemoryStore::new()));
        assert_eq!(repo.load_or_default().expect("load"), ConversationData::default());

        let data = sample_data();
        repo.save(&data).expect("save");
        assert_eq!(repo.load_or_default().expect("load"), data);
    }

    #[test]
    fn test_conversation_blob_layout() {
        let store = MemoryStore::new();
        let repo = ConversationRepository::new(Arc::new(store.clone()));
        repo.save(&sample_data()).expect("save");

        let blob = store.load(DATA_KEY).expect("load").expect("present");
        assert_eq!(blob["cursor"]["baseFloor"], json!(4));
        assert_eq!(blob["cursor"]["lastSynced"]["tasks"], json!(9));
        assert_eq!(blob["tables"]["tasks"][0]["status"], json!("done"));
        assert_eq!(blob["snapshots"], json!([]));
    }

    #[test]
    fn test_config_repository_partial_blob_uses_defaults() {
        let store = MemoryStore::new();
        store
            .save(
                DATA_KEY,
                json!({"schema": [{"id": "tasks", "title": "Tasks", "fields": [{"key": "id", "name": "ID"}]}]}),
            )
            .expect("save");

        let config = ConfigRepository::new(Arc::new(store))
            .load_or_default()
            .expect("load");

        assert_eq!(config.schema.len(), 1);
        assert_eq!(config.global.context_depth, 15);
        assert!(!config.api.is_configured());
    }

    #[test]
    fn test_config_repository_round_trip() {
        let repo = ConfigRepository::new(Arc::new(MemoryStore::new()));
        let config = GlobalConfig::default()
            .with_schema(vec![TableSchema::new("tasks", "Tasks").with_field("id", "ID")]);
        repo.save(&config).expect("save");
        assert_eq!(repo.load_or_default().expect("load"), config);
    }

    #[test]
    fn test_repository_rejects_mismatched_blob() {
        let store = MemoryStore::new();
        store.save(DATA_KEY, json!({"tables": 5})).expect("save");
        let result = ConversationRepository::new(Arc::new(store)).load_or_default();
        assert!(matches!(
            result,
            Err(TabulaError::Storage(StorageError::Serialization { .. }))
        ));
    }
}
