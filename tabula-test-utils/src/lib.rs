//! Tabula Test Utilities
//!
//! Shared test infrastructure for the Tabula workspace:
//! - Proptest generators for rows, schemas and conversations
//! - Fixtures for common table setups
//! - A fault-injecting store
//! - Custom assertions over table invariants

// Re-export mocks from their source crates
pub use tabula_llm::MockGenerationBackend;
pub use tabula_storage::MemoryStore;

pub use tabula_core::{
    ChatMessage, ConversationData, GlobalConfig, LlmError, Row, RowKey, StorageError,
    TableSchema, TableState, TabulaError, TabulaResult,
};

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tabula_storage::KeyValueStore;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// Store wrapper whose writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing store so tests can inspect what was persisted.
    pub fn wrapping(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl KeyValueStore for FailingStore {
    fn load(&self, key: &str) -> TabulaResult<Option<Value>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: Value) -> TabulaResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        self.inner.save(key, value)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// A short key drawn from a small pool so collisions are common.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a", "b", "c", "d", "e", "f"]).prop_map(String::from)
    }

    /// A cell value: mostly strings, occasionally numbers or null.
    pub fn arb_cell() -> impl Strategy<Value = Value> {
        prop_oneof![
            6 => "[a-z]{0,6}".prop_map(Value::from),
            2 => (0i64..100).prop_map(Value::from),
            1 => Just(Value::Null),
        ]
    }

    /// A row for a table keyed on `id`, with a key that may be missing.
    pub fn arb_row() -> impl Strategy<Value = Row> {
        (prop::option::weighted(0.9, arb_key()), arb_cell()).prop_map(|(id, status)| {
            let row = Row::new().with("status", status);
            match id {
                Some(id) => row.with("id", id),
                None => row,
            }
        })
    }

    /// A row that always carries a key.
    pub fn arb_keyed_row() -> impl Strategy<Value = Row> {
        (arb_key(), arb_cell()).prop_map(|(id, status)| Row::new().with("id", id).with("status", status))
    }

    pub fn arb_rows(max: usize) -> impl Strategy<Value = Vec<Row>> {
        prop::collection::vec(arb_row(), 0..max)
    }

    /// A table keyed on `id` with random policies.
    pub fn arb_schema() -> impl Strategy<Value = TableSchema> {
        (
            prop::option::of(-1i64..6),
            -2i64..8,
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(frequency, max_rows, ai_enabled, ai_visible)| {
                let mut schema = TableSchema::new("tasks", "Tasks")
                    .with_field("id", "ID")
                    .with_field("status", "Status")
                    .with_max_rows(max_rows)
                    .with_ai_enabled(ai_enabled);
                schema.update_frequency = frequency;
                schema.ai_visible = ai_visible;
                schema
            })
    }

    /// Alternating user/assistant messages.
    pub fn arb_conversation(max: usize) -> impl Strategy<Value = Vec<ChatMessage>> {
        prop::collection::vec("[a-z ]{1,20}", 0..max).prop_map(|texts| {
            texts
                .into_iter()
                .enumerate()
                .map(|(i, text)| {
                    if i % 2 == 0 {
                        ChatMessage::user(text)
                    } else {
                        ChatMessage::assistant(text)
                    }
                })
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// Keyed, AI-visible task table synced every 3 messages, capped at 10.
    pub fn task_table() -> TableSchema {
        TableSchema::new("tasks", "Tasks")
            .with_field("id", "ID")
            .with_field("status", "Status")
            .with_update_frequency(3)
            .with_max_rows(10)
    }

    /// Append-only event log synced every message, capped at 5.
    pub fn event_log() -> TableSchema {
        TableSchema::new("events", "Events")
            .with_field("summary", "Summary")
            .with_update_frequency(1)
            .with_max_rows(5)
            .append_only()
    }

    /// Character table injected one message from the end.
    pub fn character_table() -> TableSchema {
        TableSchema::new("characters", "Characters")
            .with_field("name", "Name")
            .with_field("mood", "Mood")
            .with_update_frequency(2)
            .with_injection(1, 0)
    }

    pub fn task(id: &str, status: &str) -> Row {
        Row::new().with("id", id).with("status", status)
    }

    pub fn config_with(schema: Vec<TableSchema>) -> GlobalConfig {
        GlobalConfig::default().with_schema(schema)
    }

    /// `n` alternating user/assistant messages.
    pub fn conversation(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("user message {}", i))
                } else {
                    ChatMessage::assistant(format!("reply {}", i))
                }
            })
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;
    use std::collections::HashSet;

    /// Panic if two rows share a non-null value under `field`.
    pub fn assert_no_duplicate_keys(rows: &[Row], field: &str) {
        let mut seen = HashSet::new();
        for row in rows {
            if let Some(key) = row.key_of(field) {
                assert!(seen.insert(key.clone()), "duplicate key {} in {:?}", key, rows);
            }
        }
    }

    /// Values of `field` in row order, with missing values as `"-"`.
    pub fn keys(rows: &[Row], field: &str) -> Vec<String> {
        rows.iter().map(|r| r.display_value(field)).collect()
    }

    pub fn assert_keys(rows: &[Row], field: &str, expected: &[&str]) {
        assert_eq!(keys(rows, field), expected, "unexpected row order");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_failing_store_toggles() {
        let store = FailingStore::new();
        store.save("k", Value::Bool(true)).expect("save");
        assert_eq!(store.write_count(), 1);

        store.set_fail_writes(true);
        assert!(matches!(
            store.save("k", Value::Null),
            Err(TabulaError::Storage(StorageError::WriteFailed { .. }))
        ));
        assert_eq!(store.inner().load("k").expect("load"), Some(Value::Bool(true)));

        store.set_fail_reads(true);
        assert!(store.load("k").is_err());
    }

    #[test]
    fn test_fixture_schemas_validate() {
        let config = fixtures::config_with(vec![
            fixtures::task_table(),
            fixtures::event_log(),
            fixtures::character_table(),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_assert_keys_reads_display_values() {
        let rows = vec![fixtures::task("2", "open"), Row::new().with("status", "x")];
        assert_eq!(assertions::keys(&rows, "id"), vec!["2", "-"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_keyed_rows_carry_keys(row in generators::arb_keyed_row()) {
            prop_assert!(row.key_of("id").is_some());
        }

        #[test]
        fn prop_conversation_alternates(messages in generators::arb_conversation(8)) {
            for (i, message) in messages.iter().enumerate() {
                prop_assert_eq!(message.is_user(), i % 2 == 0);
            }
        }
    }
}
