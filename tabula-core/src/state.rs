//! Live table state, sync cursor and snapshots

use crate::{Position, Row, TableId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Rows of every table, keyed by table id.
///
/// Within a table, index 0 is the most recently changed or added row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableState(BTreeMap<TableId, Vec<Row>>);

impl TableState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of a table; empty when the table has never been written.
    pub fn rows(&self, table_id: &str) -> &[Row] {
        self.0.get(table_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rows_mut(&mut self, table_id: &str) -> &mut Vec<Row> {
        self.0.entry(table_id.to_string()).or_default()
    }

    pub fn set_rows(&mut self, table_id: impl Into<TableId>, rows: Vec<Row>) {
        self.0.insert(table_id.into(), rows);
    }

    pub fn contains(&self, table_id: &str) -> bool {
        self.0.contains_key(table_id)
    }

    pub fn table_ids(&self) -> impl Iterator<Item = &TableId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableId, &Vec<Row>)> {
        self.0.iter()
    }

    /// Number of tables with stored rows.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

/// Per-table last-synchronized position plus the global base floor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    #[serde(default)]
    pub last_synced: BTreeMap<TableId, Position>,
    /// Position from which elapsed counts start for never-synced tables
    #[serde(default)]
    pub base_floor: Position,
}

impl SyncCursor {
    pub fn new(base_floor: Position) -> Self {
        Self {
            last_synced: BTreeMap::new(),
            base_floor,
        }
    }

    /// Last synced position of a table, or the base floor if it never synced.
    pub fn last_synced_or_base(&self, table_id: &str) -> Position {
        self.last_synced
            .get(table_id)
            .copied()
            .unwrap_or(self.base_floor)
    }

    pub fn mark_synced(&mut self, table_id: impl Into<TableId>, position: Position) {
        self.last_synced.insert(table_id.into(), position);
    }

    /// Set the base floor and restart every listed table's count from it.
    pub fn reset_to<'a>(&mut self, floor: Position, table_ids: impl IntoIterator<Item = &'a TableId>) {
        self.base_floor = floor;
        for id in table_ids {
            self.last_synced.insert(id.clone(), floor);
        }
    }
}

/// Immutable copy of the full table state at a conversation position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_id: Uuid,
    /// Conversation position current when the snapshot was taken
    pub position: Position,
    pub tables: TableState,
    pub cursor: SyncCursor,
    pub taken_at: Timestamp,
}

impl Snapshot {
    pub fn base_floor(&self) -> Position {
        self.cursor.base_floor
    }
}

/// Everything persisted for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationData {
    #[serde(default)]
    pub tables: TableState,
    #[serde(default)]
    pub cursor: SyncCursor,
    /// Oldest first
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_of_unknown_table_is_empty() {
        let state = TableState::new();
        assert!(state.rows("missing").is_empty());
        assert!(!state.contains("missing"));
    }

    #[test]
    fn test_rows_mut_creates_table() {
        let mut state = TableState::new();
        state.rows_mut("tasks").push(Row::new().with("id", "1"));
        assert_eq!(state.rows("tasks").len(), 1);
        assert_eq!(state.total_rows(), 1);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_cursor_falls_back_to_base_floor() {
        let mut cursor = SyncCursor::new(4);
        assert_eq!(cursor.last_synced_or_base("tasks"), 4);
        cursor.mark_synced("tasks", 9);
        assert_eq!(cursor.last_synced_or_base("tasks"), 9);
    }

    #[test]
    fn test_cursor_reset_to_floor() {
        let mut cursor = SyncCursor::new(0);
        cursor.mark_synced("a", 12);
        let ids = vec!["a".to_string(), "b".to_string()];
        cursor.reset_to(6, &ids);
        assert_eq!(cursor.base_floor, 6);
        assert_eq!(cursor.last_synced_or_base("a"), 6);
        assert_eq!(cursor.last_synced_or_base("b"), 6);
    }

    #[test]
    fn test_conversation_data_fills_missing_keys() {
        let data: ConversationData = serde_json::from_value(json!({
            "tables": {"tasks": [{"id": "1"}]}
        }))
        .unwrap();
        assert_eq!(data.tables.rows("tasks").len(), 1);
        assert_eq!(data.cursor, SyncCursor::default());
        assert!(data.snapshots.is_empty());
    }
}
