//! Extraction scheduling: which tables are due for synchronization.

use serde::{Deserialize, Serialize};
use tabula_core::{Position, SyncCursor, TableId, TableSchema};

/// Scheduling decision for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueCheck {
    pub table_id: TableId,
    /// Last synced position, or the base floor if never synced
    pub last_synced: Position,
    pub elapsed: Position,
    pub frequency: i64,
    pub ai_enabled: bool,
    pub due: bool,
}

/// Evaluate one table against the current position.
pub fn check(schema: &TableSchema, cursor: &SyncCursor, current: Position) -> DueCheck {
    let last_synced = cursor.last_synced_or_base(&schema.id);
    let elapsed = current - last_synced;
    let frequency = schema.effective_update_frequency();

    DueCheck {
        table_id: schema.id.clone(),
        last_synced,
        elapsed,
        frequency,
        ai_enabled: schema.ai_enabled,
        due: schema.ai_enabled && elapsed >= frequency,
    }
}

/// Evaluate every table, in schema order.
pub fn evaluate(schema: &[TableSchema], cursor: &SyncCursor, current: Position) -> Vec<DueCheck> {
    schema.iter().map(|t| check(t, cursor, current)).collect()
}

/// Tables that are due, in schema order.
pub fn due_tables<'a>(
    schema: &'a [TableSchema],
    cursor: &SyncCursor,
    current: Position,
) -> Vec<&'a TableSchema> {
    schema
        .iter()
        .filter(|t| check(t, cursor, current).due)
        .collect()
}
