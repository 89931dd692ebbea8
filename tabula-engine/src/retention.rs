//! Retention policy: bound each table to its configured row count.
//!
//! Keyed tables are deduplicated (front-most occurrence wins) before
//! truncation; keyless tables are truncated. Front rows are the newest, so
//! truncation always drops from the back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tabula_core::{Row, TableId, TableSchema, TableState};

/// What the policy did to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetentionStrategy {
    /// Under the limit or unbounded
    Unchanged,
    /// No primary key: oldest rows dropped
    Truncate,
    /// Primary key: stale duplicates dropped, then oldest rows
    KeyedDedup,
}

/// Per-table retention report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub table_id: TableId,
    pub strategy: RetentionStrategy,
    /// Later occurrences of an already-seen key
    pub duplicates_removed: usize,
    /// Rows without a primary key value
    pub unidentifiable_removed: usize,
    /// Rows beyond the limit after deduplication
    pub limit_removed: usize,
}

impl RetentionReport {
    fn unchanged(table_id: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            strategy: RetentionStrategy::Unchanged,
            duplicates_removed: 0,
            unidentifiable_removed: 0,
            limit_removed: 0,
        }
    }

    pub fn removed(&self) -> usize {
        self.duplicates_removed + self.unidentifiable_removed + self.limit_removed
    }

    pub fn is_noop(&self) -> bool {
        self.removed() == 0
    }
}

/// Apply the retention policy to one table's rows.
pub fn clean(schema: &TableSchema, rows: &[Row]) -> (Vec<Row>, RetentionReport) {
    let mut report = RetentionReport::unchanged(&schema.id);

    let max = match schema.retention_limit() {
        Some(max) if rows.len() > max => max,
        _ => return (rows.to_vec(), report),
    };

    let Some(key) = schema.primary_key() else {
        report.strategy = RetentionStrategy::Truncate;
        report.limit_removed = rows.len() - max;
        return (rows[..max].to_vec(), report);
    };

    report.strategy = RetentionStrategy::KeyedDedup;
    let mut seen = HashSet::with_capacity(rows.len());
    let mut kept = Vec::with_capacity(max);
    for row in rows {
        let Some(k) = row.key_of(key) else {
            report.unidentifiable_removed += 1;
            continue;
        };
        if !seen.insert(k) {
            report.duplicates_removed += 1;
        } else if kept.len() < max {
            kept.push(row.clone());
        } else {
            report.limit_removed += 1;
        }
    }

    (kept, report)
}

/// Apply the policy to one table, discarding the report.
pub fn clean_single_table(schema: &TableSchema, rows: &[Row]) -> Vec<Row> {
    clean(schema, rows).0
}

/// Apply the policy to every configured table present in `state`.
///
/// Tables in `state` without a schema entry are left as they are.
pub fn clean_tables(schema: &[TableSchema], state: &TableState) -> (TableState, Vec<RetentionReport>) {
    let mut cleaned = state.clone();
    let mut reports = Vec::new();

    for table in schema {
        if !state.contains(&table.id) {
            continue;
        }
        let (rows, report) = clean(table, state.rows(&table.id));
        if !report.is_noop() {
            reports.push(report);
        }
        cleaned.set_rows(table.id.clone(), rows);
    }

    (cleaned, reports)
}

// =============================================================================
// TESTS
// =============================================================================


// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================
