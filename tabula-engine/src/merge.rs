//! Keyed merge of extracted rows into a table.
//!
//! Rows are ordered most-recent-first. A merge puts every row touched by the
//! extraction at the front (in extraction order) and keeps the untouched
//! rows behind them in their prior order. Tables without a primary key, and
//! append-only tables, simply prepend the extracted rows.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tabula_core::{Row, RowKey, TableSchema};

/// How a merge combined its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeMode {
    /// Matched by primary key (create-or-update)
    Keyed,
    /// Extracted rows prepended as new rows
    Append,
}

/// Counts describing one merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub mode: MergeMode,
    /// Extracted rows with a key not seen before
    pub added: usize,
    /// Extracted rows replacing an existing row
    pub updated: usize,
    /// Existing rows carried over untouched
    pub retained: usize,
    /// Rows dropped because their primary key value was missing
    pub skipped: usize,
}

impl MergeReport {
    fn new(mode: MergeMode) -> Self {
        Self {
            mode,
            added: 0,
            updated: 0,
            retained: 0,
            skipped: 0,
        }
    }
}

/// Merged rows plus the report.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub rows: Vec<Row>,
    pub report: MergeReport,
}

/// Merge `extracted` into `existing` for one table.
///
/// Inputs are never mutated. With a primary key, the result holds at most
/// one row per key; rows without a key value are skipped.
pub fn merge(schema: &TableSchema, existing: &[Row], extracted: &[Row]) -> MergeResult {
    match schema.primary_key() {
        Some(key) if !schema.is_append_only() => merge_keyed(key, existing, extracted),
        _ => merge_append(existing, extracted),
    }
}

fn merge_append(existing: &[Row], extracted: &[Row]) -> MergeResult {
    let mut rows = Vec::with_capacity(extracted.len() + existing.len());
    rows.extend_from_slice(extracted);
    rows.extend_from_slice(existing);

    let mut report = MergeReport::new(MergeMode::Append);
    report.added = extracted.len();
    report.retained = existing.len();

    MergeResult { rows, report }
}

fn merge_keyed(key: &str, existing: &[Row], extracted: &[Row]) -> MergeResult {
    let mut report = MergeReport::new(MergeMode::Keyed);

    // Front-most existing occurrence of a key wins.
    let mut existing_keys: HashSet<RowKey> = HashSet::with_capacity(existing.len());
    let mut prior: Vec<(RowKey, &Row)> = Vec::with_capacity(existing.len());
    for row in existing {
        match row.key_of(key) {
            Some(k) => {
                if existing_keys.insert(k.clone()) {
                    prior.push((k, row));
                }
            }
            None => report.skipped += 1,
        }
    }

    // Later extracted duplicates replace earlier ones but keep the first slot.
    let mut touched: HashMap<RowKey, &Row> = HashMap::with_capacity(extracted.len());
    let mut touched_order: Vec<RowKey> = Vec::with_capacity(extracted.len());
    for row in extracted {
        match row.key_of(key) {
            Some(k) => {
                if touched.insert(k.clone(), row).is_none() {
                    touched_order.push(k);
                }
            }
            None => report.skipped += 1,
        }
    }

    let mut rows = Vec::with_capacity(touched_order.len() + prior.len());
    for k in &touched_order {
        if let Some(row) = touched.get(k) {
            rows.push((*row).clone());
            if existing_keys.contains(k) {
                report.updated += 1;
            } else {
                report.added += 1;
            }
        }
    }
    for (k, row) in prior {
        if !touched.contains_key(&k) {
            rows.push(row.clone());
            report.retained += 1;
        }
    }

    MergeResult { rows, report }
}

// =============================================================================
// TESTS
// =============================================================================


// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================
