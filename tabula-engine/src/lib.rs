//! Tabula Engine - Synchronization Policies
//!
//! Pure functions behind every synchronization cycle:
//! - [`merge`]: keyed create-or-update of extracted rows
//! - [`retention`]: deduplicate and bound a table to its row limit
//! - [`scheduler`]: decide which tables are due for extraction
//!
//! Nothing here performs I/O or logging; callers receive reports instead.

pub mod merge;
pub mod retention;
pub mod scheduler;

pub use merge::{merge, MergeMode, MergeReport, MergeResult};
pub use retention::{
    clean, clean_single_table, clean_tables, RetentionReport, RetentionStrategy,
};
pub use scheduler::{check, due_tables, evaluate, DueCheck};
