//! Commands and results of the synchronization orchestrator.

use tabula_context::{InjectableBlock, Placement};
use tabula_core::{Position, Row, TableId, TabulaError};
use tabula_engine::{MergeReport, RetentionReport};
use tabula_llm::ExtractionSource;
use tabula_snapshot::SnapshotTaken;

/// Where the orchestrator is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Scheduling,
    Extracting,
    Merging,
    Cleaning,
    Snapshotting,
    Persisting,
    RollingBack,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Scheduling => "scheduling",
            SyncPhase::Extracting => "extracting",
            SyncPhase::Merging => "merging",
            SyncPhase::Cleaning => "cleaning",
            SyncPhase::Snapshotting => "snapshotting",
            SyncPhase::Persisting => "persisting",
            SyncPhase::RollingBack => "rolling_back",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merge result for one table in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSyncReport {
    pub table_id: TableId,
    pub merge: MergeReport,
    pub rows_after_merge: usize,
}

/// Everything a completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub position: Position,
    pub source: ExtractionSource,
    /// Tables that were due and requested
    pub requested: Vec<TableId>,
    /// Requested tables the response updated, in request order
    pub tables: Vec<TableSyncReport>,
    /// Only tables the policy actually changed
    pub retention: Vec<RetentionReport>,
    pub snapshot: SnapshotTaken,
    /// Non-object items dropped from the response
    pub skipped_items: usize,
    /// Response keys that were not requested
    pub ignored_tables: Vec<String>,
}

impl SyncReport {
    pub fn table(&self, table_id: &str) -> Option<&TableSyncReport> {
        self.tables.iter().find(|t| t.table_id == table_id)
    }

    /// Requested tables missing from the response; their cursors did not move.
    pub fn unanswered(&self) -> Vec<&TableId> {
        self.requested
            .iter()
            .filter(|id| self.table(id).is_none())
            .collect()
    }
}

/// Result of a scheduling trigger.
///
/// Extraction failures are reported here rather than as `Err`: the cycle is
/// a no-op and prior state is intact. Only persistence failures surface as
/// errors.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    EmptyConversation,
    NothingDue { position: Position },
    /// Another cycle was in flight; this trigger was dropped
    Busy,
    ExtractionFailed { position: Position, error: TabulaError },
    Synced(SyncReport),
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Synced(report) => Some(report),
            _ => None,
        }
    }
}

/// A user-driven change to one table.
#[derive(Debug, Clone, PartialEq)]
pub enum ManualEdit {
    /// Insert a row; on keyed incremental tables it replaces the row with the same key
    Add { table_id: TableId, row: Row },
    /// Replace the row at `index`
    Edit { table_id: TableId, index: usize, row: Row },
    Delete { table_id: TableId, index: usize },
}

impl ManualEdit {
    pub fn table_id(&self) -> &str {
        match self {
            ManualEdit::Add { table_id, .. }
            | ManualEdit::Edit { table_id, .. }
            | ManualEdit::Delete { table_id, .. } => table_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ManualEdit::Add { .. } => "add",
            ManualEdit::Edit { .. } => "edit",
            ManualEdit::Delete { .. } => "delete",
        }
    }
}

/// Result of an applied manual edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualEditReport {
    pub table_id: TableId,
    pub rows: usize,
    /// Other rows removed because they shared the edited row's key
    pub displaced: usize,
    pub snapshot: SnapshotTaken,
}

/// Blocks rendered for an outgoing prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInjection {
    pub blocks: Vec<InjectableBlock>,
    pub placements: Vec<Placement>,
    /// Whether the message list was left untouched
    pub dry_run: bool,
}

impl PromptInjection {
    pub fn token_estimate(&self) -> i32 {
        self.blocks.iter().map(|b| b.token_estimate).sum()
    }
}
