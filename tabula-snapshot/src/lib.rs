//! Tabula Snapshot - Rollback Protocol
//!
//! Records position-tagged copies of the full table state after every
//! committed mutation and restores the latest copy that predates a deleted
//! or regenerated message.
//!
//! Snapshots are kept oldest first in non-decreasing position order and are
//! never mutated once taken: state is cloned in on snapshot and cloned out
//! on restore.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tabula_core::{Position, Snapshot, SyncCursor, SyncSettings, TableState, TabulaResult};
use uuid::Uuid;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Summary of a snapshot that was just taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTaken {
    pub snapshot_id: Uuid,
    pub position: Position,
    /// Snapshots at later positions dropped because the log moved backwards
    pub superseded: usize,
    /// Oldest snapshots dropped to respect the retention limit
    pub evicted: usize,
}

/// State restored from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoredState {
    /// Position of the snapshot that was restored
    pub snapshot_position: Position,
    pub tables: TableState,
    pub cursor: SyncCursor,
    /// Snapshots at or after the rollback target that were discarded
    pub discarded: usize,
}

impl RestoredState {
    pub fn base_floor(&self) -> Position {
        self.cursor.base_floor
    }
}

/// Result of a rollback request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RollbackOutcome {
    Restored(RestoredState),
    /// No retained snapshot predates the target; nothing changed
    Unavailable { target: Position },
}

impl RollbackOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, RollbackOutcome::Restored(_))
    }
}

// ============================================================================
// SNAPSHOT MANAGER
// ============================================================================

/// Bounded FIFO of snapshots for one conversation.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    max_snapshots: usize,
    /// Oldest first, positions non-decreasing
    snapshots: Vec<Snapshot>,
}

impl SnapshotManager {
    /// Create an empty manager.
    pub fn new(settings: &SyncSettings) -> TabulaResult<Self> {
        Self::with_snapshots(settings, Vec::new())
    }

    /// Create a manager over previously persisted snapshots.
    ///
    /// Snapshots are re-sorted by position and trimmed to the limit, so a
    /// blob written under a larger limit loads cleanly.
    pub fn with_snapshots(settings: &SyncSettings, mut snapshots: Vec<Snapshot>) -> TabulaResult<Self> {
        settings.validate()?;
        snapshots.sort_by_key(|s| s.position);
        let mut manager = Self {
            max_snapshots: settings.max_snapshots,
            snapshots,
        };
        manager.enforce_snapshot_limit();
        Ok(manager)
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Retained snapshots, oldest first.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<Snapshot> {
        self.snapshots
    }

    pub fn positions(&self) -> Vec<Position> {
        self.snapshots.iter().map(|s| s.position).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Record a copy of `tables` and `cursor` at `position`.
    ///
    /// Retained snapshots at later positions describe a history that no
    /// longer exists and are dropped first; then the oldest are evicted
    /// until the limit holds.
    pub fn take_snapshot(
        &mut self,
        tables: &TableState,
        cursor: &SyncCursor,
        position: Position,
    ) -> SnapshotTaken {
        let before = self.snapshots.len();
        self.snapshots.retain(|s| s.position <= position);
        let superseded = before - self.snapshots.len();

        let snapshot = Snapshot {
            snapshot_id: Uuid::now_v7(),
            position,
            tables: tables.clone(),
            cursor: cursor.clone(),
            taken_at: Utc::now(),
        };
        let snapshot_id = snapshot.snapshot_id;
        self.snapshots.push(snapshot);

        let evicted = self.enforce_snapshot_limit();

        SnapshotTaken {
            snapshot_id,
            position,
            superseded,
            evicted,
        }
    }

    /// Enforce the retention limit by removing the oldest snapshots.
    fn enforce_snapshot_limit(&mut self) -> usize {
        if self.snapshots.len() <= self.max_snapshots {
            return 0;
        }
        let excess = self.snapshots.len() - self.max_snapshots;
        self.snapshots.drain(0..excess);
        excess
    }

    /// Latest snapshot taken strictly before `target`.
    pub fn restore_point(&self, target: Position) -> Option<&Snapshot> {
        self.snapshots.iter().rev().find(|s| s.position < target)
    }

    /// Roll back to the latest snapshot strictly before `target`.
    ///
    /// On success every snapshot at or after `target` is discarded and the
    /// restored state is returned for the caller to install and persist.
    /// Without a restore point nothing changes.
    pub fn rollback(&mut self, target: Position) -> RollbackOutcome {
        let Some(point) = self.restore_point(target) else {
            return RollbackOutcome::Unavailable { target };
        };

        let snapshot_position = point.position;
        let tables = point.tables.clone();
        let cursor = point.cursor.clone();

        let before = self.snapshots.len();
        self.snapshots.retain(|s| s.position < target);
        let discarded = before - self.snapshots.len();

        RollbackOutcome::Restored(RestoredState {
            snapshot_position,
            tables,
            cursor,
            discarded,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
