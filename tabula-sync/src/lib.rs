//! Tabula Sync - Synchronization Orchestrator
//!
//! Keeps a conversation's tables current. Hosts translate their own events
//! into explicit commands:
//!
//! - [`SyncHandle::on_conversation_advanced`]: schedule, extract, merge,
//!   clean, snapshot and persist
//! - [`SyncHandle::on_history_mutated`]: roll back to the latest snapshot
//!   before a deleted or regenerated message
//! - [`SyncHandle::on_manual_edit`]: user add/edit/delete of a row
//! - [`SyncHandle::prepare_prompt`]: inject formatted tables into an
//!   outgoing message list
//!
//! Configuration is passed in through the global-scoped store and the
//! update commands; there is no ambient global state.

pub mod engine;
pub mod handle;
pub mod outcome;

pub use engine::SyncEngine;
pub use handle::SyncHandle;
pub use outcome::{
    ManualEdit, ManualEditReport, PromptInjection, SyncOutcome, SyncPhase, SyncReport,
    TableSyncReport,
};

pub use tabula_snapshot::{RestoredState, RollbackOutcome};
