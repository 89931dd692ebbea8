//! Tabula Core - Data Types
//!
//! Pure data structures shared by every Tabula crate: table schema, rows,
//! live table state, sync cursor, snapshots, configuration and errors.
//! This crate contains no I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod conversation;
pub mod error;
pub mod exchange;
pub mod row;
pub mod schema;
pub mod state;

pub use config::{
    ApiConfig, GlobalConfig, GlobalSettings, SyncSettings, DEFAULT_CONTEXT_DEPTH,
    DEFAULT_MAX_SNAPSHOTS, DEFAULT_SYSTEM_PROMPT,
};
pub use conversation::{current_position, ChatMessage, MessageRole};
pub use error::{ConfigError, LlmError, StorageError, TabulaError, TabulaResult, ValidationError};
pub use exchange::{
    export_config, export_schema_only, import_config, merge_config, ConfigEnvelope,
    ConfigMergeOutcome, ImportedConfig, MergeOptions, SchemaEnvelope, EXPORT_FORMAT_VERSION,
};
pub use row::{Row, RowKey, EMPTY_CELL};
pub use schema::{FieldDef, TableSchema, DEFAULT_UPDATE_FREQUENCY};
pub use state::{ConversationData, Snapshot, SyncCursor, TableState};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Stable identifier of a table, as configured in its schema.
pub type TableId = String;

/// Index into the conversation's message sequence ("floor").
///
/// Signed so that elapsed counts stay meaningful when the cursor is ahead
/// of a truncated conversation.
pub type Position = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
