//! The synchronization state machine for one conversation.
//!
//! Every mutating command works on copies of the live state. The copies are
//! written to the conversation store in a single save (tables, cursor and
//! snapshot log together) and installed in memory only once that save
//! succeeds, so a failed write never leaves unpersisted state behind.

use crate::outcome::{
    ManualEdit, ManualEditReport, PromptInjection, SyncOutcome, SyncPhase, SyncReport,
    TableSyncReport,
};
use std::sync::Arc;
use tabula_context::{build_injectables, insertion_index, ContextInjector, Placement};
use tabula_core::{
    current_position, export_config, import_config, merge_config, ApiConfig, ChatMessage,
    ConfigEnvelope, ConversationData, GlobalConfig, GlobalSettings, MergeOptions, Position, Row,
    RowKey, SyncCursor, SyncSettings, TableId, TableSchema, TableState, TabulaResult, ValidationError,
};
use tabula_engine::{clean_tables, due_tables, evaluate, merge};
use tabula_llm::{ExtractionRequest, Extractor};
use tabula_snapshot::{RollbackOutcome, SnapshotManager};
use tabula_storage::{ConfigRepository, ConversationRepository, KeyValueStore};

/// Orchestrates scheduling, extraction, merge, retention, persistence and
/// snapshots for one conversation.
///
/// Not designed for concurrent entry; share it through
/// [`SyncHandle`](crate::SyncHandle).
pub struct SyncEngine {
    config: GlobalConfig,
    settings: SyncSettings,
    config_repo: ConfigRepository,
    conversation_repo: ConversationRepository,
    extractor: Extractor,
    injector: ContextInjector,
    tables: TableState,
    cursor: SyncCursor,
    snapshots: SnapshotManager,
    phase: SyncPhase,
}

impl SyncEngine {
    /// Load configuration from the global store and conversation state from
    /// the conversation store, defaulting whatever was never saved.
    pub fn open(
        global_store: Arc<dyn KeyValueStore>,
        conversation_store: Arc<dyn KeyValueStore>,
        extractor: Extractor,
        settings: SyncSettings,
    ) -> TabulaResult<Self> {
        let config_repo = ConfigRepository::new(global_store);
        let conversation_repo = ConversationRepository::new(conversation_store);

        let config = config_repo.load_or_default()?;
        config.validate()?;
        let data = conversation_repo.load_or_default()?;
        let snapshots = SnapshotManager::with_snapshots(&settings, data.snapshots)?;

        tracing::debug!(
            tables = config.schema.len(),
            stored_tables = data.tables.len(),
            snapshots = snapshots.len(),
            base_floor = data.cursor.base_floor,
            "Sync engine opened"
        );

        Ok(Self {
            config,
            settings,
            config_repo,
            conversation_repo,
            extractor,
            injector: ContextInjector::default(),
            tables: data.tables,
            cursor: data.cursor,
            snapshots,
            phase: SyncPhase::Idle,
        })
    }

    pub fn with_injector(mut self, injector: ContextInjector) -> Self {
        self.injector = injector;
        self
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn tables(&self) -> &TableState {
        &self.tables
    }

    pub fn rows(&self, table_id: &str) -> &[Row] {
        self.tables.rows(table_id)
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    // ========================================================================
    // SCHEDULED AND MANUAL CYCLES
    // ========================================================================

    /// Run a cycle for the tables whose update frequency has elapsed.
    pub async fn on_conversation_advanced(&mut self, messages: &[ChatMessage]) -> TabulaResult<SyncOutcome> {
        let result = self.run_cycle(messages, false).await;
        self.phase = SyncPhase::Idle;
        result
    }

    /// Run a cycle for every AI-enabled table regardless of frequency.
    pub async fn manual_refresh_all(&mut self, messages: &[ChatMessage]) -> TabulaResult<SyncOutcome> {
        let result = self.run_cycle(messages, true).await;
        self.phase = SyncPhase::Idle;
        result
    }

    async fn run_cycle(&mut self, messages: &[ChatMessage], refresh_all: bool) -> TabulaResult<SyncOutcome> {
        if messages.is_empty() {
            tracing::debug!("Conversation is empty, skipping sync");
            return Ok(SyncOutcome::EmptyConversation);
        }
        let position = current_position(messages);

        self.phase = SyncPhase::Scheduling;
        let due: Vec<TableSchema> = if refresh_all {
            self.config
                .schema
                .iter()
                .filter(|t| t.ai_enabled)
                .cloned()
                .collect()
        } else {
            for check in evaluate(&self.config.schema, &self.cursor, position) {
                tracing::debug!(
                    table_id = %check.table_id,
                    last_synced = check.last_synced,
                    elapsed = check.elapsed,
                    frequency = check.frequency,
                    ai_enabled = check.ai_enabled,
                    due = check.due,
                    "Scheduling check"
                );
            }
            due_tables(&self.config.schema, &self.cursor, position)
                .into_iter()
                .cloned()
                .collect()
        };

        if due.is_empty() {
            tracing::debug!(position, "No tables due");
            return Ok(SyncOutcome::NothingDue { position });
        }

        self.phase = SyncPhase::Extracting;
        let due_refs: Vec<&TableSchema> = due.iter().collect();
        let request = ExtractionRequest::build(&self.config.global, &due_refs, &self.tables, messages);
        tracing::info!(
            position,
            tables = ?request.table_ids,
            refresh_all,
            "Starting extraction"
        );

        let extracted = match self.extractor.extract(&self.config.api, &request).await {
            Ok(extracted) => extracted,
            Err(error) => {
                tracing::warn!(position, error = %error, "Extraction failed, nothing merged");
                return Ok(SyncOutcome::ExtractionFailed { position, error });
            }
        };

        self.phase = SyncPhase::Merging;
        let mut tables = self.tables.clone();
        let mut cursor = self.cursor.clone();
        let mut table_reports = Vec::with_capacity(due.len());

        for schema in &due {
            let Some(rows) = extracted.tables.get(&schema.id) else {
                tracing::debug!(table_id = %schema.id, "Table absent from response, cursor not advanced");
                continue;
            };

            let result = merge(schema, tables.rows(&schema.id), rows);
            tracing::info!(
                table_id = %schema.id,
                mode = ?result.report.mode,
                added = result.report.added,
                updated = result.report.updated,
                retained = result.report.retained,
                skipped = result.report.skipped,
                "Merged extracted rows"
            );

            table_reports.push(TableSyncReport {
                table_id: schema.id.clone(),
                merge: result.report,
                rows_after_merge: result.rows.len(),
            });
            tables.set_rows(schema.id.clone(), result.rows);
            cursor.mark_synced(schema.id.clone(), position);
        }
        cursor.base_floor = position;

        if !extracted.ignored_tables.is_empty() {
            tracing::debug!(ignored = ?extracted.ignored_tables, "Ignored unrequested tables in response");
        }

        self.phase = SyncPhase::Cleaning;
        let (tables, retention) = clean_tables(&self.config.schema, &tables);
        for report in &retention {
            tracing::info!(
                table_id = %report.table_id,
                strategy = ?report.strategy,
                duplicates_removed = report.duplicates_removed,
                unidentifiable_removed = report.unidentifiable_removed,
                limit_removed = report.limit_removed,
                "Retention applied"
            );
        }

        self.phase = SyncPhase::Snapshotting;
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots.take_snapshot(&tables, &cursor, position);

        self.phase = SyncPhase::Persisting;
        self.commit(tables, cursor, snapshots)?;

        tracing::info!(
            position,
            source = ?extracted.source,
            updated_tables = table_reports.len(),
            snapshots = self.snapshots.len(),
            "Sync cycle completed"
        );

        Ok(SyncOutcome::Synced(SyncReport {
            position,
            source: extracted.source,
            requested: request.table_ids,
            tables: table_reports,
            retention,
            snapshot,
            skipped_items: extracted.skipped_items,
            ignored_tables: extracted.ignored_tables,
        }))
    }

    // ========================================================================
    // ROLLBACK
    // ========================================================================

    /// Restore the latest snapshot strictly before the mutated position.
    ///
    /// Without one, state is left unchanged and `Unavailable` is returned.
    pub fn on_history_mutated(&mut self, position: Position) -> TabulaResult<RollbackOutcome> {
        self.phase = SyncPhase::RollingBack;
        let result = self.rollback(position);
        self.phase = SyncPhase::Idle;
        result
    }

    fn rollback(&mut self, position: Position) -> TabulaResult<RollbackOutcome> {
        let mut snapshots = self.snapshots.clone();
        let outcome = snapshots.rollback(position);

        match &outcome {
            RollbackOutcome::Restored(restored) => {
                self.commit(restored.tables.clone(), restored.cursor.clone(), snapshots)?;
                tracing::info!(
                    mutated_position = position,
                    restored_position = restored.snapshot_position,
                    discarded = restored.discarded,
                    base_floor = restored.base_floor(),
                    "Rolled back table state"
                );
            }
            RollbackOutcome::Unavailable { target } => {
                tracing::warn!(mutated_position = *target, "No snapshot precedes mutated position, state unchanged");
            }
        }

        Ok(outcome)
    }

    // ========================================================================
    // MANUAL EDITS
    // ========================================================================

    /// Apply a user edit and snapshot the result at `position`.
    ///
    /// Retention is not applied.
    pub fn on_manual_edit(&mut self, edit: ManualEdit, position: Position) -> TabulaResult<ManualEditReport> {
        let schema = self
            .config
            .table(edit.table_id())
            .cloned()
            .ok_or_else(|| ValidationError::UnknownTable {
                table_id: edit.table_id().to_string(),
            })?;
        let kind = edit.kind();

        let mut tables = self.tables.clone();
        let mut rows = tables.rows(&schema.id).to_vec();
        let displaced = apply_edit(&schema, &mut rows, edit)?;
        let row_count = rows.len();
        tables.set_rows(schema.id.clone(), rows);

        self.phase = SyncPhase::Snapshotting;
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots.take_snapshot(&tables, &self.cursor, position);

        self.phase = SyncPhase::Persisting;
        let cursor = self.cursor.clone();
        let result = self.commit(tables, cursor, snapshots);
        self.phase = SyncPhase::Idle;
        result?;

        tracing::info!(
            table_id = %schema.id,
            kind,
            rows = row_count,
            displaced,
            position,
            "Manual edit applied"
        );

        Ok(ManualEditReport {
            table_id: schema.id,
            rows: row_count,
            displaced,
            snapshot,
        })
    }

    /// Restart every table's elapsed count from `floor`. No snapshot is taken.
    pub fn set_base_floor(&mut self, floor: Position) -> TabulaResult<()> {
        let mut cursor = self.cursor.clone();
        let ids: Vec<TableId> = self.config.schema.iter().map(|t| t.id.clone()).collect();
        cursor.reset_to(floor, &ids);

        self.phase = SyncPhase::Persisting;
        let (tables, snapshots) = (self.tables.clone(), self.snapshots.clone());
        let result = self.commit(tables, cursor, snapshots);
        self.phase = SyncPhase::Idle;
        result?;

        tracing::info!(floor, tables = ids.len(), "Base floor set");
        Ok(())
    }

    // ========================================================================
    // PROMPT INJECTION
    // ========================================================================

    /// Inject formatted tables into an outgoing message list.
    ///
    /// With `dry_run` the list is left untouched and the placements are only
    /// computed.
    pub fn prepare_prompt(&self, messages: &mut Vec<ChatMessage>, dry_run: bool) -> PromptInjection {
        let blocks = build_injectables(&self.config.schema, &self.tables);

        let placements = if dry_run {
            let mut placements: Vec<Placement> = blocks
                .iter()
                .map(|b| Placement {
                    table_id: b.table_id.clone(),
                    depth: b.depth,
                    original_index: insertion_index(messages.len(), b.depth),
                })
                .collect();
            placements.sort_by_key(|p| p.original_index);
            placements
        } else {
            self.injector.inject(messages, &blocks)
        };

        if !blocks.is_empty() {
            tracing::debug!(
                blocks = blocks.len(),
                tokens = blocks.iter().map(|b| b.token_estimate).sum::<i32>(),
                dry_run,
                "Prepared prompt injection"
            );
        }

        PromptInjection {
            blocks,
            placements,
            dry_run,
        }
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    /// Replace the table schema and save the global configuration.
    pub fn update_schema(&mut self, schema: Vec<TableSchema>) -> TabulaResult<()> {
        let config = self.config.clone().with_schema(schema);
        self.install_config(config)
    }

    /// Replace the API and global settings and save the global configuration.
    pub fn update_settings(&mut self, api: ApiConfig, global: GlobalSettings) -> TabulaResult<()> {
        let mut config = self.config.clone();
        config.api = api;
        config.global = global;
        self.install_config(config)
    }

    pub fn export_config(&self) -> ConfigEnvelope {
        export_config(&self.config)
    }

    /// Import an exported envelope. Returns the table ids skipped as duplicates.
    pub fn import_config(&mut self, json: &str, options: MergeOptions) -> TabulaResult<Vec<TableId>> {
        let imported = import_config(json)?;
        let outcome = merge_config(&self.config, imported, options);
        self.install_config(outcome.config)?;

        if !outcome.skipped_ids.is_empty() {
            tracing::info!(skipped = ?outcome.skipped_ids, "Skipped duplicate table ids on import");
        }
        Ok(outcome.skipped_ids)
    }

    fn install_config(&mut self, config: GlobalConfig) -> TabulaResult<()> {
        config.validate()?;
        self.config_repo.save(&config)?;
        tracing::info!(tables = config.schema.len(), "Configuration saved");
        self.config = config;
        Ok(())
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Save staged state in one write, then install it.
    fn commit(&mut self, tables: TableState, cursor: SyncCursor, snapshots: SnapshotManager) -> TabulaResult<()> {
        let data = ConversationData {
            tables,
            cursor,
            snapshots: snapshots.snapshots().to_vec(),
        };

        if let Err(e) = self.conversation_repo.save(&data) {
            tracing::warn!(error = %e, phase = %self.phase, "Persisting conversation state failed");
            return Err(e);
        }

        self.tables = data.tables;
        self.cursor = data.cursor;
        self.snapshots = snapshots;
        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("phase", &self.phase)
            .field("tables", &self.config.schema.len())
            .field("cursor", &self.cursor)
            .field("snapshots", &self.snapshots.positions())
            .field("extractor", &self.extractor)
            .finish()
    }
}

/// Apply one edit to a table's rows. Returns how many other rows were
/// displaced by key collision.
///
/// On keyed incremental tables the written row must carry a key, and other
/// rows sharing it are removed. Rows already in the table that lack a key
/// are never touched by an edit to a different row.
fn apply_edit(schema: &TableSchema, rows: &mut Vec<Row>, edit: ManualEdit) -> TabulaResult<usize> {
    let check_index = |index: usize, len: usize| -> TabulaResult<()> {
        if index < len {
            Ok(())
        } else {
            Err(ValidationError::RowIndexOutOfRange {
                table_id: schema.id.clone(),
                index,
                len,
            }
            .into())
        }
    };

    let key_field = schema.primary_key().filter(|_| !schema.is_append_only());
    let key_of = |row: &Row| -> TabulaResult<Option<RowKey>> {
        let Some(field) = key_field else {
            return Ok(None);
        };
        match row.key_of(field) {
            Some(key) => Ok(Some(key)),
            None => Err(ValidationError::RequiredFieldMissing {
                field: field.to_string(),
            }
            .into()),
        }
    };

    let (index, key) = match edit {
        ManualEdit::Add { row, .. } => {
            let key = key_of(&row)?;
            rows.insert(0, row);
            (0, key)
        }
        ManualEdit::Edit { index, row, .. } => {
            check_index(index, rows.len())?;
            let key = key_of(&row)?;
            rows[index] = row;
            (index, key)
        }
        ManualEdit::Delete { index, .. } => {
            check_index(index, rows.len())?;
            rows.remove(index);
            return Ok(0);
        }
    };

    let (Some(field), Some(key)) = (key_field, key) else {
        return Ok(0);
    };
    let before = rows.len();
    let mut i = 0;
    rows.retain(|r| {
        let keep = i == index || r.key_of(field).as_ref() != Some(&key);
        i += 1;
        keep
    });
    Ok(before - rows.len())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_test_utils::assertions::assert_keys;
    use tabula_test_utils::fixtures::{event_log, task, task_table};

    #[test]
    fn test_apply_add_replaces_same_key_at_front() {
        let schema = task_table();
        let mut rows = vec![task("1", "open"), task("2", "open")];

        let displaced = apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Add {
                table_id: "tasks".to_string(),
                row: task("2", "done"),
            },
        )
        .expect("add");

        assert_eq!(displaced, 1);
        assert_keys(&rows, "id", &["2", "1"]);
        assert_eq!(rows[0].display_value("status"), "done");
    }

    #[test]
    fn test_apply_add_without_key_is_rejected() {
        let schema = task_table();
        let mut rows = vec![task("1", "open")];
        let result = apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Add {
                table_id: "tasks".to_string(),
                row: Row::new().with("status", "orphan"),
            },
        );
        assert!(matches!(
            result,
            Err(tabula_core::TabulaError::Validation(ValidationError::RequiredFieldMissing { .. }))
        ));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_apply_add_keeps_existing_keyless_rows() {
        let schema = task_table();
        let mut rows = vec![Row::new().with("status", "note"), task("2", "old")];

        let displaced = apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Add {
                table_id: "tasks".to_string(),
                row: task("2", "new"),
            },
        )
        .expect("add");

        assert_eq!(displaced, 1);
        assert_keys(&rows, "id", &["2", "-"]);
        assert_eq!(rows[0].display_value("status"), "new");
        assert_eq!(rows[1].display_value("status"), "note");
    }

    #[test]
    fn test_apply_edit_without_key_is_rejected() {
        let schema = task_table();
        let mut rows = vec![task("1", "open")];

        let result = apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Edit {
                table_id: "tasks".to_string(),
                index: 0,
                row: Row::new().with("status", "note"),
            },
        );

        assert!(matches!(
            result,
            Err(tabula_core::TabulaError::Validation(ValidationError::RequiredFieldMissing { ref field })) if field == "id"
        ));
        assert_keys(&rows, "id", &["1"]);
    }

    #[test]
    fn test_apply_add_to_append_only_prepends() {
        let schema = event_log();
        let mut rows = vec![Row::new().with("summary", "old")];
        apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Add {
                table_id: "events".to_string(),
                row: Row::new().with("summary", "old"),
            },
        )
        .expect("add");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_apply_edit_removes_colliding_rows() {
        let schema = task_table();
        let mut rows = vec![task("1", "a"), task("2", "b"), task("3", "c")];

        let displaced = apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Edit {
                table_id: "tasks".to_string(),
                index: 2,
                row: task("1", "renamed"),
            },
        )
        .expect("edit");

        assert_eq!(displaced, 1);
        assert_keys(&rows, "id", &["2", "1"]);
        assert_eq!(rows[1].display_value("status"), "renamed");
    }

    #[test]
    fn test_apply_edit_and_delete_check_bounds() {
        let schema = task_table();
        let mut rows = vec![task("1", "a")];

        let edit = apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Edit {
                table_id: "tasks".to_string(),
                index: 1,
                row: task("9", "x"),
            },
        );
        assert!(matches!(
            edit,
            Err(tabula_core::TabulaError::Validation(ValidationError::RowIndexOutOfRange { index: 1, len: 1, .. }))
        ));

        apply_edit(
            &schema,
            &mut rows,
            ManualEdit::Delete {
                table_id: "tasks".to_string(),
                index: 0,
            },
        )
        .expect("delete");
        assert!(rows.is_empty());
    }
}
