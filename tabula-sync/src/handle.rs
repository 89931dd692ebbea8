//! Shared, single-flight access to a [`SyncEngine`].

use crate::engine::SyncEngine;
use crate::outcome::{ManualEdit, ManualEditReport, PromptInjection, SyncOutcome};
use std::sync::Arc;
use tabula_core::{ApiConfig, ChatMessage, GlobalSettings, Position, TableSchema, TabulaResult};
use tabula_snapshot::RollbackOutcome;
use tokio::sync::{Mutex, MutexGuard};

/// Cloneable handle serializing every command on one engine.
///
/// A conversation-advanced trigger that finds a cycle in flight is dropped
/// and reported as [`SyncOutcome::Busy`]; the next message will trigger
/// again. Rollbacks, manual edits and configuration changes wait for the
/// in-flight cycle instead, because losing them would lose user intent.
#[derive(Clone)]
pub struct SyncHandle {
    engine: Arc<Mutex<SyncEngine>>,
}

impl SyncHandle {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Exclusive access for reads or commands not covered below.
    pub async fn lock(&self) -> MutexGuard<'_, SyncEngine> {
        self.engine.lock().await
    }

    pub fn is_busy(&self) -> bool {
        self.engine.try_lock().is_err()
    }

    pub async fn on_conversation_advanced(&self, messages: &[ChatMessage]) -> TabulaResult<SyncOutcome> {
        let Ok(mut engine) = self.engine.try_lock() else {
            tracing::debug!("Sync cycle in flight, dropping conversation-advanced trigger");
            return Ok(SyncOutcome::Busy);
        };
        engine.on_conversation_advanced(messages).await
    }

    pub async fn manual_refresh_all(&self, messages: &[ChatMessage]) -> TabulaResult<SyncOutcome> {
        self.engine.lock().await.manual_refresh_all(messages).await
    }

    pub async fn on_history_mutated(&self, position: Position) -> TabulaResult<RollbackOutcome> {
        self.engine.lock().await.on_history_mutated(position)
    }

    pub async fn on_manual_edit(&self, edit: ManualEdit, position: Position) -> TabulaResult<ManualEditReport> {
        self.engine.lock().await.on_manual_edit(edit, position)
    }

    pub async fn set_base_floor(&self, floor: Position) -> TabulaResult<()> {
        self.engine.lock().await.set_base_floor(floor)
    }

    pub async fn prepare_prompt(&self, messages: &mut Vec<ChatMessage>, dry_run: bool) -> PromptInjection {
        self.engine.lock().await.prepare_prompt(messages, dry_run)
    }

    pub async fn update_schema(&self, schema: Vec<TableSchema>) -> TabulaResult<()> {
        self.engine.lock().await.update_schema(schema)
    }

    pub async fn update_settings(&self, api: ApiConfig, global: GlobalSettings) -> TabulaResult<()> {
        self.engine.lock().await.update_settings(api, global)
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("busy", &self.is_busy())
            .finish()
    }
}
