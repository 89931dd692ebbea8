//! Configuration types

use crate::{ConfigError, TableSchema, TabulaError, TabulaResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default number of recent messages shown to extraction.
pub const DEFAULT_CONTEXT_DEPTH: usize = 15;

/// Default number of retained snapshots per conversation.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 3;

/// Default system prompt for extraction requests.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional data analyst. \
     Analyze the following conversation and extract structured information for the tracking tables.";

// ============================================================================
// API CONFIG
// ============================================================================

/// Independent generation endpoint configured by the user.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub key: String,
    pub model: String,
}

impl ApiConfig {
    pub fn new(
        endpoint: impl Into<String>,
        key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            model: model.into(),
        }
    }

    /// The independent endpoint is used only when both endpoint and key are set.
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.key.trim().is_empty()
    }

    /// Create from environment variables, empty when unset.
    ///
    /// Environment variables:
    /// - `TABULA_API_ENDPOINT`: Base URL of an OpenAI-compatible API
    /// - `TABULA_API_KEY`: Bearer token for that API
    /// - `TABULA_API_MODEL`: Model name
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("TABULA_API_ENDPOINT").unwrap_or_default(),
            key: std::env::var("TABULA_API_KEY").unwrap_or_default(),
            model: std::env::var("TABULA_API_MODEL").unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

// ============================================================================
// GLOBAL SETTINGS
// ============================================================================

/// Extraction settings shared by every table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    /// Number of recent messages included in extraction requests
    pub context_depth: usize,
    pub system_prompt: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            context_depth: DEFAULT_CONTEXT_DEPTH,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl GlobalSettings {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TABULA_CONTEXT_DEPTH`: Recent messages shown to extraction (default: 15)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            context_depth: std::env::var("TABULA_CONTEXT_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.context_depth),
            ..defaults
        }
    }
}

// ============================================================================
// GLOBAL CONFIG
// ============================================================================

/// Configuration shared across conversations: API, settings and table schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub api: ApiConfig,
    pub global: GlobalSettings,
    pub schema: Vec<TableSchema>,
}

impl GlobalConfig {
    pub fn with_schema(mut self, schema: Vec<TableSchema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    pub fn table(&self, table_id: &str) -> Option<&TableSchema> {
        self.schema.iter().find(|t| t.id == table_id)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - context_depth > 0
    /// - every table id is non-empty and unique
    /// - every field key is non-empty
    pub fn validate(&self) -> TabulaResult<()> {
        if self.global.context_depth == 0 {
            return Err(TabulaError::Config(ConfigError::InvalidValue {
                field: "global.context_depth".to_string(),
                value: "0".to_string(),
                reason: "context_depth must be greater than 0".to_string(),
            }));
        }

        let mut seen = HashSet::new();
        for table in &self.schema {
            if table.id.trim().is_empty() {
                return Err(TabulaError::Config(ConfigError::MissingRequired {
                    field: "schema.id".to_string(),
                }));
            }
            if !seen.insert(table.id.as_str()) {
                return Err(TabulaError::Config(ConfigError::DuplicateTableId {
                    table_id: table.id.clone(),
                }));
            }
            if let Some(pos) = table.fields.iter().position(|f| f.key.trim().is_empty()) {
                return Err(TabulaError::Config(ConfigError::InvalidValue {
                    field: format!("schema.{}.fields[{}].key", table.id, pos),
                    value: String::new(),
                    reason: "field keys must be non-empty".to_string(),
                }));
            }
        }

        Ok(())
    }
}

// ============================================================================
// SYNC SETTINGS
// ============================================================================

/// Settings of the synchronization engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Snapshots retained per conversation (K)
    pub max_snapshots: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> TabulaResult<()> {
        if self.max_snapshots == 0 {
            return Err(TabulaError::Config(ConfigError::InvalidValue {
                field: "max_snapshots".to_string(),
                value: self.max_snapshots.to_string(),
                reason: "at least one snapshot must be retained".to_string(),
            }));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
