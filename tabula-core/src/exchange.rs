//! Configuration export and import
//!
//! Exports wrap the global configuration in a versioned envelope. Imports
//! are validated before anything is returned, and can be merged into an
//! existing configuration either by overwriting or by appending schema
//! entries whose ids are not already present.

use crate::{
    ApiConfig, ConfigError, GlobalConfig, GlobalSettings, StorageError, TableId, TableSchema,
    TabulaError, TabulaResult, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Version written into every export.
pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

/// `type` tag of schema-only exports.
pub const SCHEMA_ONLY_TYPE: &str = "schema-only";

/// Full configuration export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEnvelope {
    pub version: String,
    pub export_time: Timestamp,
    pub config: GlobalConfig,
}

/// Export of the table schema alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaEnvelope {
    pub version: String,
    pub export_time: Timestamp,
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: Vec<TableSchema>,
}

/// Configuration read from an import. Only the schema is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedConfig {
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub global: Option<GlobalSettings>,
    pub schema: Vec<TableSchema>,
}

/// How an import is merged into the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    pub overwrite_api: bool,
    pub overwrite_global: bool,
    /// Replace the schema instead of appending unseen table ids
    pub overwrite_schema: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            overwrite_api: true,
            overwrite_global: true,
            overwrite_schema: false,
        }
    }
}

/// Result of merging an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigMergeOutcome {
    pub config: GlobalConfig,
    /// Imported table ids skipped because they already existed
    pub skipped_ids: Vec<TableId>,
}

pub fn export_config(config: &GlobalConfig) -> ConfigEnvelope {
    ConfigEnvelope {
        version: EXPORT_FORMAT_VERSION.to_string(),
        export_time: Utc::now(),
        config: config.clone(),
    }
}

pub fn export_schema_only(schema: &[TableSchema]) -> SchemaEnvelope {
    SchemaEnvelope {
        version: EXPORT_FORMAT_VERSION.to_string(),
        export_time: Utc::now(),
        kind: SCHEMA_ONLY_TYPE.to_string(),
        schema: schema.to_vec(),
    }
}

impl ConfigEnvelope {
    pub fn to_json_pretty(&self) -> TabulaResult<String> {
        to_json_pretty(self, "config export")
    }
}

impl SchemaEnvelope {
    pub fn to_json_pretty(&self) -> TabulaResult<String> {
        to_json_pretty(self, "schema export")
    }
}

fn to_json_pretty<T: Serialize>(value: &T, what: &str) -> TabulaResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        TabulaError::Storage(StorageError::Serialization {
            key: what.to_string(),
            reason: e.to_string(),
        })
    })
}

fn rejected(reason: impl Into<String>) -> TabulaError {
    TabulaError::Config(ConfigError::ImportFormatInvalid {
        reason: reason.into(),
    })
}

/// Parse an exported configuration.
///
/// The document must carry a `version` and a `config.schema`; anything else
/// is rejected without side effects.
pub fn import_config(json: &str) -> TabulaResult<ImportedConfig> {
    let mut document: Value =
        serde_json::from_str(json).map_err(|e| rejected(format!("not valid JSON: {}", e)))?;

    match document.get("version") {
        None | Some(Value::Null) => return Err(rejected("missing version")),
        Some(_) => {}
    }

    let config = document
        .get_mut("config")
        .filter(|c| c.is_object())
        .map(Value::take)
        .ok_or_else(|| rejected("missing config section"))?;

    match config.get("schema") {
        None | Some(Value::Null) => return Err(rejected("missing config.schema")),
        Some(_) => {}
    }

    serde_json::from_value(config).map_err(|e| rejected(format!("malformed config: {}", e)))
}

/// Merge an imported configuration into the current one.
///
/// In append mode, imported tables whose id already exists are skipped,
/// never overwritten.
pub fn merge_config(
    current: &GlobalConfig,
    imported: ImportedConfig,
    options: MergeOptions,
) -> ConfigMergeOutcome {
    let mut merged = current.clone();
    let mut skipped_ids = Vec::new();

    if options.overwrite_api {
        if let Some(api) = imported.api {
            merged.api = api;
        }
    }

    if options.overwrite_global {
        if let Some(global) = imported.global {
            merged.global = global;
        }
    }

    if options.overwrite_schema {
        merged.schema = imported.schema;
    } else {
        let mut existing: HashSet<TableId> = merged.schema.iter().map(|t| t.id.clone()).collect();
        for table in imported.schema {
            if existing.insert(table.id.clone()) {
                merged.schema.push(table);
            } else {
                skipped_ids.push(table.id);
            }
        }
    }

    ConfigMergeOutcome {
        config: merged,
        skipped_ids,
    }
}

// =============================================================================
// TESTS
// =============================================================================
