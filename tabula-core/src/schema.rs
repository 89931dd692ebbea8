//! Table schema definitions

use crate::TableId;
use serde::{Deserialize, Serialize};

/// Update frequency used when a table does not configure one.
pub const DEFAULT_UPDATE_FREQUENCY: i64 = 3;

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Key under which the value is stored in a row
    pub key: String,
    /// Human-readable column name
    pub name: String,
}

impl FieldDef {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Static definition of a tracked table.
///
/// `fields[0].key` is the primary key by convention. Legacy field names
/// from older exports (`freq`, `aiMaxRows`, `injectOnInput`, ...) are
/// accepted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub id: TableId,
    pub title: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Messages between automatic syncs
    #[serde(default, alias = "freq", skip_serializing_if = "Option::is_none")]
    pub update_frequency: Option<i64>,
    /// Retention cap; zero or negative means unbounded
    #[serde(default)]
    pub max_rows: i64,
    #[serde(default = "default_true")]
    pub ai_enabled: bool,
    /// Whether existing rows are disclosed to extraction
    #[serde(default = "default_true")]
    pub ai_visible: bool,
    /// Rows disclosed when AI-visible; zero means all
    #[serde(default, alias = "aiMaxRows")]
    pub ai_visible_row_limit: usize,
    #[serde(default, alias = "injectOnInput")]
    pub injection_enabled: bool,
    #[serde(default, alias = "injectDepth")]
    pub injection_depth: usize,
    /// Rows injected into the prompt; zero means all
    #[serde(default, alias = "injectMaxRows")]
    pub injection_row_limit: usize,
    #[serde(default, alias = "prompt", skip_serializing_if = "Option::is_none")]
    pub extraction_prompt: Option<String>,
}

impl TableSchema {
    /// Create a table with no fields and default policies.
    pub fn new(id: impl Into<TableId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            fields: Vec::new(),
            update_frequency: None,
            max_rows: 0,
            ai_enabled: true,
            ai_visible: true,
            ai_visible_row_limit: 0,
            injection_enabled: false,
            injection_depth: 0,
            injection_row_limit: 0,
            extraction_prompt: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.fields.push(FieldDef::new(key, name));
        self
    }

    pub fn with_update_frequency(mut self, frequency: i64) -> Self {
        self.update_frequency = Some(frequency);
        self
    }

    pub fn with_max_rows(mut self, max_rows: i64) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_ai_enabled(mut self, enabled: bool) -> Self {
        self.ai_enabled = enabled;
        self
    }

    /// Hide existing rows from extraction; extracted rows are only appended.
    pub fn append_only(mut self) -> Self {
        self.ai_visible = false;
        self
    }

    pub fn with_ai_visible_row_limit(mut self, limit: usize) -> Self {
        self.ai_visible_row_limit = limit;
        self
    }

    pub fn with_injection(mut self, depth: usize, row_limit: usize) -> Self {
        self.injection_enabled = true;
        self.injection_depth = depth;
        self.injection_row_limit = row_limit;
        self
    }

    pub fn with_extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.extraction_prompt = Some(prompt.into());
        self
    }

    /// Key of the first field, if the table has one.
    pub fn primary_key(&self) -> Option<&str> {
        self.fields
            .first()
            .map(|f| f.key.as_str())
            .filter(|k| !k.is_empty())
    }

    /// Configured frequency, falling back to [`DEFAULT_UPDATE_FREQUENCY`]
    /// when unset or not positive.
    pub fn effective_update_frequency(&self) -> i64 {
        match self.update_frequency {
            Some(f) if f > 0 => f,
            _ => DEFAULT_UPDATE_FREQUENCY,
        }
    }

    /// Retention cap, `None` when unbounded.
    pub fn retention_limit(&self) -> Option<usize> {
        (self.max_rows > 0).then_some(self.max_rows as usize)
    }

    pub fn is_append_only(&self) -> bool {
        !self.ai_visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_key_is_first_field() {
        let schema = TableSchema::new("tasks", "Tasks")
            .with_field("id", "ID")
            .with_field("status", "Status");
        assert_eq!(schema.primary_key(), Some("id"));
        assert_eq!(TableSchema::new("empty", "Empty").primary_key(), None);
    }

    #[test]
    fn test_effective_update_frequency_defaults() {
        let schema = TableSchema::new("t", "T");
        assert_eq!(schema.effective_update_frequency(), 3);
        assert_eq!(schema.clone().with_update_frequency(0).effective_update_frequency(), 3);
        assert_eq!(schema.with_update_frequency(5).effective_update_frequency(), 5);
    }

    #[test]
    fn test_retention_limit() {
        assert_eq!(TableSchema::new("t", "T").retention_limit(), None);
        assert_eq!(TableSchema::new("t", "T").with_max_rows(-2).retention_limit(), None);
        assert_eq!(TableSchema::new("t", "T").with_max_rows(4).retention_limit(), Some(4));
    }

    #[test]
    fn test_deserialize_legacy_field_names() {
        let schema: TableSchema = serde_json::from_value(json!({
            "id": "npc",
            "title": "NPCs",
            "fields": [{"key": "name", "name": "Name"}],
            "freq": 5,
            "maxRows": 20,
            "aiVisible": false,
            "aiMaxRows": 8,
            "injectOnInput": true,
            "injectDepth": 2,
            "injectMaxRows": 4,
            "prompt": "Track characters."
        }))
        .unwrap();

        assert_eq!(schema.update_frequency, Some(5));
        assert_eq!(schema.max_rows, 20);
        assert!(schema.ai_enabled);
        assert!(schema.is_append_only());
        assert_eq!(schema.ai_visible_row_limit, 8);
        assert!(schema.injection_enabled);
        assert_eq!(schema.injection_depth, 2);
        assert_eq!(schema.injection_row_limit, 4);
        assert_eq!(schema.extraction_prompt.as_deref(), Some("Track characters."));
    }

    #[test]
    fn test_serialize_uses_camel_case() {
        let schema = TableSchema::new("t", "T").with_injection(1, 2);
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["injectionEnabled"], json!(true));
        assert_eq!(value["injectionDepth"], json!(1));
        assert!(value.get("updateFrequency").is_none());
    }
}
