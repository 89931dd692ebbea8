//! Extraction prompt and response schema construction.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tabula_core::{ChatMessage, GlobalSettings, TableId, TableSchema, TableState};

/// Name given to the structured-output schema.
pub const RESPONSE_SCHEMA_NAME: &str = "TabulaData";

const FALLBACK_SYSTEM_PROMPT: &str = "Task: Update tracking tables.";
const FALLBACK_TABLE_INSTRUCTION: &str = "Update latest data.";

const UPDATE_RULES: &str = "\
CRITICAL RULES - READ CAREFULLY:

For tables marked \"Current State\" (existing data is shown):
  - INCREMENTAL UPDATE MODE: return only CHANGED or NEW records.
  - If a record has not changed, do not include it in your response.
  - To UPDATE an existing record, return a record with the SAME key (first field) and the modified values.
  - To ADD a record, return a record with a NEW key value.
  - Your updates are merged with the existing data by matching keys.

  Example:
  - Existing data: [{\"id\":\"1\",\"status\":\"pending\"}, {\"id\":\"2\",\"status\":\"done\"}]
  - Task 1 is now done: return [{\"id\":\"1\",\"status\":\"done\"}]
  - Adding task 3: return [{\"id\":\"3\",\"status\":\"new\"}]
  - Both: return [{\"id\":\"1\",\"status\":\"done\"}, {\"id\":\"3\",\"status\":\"new\"}]

For tables marked \"Append Only Mode\" (no existing data shown):
  - Return ONLY the NEW records to add this round.
  - Do not try to repeat old records.

If nothing changed for a table, return an empty array [].

Output ONLY valid JSON. No explanations.";

/// JSON schema describing the expected extraction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub strict: bool,
    /// The JSON Schema document itself
    pub value: Value,
}

impl ResponseSchema {
    /// One required array property per table; each item is an object with
    /// one required string property per field.
    pub fn for_tables(tables: &[&TableSchema]) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::with_capacity(tables.len());

        for table in tables {
            let mut field_props = Map::new();
            let mut keys = Vec::with_capacity(table.fields.len());
            for field in &table.fields {
                field_props.insert(
                    field.key.clone(),
                    json!({"type": "string", "description": field.name}),
                );
                keys.push(Value::String(field.key.clone()));
            }

            properties.insert(
                table.id.clone(),
                json!({
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": field_props,
                        "required": keys,
                    }
                }),
            );
            required.push(Value::String(table.id.clone()));
        }

        Self {
            name: RESPONSE_SCHEMA_NAME.to_string(),
            strict: true,
            value: json!({
                "$schema": "http://json-schema.org/draft-04/schema#",
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// One batched extraction request covering every due table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub prompt: String,
    pub schema: ResponseSchema,
    /// Tables the response may update, in request order
    pub table_ids: Vec<TableId>,
}

impl ExtractionRequest {
    pub fn build(
        settings: &GlobalSettings,
        tables: &[&TableSchema],
        state: &TableState,
        messages: &[ChatMessage],
    ) -> Self {
        let system_prompt = if settings.system_prompt.trim().is_empty() {
            FALLBACK_SYSTEM_PROMPT
        } else {
            settings.system_prompt.as_str()
        };

        let prompt = format!(
            "{system}\n\n\
             === CHAT CONTEXT (Recent {depth} messages) ===\n{chat}\n\n\
             === CURRENT TABLE STATES (for reference) ==={states}\n\n\
             === UPDATE INSTRUCTIONS ===\n{instructions}\n\n\
             {rules}",
            system = system_prompt,
            depth = settings.context_depth,
            chat = render_chat_context(messages, settings.context_depth),
            states = render_table_states(tables, state),
            instructions = render_instructions(tables),
            rules = UPDATE_RULES,
        );

        Self {
            prompt,
            schema: ResponseSchema::for_tables(tables),
            table_ids: tables.iter().map(|t| t.id.clone()).collect(),
        }
    }
}

/// Last `depth` messages, one per line, as `User:` or `Character:`.
pub fn render_chat_context(messages: &[ChatMessage], depth: usize) -> String {
    let start = messages.len().saturating_sub(depth);
    messages[start..]
        .iter()
        .map(|m| {
            let speaker = if m.is_user() { "User" } else { "Character" };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Disclose current rows of AI-visible tables; append-only tables show none.
pub fn render_table_states(tables: &[&TableSchema], state: &TableState) -> String {
    let mut out = String::new();

    for table in tables {
        let rows = state.rows(&table.id);
        if table.ai_visible && !rows.is_empty() {
            let visible = match table.ai_visible_row_limit {
                0 => rows,
                limit => &rows[..limit.min(rows.len())],
            };
            let body = serde_json::to_string_pretty(visible).unwrap_or_else(|_| "[]".to_string());
            out.push_str(&format!(
                "\n## {} (Current State - {}/{} records shown)\n{}\n",
                table.title,
                visible.len(),
                rows.len(),
                body
            ));
        } else {
            out.push_str(&format!(
                "\n## {} (Append Only Mode - no existing data shown)\n",
                table.title
            ));
        }
    }

    out
}

fn render_instructions(tables: &[&TableSchema]) -> String {
    tables
        .iter()
        .map(|t| {
            let prompt = t
                .extraction_prompt
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(FALLBACK_TABLE_INSTRUCTION);
            format!("- [{}]: {}", t.title, prompt)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::Row;

    fn task_schema() -> TableSchema {
        TableSchema::new("tasks", "Tasks")
            .with_field("id", "ID")
            .with_field("status", "Status")
            .with_extraction_prompt("Track open tasks.")
    }

    fn npc_schema() -> TableSchema {
        TableSchema::new("npcs", "NPCs").with_field("name", "Name").append_only()
    }

    #[test]
    fn test_response_schema_shape() {
        let tasks = task_schema();
        let schema = ResponseSchema::for_tables(&[&tasks]);

        assert_eq!(schema.name, "TabulaData");
        assert!(schema.strict);
        assert_eq!(schema.value["required"], json!(["tasks"]));
        let items = &schema.value["properties"]["tasks"]["items"];
        assert_eq!(items["required"], json!(["id", "status"]));
        assert_eq!(items["properties"]["status"]["description"], json!("Status"));
        assert_eq!(items["properties"]["id"]["type"], json!("string"));
    }

    #[test]
    fn test_chat_context_uses_last_messages() {
        let messages = vec![
            ChatMessage::user("one"),
            ChatMessage::assistant("two"),
            ChatMessage::user("three"),
        ];
        assert_eq!(render_chat_context(&messages, 2), "Character: two\nUser: three");
        assert_eq!(render_chat_context(&messages, 10).lines().count(), 3);
    }

    #[test]
    fn test_table_states_respect_visibility() {
        let tasks = task_schema().with_ai_visible_row_limit(1);
        let npcs = npc_schema();
        let mut state = TableState::new();
        state.set_rows(
            "tasks",
            vec![Row::new().with("id", "1"), Row::new().with("id", "2")],
        );
        state.set_rows("npcs", vec![Row::new().with("name", "secret")]);

        let text = render_table_states(&[&tasks, &npcs], &state);

        assert!(text.contains("## Tasks (Current State - 1/2 records shown)"));
        assert!(text.contains("\"id\": \"1\""));
        assert!(!text.contains("\"id\": \"2\""));
        assert!(text.contains("## NPCs (Append Only Mode - no existing data shown)"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_build_request() {
        let tasks = task_schema();
        let npcs = npc_schema();
        let settings = GlobalSettings::default();
        let messages = vec![ChatMessage::user("We finished the report.")];

        let request = ExtractionRequest::build(&settings, &[&tasks, &npcs], &TableState::new(), &messages);

        assert_eq!(request.table_ids, vec!["tasks".to_string(), "npcs".to_string()]);
        assert!(request.prompt.starts_with(&settings.system_prompt));
        assert!(request.prompt.contains("=== CHAT CONTEXT (Recent 15 messages) ==="));
        assert!(request.prompt.contains("User: We finished the report."));
        assert!(request.prompt.contains("- [Tasks]: Track open tasks."));
        assert!(request.prompt.contains("- [NPCs]: Update latest data."));
        assert!(request.prompt.ends_with("Output ONLY valid JSON. No explanations."));
    }

    #[test]
    fn test_blank_system_prompt_falls_back() {
        let settings = GlobalSettings {
            system_prompt: "  ".to_string(),
            ..GlobalSettings::default()
        };
        let tasks = task_schema();
        let request = ExtractionRequest::build(&settings, &[&tasks], &TableState::new(), &[]);
        assert!(request.prompt.starts_with("Task: Update tracking tables."));
    }
}
