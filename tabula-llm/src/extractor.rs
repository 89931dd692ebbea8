//! Two-tier extraction with fallback.

use crate::prompt::ExtractionRequest;
use crate::providers::OpenAICompatibleBackend;
use crate::{CustomGenerationBackend, CustomRequest, GenerationBackend};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tabula_core::{ApiConfig, LlmError, Row, TableId, TabulaError, TabulaResult};
use tracing::{debug, info, warn};

/// Which tier produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    Custom,
    Default,
}

/// Parsed rows per requested table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTables {
    /// Only tables present in both the request and the response
    pub tables: BTreeMap<TableId, Vec<Row>>,
    pub source: ExtractionSource,
    /// Array items that were not JSON objects
    pub skipped_items: usize,
    /// Response keys that were never requested
    pub ignored_tables: Vec<String>,
}

/// Issues batched extraction requests.
#[derive(Clone)]
pub struct Extractor {
    default: Arc<dyn GenerationBackend>,
    custom: Option<Arc<dyn CustomGenerationBackend>>,
}

impl Extractor {
    pub fn new(default: Arc<dyn GenerationBackend>) -> Self {
        Self {
            default,
            custom: None,
        }
    }

    pub fn with_custom_backend(mut self, backend: Arc<dyn CustomGenerationBackend>) -> Self {
        self.custom = Some(backend);
        self
    }

    /// Use the built-in OpenAI-compatible client for the independent tier.
    pub fn with_http_backend(self) -> Self {
        self.with_custom_backend(Arc::new(OpenAICompatibleBackend::new()))
    }

    pub fn has_custom_backend(&self) -> bool {
        self.custom.is_some()
    }

    /// Run one extraction.
    ///
    /// The independent endpoint is tried only when `api` is fully configured.
    /// Any failure there, including an unparseable response, falls back to
    /// the default backend. A default-backend failure is returned as
    /// [`LlmError::ExtractionFailed`].
    pub async fn extract(
        &self,
        api: &ApiConfig,
        request: &ExtractionRequest,
    ) -> TabulaResult<ExtractedTables> {
        match (&self.custom, api.is_configured()) {
            (Some(custom), true) => {
                let payload = CustomRequest::new(api, request.prompt.as_str(), request.schema.clone());
                debug!(
                    backend = custom.name(),
                    tables = request.table_ids.len(),
                    "Requesting extraction from independent endpoint"
                );

                let result = custom.custom_generate(&payload).await.and_then(|value| {
                    parse_response(custom.name(), value, &request.table_ids, ExtractionSource::Custom)
                });
                match result {
                    Ok(extracted) => {
                        info!(backend = custom.name(), "Extraction served by independent endpoint");
                        return Ok(extracted);
                    }
                    Err(e) => warn!(
                        backend = custom.name(),
                        error = %e,
                        "Independent endpoint failed, falling back to default backend"
                    ),
                }
            }
            (None, true) => {
                warn!("Independent endpoint configured but no client installed, using default backend")
            }
            (_, false) => debug!("No independent endpoint configured, using default backend"),
        }

        let backend = self.default.name().to_string();
        self.default
            .generate(&request.prompt, &request.schema)
            .await
            .and_then(|value| {
                parse_response(&backend, value, &request.table_ids, ExtractionSource::Default)
            })
            .map_err(|e| {
                warn!(backend = %backend, error = %e, "Default backend extraction failed");
                TabulaError::from(LlmError::ExtractionFailed {
                    reason: e.to_string(),
                })
            })
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("default", &self.default.name())
            .field("custom", &self.custom.as_ref().map(|c| c.name()))
            .finish()
    }
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

/// Interpret a backend result as rows per requested table.
///
/// Accepts a JSON object or a string holding one, optionally wrapped in a
/// markdown code fence.
pub fn parse_response(
    provider: &str,
    value: Value,
    requested: &[TableId],
    source: ExtractionSource,
) -> TabulaResult<ExtractedTables> {
    let object = match value {
        Value::Null => return Err(empty(provider)),
        Value::String(text) => {
            let body = strip_code_fence(&text);
            if body.is_empty() {
                return Err(empty(provider));
            }
            match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => map,
                Ok(other) => return Err(invalid(provider, format!("expected object, got {}", kind(&other)))),
                Err(e) => return Err(invalid(provider, format!("not valid JSON: {}", e))),
            }
        }
        Value::Object(map) => map,
        other => return Err(invalid(provider, format!("expected object, got {}", kind(&other)))),
    };

    let mut extracted = ExtractedTables {
        tables: BTreeMap::new(),
        source,
        skipped_items: 0,
        ignored_tables: Vec::new(),
    };

    for (table_id, entry) in object {
        if !requested.contains(&table_id) {
            extracted.ignored_tables.push(table_id);
            continue;
        }

        let items = match entry {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(invalid(
                    provider,
                    format!("table {} is {}, expected array", table_id, kind(&other)),
                ))
            }
        };

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Object(map) => rows.push(Row::from(map)),
                _ => extracted.skipped_items += 1,
            }
        }
        extracted.tables.insert(table_id, rows);
    }

    Ok(extracted)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn empty(provider: &str) -> TabulaError {
    LlmError::EmptyResponse {
        provider: provider.to_string(),
    }
    .into()
}

fn invalid(provider: &str, reason: String) -> TabulaError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason,
    }
    .into()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ResponseSchema;
    use crate::MockGenerationBackend;
    use serde_json::json;
    use tabula_core::TableSchema;

    fn request() -> ExtractionRequest {
        let tasks = TableSchema::new("tasks", "Tasks").with_field("id", "ID");
        ExtractionRequest {
            prompt: "extract".to_string(),
            schema: ResponseSchema::for_tables(&[&tasks]),
            table_ids: vec!["tasks".to_string()],
        }
    }

    fn configured_api() -> ApiConfig {
        ApiConfig::new("https://llm.local/v1/", "sk-test", "model-x")
    }

    fn ids(values: &[&str]) -> Vec<TableId> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_object_response() {
        let value = json!({
            "tasks": [{"id": "1"}, "junk", {"id": "2"}],
            "unrequested": [{"id": "x"}]
        });
        let parsed = parse_response("p", value, &ids(&["tasks"]), ExtractionSource::Default)
            .expect("parse");

        assert_eq!(parsed.tables["tasks"].len(), 2);
        assert_eq!(parsed.skipped_items, 1);
        assert_eq!(parsed.ignored_tables, vec!["unrequested".to_string()]);
    }

    #[test]
    fn test_parse_string_response_with_fence() {
        let value = json!("```json\n{\"tasks\": [{\"id\": \"1\"}]}\n```");
        let parsed = parse_response("p", value, &ids(&["tasks"]), ExtractionSource::Default)
            .expect("parse");
        assert_eq!(parsed.tables["tasks"][0].get("id"), Some(&json!("1")));
    }

    #[test]
    fn test_parse_missing_requested_table_is_absent() {
        let parsed = parse_response("p", json!({}), &ids(&["tasks"]), ExtractionSource::Default)
            .expect("parse");
        assert!(parsed.tables.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let requested = ids(&["tasks"]);
        for value in [json!(null), json!("  "), json!("not json"), json!([1]), json!({"tasks": "x"})] {
            let result = parse_response("p", value, &requested, ExtractionSource::Default);
            assert!(matches!(result, Err(TabulaError::Llm(_))));
        }
    }

    #[tokio::test]
    async fn test_unconfigured_api_goes_straight_to_default() {
        let default = Arc::new(MockGenerationBackend::new("default").with_response(json!({"tasks": []})));
        let custom = Arc::new(MockGenerationBackend::new("custom"));
        let extractor = Extractor::new(default.clone()).with_custom_backend(custom.clone());

        let result = extractor.extract(&ApiConfig::default(), &request()).await.expect("extract");

        assert_eq!(result.source, ExtractionSource::Default);
        assert_eq!(custom.call_count(), 0);
        assert_eq!(default.call_count(), 1);
    }

    #[tokio::test]
    async fn test_configured_api_prefers_custom() {
        let default = Arc::new(MockGenerationBackend::new("default"));
        let custom = Arc::new(
            MockGenerationBackend::new("custom").with_response(json!({"tasks": [{"id": "1"}]})),
        );
        let extractor = Extractor::new(default.clone()).with_custom_backend(custom.clone());

        let result = extractor.extract(&configured_api(), &request()).await.expect("extract");

        assert_eq!(result.source, ExtractionSource::Custom);
        assert_eq!(default.call_count(), 0);
        let sent = custom.custom_requests();
        assert_eq!(sent[0].endpoint, "https://llm.local/v1");
        assert_eq!(sent[0].model, "model-x");
    }

    #[tokio::test]
    async fn test_custom_failure_falls_back() {
        let default = Arc::new(MockGenerationBackend::new("default").with_response(json!({"tasks": []})));
        let custom = Arc::new(MockGenerationBackend::new("custom").with_failure(LlmError::RequestFailed {
            provider: "custom".to_string(),
            status: 500,
            message: "boom".to_string(),
        }));
        let extractor = Extractor::new(default.clone()).with_custom_backend(custom.clone());

        let result = extractor.extract(&configured_api(), &request()).await.expect("extract");

        assert_eq!(result.source, ExtractionSource::Default);
        assert_eq!(custom.call_count(), 1);
        assert_eq!(default.call_count(), 1);
    }

    #[tokio::test]
    async fn test_custom_malformed_response_falls_back() {
        let default = Arc::new(MockGenerationBackend::new("default").with_response(json!({"tasks": []})));
        let custom = Arc::new(MockGenerationBackend::new("custom").with_response(json!("garbage")));
        let extractor = Extractor::new(default.clone()).with_custom_backend(custom);

        let result = extractor.extract(&configured_api(), &request()).await.expect("extract");
        assert_eq!(result.source, ExtractionSource::Default);
    }

    #[tokio::test]
    async fn test_default_failure_is_extraction_failure() {
        let default = Arc::new(MockGenerationBackend::new("default"));
        let extractor = Extractor::new(default);

        let result = extractor.extract(&ApiConfig::default(), &request()).await;
        assert!(matches!(
            result,
            Err(TabulaError::Llm(LlmError::ExtractionFailed { .. }))
        ));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    fn arb_item() -> impl Strategy<Value = Value> {
        prop_oneof![
            3 => "[a-z]{0,4}".prop_map(|v| json!({"id": v})),
            1 => "[a-z]{0,4}".prop_map(Value::from),
            1 => Just(Value::Null),
        ]
    }

    fn arb_entry() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => prop::collection::vec(arb_item(), 0..5).prop_map(Value::Array),
            1 => Just(Value::Null),
            1 => (0i64..9).prop_map(Value::from),
        ]
    }

    fn arb_response() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map(
            prop::sample::select(vec!["tasks", "events", "stray"]).prop_map(String::from),
            arb_entry(),
            0..4,
        )
        .prop_map(|entries| entries.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property 1: parsing only yields requested tables, and every item
        /// of an accepted table is either a row or counted as skipped
        #[test]
        fn prop_parse_accounts_for_every_item(response in arb_response()) {
            let requested = vec!["tasks".to_string(), "events".to_string()];
            let result = parse_response("mock", Value::Object(response.clone()), &requested, ExtractionSource::Default);

            let malformed = response
                .iter()
                .any(|(id, entry)| requested.contains(id) && !(entry.is_array() || entry.is_null()));
            prop_assert_eq!(result.is_err(), malformed);

            if let Ok(extracted) = result {
                let mut items = 0;
                for (id, entry) in &response {
                    if requested.contains(id) {
                        prop_assert!(extracted.tables.contains_key(id));
                        items += entry.as_array().map(|a| a.len()).unwrap_or(0);
                    } else {
                        prop_assert!(extracted.ignored_tables.contains(id));
                    }
                }
                let rows: usize = extracted.tables.values().map(|r| r.len()).sum();
                prop_assert_eq!(rows + extracted.skipped_items, items);
                prop_assert!(extracted.tables.keys().all(|id| requested.contains(id)));
            }
        }

        /// Property 2: a fenced JSON string parses the same as the object
        #[test]
        fn prop_fenced_string_matches_object(response in arb_response()) {
            let requested = vec!["tasks".to_string(), "events".to_string()];
            let text = format!("```json\n{}\n```", Value::Object(response.clone()));

            let from_object = parse_response("mock", Value::Object(response), &requested, ExtractionSource::Custom);
            let from_text = parse_response("mock", Value::String(text), &requested, ExtractionSource::Custom);

            match (from_object, from_text) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(_), Err(_)) => {}
                (a, b) => prop_assert!(false, "diverged: {:?} vs {:?}", a, b),
            }
        }
    }
}
