//! Tabula LLM - Generation Backends and Table Extraction
//!
//! Two generation collaborators sit behind traits:
//! - [`GenerationBackend`]: the host's default backend, `generate(prompt, schema)`
//! - [`CustomGenerationBackend`]: a user-configured independent endpoint
//!
//! The [`Extractor`] issues one batched request per cycle, trying the
//! independent endpoint first when it is fully configured and falling back
//! to the default backend on any failure.

pub mod extractor;
pub mod prompt;
pub mod providers;

pub use extractor::{parse_response, ExtractedTables, ExtractionSource, Extractor};
pub use prompt::{ExtractionRequest, ResponseSchema, RESPONSE_SCHEMA_NAME};
pub use providers::OpenAICompatibleBackend;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tabula_core::{ApiConfig, LlmError, TabulaResult};
use tokio::sync::Notify;

/// Model used by the independent endpoint when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Completion budget for one extraction request.
pub const DEFAULT_MAX_TOKENS: i32 = 3000;

// ============================================================================
// BACKEND TRAITS
// ============================================================================

/// The host's default generation backend.
///
/// Implementations return either a JSON object or a string containing one.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str, schema: &ResponseSchema) -> TabulaResult<Value>;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;
}

/// An independently configured generation endpoint.
#[async_trait]
pub trait CustomGenerationBackend: Send + Sync {
    async fn custom_generate(&self, request: &CustomRequest) -> TabulaResult<Value>;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;
}

/// Payload for an independent endpoint.
#[derive(Clone, PartialEq)]
pub struct CustomRequest {
    /// Base URL with trailing slashes removed
    pub endpoint: String,
    pub key: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: i32,
    pub schema: ResponseSchema,
}

impl CustomRequest {
    pub fn new(api: &ApiConfig, prompt: impl Into<String>, schema: ResponseSchema) -> Self {
        let model = match api.model.trim() {
            "" => DEFAULT_MODEL.to_string(),
            model => model.to_string(),
        };

        Self {
            endpoint: api.endpoint.trim().trim_end_matches('/').to_string(),
            key: api.key.trim().to_string(),
            model,
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            schema,
        }
    }
}

impl std::fmt::Debug for CustomRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomRequest")
            .field("endpoint", &self.endpoint)
            .field("key", &"[REDACTED]")
            .field("model", &self.model)
            .field("prompt_len", &self.prompt.len())
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

// ============================================================================
// MOCK BACKENDS FOR TESTING
// ============================================================================

/// Scripted backend for testing.
///
/// Responses are served in the order they were queued; once the queue is
/// empty every call fails with [`LlmError::EmptyResponse`]. Implements both
/// backend traits so one mock can stand in for either tier.
pub struct MockGenerationBackend {
    name: String,
    responses: Mutex<VecDeque<TabulaResult<Value>>>,
    prompts: Mutex<Vec<String>>,
    custom_requests: Mutex<Vec<CustomRequest>>,
    gate: Option<Arc<Notify>>,
}

impl MockGenerationBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            custom_requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Queue a successful response.
    pub fn with_response(self, value: Value) -> Self {
        self.push(Ok(value));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, error: LlmError) -> Self {
        self.push(Err(error.into()));
        self
    }

    /// Hold every call until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn push_response(&self, value: Value) {
        self.push(Ok(value));
    }

    pub fn push_failure(&self, error: LlmError) {
        self.push(Err(error.into()));
    }

    /// Prompts received so far, through either trait.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// Independent-endpoint payloads received so far.
    pub fn custom_requests(&self) -> Vec<CustomRequest> {
        self.custom_requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn push(&self, result: TabulaResult<Value>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(result);
        }
    }

    fn poisoned(&self) -> LlmError {
        LlmError::RequestFailed {
            provider: self.name.clone(),
            status: 0,
            message: "mock state poisoned".to_string(),
        }
    }

    async fn respond(&self, prompt: &str) -> TabulaResult<Value> {
        self.prompts
            .lock()
            .map_err(|_| self.poisoned())?
            .push(prompt.to_string());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let next = self.responses.lock().map_err(|_| self.poisoned())?.pop_front();
        next.unwrap_or_else(|| {
            Err(LlmError::EmptyResponse {
                provider: self.name.clone(),
            }
            .into())
        })
    }
}

impl std::fmt::Debug for MockGenerationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGenerationBackend")
            .field("name", &self.name)
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str, _schema: &ResponseSchema) -> TabulaResult<Value> {
        self.respond(prompt).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CustomGenerationBackend for MockGenerationBackend {
    async fn custom_generate(&self, request: &CustomRequest) -> TabulaResult<Value> {
        self.custom_requests
            .lock()
            .map_err(|_| self.poisoned())?
            .push(request.clone());
        self.respond(&request.prompt).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// TESTS
// ============================================================================
