//! Independent-endpoint backend over the OpenAI chat protocol

use super::client::OpenAIClient;
use super::types::{CompletionRequest, CompletionResponse, JsonSchemaFormat, Message, ResponseFormat};
use crate::providers::invalid_response;
use crate::{CustomGenerationBackend, CustomRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tabula_core::{LlmError, TabulaResult};
use tracing::debug;

const BACKEND_NAME: &str = "openai-compatible";

/// Sends extraction prompts to any OpenAI-compatible `chat/completions` API.
///
/// Endpoint, key and model come from each [`CustomRequest`], so one backend
/// serves every configuration change without being rebuilt.
#[derive(Debug, Clone, Default)]
pub struct OpenAICompatibleBackend {
    http: Client,
}

impl OpenAICompatibleBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http(http: Client) -> Self {
        Self { http }
    }
}

/// Single user message carrying the prompt, constrained to the response schema.
pub fn completion_request(request: &CustomRequest) -> CompletionRequest {
    CompletionRequest {
        model: request.model.clone(),
        messages: vec![Message {
            role: "user".to_string(),
            content: Some(request.prompt.clone()),
        }],
        max_tokens: Some(request.max_tokens),
        temperature: None,
        response_format: Some(ResponseFormat {
            kind: "json_schema".to_string(),
            json_schema: JsonSchemaFormat {
                name: request.schema.name.clone(),
                strict: request.schema.strict,
                schema: request.schema.value.clone(),
            },
        }),
    }
}

#[async_trait]
impl CustomGenerationBackend for OpenAICompatibleBackend {
    async fn custom_generate(&self, request: &CustomRequest) -> TabulaResult<Value> {
        let client = OpenAIClient::with_http(self.http.clone(), request.endpoint.as_str(), request.key.as_str());
        let body = completion_request(request);

        let response: CompletionResponse = client.request("chat/completions", &body).await?;

        if let Some(usage) = &response.usage {
            debug!(
                model = %request.model,
                prompt_tokens = usage.prompt_tokens,
                total_tokens = usage.total_tokens,
                "Completion received"
            );
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response(BACKEND_NAME, "No choices in response"))?
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse {
                provider: BACKEND_NAME.to_string(),
            })?;

        Ok(Value::String(content))
    }

    fn name(&self) -> &str {
        BACKEND_NAME
    }
}
