//! Generation backend implementations
//!
//! Concrete [`CustomGenerationBackend`](crate::CustomGenerationBackend)
//! implementations for independently configured endpoints.

pub mod openai;

pub use openai::{OpenAIClient, OpenAICompatibleBackend};

use tabula_core::{LlmError, TabulaError};

pub(crate) fn request_failed(provider: &str, status: i32, message: impl Into<String>) -> TabulaError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
    .into()
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> TabulaError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
    .into()
}
