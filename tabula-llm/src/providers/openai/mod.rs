//! OpenAI-compatible provider implementation
//!
//! Speaks the `chat/completions` protocol with structured JSON output, which
//! most hosted and self-hosted inference servers accept.

pub mod backend;
pub mod client;
pub mod types;

pub use backend::OpenAICompatibleBackend;
pub use client::OpenAIClient;
