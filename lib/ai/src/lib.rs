//! Language model access for parley.
//!
//! - [`backend`]: the `LlmBackend` trait and request/response types
//! - [`openai`]: an HTTP backend for chat-completions endpoints
//! - [`prompt`] and [`summarize`]: turning conversation context into prompts
//! - [`assistant`]: the reply loop that ties a model to the conversation
//!   manager

pub mod assistant;
pub mod backend;
pub mod error;
pub mod openai;
pub mod prompt;
pub mod summarize;

pub use assistant::{Assistant, AssistantConfig, FALLBACK_REPLY};
pub use backend::{LlmBackend, LlmBackendConfig, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
pub use error::LlmError;
pub use openai::OpenAiCompatibleBackend;
pub use summarize::{extract_key_topics, summarize_conversation};
