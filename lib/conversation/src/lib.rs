//! Conversation model and storage contract for parley.
//!
//! This crate provides:
//!
//! - **Entity model**: messages, summaries, conversations and derived stats
//! - **Policies**: context windows, the summarization trigger, retention
//! - **Storage contract**: the `ConversationStore` trait and health reports

pub mod conversation;
pub mod error;
pub mod message;
pub mod retention;
pub mod stats;
pub mod store;
pub mod summary;

pub use conversation::{Conversation, DEFAULT_CONTEXT_WINDOW_SIZE};
pub use error::{StorageError, ValidationError};
pub use message::{MAX_CONTENT_CHARS, Message, MessageRole, Metadata, UnknownRole};
pub use retention::{RetentionCandidate, select_evictions};
pub use stats::ConversationStats;
pub use store::{
    ConversationStore, DEFAULT_MAX_CONVERSATIONS_PER_USER, HealthReport, StoreLimits, StoreResult,
};
pub use summary::{MAX_KEY_TOPICS, SUMMARY_PREFIX, Summary};
