//! Conversation summaries.

use crate::message::{KIND_KEY, Message, MessageRole, Metadata};
use chrono::{DateTime, Utc};
use parley_core::MessageId;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Maximum number of key topics kept on a summary.
pub const MAX_KEY_TOPICS: usize = 10;

/// Prefix of the synthetic context message that carries a summary.
pub const SUMMARY_PREFIX: &str = "Previous conversation summary: ";

/// A compressed digest of the conversation up to a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Summary text.
    pub summary: String,
    /// Main topics, in the order they were extracted.
    #[serde(default)]
    pub key_topics: Vec<String>,
    /// When the summary was recorded.
    pub created_at: DateTime<Utc>,
    /// Number of messages in the conversation when the summary was recorded.
    pub message_count: usize,
}

impl Summary {
    /// Creates a summary stamped with the current time.
    #[must_use]
    pub fn new(summary: impl Into<String>, key_topics: Vec<String>, message_count: usize) -> Self {
        Self::at(summary, key_topics, message_count, Utc::now())
    }

    /// Creates a summary with an explicit creation time.
    #[must_use]
    pub fn at(
        summary: impl Into<String>,
        mut key_topics: Vec<String>,
        message_count: usize,
        created_at: DateTime<Utc>,
    ) -> Self {
        key_topics.truncate(MAX_KEY_TOPICS);
        Self {
            summary: summary.into(),
            key_topics,
            created_at,
            message_count,
        }
    }

    /// Renders the summary as the leading system message of a context window.
    ///
    /// The message ID is derived from `created_at`, so rendering the same
    /// summary twice yields the same message.
    #[must_use]
    pub fn to_context_message(&self) -> Message {
        let millis = u64::try_from(self.created_at.timestamp_millis()).unwrap_or(0);
        let mut metadata = Metadata::new();
        metadata.insert(KIND_KEY.to_string(), "summary".into());

        Message {
            id: MessageId::from_ulid(Ulid::from_parts(millis, 0)),
            role: MessageRole::System,
            content: format!("{SUMMARY_PREFIX}{}", self.summary),
            timestamp: self.created_at,
            metadata,
        }
    }
}
