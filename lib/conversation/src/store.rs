//! The storage contract every backend implements.

use crate::conversation::{Conversation, DEFAULT_CONTEXT_WINDOW_SIZE};
use crate::error::StorageError;
use crate::message::{Message, MessageRole, Metadata};
use crate::stats::ConversationStats;
use crate::summary::Summary;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{ConversationId, UserId};
use serde::{Deserialize, Serialize};

/// Result type returned by storage operations.
pub type StoreResult<T> = parley_core::Result<T, StorageError>;

/// Default cap on conversations kept per user.
pub const DEFAULT_MAX_CONVERSATIONS_PER_USER: usize = 100;

/// Limits a backend applies to the conversations it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Context window size given to new conversations.
    pub context_window_size: usize,
    /// Maximum conversations per user; zero disables the cap.
    pub max_conversations_per_user: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            context_window_size: DEFAULT_CONTEXT_WINDOW_SIZE,
            max_conversations_per_user: DEFAULT_MAX_CONVERSATIONS_PER_USER,
        }
    }
}

/// Persistent storage for conversations.
///
/// Lookups express absence as `None` or `false`. Errors are reserved for
/// writes against missing records, invalid input, and backend failures.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Short name of the backend, used in logs and health reports.
    fn backend_name(&self) -> &'static str;

    /// Prepares the storage medium. Safe to call more than once.
    async fn initialize(&self) -> StoreResult<()>;

    /// Flushes pending state and releases resources.
    async fn shutdown(&self) -> StoreResult<()>;

    /// Loads a conversation.
    ///
    /// Without an ID, returns the user's most recently updated active
    /// conversation.
    async fn get_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
    ) -> StoreResult<Option<Conversation>>;

    /// Creates and persists an empty conversation.
    ///
    /// A missing ID is generated. Fails with `DuplicateConversation` if the ID
    /// is already in use by any user.
    async fn create_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<ConversationId>,
    ) -> StoreResult<Conversation>;

    /// Replaces the stored conversation, refreshing its `updated_at`.
    ///
    /// Fails with `Validation` if the conversation breaks its invariants and
    /// with `DuplicateConversation` if another user owns the ID.
    async fn save_conversation(&self, conversation: &mut Conversation) -> StoreResult<()>;

    /// Lists a user's conversations, most recently updated first.
    async fn list_conversations(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Conversation>>;

    /// Marks a conversation inactive. Returns whether it exists. An already
    /// archived conversation keeps its `updated_at`.
    async fn archive_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool>;

    /// Removes a conversation with its messages and summaries. Returns
    /// whether it existed.
    async fn delete_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool>;

    /// Appends a message, creating the conversation if it does not exist.
    async fn add_message(
        &self,
        user_id: &UserId,
        role: MessageRole,
        content: &str,
        conversation_id: Option<&ConversationId>,
        metadata: Option<Metadata>,
    ) -> StoreResult<Message>;

    /// Returns the context window of a conversation, or nothing if it does
    /// not exist.
    async fn get_context_messages(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
        include_summary: bool,
    ) -> StoreResult<Vec<Message>> {
        Ok(self
            .get_conversation(user_id, conversation_id)
            .await?
            .map(|conversation| conversation.context_window(include_summary))
            .unwrap_or_default())
    }

    /// Records a summary on an existing conversation.
    async fn create_summary(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        summary: &str,
        key_topics: Vec<String>,
    ) -> StoreResult<Summary>;

    /// Computes statistics over all of a user's conversations.
    async fn get_user_stats(&self, user_id: &UserId) -> StoreResult<ConversationStats>;

    /// Deletes archived conversations not updated in the last `days` days.
    /// Returns the number removed.
    async fn cleanup_old_data(&self, days: u32) -> StoreResult<u64>;

    /// Reports backend health. Never fails; problems are described in the
    /// report.
    async fn health_check(&self) -> HealthReport;
}

/// Health of the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub enabled: bool,
    pub backend: String,
    pub storage_accessible: bool,
    /// Storage directory or database URL.
    pub location: Option<String>,
    pub total_users: Option<u64>,
    pub total_conversations: Option<u64>,
    pub total_messages: Option<u64>,
    pub active_conversations: Option<u64>,
    pub cache_entries: Option<usize>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Report for a deployment with persistence turned off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::healthy("none")
        }
    }

    /// A healthy report with no counts filled in.
    #[must_use]
    pub fn healthy(backend: impl Into<String>) -> Self {
        Self {
            healthy: true,
            enabled: true,
            backend: backend.into(),
            storage_accessible: true,
            location: None,
            total_users: None,
            total_conversations: None,
            total_messages: None,
            active_conversations: None,
            cache_entries: None,
            error: None,
            checked_at: Utc::now(),
        }
    }

    /// An unhealthy report carrying an error description.
    #[must_use]
    pub fn unhealthy(backend: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            storage_accessible: false,
            error: Some(error.into()),
            ..Self::healthy(backend)
        }
    }

    /// Sets the storage location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_is_healthy_but_not_enabled() {
        let report = HealthReport::disabled();
        assert!(report.healthy);
        assert!(!report.enabled);
        assert!(report.error.is_none());
    }

    #[test]
    fn unhealthy_carries_error() {
        let report = HealthReport::unhealthy("file", "root missing").with_location("/tmp/x");
        assert!(!report.healthy);
        assert!(report.enabled);
        assert!(!report.storage_accessible);
        assert_eq!(report.error.as_deref(), Some("root missing"));
        assert_eq!(report.location.as_deref(), Some("/tmp/x"));
    }

    #[test]
    fn default_limits() {
        let limits = StoreLimits::default();
        assert_eq!(limits.context_window_size, 10);
        assert_eq!(limits.max_conversations_per_user, 100);
    }
}
