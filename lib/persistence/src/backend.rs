//! Storage backend selection.

use crate::config::{BackendKind, PersistenceConfig};
use async_trait::async_trait;
use parley_conversation::{
    Conversation, ConversationStats, ConversationStore, HealthReport, Message, MessageRole,
    Metadata, StoreResult, Summary,
};
use parley_core::{ConversationId, UserId};
use parley_storage::{FileConversationStore, SqlConversationStore};

/// The backend chosen at startup.
pub enum StorageBackend {
    File(FileConversationStore),
    Sql(SqlConversationStore),
}

impl StorageBackend {
    /// Builds the configured backend. Returns `None` when persistence is
    /// disabled.
    ///
    /// Nothing is opened or created here; call
    /// [`ConversationStore::initialize`] before use.
    ///
    /// # Errors
    ///
    /// Returns an error if the relational connection URL is invalid.
    pub fn from_config(config: &PersistenceConfig) -> StoreResult<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let backend = match config.backend {
            BackendKind::File => Self::File(FileConversationStore::new(
                &config.storage_dir,
                config.limits(),
                config.cache_ttl(),
            )),
            BackendKind::Relational => Self::Sql(SqlConversationStore::connect_lazy(
                &config.database_url,
                config.limits(),
                config.pool.settings(),
            )?),
        };
        Ok(Some(backend))
    }

    fn store(&self) -> &dyn ConversationStore {
        match self {
            Self::File(store) => store,
            Self::Sql(store) => store,
        }
    }
}

#[async_trait]
impl ConversationStore for StorageBackend {
    fn backend_name(&self) -> &'static str {
        self.store().backend_name()
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.store().initialize().await
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.store().shutdown().await
    }

    async fn get_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
    ) -> StoreResult<Option<Conversation>> {
        self.store().get_conversation(user_id, conversation_id).await
    }

    async fn create_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<ConversationId>,
    ) -> StoreResult<Conversation> {
        self.store()
            .create_conversation(user_id, conversation_id)
            .await
    }

    async fn save_conversation(&self, conversation: &mut Conversation) -> StoreResult<()> {
        self.store().save_conversation(conversation).await
    }

    async fn list_conversations(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Conversation>> {
        self.store()
            .list_conversations(user_id, limit, offset)
            .await
    }

    async fn archive_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool> {
        self.store()
            .archive_conversation(user_id, conversation_id)
            .await
    }

    async fn delete_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool> {
        self.store()
            .delete_conversation(user_id, conversation_id)
            .await
    }

    async fn add_message(
        &self,
        user_id: &UserId,
        role: MessageRole,
        content: &str,
        conversation_id: Option<&ConversationId>,
        metadata: Option<Metadata>,
    ) -> StoreResult<Message> {
        self.store()
            .add_message(user_id, role, content, conversation_id, metadata)
            .await
    }

    async fn get_context_messages(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
        include_summary: bool,
    ) -> StoreResult<Vec<Message>> {
        self.store()
            .get_context_messages(user_id, conversation_id, include_summary)
            .await
    }

    async fn create_summary(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        summary: &str,
        key_topics: Vec<String>,
    ) -> StoreResult<Summary> {
        self.store()
            .create_summary(user_id, conversation_id, summary, key_topics)
            .await
    }

    async fn get_user_stats(&self, user_id: &UserId) -> StoreResult<ConversationStats> {
        self.store().get_user_stats(user_id).await
    }

    async fn cleanup_old_data(&self, days: u32) -> StoreResult<u64> {
        self.store().cleanup_old_data(days).await
    }

    async fn health_check(&self) -> HealthReport {
        self.store().health_check().await
    }
}
