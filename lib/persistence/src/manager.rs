//! The conversation manager.
//!
//! The manager is the only persistence entry point the rest of the
//! application uses. It never surfaces storage errors: each failure is logged
//! and replaced with the method's fallback value.

use crate::backend::StorageBackend;
use crate::config::PersistenceConfig;
use parley_conversation::{
    ConversationStats, ConversationStore, HealthReport, Message, MessageRole, Metadata,
    StoreResult,
};
use parley_core::UserId;
use std::sync::Arc;
use tracing::{error, info};

/// High-level conversation operations with failure containment.
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct ConversationManager {
    store: Option<Arc<dyn ConversationStore>>,
    auto_summarize_threshold: usize,
    cleanup_old_data_days: u32,
}

impl ConversationManager {
    /// Builds a manager with the backend named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be constructed.
    pub fn from_config(config: &PersistenceConfig) -> StoreResult<Self> {
        let store = StorageBackend::from_config(config)?
            .map(|backend| Arc::new(backend) as Arc<dyn ConversationStore>);
        Ok(Self::with_store(store, config))
    }

    /// Builds a manager around an existing store. `None` disables persistence.
    #[must_use]
    pub fn with_store(store: Option<Arc<dyn ConversationStore>>, config: &PersistenceConfig) -> Self {
        Self {
            store,
            auto_summarize_threshold: config.auto_summarize_threshold,
            cleanup_old_data_days: config.cleanup_old_data_days,
        }
    }

    /// A manager with persistence turned off.
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_store(None, &PersistenceConfig::default())
    }

    /// Returns true if a storage backend is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Prepares the backend. Returns false if it could not be initialized.
    pub async fn initialize(&self) -> bool {
        let Some(store) = &self.store else {
            info!("conversation persistence disabled");
            return true;
        };
        match store.initialize().await {
            Ok(()) => {
                info!(backend = store.backend_name(), "conversation persistence initialized");
                true
            }
            Err(e) => {
                error!(backend = store.backend_name(), error = %e, "failed to initialize conversation persistence");
                false
            }
        }
    }

    /// Flushes and closes the backend.
    pub async fn shutdown(&self) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        match store.shutdown().await {
            Ok(()) => {
                info!(backend = store.backend_name(), "conversation persistence shut down");
                true
            }
            Err(e) => {
                error!(backend = store.backend_name(), error = %e, "failed to shut down conversation persistence");
                false
            }
        }
    }

    /// Records a message from the user in their active conversation.
    pub async fn add_user_message(
        &self,
        user_id: &UserId,
        content: &str,
        metadata: Option<Metadata>,
    ) -> bool {
        self.add_message(user_id, MessageRole::User, content, metadata)
            .await
    }

    /// Records a reply from the assistant in the user's active conversation.
    pub async fn add_assistant_message(
        &self,
        user_id: &UserId,
        content: &str,
        metadata: Option<Metadata>,
    ) -> bool {
        self.add_message(user_id, MessageRole::Assistant, content, metadata)
            .await
    }

    async fn add_message(
        &self,
        user_id: &UserId,
        role: MessageRole,
        content: &str,
        metadata: Option<Metadata>,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store
            .add_message(user_id, role, content, None, metadata)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(%user_id, %role, error = %e, "failed to add message");
                false
            }
        }
    }

    /// Returns the context window of the user's active conversation.
    pub async fn get_conversation_context(&self, user_id: &UserId) -> Vec<Message> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store
            .get_context_messages(user_id, None, true)
            .await
            .unwrap_or_else(|e| {
                error!(%user_id, error = %e, "failed to get conversation context");
                Vec::new()
            })
    }

    /// Whether the user's active conversation is due for a summary.
    pub async fn should_summarize_conversation(&self, user_id: &UserId) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.get_conversation(user_id, None).await {
            Ok(Some(conversation)) => conversation.should_summarize(self.auto_summarize_threshold),
            Ok(None) => false,
            Err(e) => {
                error!(%user_id, error = %e, "failed to check summarization status");
                false
            }
        }
    }

    /// Records a summary on the user's active conversation.
    pub async fn create_conversation_summary(
        &self,
        user_id: &UserId,
        summary: &str,
        key_topics: Vec<String>,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        summarize_active(store.as_ref(), user_id, summary, key_topics)
            .await
            .unwrap_or_else(|e| {
                error!(%user_id, error = %e, "failed to create summary");
                false
            })
    }

    /// Archives the user's active conversation. History stays retrievable
    /// by ID; the next message starts a fresh conversation.
    pub async fn clear_conversation_history(&self, user_id: &UserId) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        archive_active(store.as_ref(), user_id)
            .await
            .unwrap_or_else(|e| {
                error!(%user_id, error = %e, "failed to clear conversation");
                false
            })
    }

    /// Computes the user's conversation statistics.
    pub async fn get_user_stats(&self, user_id: &UserId) -> Option<ConversationStats> {
        let store = self.store.as_ref()?;
        store
            .get_user_stats(user_id)
            .await
            .inspect_err(|e| error!(%user_id, error = %e, "failed to get user stats"))
            .ok()
    }

    /// Deletes archived conversations older than the configured retention.
    pub async fn cleanup_old_conversations(&self) -> u64 {
        let Some(store) = &self.store else {
            return 0;
        };
        store
            .cleanup_old_data(self.cleanup_old_data_days)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "failed to clean up old conversations");
                0
            })
    }

    /// Reports persistence health.
    pub async fn health_check(&self) -> HealthReport {
        match &self.store {
            Some(store) => store.health_check().await,
            None => HealthReport::disabled(),
        }
    }
}

async fn summarize_active(
    store: &dyn ConversationStore,
    user_id: &UserId,
    summary: &str,
    key_topics: Vec<String>,
) -> StoreResult<bool> {
    let Some(conversation) = store.get_conversation(user_id, None).await? else {
        return Ok(false);
    };
    store
        .create_summary(user_id, &conversation.conversation_id, summary, key_topics)
        .await?;
    Ok(true)
}

async fn archive_active(store: &dyn ConversationStore, user_id: &UserId) -> StoreResult<bool> {
    let Some(conversation) = store.get_conversation(user_id, None).await? else {
        return Ok(false);
    };
    store
        .archive_conversation(user_id, &conversation.conversation_id)
        .await
}
