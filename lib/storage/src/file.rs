//! JSON file conversation store.
//!
//! Directory layout:
//!   {root}/{user_id}/{conversation_id}.json
//!
//! Every operation runs under one async mutex, which also guards the cache.
//! Files are written to a `.tmp` sibling and renamed into place.

use crate::cache::ConversationCache;
use async_trait::async_trait;
use chrono::Utc;
use parley_conversation::retention::{self, RetentionCandidate};
use parley_conversation::{
    Conversation, ConversationStats, ConversationStore, HealthReport, Message, MessageRole,
    Metadata, StorageError, StoreLimits, StoreResult, Summary,
};
use parley_core::{ConversationId, UserId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const BACKEND: &str = "file";

/// Conversation store backed by one JSON document per conversation.
pub struct FileConversationStore {
    root: PathBuf,
    limits: StoreLimits,
    cache: Mutex<ConversationCache>,
}

impl FileConversationStore {
    /// Creates a store rooted at `root`. Nothing touches the disk until
    /// [`ConversationStore::initialize`] or the first write.
    ///
    /// `cache_ttl` of `None` disables caching.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, limits: StoreLimits, cache_ttl: Option<Duration>) -> Self {
        Self {
            root: root.into(),
            limits,
            cache: Mutex::new(ConversationCache::new(cache_ttl)),
        }
    }

    fn user_dir(&self, user_id: &UserId) -> PathBuf {
        self.root.join(user_id.as_str())
    }

    fn conversation_path(&self, user_id: &UserId, conversation_id: &ConversationId) -> PathBuf {
        self.user_dir(user_id)
            .join(format!("{}.json", conversation_id.as_str()))
    }

    /// Reads a conversation file. Missing files, unreadable documents and
    /// documents that break the conversation invariants are all reported as
    /// absent.
    async fn read_file(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<Option<Conversation>> {
        let path = self.conversation_path(user_id, conversation_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, &e).into()),
        };

        match serde_json::from_str::<Conversation>(&content) {
            Ok(conversation)
                if conversation.user_id != *user_id
                    || conversation.conversation_id != *conversation_id =>
            {
                warn!(path = %path.display(), "conversation file does not match its location");
                Ok(None)
            }
            Ok(conversation) => match conversation.validate() {
                Ok(()) => Ok(Some(conversation)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "conversation file fails validation");
                    Ok(None)
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse conversation file");
                Ok(None)
            }
        }
    }

    async fn write_file(&self, conversation: &Conversation) -> StoreResult<()> {
        let dir = self.user_dir(&conversation.user_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, &e))?;

        let path = self.conversation_path(&conversation.user_id, &conversation.conversation_id);
        let content =
            serde_json::to_string_pretty(conversation).map_err(|e| StorageError::Serialization {
                location: path.display().to_string(),
                details: e.to_string(),
            })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content.as_bytes())
            .await
            .map_err(|e| io_error(&tmp, &e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, &e))?;

        debug!(path = %path.display(), "wrote conversation file");
        Ok(())
    }

    async fn load(
        &self,
        cache: &mut ConversationCache,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<Option<Conversation>> {
        if let Some(conversation) = cache.get(user_id, conversation_id) {
            return Ok(Some(conversation));
        }
        let conversation = self.read_file(user_id, conversation_id).await?;
        if let Some(conversation) = &conversation {
            cache.put(conversation);
        }
        Ok(conversation)
    }

    async fn persist(
        &self,
        cache: &mut ConversationCache,
        conversation: &Conversation,
    ) -> StoreResult<()> {
        self.write_file(conversation).await?;
        cache.put(conversation);
        Ok(())
    }

    /// Lists the directory entries of `dir` whose names parse with `parse`.
    /// A missing directory yields nothing.
    async fn scan<T>(
        dir: &Path,
        parse: impl Fn(&Path) -> Option<T>,
    ) -> StoreResult<Vec<T>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(dir, &e).into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(dir, &e))?
        {
            if let Some(item) = parse(&entry.path()) {
                found.push(item);
            }
        }
        Ok(found)
    }

    async fn user_ids(&self) -> StoreResult<Vec<UserId>> {
        Self::scan(&self.root, |path| {
            if !path.is_dir() {
                return None;
            }
            path.file_name()?.to_str().and_then(|name| UserId::new(name).ok())
        })
        .await
    }

    async fn conversation_ids(&self, user_id: &UserId) -> StoreResult<Vec<ConversationId>> {
        Self::scan(&self.user_dir(user_id), |path| {
            if path.extension()? != "json" {
                return None;
            }
            path.file_stem()?
                .to_str()
                .and_then(|stem| ConversationId::new(stem).ok())
        })
        .await
    }

    /// Loads all of a user's conversations from disk, most recently updated
    /// first.
    async fn list_user(&self, user_id: &UserId) -> StoreResult<Vec<Conversation>> {
        let mut conversations = Vec::new();
        for conversation_id in self.conversation_ids(user_id).await? {
            if let Some(conversation) = self.read_file(user_id, &conversation_id).await? {
                conversations.push(conversation);
            }
        }
        conversations.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.conversation_id.cmp(&a.conversation_id))
        });
        Ok(conversations)
    }

    async fn find_active(
        &self,
        cache: &mut ConversationCache,
        user_id: &UserId,
    ) -> StoreResult<Option<Conversation>> {
        let active = self
            .list_user(user_id)
            .await?
            .into_iter()
            .find(|c| c.is_active);
        if let Some(conversation) = &active {
            cache.put(conversation);
        }
        Ok(active)
    }

    async fn id_in_use(&self, conversation_id: &ConversationId) -> StoreResult<bool> {
        for user_id in self.user_ids().await? {
            let path = self.conversation_path(&user_id, conversation_id);
            if fs::try_exists(&path)
                .await
                .map_err(|e| io_error(&path, &e))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Builds a new, unsaved conversation after checking the ID is free.
    async fn new_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<ConversationId>,
    ) -> StoreResult<Conversation> {
        let conversation_id = match conversation_id {
            Some(id) => {
                if self.id_in_use(&id).await? {
                    return Err(StorageError::DuplicateConversation {
                        conversation_id: id,
                    }
                    .into());
                }
                id
            }
            None => ConversationId::generate(),
        };
        Ok(Conversation::new(user_id.clone(), conversation_id)
            .with_context_window_size(self.limits.context_window_size))
    }

    /// Deletes the user's oldest archived conversations beyond the cap.
    async fn enforce_cap(&self, cache: &mut ConversationCache, user_id: &UserId) -> StoreResult<()> {
        if self.limits.max_conversations_per_user == 0 {
            return Ok(());
        }
        let candidates = self
            .list_user(user_id)
            .await?
            .iter()
            .map(RetentionCandidate::from)
            .collect();
        let evictions =
            retention::select_evictions(candidates, self.limits.max_conversations_per_user);

        for conversation_id in &evictions {
            self.remove_file(cache, user_id, conversation_id).await?;
        }
        if !evictions.is_empty() {
            info!(%user_id, evicted = evictions.len(), "evicted conversations over per-user cap");
        }
        Ok(())
    }

    async fn remove_file(
        &self,
        cache: &mut ConversationCache,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool> {
        cache.remove(user_id, conversation_id);
        let path = self.conversation_path(user_id, conversation_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, &e).into()),
        }
    }

    async fn collect_health(&self, cache_entries: usize) -> StoreResult<HealthReport> {
        let mut report = HealthReport::healthy(BACKEND).with_location(self.root.display().to_string());
        let mut users = 0;
        let mut conversations = 0;
        let mut messages = 0;
        let mut active = 0;

        for user_id in self.user_ids().await? {
            users += 1;
            for conversation in self.list_user(&user_id).await? {
                conversations += 1;
                messages += conversation.messages.len() as u64;
                if conversation.is_active {
                    active += 1;
                }
            }
        }

        report.total_users = Some(users);
        report.total_conversations = Some(conversations);
        report.total_messages = Some(messages);
        report.active_conversations = Some(active);
        report.cache_entries = Some(cache_entries);
        Ok(report)
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        details: err.to_string(),
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::BackendUnavailable {
                details: format!("cannot create {}: {e}", self.root.display()),
            })?;
        info!(root = %self.root.display(), "file conversation store initialized");
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        let mut cache = self.cache.lock().await;
        let mut flushed = 0;
        for conversation in cache.conversations() {
            self.write_file(conversation).await?;
            flushed += 1;
        }
        cache.clear();
        info!(flushed, "file conversation store shut down");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
    ) -> StoreResult<Option<Conversation>> {
        let mut cache = self.cache.lock().await;
        match conversation_id {
            Some(id) => self.load(&mut cache, user_id, id).await,
            None => self.find_active(&mut cache, user_id).await,
        }
    }

    #[instrument(skip(self))]
    async fn create_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<ConversationId>,
    ) -> StoreResult<Conversation> {
        let mut cache = self.cache.lock().await;
        let conversation = self.new_conversation(user_id, conversation_id).await?;
        self.persist(&mut cache, &conversation).await?;
        self.enforce_cap(&mut cache, user_id).await?;
        Ok(conversation)
    }

    async fn save_conversation(&self, conversation: &mut Conversation) -> StoreResult<()> {
        conversation.validate().map_err(StorageError::from)?;
        let mut cache = self.cache.lock().await;

        let path = self.conversation_path(&conversation.user_id, &conversation.conversation_id);
        let stored = fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, &e))?;
        if !stored && self.id_in_use(&conversation.conversation_id).await? {
            return Err(StorageError::DuplicateConversation {
                conversation_id: conversation.conversation_id.clone(),
            }
            .into());
        }

        conversation.touch();
        self.persist(&mut cache, conversation).await
    }

    async fn list_conversations(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let _guard = self.cache.lock().await;
        Ok(self
            .list_user(user_id)
            .await?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    #[instrument(skip(self))]
    async fn archive_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool> {
        let mut cache = self.cache.lock().await;
        let Some(mut conversation) = self.load(&mut cache, user_id, conversation_id).await? else {
            return Ok(false);
        };
        if conversation.is_active {
            conversation.archive();
            self.persist(&mut cache, &conversation).await?;
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn delete_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<bool> {
        let mut cache = self.cache.lock().await;
        self.remove_file(&mut cache, user_id, conversation_id).await
    }

    #[instrument(skip(self, content, metadata))]
    async fn add_message(
        &self,
        user_id: &UserId,
        role: MessageRole,
        content: &str,
        conversation_id: Option<&ConversationId>,
        metadata: Option<Metadata>,
    ) -> StoreResult<Message> {
        let mut cache = self.cache.lock().await;
        let existing = match conversation_id {
            Some(id) => self.load(&mut cache, user_id, id).await?,
            None => self.find_active(&mut cache, user_id).await?,
        };
        let (mut conversation, created) = match existing {
            Some(conversation) => (conversation, false),
            None => (
                self.new_conversation(user_id, conversation_id.cloned())
                    .await?,
                true,
            ),
        };

        let message = conversation
            .add_message(role, content, metadata)
            .map_err(StorageError::from)?;
        self.persist(&mut cache, &conversation).await?;
        if created {
            self.enforce_cap(&mut cache, user_id).await?;
        }
        Ok(message)
    }

    #[instrument(skip(self, summary, key_topics))]
    async fn create_summary(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        summary: &str,
        key_topics: Vec<String>,
    ) -> StoreResult<Summary> {
        let mut cache = self.cache.lock().await;
        let Some(mut conversation) = self.load(&mut cache, user_id, conversation_id).await? else {
            return Err(StorageError::ConversationNotFound {
                user_id: user_id.clone(),
                conversation_id: conversation_id.clone(),
            }
            .into());
        };
        let summary = conversation.add_summary(summary, key_topics);
        self.persist(&mut cache, &conversation).await?;
        Ok(summary)
    }

    async fn get_user_stats(&self, user_id: &UserId) -> StoreResult<ConversationStats> {
        let _guard = self.cache.lock().await;
        let conversations = self.list_user(user_id).await?;
        Ok(ConversationStats::from_conversations(
            user_id.clone(),
            &conversations,
        ))
    }

    #[instrument(skip(self))]
    async fn cleanup_old_data(&self, days: u32) -> StoreResult<u64> {
        let mut cache = self.cache.lock().await;
        let cutoff = retention::cutoff(days, Utc::now());
        let mut removed = 0;

        for user_id in self.user_ids().await? {
            for conversation in self.list_user(&user_id).await? {
                if !retention::is_stale(&conversation, cutoff) {
                    continue;
                }
                match self
                    .remove_file(&mut cache, &user_id, &conversation.conversation_id)
                    .await
                {
                    Ok(true) => {
                        removed += 1;
                        debug!(%user_id, conversation_id = %conversation.conversation_id, "removed stale conversation");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(%user_id, conversation_id = %conversation.conversation_id, error = %e, "failed to remove stale conversation");
                    }
                }
            }
        }

        info!(removed, days, "cleaned up old conversations");
        Ok(removed)
    }

    async fn health_check(&self) -> HealthReport {
        let cache_entries = self.cache.lock().await.len();
        let location = self.root.display().to_string();

        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return HealthReport::unhealthy(
                    BACKEND,
                    format!("storage directory {location} is not accessible"),
                )
                .with_location(location);
            }
        }

        match self.collect_health(cache_entries).await {
            Ok(report) => report,
            Err(e) => HealthReport::unhealthy(BACKEND, e.to_string()).with_location(location),
        }
    }
}
