//! Time-bounded conversation cache for the file backend.
//!
//! Entries expire lazily: an expired entry is dropped when it is next looked
//! up. The cache is not synchronized on its own; the file store keeps it
//! behind its mutex.

use parley_conversation::Conversation;
use parley_core::{ConversationId, UserId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

type CacheKey = (UserId, ConversationId);

struct CacheEntry {
    conversation: Conversation,
    expires_at: Instant,
}

/// Conversation cache keyed by owner and conversation ID.
pub(crate) struct ConversationCache {
    ttl: Option<Duration>,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ConversationCache {
    /// Creates a cache. `None` disables caching entirely.
    pub(crate) fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
            entries: HashMap::new(),
        }
    }

    /// Returns a fresh copy of a cached conversation, evicting it if expired.
    pub(crate) fn get(
        &mut self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Option<Conversation> {
        let key = (user_id.clone(), conversation_id.clone());
        let entry = self.entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            self.entries.remove(&key);
            debug!(%user_id, %conversation_id, "cache entry expired");
            return None;
        }
        Some(entry.conversation.clone())
    }

    /// Inserts or replaces an entry, restarting its TTL.
    pub(crate) fn put(&mut self, conversation: &Conversation) {
        let Some(ttl) = self.ttl else {
            return;
        };
        self.entries.insert(
            (
                conversation.user_id.clone(),
                conversation.conversation_id.clone(),
            ),
            CacheEntry {
                conversation: conversation.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub(crate) fn remove(&mut self, user_id: &UserId, conversation_id: &ConversationId) {
        self.entries
            .remove(&(user_id.clone(), conversation_id.clone()));
    }

    /// Iterates over every cached conversation, expired or not.
    pub(crate) fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.entries.values().map(|entry| &entry.conversation)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
