//! Per-user conversation statistics.

use crate::conversation::Conversation;
use chrono::{DateTime, Utc};
use parley_core::UserId;
use serde::{Deserialize, Serialize};

/// Aggregate over a user's conversations, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub user_id: UserId,
    pub total_conversations: u64,
    pub total_messages: u64,
    pub active_conversations: u64,
    /// Latest `updated_at` across the user's conversations.
    pub last_activity: Option<DateTime<Utc>>,
    pub avg_messages_per_conversation: f64,
}

impl ConversationStats {
    /// Stats for a user with no conversations.
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        Self::from_counts(user_id, 0, 0, 0, None)
    }

    /// Computes stats from loaded conversations.
    #[must_use]
    pub fn from_conversations<'a>(
        user_id: UserId,
        conversations: impl IntoIterator<Item = &'a Conversation>,
    ) -> Self {
        let mut total = 0;
        let mut messages = 0;
        let mut active = 0;
        let mut last_activity: Option<DateTime<Utc>> = None;

        for conversation in conversations {
            total += 1;
            messages += conversation.messages.len() as u64;
            if conversation.is_active {
                active += 1;
            }
            last_activity = last_activity.max(Some(conversation.updated_at));
        }

        Self::from_counts(user_id, total, messages, active, last_activity)
    }

    /// Builds stats from pre-aggregated counts.
    #[must_use]
    pub fn from_counts(
        user_id: UserId,
        total_conversations: u64,
        total_messages: u64,
        active_conversations: u64,
        last_activity: Option<DateTime<Utc>>,
    ) -> Self {
        let avg_messages_per_conversation = if total_conversations == 0 {
            0.0
        } else {
            total_messages as f64 / total_conversations as f64
        };
        Self {
            user_id,
            total_conversations,
            total_messages,
            active_conversations,
            last_activity,
            avg_messages_per_conversation,
        }
    }
}
