//! The conversation aggregate.
//!
//! A conversation owns its messages and summaries. Both sequences are
//! append-only and kept in ascending time order, which the context window
//! and the summarization trigger rely on.

use crate::error::ValidationError;
use crate::message::{Message, MessageRole, Metadata};
use crate::summary::Summary;
use chrono::{DateTime, Utc};
use parley_core::{ConversationId, UserId};
use serde::{Deserialize, Serialize};

/// Number of raw messages in a context window unless configured otherwise.
pub const DEFAULT_CONTEXT_WINDOW_SIZE: usize = 10;

fn default_context_window_size() -> usize {
    DEFAULT_CONTEXT_WINDOW_SIZE
}

fn default_active() -> bool {
    true
}

/// A user's dialogue history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// The user who owns this conversation.
    pub user_id: UserId,
    /// Globally unique conversation identifier.
    pub conversation_id: ConversationId,
    /// Messages in ascending timestamp order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Summaries in ascending creation order.
    #[serde(default)]
    pub summaries: Vec<Summary>,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// When the conversation was last changed.
    pub updated_at: DateTime<Utc>,
    /// Whether this conversation is eligible for active selection.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Number of trailing messages included in a context window.
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
}

impl Conversation {
    /// Creates an empty, active conversation.
    #[must_use]
    pub fn new(user_id: UserId, conversation_id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            conversation_id,
            messages: Vec::new(),
            summaries: Vec::new(),
            created_at: now,
            updated_at: now,
            is_active: true,
            context_window_size: DEFAULT_CONTEXT_WINDOW_SIZE,
        }
    }

    /// Sets the context window size.
    #[must_use]
    pub fn with_context_window_size(mut self, size: usize) -> Self {
        self.context_window_size = size;
        self
    }

    /// Appends a message.
    ///
    /// The timestamp is never earlier than the previous message's, so the
    /// sequence stays ordered even if the clock steps backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the content fails validation.
    pub fn add_message(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<Message, ValidationError> {
        let mut message = Message::new(role, content)?;
        if let Some(metadata) = metadata {
            message.metadata = metadata;
        }
        if let Some(last) = self.messages.last() {
            message.timestamp = message.timestamp.max(last.timestamp);
        }
        self.messages.push(message.clone());
        self.touch();
        Ok(message)
    }

    /// Records a summary of the conversation as it stands now.
    pub fn add_summary(&mut self, summary: impl Into<String>, key_topics: Vec<String>) -> Summary {
        let mut created_at = Utc::now();
        if let Some(last) = self.summaries.last() {
            created_at = created_at.max(last.created_at);
        }
        let summary = Summary::at(summary, key_topics, self.messages.len(), created_at);
        self.summaries.push(summary.clone());
        self.touch();
        summary
    }

    /// Returns the most recent summary, if any.
    #[must_use]
    pub fn latest_summary(&self) -> Option<&Summary> {
        self.summaries.iter().max_by_key(|s| s.created_at)
    }

    /// Builds the context window for a model call.
    ///
    /// When `include_summary` is set and a summary exists, the latest one
    /// leads as a system message. The last `context_window_size` messages
    /// follow.
    #[must_use]
    pub fn context_window(&self, include_summary: bool) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(self.context_window_size);
        let mut window = Vec::with_capacity(self.messages.len() - skip + 1);

        if include_summary && let Some(summary) = self.latest_summary() {
            window.push(summary.to_context_message());
        }
        window.extend(self.messages[skip..].iter().cloned());
        window
    }

    /// Returns messages strictly newer than `since`.
    pub fn messages_since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.timestamp > since)
    }

    /// Summarization trigger.
    ///
    /// True once the conversation holds `threshold` messages and either no
    /// summary exists or at least `threshold / 2` messages arrived after the
    /// latest one. A threshold of zero disables summarization.
    #[must_use]
    pub fn should_summarize(&self, threshold: usize) -> bool {
        if threshold == 0 || self.messages.len() < threshold {
            return false;
        }
        match self.latest_summary() {
            None => true,
            Some(summary) => self.messages_since(summary.created_at).count() >= threshold / 2,
        }
    }

    /// Marks the conversation inactive. Archiving an inactive conversation
    /// leaves `updated_at` alone so retention keeps counting from the first
    /// archive.
    pub fn archive(&mut self) {
        if self.is_active {
            self.is_active = false;
            self.touch();
        }
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Checks the invariants a stored conversation must hold: every message
    /// passes validation, messages and summaries are in ascending time order,
    /// and no summary covers more messages than exist.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let now = Utc::now();
        for message in &self.messages {
            message.validate(now)?;
        }
        if self
            .messages
            .windows(2)
            .any(|pair| pair[0].timestamp > pair[1].timestamp)
        {
            return Err(ValidationError::OutOfOrder {
                sequence: "messages",
            });
        }
        if self
            .summaries
            .windows(2)
            .any(|pair| pair[0].created_at > pair[1].created_at)
        {
            return Err(ValidationError::OutOfOrder {
                sequence: "summaries",
            });
        }
        if let Some(summary) = self
            .summaries
            .iter()
            .find(|s| s.message_count > self.messages.len())
        {
            return Err(ValidationError::SummaryExceedsMessages {
                covered: summary.message_count,
                messages: self.messages.len(),
            });
        }
        Ok(())
    }
}
