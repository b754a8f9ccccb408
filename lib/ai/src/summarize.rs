//! Conversation summarization.
//!
//! Summaries are produced by the same model that answers the user, from the
//! current context window, and stored on the user's active conversation.

use crate::backend::{LlmBackend, LlmRequest};
use parley_conversation::{MAX_KEY_TOPICS, Message, MessageRole};
use parley_core::UserId;
use parley_persistence::ConversationManager;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const FALLBACK_TOPIC_COUNT: usize = 5;
const FALLBACK_MIN_WORD_CHARS: usize = 5;

/// Builds the summarization prompt, or `None` if the context holds no
/// user or assistant turns.
#[must_use]
pub fn summary_prompt(context: &[Message]) -> Option<String> {
    let transcript = context
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>();
    if transcript.is_empty() {
        return None;
    }

    Some(format!(
        "Please create a brief summary of the following conversation, highlighting the key topics and important points discussed:\n\n\
         {}\n\n\
         Provide a concise summary (2-3 sentences) and list the main topics discussed.",
        transcript.join("\n")
    ))
}

/// Pulls key topics out of a model-written summary.
///
/// Bulleted lines (`-`, `•`, `*`) win. Without any, the first few long
/// alphabetic words stand in, lowercased.
#[must_use]
pub fn extract_key_topics(summary: &str) -> Vec<String> {
    let mut topics: Vec<String> = summary
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(['-', '•', '*']))
        .map(|line| {
            line.trim_start_matches(['-', '•', '*', ' '])
                .trim()
                .to_string()
        })
        .filter(|topic| !topic.is_empty())
        .collect();

    if topics.is_empty() {
        topics = summary
            .to_lowercase()
            .split_whitespace()
            .filter(|word| {
                word.chars().count() >= FALLBACK_MIN_WORD_CHARS
                    && word.chars().all(char::is_alphabetic)
            })
            .take(FALLBACK_TOPIC_COUNT)
            .map(str::to_string)
            .collect();
    }

    topics.truncate(MAX_KEY_TOPICS);
    topics
}

/// Summarizes the user's active conversation. Returns whether a summary was
/// stored.
pub async fn summarize_conversation(
    backend: &dyn LlmBackend,
    conversations: &ConversationManager,
    user_id: &UserId,
) -> bool {
    let context = conversations.get_conversation_context(user_id).await;
    let Some(prompt) = summary_prompt(&context) else {
        debug!(%user_id, "nothing to summarize");
        return false;
    };

    let summary = match backend.generate(&LlmRequest::new(prompt)).await {
        Ok(response) => response.content,
        Err(e) => {
            error!(%user_id, error = %e, "failed to generate conversation summary");
            return false;
        }
    };

    let key_topics = extract_key_topics(&summary);
    let stored = conversations
        .create_conversation_summary(user_id, &summary, key_topics)
        .await;
    if stored {
        info!(%user_id, "created conversation summary");
    }
    stored
}

/// Runs [`summarize_conversation`] on a detached task.
pub fn spawn_summary(
    backend: Arc<dyn LlmBackend>,
    conversations: ConversationManager,
    user_id: UserId,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        summarize_conversation(backend.as_ref(), &conversations, &user_id).await
    })
}
