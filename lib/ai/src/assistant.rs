//! The conversational assistant.
//!
//! Ties a language model to the conversation manager: each reply is
//! generated from the user's context window, both turns are recorded, and
//! long conversations are summarized in the background.

use crate::backend::{LlmBackend, LlmRequest};
use crate::prompt::{DEFAULT_SYSTEM_PROMPT, context_prompt, system_prompt};
use crate::summarize::spawn_summary;
use parley_core::UserId;
use parley_persistence::ConversationManager;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Reply sent when the model cannot be reached.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I encountered an error while processing your message. Please try again later.";

const TRUNCATION_MARKER: &str = "...";

/// Assistant settings, loaded as the `assistant` configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Replies longer than this many characters are cut short.
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_response_length() -> usize {
    4096
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_response_length: default_max_response_length(),
        }
    }
}

/// Answers user messages with conversation memory.
#[derive(Clone)]
pub struct Assistant {
    backend: Arc<dyn LlmBackend>,
    conversations: ConversationManager,
    system_prompt: String,
    max_response_length: usize,
}

impl Assistant {
    #[must_use]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        conversations: ConversationManager,
        config: &AssistantConfig,
    ) -> Self {
        Self {
            backend,
            conversations,
            system_prompt: system_prompt(&config.system_prompt),
            max_response_length: config.max_response_length,
        }
    }

    /// The conversation manager replies are recorded with.
    #[must_use]
    pub fn conversations(&self) -> &ConversationManager {
        &self.conversations
    }

    /// Produces a reply to `message`.
    ///
    /// Never fails: a model error yields [`FALLBACK_REPLY`], and persistence
    /// failures only cost the conversation its memory of this exchange.
    #[instrument(skip_all, fields(%user_id, provider = self.backend.provider().as_str()))]
    pub async fn respond(&self, user_id: &UserId, message: &str) -> String {
        // Context is read before the new message is stored so the message
        // appears exactly once, at the end of the prompt.
        let context = self.conversations.get_conversation_context(user_id).await;
        self.conversations
            .add_user_message(user_id, message, None)
            .await;

        let request =
            LlmRequest::new(context_prompt(&context, message)).with_system(&self.system_prompt);
        let reply = match self.backend.generate(&request).await {
            Ok(response) => {
                debug!(
                    model = %response.model,
                    tokens = response.usage.total(),
                    "generated reply"
                );
                self.truncate(response.content)
            }
            Err(e) => {
                error!(error = %e, "failed to generate reply");
                return FALLBACK_REPLY.to_string();
            }
        };

        self.conversations
            .add_assistant_message(user_id, &reply, None)
            .await;
        if self
            .conversations
            .should_summarize_conversation(user_id)
            .await
        {
            spawn_summary(
                Arc::clone(&self.backend),
                self.conversations.clone(),
                user_id.clone(),
            );
        }
        reply
    }

    fn truncate(&self, reply: String) -> String {
        if reply.chars().count() <= self.max_response_length {
            return reply;
        }
        warn!(
            max_response_length = self.max_response_length,
            "reply truncated"
        );
        let marker_len = TRUNCATION_MARKER.len().min(self.max_response_length);
        let keep = self.max_response_length - marker_len;
        let mut truncated: String = reply.chars().take(keep).collect();
        truncated.push_str(&TRUNCATION_MARKER[..marker_len]);
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LlmProvider, LlmResponse, TokenUsage};
    use crate::error::LlmError;
    use async_trait::async_trait;
    use parley_conversation::MessageRole;
    use parley_persistence::PersistenceConfig;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Replies with a fixed text, or fails when `reply` is `None`, and
    /// records every request it sees.
    struct ScriptedBackend {
        reply: Option<String>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedBackend {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn generate(
            &self,
            request: &LlmRequest,
        ) -> parley_core::Result<LlmResponse, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.reply {
                Some(content) => Ok(LlmResponse {
                    content: content.clone(),
                    usage: TokenUsage::default(),
                    model: "scripted".to_string(),
                }),
                None => Err(LlmError::ProviderUnavailable {
                    provider: "scripted".to_string(),
                    reason: "offline".to_string(),
                }
                .into()),
            }
        }

        fn provider(&self) -> LlmProvider {
            LlmProvider::OpenAiCompatible
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    async fn manager(dir: &TempDir, threshold: usize) -> ConversationManager {
        let config = PersistenceConfig {
            storage_dir: dir.path().join("conversations"),
            auto_summarize_threshold: threshold,
            ..PersistenceConfig::default()
        };
        let manager = ConversationManager::from_config(&config).unwrap();
        assert!(manager.initialize().await);
        manager
    }

    #[tokio::test]
    async fn records_both_turns_and_builds_prompt_from_history() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::replying("Hi there!");
        let assistant = Assistant::new(
            backend.clone(),
            manager(&dir, 50).await,
            &AssistantConfig::default(),
        );
        let user = UserId::new("u1").unwrap();

        assert_eq!(assistant.respond(&user, "Hello").await, "Hi there!");
        assert_eq!(assistant.respond(&user, "How are you?").await, "Hi there!");

        let prompts = backend.prompts();
        assert_eq!(prompts[0], "User: Hello");
        assert_eq!(
            prompts[1],
            "User: Hello\n\nAssistant: Hi there!\n\nUser: How are you?"
        );

        let system = backend.requests.lock().unwrap()[0].system.clone().unwrap();
        assert!(system.starts_with(DEFAULT_SYSTEM_PROMPT));

        let context = assistant.conversations().get_conversation_context(&user).await;
        let roles: Vec<_> = context.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
                MessageRole::Assistant
            ]
        );
    }

    #[tokio::test]
    async fn model_failure_returns_fallback_and_keeps_user_turn() {
        let dir = TempDir::new().unwrap();
        let assistant = Assistant::new(
            ScriptedBackend::failing(),
            manager(&dir, 50).await,
            &AssistantConfig::default(),
        );
        let user = UserId::new("u1").unwrap();

        assert_eq!(assistant.respond(&user, "Hello").await, FALLBACK_REPLY);
        let context = assistant.conversations().get_conversation_context(&user).await;
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn replies_without_persistence() {
        let backend = ScriptedBackend::replying("Still here.");
        let assistant = Assistant::new(
            backend.clone(),
            ConversationManager::disabled(),
            &AssistantConfig::default(),
        );
        let user = UserId::new("u1").unwrap();

        assert_eq!(assistant.respond(&user, "Hello").await, "Still here.");
        assert_eq!(assistant.respond(&user, "Again").await, "Still here.");
        assert_eq!(backend.prompts()[1], "User: Again");
    }

    #[tokio::test]
    async fn long_replies_are_truncated() {
        let backend = ScriptedBackend::replying(&"é".repeat(50));
        let assistant = Assistant::new(
            backend,
            ConversationManager::disabled(),
            &AssistantConfig {
                max_response_length: 20,
                ..AssistantConfig::default()
            },
        );

        let reply = assistant
            .respond(&UserId::new("u1").unwrap(), "Hello")
            .await;
        assert_eq!(reply.chars().count(), 20);
        assert!(reply.ends_with("..."));
    }

    #[tokio::test]
    async fn truncation_never_exceeds_tiny_limits() {
        for limit in 0..4 {
            let assistant = Assistant::new(
                ScriptedBackend::replying("a longer reply"),
                ConversationManager::disabled(),
                &AssistantConfig {
                    max_response_length: limit,
                    ..AssistantConfig::default()
                },
            );
            let reply = assistant
                .respond(&UserId::new("u1").unwrap(), "Hello")
                .await;
            assert_eq!(reply.chars().count(), limit);
            assert_eq!(reply, ".".repeat(limit));
        }
    }

    #[tokio::test]
    async fn summarizes_in_background_once_threshold_reached() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::replying("- greetings");
        let assistant = Assistant::new(
            backend.clone(),
            manager(&dir, 4).await,
            &AssistantConfig::default(),
        );
        let user = UserId::new("u1").unwrap();

        assistant.respond(&user, "Hello").await;
        assistant.respond(&user, "Hello again").await;

        let mut summarized = false;
        for _ in 0..100 {
            let context = assistant.conversations().get_conversation_context(&user).await;
            if context.first().is_some_and(|m| m.is_summary()) {
                summarized = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(summarized);
        assert!(
            backend
                .prompts()
                .iter()
                .any(|p| p.starts_with("Please create a brief summary"))
        );
    }
}
