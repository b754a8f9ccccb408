//! Message types for conversations.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use parley_core::MessageId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum message length, in characters.
pub const MAX_CONTENT_CHARS: usize = 32_768;

/// Metadata key marking the synthetic summary message in a context window.
pub const KIND_KEY: &str = "kind";

/// String-keyed metadata attached to a message.
pub type Metadata = BTreeMap<String, JsonValue>;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User/human message.
    User,
    /// Assistant/AI message.
    Assistant,
    /// System message.
    System,
}

impl MessageRole {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored role string is not a known role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for MessageRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Message role.
    pub role: MessageRole,
    /// Message content.
    pub content: String,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary caller-supplied metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    /// Creates a new message stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is empty or too long.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Result<Self, ValidationError> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        })
    }

    /// Creates a user message.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is empty or too long.
    pub fn user(content: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(MessageRole::User, content)
    }

    /// Creates an assistant message.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is empty or too long.
    pub fn assistant(content: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(MessageRole::Assistant, content)
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Checks the content rules and that the timestamp is not after `now`.
    ///
    /// # Errors
    ///
    /// Returns the first rule the message breaks.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        validate_content(&self.content)?;
        if self.timestamp > now {
            return Err(ValidationError::FutureTimestamp {
                timestamp: self.timestamp,
            });
        }
        Ok(())
    }

    /// Returns true if this is the synthetic summary entry of a context window.
    #[must_use]
    pub fn is_summary(&self) -> bool {
        self.role == MessageRole::System
            && self.metadata.get(KIND_KEY).and_then(JsonValue::as_str) == Some("summary")
    }
}

fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let len = content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentTooLong {
            len,
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn message_creation() {
        let msg = Message::user("Hello!").unwrap();
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello!");
        assert!(msg.metadata.is_empty());
        assert!(!msg.is_summary());
    }

    #[test]
    fn empty_and_blank_content_rejected() {
        assert_eq!(Message::user(""), Err(ValidationError::EmptyContent));
        assert_eq!(Message::user(" \n\t"), Err(ValidationError::EmptyContent));
    }

    #[test]
    fn oversized_content_rejected() {
        let at_limit = "x".repeat(MAX_CONTENT_CHARS);
        assert!(Message::assistant(at_limit).is_ok());

        let over = "é".repeat(MAX_CONTENT_CHARS + 1);
        assert_eq!(
            Message::assistant(over),
            Err(ValidationError::ContentTooLong {
                len: MAX_CONTENT_CHARS + 1,
                max: MAX_CONTENT_CHARS,
            })
        );
    }

    #[test]
    fn validate_rejects_future_timestamp() {
        let now = Utc::now();
        let mut msg = Message::user("hi").unwrap();
        msg.timestamp = now - Duration::days(2);
        assert_eq!(msg.validate(now), Ok(()));

        msg.timestamp = now + Duration::minutes(5);
        let err = msg.validate(now).unwrap_err();
        assert!(matches!(err, ValidationError::FutureTimestamp { .. }));
    }

    #[test]
    fn validate_rechecks_content() {
        let mut msg = Message::user("hi").unwrap();
        msg.content = String::new();
        assert_eq!(msg.validate(Utc::now()), Err(ValidationError::EmptyContent));
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(role.as_str().parse::<MessageRole>(), Ok(role));
        }
        assert!("tool".parse::<MessageRole>().is_err());
    }

    #[test]
    fn unknown_role_fails_to_deserialize() {
        let json = format!(
            r#"{{"id":"{}","role":"tool","content":"x","timestamp":"2024-01-01T00:00:00Z"}}"#,
            MessageId::new().as_ulid()
        );
        assert!(serde_json::from_str::<Message>(&json).is_err());
    }

    #[test]
    fn message_serde_roundtrip_keeps_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("chat_id".to_string(), serde_json::json!(42));
        let msg = Message::user("Test").unwrap().with_metadata(metadata);

        let json = serde_json::to_string(&msg).expect("serialize");
        let parsed: Message = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(msg, parsed);
    }
}
