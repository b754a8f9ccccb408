//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ValidationError`: A value violates an entity-model invariant
//! - `StorageError`: A storage backend operation failed

use chrono::{DateTime, Utc};
use parley_core::{ConversationId, ParseIdError, UserId};
use std::fmt;

/// Entity-model invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Message content is empty or whitespace only.
    EmptyContent,
    /// Message content exceeds the allowed length.
    ContentTooLong { len: usize, max: usize },
    /// Message timestamp lies in the future.
    FutureTimestamp { timestamp: DateTime<Utc> },
    /// A user or conversation identifier is not a valid key.
    InvalidIdentifier { kind: &'static str, reason: String },
    /// Messages or summaries are not in ascending time order.
    OutOfOrder { sequence: &'static str },
    /// A summary claims to cover more messages than the conversation holds.
    SummaryExceedsMessages { covered: usize, messages: usize },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyContent => write!(f, "message content must not be empty"),
            Self::ContentTooLong { len, max } => {
                write!(f, "message content is {len} characters, maximum is {max}")
            }
            Self::FutureTimestamp { timestamp } => {
                write!(f, "message timestamp {timestamp} is in the future")
            }
            Self::InvalidIdentifier { kind, reason } => {
                write!(f, "invalid {kind}: {reason}")
            }
            Self::OutOfOrder { sequence } => {
                write!(f, "{sequence} are not in ascending time order")
            }
            Self::SummaryExceedsMessages { covered, messages } => {
                write!(
                    f,
                    "summary covers {covered} messages but the conversation has {messages}"
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ParseIdError> for ValidationError {
    fn from(err: ParseIdError) -> Self {
        Self::InvalidIdentifier {
            kind: err.id_type,
            reason: err.reason,
        }
    }
}

/// Errors from storage backend operations.
///
/// Absence on reads is not an error: lookups return `None` and
/// archive/delete return `false`. `ConversationNotFound` is only raised when
/// a caller writes against a conversation that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The target conversation does not exist.
    ConversationNotFound {
        user_id: UserId,
        conversation_id: ConversationId,
    },
    /// A conversation with this ID already exists.
    DuplicateConversation { conversation_id: ConversationId },
    /// Input failed entity-model validation.
    Validation(ValidationError),
    /// The storage medium cannot be reached.
    BackendUnavailable { details: String },
    /// A stored record could not be encoded or decoded.
    Serialization { location: String, details: String },
    /// A filesystem operation failed.
    Io { path: String, details: String },
    /// A database statement failed.
    Database { details: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConversationNotFound {
                user_id,
                conversation_id,
            } => {
                write!(
                    f,
                    "conversation {conversation_id} not found for user {user_id}"
                )
            }
            Self::DuplicateConversation { conversation_id } => {
                write!(f, "conversation {conversation_id} already exists")
            }
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::BackendUnavailable { details } => {
                write!(f, "storage backend unavailable: {details}")
            }
            Self::Serialization { location, details } => {
                write!(f, "failed to serialize {location}: {details}")
            }
            Self::Io { path, details } => write!(f, "I/O error on {path}: {details}"),
            Self::Database { details } => write!(f, "database error: {details}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<ValidationError> for StorageError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_both_ids() {
        let err = StorageError::ConversationNotFound {
            user_id: UserId::new("u1").unwrap(),
            conversation_id: ConversationId::new("c1").unwrap(),
        };
        let text = err.to_string();
        assert!(text.contains("c1"));
        assert!(text.contains("u1"));
    }

    #[test]
    fn validation_wraps_into_storage_error() {
        let err: StorageError = ValidationError::ContentTooLong { len: 10, max: 5 }.into();
        assert!(err.to_string().contains("maximum is 5"));
    }

    #[test]
    fn parse_errors_become_invalid_identifier() {
        let parse = UserId::new("a/b").unwrap_err();
        let err = ValidationError::from(parse);
        assert!(matches!(
            err,
            ValidationError::InvalidIdentifier { kind: "UserId", .. }
        ));
    }
}
