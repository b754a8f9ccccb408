//! Strongly-typed identifiers.
//!
//! Two families live here:
//!
//! - ULID-backed IDs (`MessageId`) minted by the engine itself, which are
//!   unique and sort by creation time.
//! - Validated string keys (`UserId`, `ConversationId`) that may come from the
//!   chat transport or from callers. Keys are restricted to a path-safe
//!   alphabet because the file backend uses them as directory and file names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Maximum length of a string key.
pub const MAX_KEY_LEN: usize = 128;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

fn validate_key(id_type: &'static str, value: &str) -> Result<(), ParseIdError> {
    let reject = |reason: String| Err(ParseIdError { id_type, reason });

    if value.is_empty() {
        return reject("must not be empty".to_string());
    }
    if value.len() > MAX_KEY_LEN {
        return reject(format!(
            "length {} exceeds maximum of {MAX_KEY_LEN}",
            value.len()
        ));
    }
    if value.starts_with('.') {
        return reject("must not start with '.'".to_string());
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@')))
    {
        return reject(format!("invalid character {bad:?}"));
    }
    Ok(())
}

/// Macro to generate a strongly-typed ID wrapper around ULID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }
    };
}

/// Macro to generate a validated string key.
///
/// Keys deserialize through the same validation as [`FromStr`], so a
/// tampered file cannot smuggle a path separator back in.
macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps a key.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty, too long, starts with
            /// `.`, or contains characters outside `[A-Za-z0-9_.@-]`.
            pub fn new(value: impl Into<String>) -> Result<Self, ParseIdError> {
                let value = value.into();
                validate_key(stringify!($name), &value)?;
                Ok(Self(value))
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for a message within a conversation.
    MessageId,
    "msg"
);

define_key!(
    /// Identifier of a chat user, as supplied by the transport.
    UserId
);

define_key!(
    /// Identifier of a conversation, unique across all users.
    ConversationId
);

impl ConversationId {
    /// Generates a fresh, globally unique conversation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conv_{}", Ulid::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_display_format() {
        let id = MessageId::new();
        assert!(id.to_string().starts_with("msg_"));
    }

    #[test]
    fn message_id_parses_with_and_without_prefix() {
        let id = MessageId::new();
        let parsed: MessageId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);

        let raw: MessageId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(id, raw);
    }

    #[test]
    fn message_id_rejects_garbage() {
        let err = "msg_nope".parse::<MessageId>().unwrap_err();
        assert_eq!(err.id_type, "MessageId");
    }

    #[test]
    fn transport_user_ids_are_accepted() {
        for raw in ["123456789", "u1", "alice@example.com", "team-7.bot_x"] {
            let id = UserId::new(raw).expect("valid");
            assert_eq!(id.as_str(), raw);
        }
    }

    #[test]
    fn path_unsafe_keys_are_rejected() {
        for raw in ["", "..", ".hidden", "a/b", "a\\b", "with space", "x:y"] {
            assert!(UserId::new(raw).is_err(), "{raw:?} should be rejected");
        }
        assert!(ConversationId::new("a".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(ConversationId::new("a".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn generated_conversation_ids_are_unique_and_valid() {
        let a = ConversationId::generate();
        let b = ConversationId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conv_"));
        assert!(ConversationId::new(a.as_str()).is_ok());
    }

    #[test]
    fn keys_validate_on_deserialize() {
        let ok: UserId = serde_json::from_str("\"u1\"").expect("deserialize");
        assert_eq!(ok.as_str(), "u1");

        let bad: Result<UserId, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn key_serde_roundtrip() {
        let id = ConversationId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        let parsed: ConversationId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }
}
