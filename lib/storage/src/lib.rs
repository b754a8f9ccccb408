//! Conversation storage backends for parley.
//!
//! - [`FileConversationStore`]: one JSON document per conversation, with a
//!   TTL cache in front of the disk
//! - [`SqlConversationStore`]: normalized tables in SQLite via sqlx

mod cache;
pub mod file;
pub mod sql;

pub use file::FileConversationStore;
pub use sql::{PoolSettings, SqlConversationStore};
