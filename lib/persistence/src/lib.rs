//! Persistence layer for parley.
//!
//! - [`PersistenceConfig`]: settings for enabling and choosing storage
//! - [`StorageBackend`]: the backend picked once at startup
//! - [`ConversationManager`]: the failure-contained API the assistant uses

pub mod backend;
pub mod config;
pub mod manager;

pub use backend::StorageBackend;
pub use config::{BackendKind, PersistenceConfig, PoolConfig};
pub use manager::ConversationManager;
