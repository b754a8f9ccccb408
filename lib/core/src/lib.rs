//! Core domain types and utilities for parley.
//!
//! This crate provides the identifier types and the error-handling alias
//! shared by the conversation engine, its storage backends and the assistant.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConversationId, MessageId, ParseIdError, UserId};
