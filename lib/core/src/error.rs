//! Error handling foundation for parley.
//!
//! Every fallible operation in the workspace returns a rootcause [`Report`]
//! whose context is the domain error of the layer that produced it
//! (`StorageError` for backends, `LlmError` for model calls). Callers that
//! swallow failures, such as the conversation manager, log the report with
//! `%` formatting and fall back to a default value.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// `C` is the typed context of the report; it defaults to the untyped form.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
