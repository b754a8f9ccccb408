//! Prompt assembly from conversation context.

use parley_conversation::{Message, MessageRole};

/// System prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Respond to user messages in a friendly and informative way. \
Keep responses concise but helpful.";

const HISTORY_GUIDANCE: &str = "You have access to conversation history and context. \
Use this context to provide more personalized and relevant responses. \
When you see conversation history or summaries in the context, reference previous topics naturally when appropriate.

If you notice the conversation has been going on for a while, occasionally acknowledge the ongoing conversation or reference earlier topics to maintain continuity.

Be conversational and remember that you're having an ongoing dialogue with the user, not just answering isolated questions.";

/// The configured system prompt followed by the note on using history.
#[must_use]
pub fn system_prompt(base: &str) -> String {
    format!("{base}\n\n{HISTORY_GUIDANCE}")
}

/// Renders the context window and the new message as a single prompt.
///
/// Summaries appear as `[Summary: …]` and turns as `User: …` or
/// `Assistant: …`, separated by blank lines. The prompt always ends with the
/// new user message.
#[must_use]
pub fn context_prompt(context: &[Message], message: &str) -> String {
    context
        .iter()
        .map(|m| match m.role {
            MessageRole::System => format!("[Summary: {}]", m.content),
            MessageRole::User => format!("User: {}", m.content),
            MessageRole::Assistant => format!("Assistant: {}", m.content),
        })
        .chain(std::iter::once(format!("User: {message}")))
        .collect::<Vec<_>>()
        .join("\n\n")
}
