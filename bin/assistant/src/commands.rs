//! Slash commands.

use parley_conversation::{ConversationStats, HealthReport, Message, MessageRole};
use parley_core::UserId;
use parley_persistence::ConversationManager;

const HISTORY_MESSAGES: usize = 10;
const HISTORY_PREVIEW_CHARS: usize = 100;
const HISTORY_MAX_CHARS: usize = 3500;

pub const WELCOME: &str = "Hello! I'm an AI assistant that can help you with various questions and tasks. \
Just send me a message and I'll do my best to assist you!\n\n\
Use /help to see available commands.";

pub const HELP: &str = "Commands:\n\
/start - Show the welcome message\n\
/help - Show this help message\n\
/clear - Clear conversation history\n\
/stats - View your conversation statistics\n\
/history - View recent conversation history\n\
/health - Check conversation storage\n\
/quit - Leave the session\n\n\
Any other line is sent to the assistant. I remember our conversation history to provide better responses!";

/// A recognized slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Clear,
    Stats,
    History,
    Health,
    Quit,
}

impl Command {
    /// Parses a command line. Returns `None` for anything that is not a
    /// known command, which the caller treats as a chat message.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.split_whitespace().next()?;
        let command = match word.to_ascii_lowercase().as_str() {
            "/start" => Self::Start,
            "/help" => Self::Help,
            "/clear" => Self::Clear,
            "/stats" => Self::Stats,
            "/history" => Self::History,
            "/health" => Self::Health,
            "/quit" | "/exit" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }

    /// Runs the command and renders its reply.
    pub async fn execute(self, conversations: &ConversationManager, user_id: &UserId) -> String {
        match self {
            Self::Start => WELCOME.to_string(),
            Self::Help => HELP.to_string(),
            Self::Quit => "Goodbye!".to_string(),
            Self::Clear => {
                if !conversations.is_enabled() {
                    return disabled_notice("your messages are not being stored, so there's no history to clear");
                }
                if conversations.clear_conversation_history(user_id).await {
                    "Conversation history cleared. Our next conversation will start fresh!"
                        .to_string()
                } else {
                    "No conversation history found to clear.".to_string()
                }
            }
            Self::Stats => {
                if !conversations.is_enabled() {
                    return disabled_notice("no statistics are being tracked");
                }
                match conversations.get_user_stats(user_id).await {
                    Some(stats) => format_stats(&stats),
                    None => "No conversation statistics available.".to_string(),
                }
            }
            Self::History => {
                if !conversations.is_enabled() {
                    return disabled_notice("no conversation history is available");
                }
                format_history(&conversations.get_conversation_context(user_id).await)
            }
            Self::Health => {
                if !conversations.is_enabled() {
                    return disabled_notice("nothing is being stored");
                }
                format_health(&conversations.health_check().await)
            }
        }
    }
}

fn disabled_notice(detail: &str) -> String {
    format!("Conversation persistence is currently disabled; {detail}.")
}

#[must_use]
pub fn format_stats(stats: &ConversationStats) -> String {
    let mut reply = format!(
        "Your Conversation Statistics\n\n\
         Total Conversations: {}\n\
         Total Messages: {}\n\
         Active Conversations: {}\n\
         Avg Messages/Conversation: {:.1}\n",
        stats.total_conversations,
        stats.total_messages,
        stats.active_conversations,
        stats.avg_messages_per_conversation,
    );
    if let Some(last_activity) = stats.last_activity {
        reply.push_str(&format!(
            "Last Activity: {}\n",
            last_activity.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    reply
}

/// Renders the most recent turns of the context window.
#[must_use]
pub fn format_history(context: &[Message]) -> String {
    let turns: Vec<&Message> = context
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .collect();
    if turns.is_empty() {
        return "No conversation history found. Start chatting with me to build up our conversation!"
            .to_string();
    }

    let recent = &turns[turns.len().saturating_sub(HISTORY_MESSAGES)..];
    let mut parts = vec!["Recent Conversation History".to_string()];
    parts.extend(recent.iter().map(|m| {
        let speaker = if m.role == MessageRole::User { "You" } else { "Me" };
        format!(
            "[{}] {speaker}: {}",
            m.timestamp.format("%H:%M"),
            preview(&m.content)
        )
    }));

    let history = parts.join("\n\n");
    if history.chars().count() > HISTORY_MAX_CHARS {
        let mut truncated: String = history.chars().take(HISTORY_MAX_CHARS).collect();
        truncated.push_str("\n\n... (truncated)");
        truncated
    } else {
        history
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() > HISTORY_PREVIEW_CHARS {
        let mut shortened: String = content.chars().take(HISTORY_PREVIEW_CHARS).collect();
        shortened.push_str("...");
        shortened
    } else {
        content.to_string()
    }
}

#[must_use]
pub fn format_health(report: &HealthReport) -> String {
    let mut lines = vec![
        format!(
            "Storage: {} ({})",
            if report.healthy { "healthy" } else { "unhealthy" },
            report.backend
        ),
        format!(
            "Accessible: {}",
            if report.storage_accessible { "yes" } else { "no" }
        ),
    ];
    if let Some(location) = &report.location {
        lines.push(format!("Location: {location}"));
    }
    for (label, value) in [
        ("Users", report.total_users),
        ("Conversations", report.total_conversations),
        ("Active conversations", report.active_conversations),
        ("Messages", report.total_messages),
    ] {
        if let Some(value) = value {
            lines.push(format!("{label}: {value}"));
        }
    }
    if let Some(entries) = report.cache_entries {
        lines.push(format!("Cached conversations: {entries}"));
    }
    if let Some(error) = &report.error {
        lines.push(format!("Error: {error}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parley_persistence::PersistenceConfig;
    use tempfile::TempDir;

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/stats"), Some(Command::Stats));
        assert_eq!(Command::parse("  /HISTORY  please"), Some(Command::History));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse("hello /stats"), None);
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn stats_format() {
        let last = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 59).unwrap();
        let stats = ConversationStats::from_counts(user(), 3, 10, 1, Some(last));
        let reply = format_stats(&stats);

        assert!(reply.contains("Total Conversations: 3\n"));
        assert!(reply.contains("Total Messages: 10\n"));
        assert!(reply.contains("Active Conversations: 1\n"));
        assert!(reply.contains("Avg Messages/Conversation: 3.3\n"));
        assert!(reply.ends_with("Last Activity: 2024-03-05 14:07 UTC\n"));

        let empty = format_stats(&ConversationStats::empty(user()));
        assert!(empty.contains("Avg Messages/Conversation: 0.0"));
        assert!(!empty.contains("Last Activity"));
    }

    #[test]
    fn history_shows_last_ten_turns_truncated() {
        let mut context = vec![
            parley_conversation::Summary::new("earlier", Vec::new(), 2).to_context_message(),
        ];
        for i in 0..12 {
            context.push(Message::user(format!("question {i}")).unwrap());
        }
        context.push(Message::assistant("x".repeat(150)).unwrap());

        let reply = format_history(&context);
        assert!(reply.starts_with("Recent Conversation History\n\n"));
        assert!(!reply.contains("earlier"));
        assert!(!reply.contains("question 2"));
        assert!(reply.contains("You: question 3"));
        assert!(reply.contains("You: question 11"));
        assert!(reply.contains(&format!("Me: {}...", "x".repeat(100))));
        assert!(!reply.contains(&"x".repeat(101)));
    }

    #[test]
    fn history_is_capped() {
        let context: Vec<_> = (0..10)
            .map(|_| Message::user("y".repeat(2000)).unwrap())
            .collect();
        let reply = format_history(&context);
        assert!(reply.ends_with("\n\n... (truncated)"));
        assert_eq!(
            reply.chars().count(),
            HISTORY_MAX_CHARS + "\n\n... (truncated)".len()
        );
    }

    #[test]
    fn empty_history() {
        assert!(format_history(&[]).starts_with("No conversation history found"));
    }

    #[test]
    fn health_format() {
        let mut report = HealthReport::healthy("file").with_location("/data");
        report.total_users = Some(2);
        report.total_conversations = Some(5);
        let reply = format_health(&report);
        assert!(reply.starts_with("Storage: healthy (file)\nAccessible: yes\nLocation: /data"));
        assert!(reply.contains("Users: 2"));
        assert!(reply.contains("Conversations: 5"));
        assert!(!reply.contains("Messages"));

        let broken = format_health(&HealthReport::unhealthy("relational", "pool closed"));
        assert!(broken.contains("unhealthy (relational)"));
        assert!(broken.ends_with("Error: pool closed"));
    }

    #[tokio::test]
    async fn commands_report_disabled_persistence() {
        let manager = ConversationManager::disabled();
        for command in [Command::Clear, Command::Stats, Command::History, Command::Health] {
            let reply = command.execute(&manager, &user()).await;
            assert!(reply.starts_with("Conversation persistence is currently disabled"));
        }
        assert_eq!(Command::Help.execute(&manager, &user()).await, HELP);
    }

    #[tokio::test]
    async fn clear_then_stats() {
        let dir = TempDir::new().unwrap();
        let manager = ConversationManager::from_config(&PersistenceConfig {
            storage_dir: dir.path().join("conversations"),
            ..PersistenceConfig::default()
        })
        .unwrap();
        assert!(manager.initialize().await);
        manager.add_user_message(&user(), "Hello", None).await;

        let stats = Command::Stats.execute(&manager, &user()).await;
        assert!(stats.contains("Total Messages: 1"));

        let cleared = Command::Clear.execute(&manager, &user()).await;
        assert!(cleared.starts_with("Conversation history cleared"));
        let again = Command::Clear.execute(&manager, &user()).await;
        assert_eq!(again, "No conversation history found to clear.");

        let history = Command::History.execute(&manager, &user()).await;
        assert!(history.starts_with("No conversation history found"));
    }
}
