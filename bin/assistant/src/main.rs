use parley_ai::{Assistant, LlmBackend, OpenAiCompatibleBackend};
use parley_assistant::config::AppConfig;
use parley_assistant::console::{Console, stdin_lines};
use parley_core::UserId;
use parley_persistence::ConversationManager;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Replies go to stdout; logs stay on stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::load().expect("failed to load configuration");
    tracing::info!(
        persistence_enabled = config.persistence.enabled,
        backend = ?config.persistence.backend,
        llm = ?config.llm,
        "Loaded configuration"
    );

    let user_id =
        UserId::new(config.console.user_id.clone()).expect("console.user_id is not a valid user ID");

    let conversations = match ConversationManager::from_config(&config.persistence) {
        Ok(manager) => manager,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to set up conversation storage, continuing without persistence");
            ConversationManager::disabled()
        }
    };
    if !conversations.initialize().await {
        tracing::warn!("Conversation storage failed to initialize; history may not be kept");
    }

    // Cleanup old conversations on startup
    let removed = conversations.cleanup_old_conversations().await;
    if removed > 0 {
        tracing::info!(
            removed_conversations = removed,
            "Cleaned up old conversations on startup"
        );
    }

    // Spawn periodic cleanup task
    if config.cleanup_interval_seconds > 0 {
        let cleanup = conversations.clone();
        let period = Duration::from_secs(config.cleanup_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; startup already swept.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = cleanup.cleanup_old_conversations().await;
                if removed > 0 {
                    tracing::debug!(removed_conversations = removed, "Periodic conversation cleanup");
                }
            }
        });
    }

    let backend: Arc<dyn LlmBackend> =
        Arc::new(OpenAiCompatibleBackend::new(&config.llm).expect("invalid LLM configuration"));
    let assistant = Assistant::new(backend, conversations.clone(), &config.assistant);
    let console = Console::new(assistant, user_id);

    tokio::select! {
        result = console.run(stdin_lines(), tokio::io::stdout()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Console I/O failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, shutting down");
        }
    }

    if !conversations.shutdown().await {
        tracing::warn!("Conversation storage did not shut down cleanly");
    }
}
