//! Line-oriented console transport.

use crate::commands::Command;
use parley_ai::Assistant;
use parley_core::UserId;
use std::io;
use std::thread;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

const PROMPT: &str = "> ";

/// A chat session for one user over stdin and stdout.
pub struct Console {
    assistant: Assistant,
    user_id: UserId,
}

impl Console {
    #[must_use]
    pub fn new(assistant: Assistant, user_id: UserId) -> Self {
        Self { assistant, user_id }
    }

    /// Answers each input line until `/quit` or the end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `output` fails.
    pub async fn run<W>(&self, mut lines: mpsc::Receiver<String>, mut output: W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        while let Some(line) = lines.recv().await {
            let line = line.trim();
            if line.is_empty() {
                output.write_all(PROMPT.as_bytes()).await?;
                output.flush().await?;
                continue;
            }

            let command = Command::parse(line);
            let reply = match command {
                Some(command) => {
                    debug!(?command, user_id = %self.user_id, "running command");
                    command
                        .execute(self.assistant.conversations(), &self.user_id)
                        .await
                }
                None => self.assistant.respond(&self.user_id, line).await,
            };

            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n\n").await?;
            if command == Some(Command::Quit) {
                output.flush().await?;
                break;
            }
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;
        }
        Ok(())
    }
}

/// Reads stdin on a detached thread so a pending read never holds up
/// runtime shutdown.
#[must_use]
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    thread::spawn(move || {
        for line in io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });
    rx
}
