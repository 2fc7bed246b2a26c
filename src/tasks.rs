//! Background shell tasks launched from chat commands.
//!
//! Tasks run to completion on their own; the supervisor is polled on a
//! fixed interval, reaps finished processes and turns their output into a
//! reply for whoever started them. Tasks are never killed.

use crate::chat::OutgoingMessage;
use crate::error::Result;
use crate::sensors::RecipientId;
use log::{debug, error, info};
use std::io;
use std::process::{Output, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Longest output forwarded to chat, in characters.
const MAX_OUTPUT_CHARS: usize = 4000;

/// A running external process and who asked for it.
pub struct BackgroundTask {
    handle: JoinHandle<io::Result<Output>>,
    recipient: RecipientId,
    origin: String,
    started: Instant,
}

impl BackgroundTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Vec<BackgroundTask>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `command_line` through `sh -c` without waiting for it.
    ///
    /// Fails only if the process could not be spawned.
    pub fn launch(&mut self, command_line: &str, recipient: RecipientId, origin: &str) -> Result<()> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        info!("[Tasks] Started '{}' for {}", command_line, recipient);
        self.tasks.push(BackgroundTask {
            handle: tokio::spawn(child.wait_with_output()),
            recipient,
            origin: origin.to_string(),
            started: Instant::now(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Collect finished tasks and build replies for the ones that printed
    /// something. Unfinished tasks stay tracked.
    pub async fn reap(&mut self) -> Vec<OutgoingMessage> {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(BackgroundTask::is_finished);
        self.tasks = running;

        let mut replies = Vec::new();
        for task in finished {
            let output = match task.handle.await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    error!("[Tasks] '{}' failed: {}", task.origin, e);
                    continue;
                }
                Err(e) => {
                    error!("[Tasks] '{}' task aborted: {}", task.origin, e);
                    continue;
                }
            };

            debug!(
                "[Tasks] '{}' exited with {} after {:?}",
                task.origin,
                output.status,
                task.started.elapsed()
            );

            let text = combined_output(&output);
            if text.is_empty() {
                continue;
            }
            replies.push(OutgoingMessage::text(task.recipient, text));
        }
        replies
    }
}

/// Stdout followed by stderr, trimmed and capped.
fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let text = text.trim();
    if text.chars().count() > MAX_OUTPUT_CHARS {
        text.chars().take(MAX_OUTPUT_CHARS).collect()
    } else {
        text.to_string()
    }
}
