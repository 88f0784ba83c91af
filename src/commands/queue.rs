use tokio::sync::{mpsc, oneshot};

use super::{Command, CommandReply, CommandRouter};

struct Job {
    command: Command,
    reply: oneshot::Sender<CommandReply>,
}

/// Dispatcher serving queued commands one at a time
pub struct CommandQueue {
    rx: mpsc::Receiver<Job>,
    router: CommandRouter,
}

/// Submission side of the queue, cloned into every transport
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Job>,
}

impl CommandQueue {
    pub fn new(router: CommandRouter, capacity: usize) -> (Self, QueueHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx, router }, QueueHandle { tx })
    }

    /// Serve commands until every handle has been dropped
    pub async fn run(mut self) {
        tracing::info!("📨 Command dispatcher started");

        while let Some(job) = self.rx.recv().await {
            let reply = self.router.handle(job.command).await;
            if job.reply.send(reply).is_err() {
                tracing::debug!("Caller went away before {:?} completed", job.command);
            }
        }

        tracing::info!("Command dispatcher stopped");
    }
}

impl QueueHandle {
    /// Queue a command and wait for its reply; a full queue answers `Busy` at once
    pub async fn submit(&self, command: Command) -> CommandReply {
        let (reply, rx) = oneshot::channel();

        if let Err(e) = self.tx.try_send(Job { command, reply }) {
            tracing::warn!("Command queue rejected {:?}: {}", command, e);
            return CommandReply::Busy;
        }

        rx.await.unwrap_or(CommandReply::Busy)
    }
}
