//! Drives one channel: commands are answered inline, submissions are
//! checked on their own task.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinSet;

use crate::channels::{Channel, IncomingMessage, OutgoingResponse, StatusUpdate};
use crate::checker::Checker;
use crate::error::Error;

pub const USAGE: &str = "👋 Send the accounts to check and I will compare them with the received list.

Accepted input:
• a text message, one account per line or separated by commas
• a .txt or .csv file
• an .xlsx, .xls or .ods spreadsheet (first column of the first sheet, below the header row)
• a .docx document

You get a summary, the already received accounts, and a spreadsheet of the accounts not yet received.";

pub struct Dispatcher {
    channel: Arc<dyn Channel>,
    checker: Arc<Checker>,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn Channel>, checker: Arc<Checker>) -> Self {
        Self { channel, checker }
    }

    /// Consume the channel's messages until the stream ends or Ctrl+C.
    ///
    /// In-flight checks are awaited before the channel is shut down.
    pub async fn run(self) -> Result<(), Error> {
        let mut messages = self.channel.start().await?;
        let mut tasks = JoinSet::new();

        tracing::info!(channel = self.channel.name(), "Ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = messages.next() => match msg {
                    Some(m) => m,
                    None => {
                        tracing::info!("Channel stream ended, shutting down...");
                        break;
                    }
                },
                // Reap finished tasks so the set does not grow unbounded.
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(joined);
                    continue;
                }
            };

            if let Some(command) = message.command() {
                tracing::debug!(user = %message.user_id, command, "Command received");
                send(self.channel.as_ref(), &message, OutgoingResponse::text(USAGE)).await;
                continue;
            }

            let channel = Arc::clone(&self.channel);
            let checker = Arc::clone(&self.checker);
            tasks.spawn(async move { handle_submission(channel.as_ref(), &checker, message).await });
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        self.channel.shutdown().await?;
        Ok(())
    }
}

async fn handle_submission(channel: &dyn Channel, checker: &Checker, message: IncomingMessage) {
    tracing::info!(
        channel = %message.channel,
        user = %message.user_id,
        user_name = message.user_name.as_deref().unwrap_or("-"),
        has_file = message.attachment.is_some(),
        "Submission received"
    );

    if let Err(e) = channel.send_status(StatusUpdate::Working, &message.metadata).await {
        tracing::debug!(error = %e, "Status update failed");
    }

    let responses = checker.check(message.payload()).await;

    let mut uploading = false;
    for response in responses {
        if response.document.is_some() && !uploading {
            uploading = true;
            if let Err(e) = channel
                .send_status(StatusUpdate::UploadingDocument, &message.metadata)
                .await
            {
                tracing::debug!(error = %e, "Status update failed");
            }
        }
        send(channel, &message, response).await;
    }
}

async fn send(channel: &dyn Channel, message: &IncomingMessage, response: OutgoingResponse) {
    if let Err(e) = channel.respond(message, response).await {
        tracing::error!(channel = channel.name(), user = %message.user_id, error = %e, "Failed to send reply");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Submission task panicked");
    }
}
