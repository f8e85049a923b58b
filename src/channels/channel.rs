//! Channel trait and the message types that cross it.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{ChannelError, IngestError};
use crate::ingest::{FileUpload, Payload};

/// Stream of inbound messages produced by `Channel::start`.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A message received from a channel.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Channel name ("telegram", "cli").
    pub channel: String,
    /// Channel-native sender id.
    pub user_id: String,
    pub user_name: Option<String>,
    /// Text body, or the caption of an attachment.
    pub content: String,
    pub attachment: Option<Attachment>,
    /// Channel-specific routing data (e.g. `chat_id`).
    pub metadata: serde_json::Value,
}

impl IncomingMessage {
    pub fn new(channel: impl Into<String>, user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            user_id: user_id.into(),
            user_name: None,
            content: content.into(),
            attachment: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Slash command name without arguments or `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        if self.attachment.is_some() {
            return None;
        }
        let first = self.content.trim_start().strip_prefix('/')?.split_whitespace().next()?;
        Some(first.split('@').next().unwrap_or(first))
    }

    /// The submission carried by this message.
    pub fn payload(&self) -> Result<Payload, IngestError> {
        match &self.attachment {
            Some(Attachment::File(file)) => Ok(Payload::File(file.clone())),
            Some(Attachment::Failed { file_name, reason }) => Err(IngestError::Decode {
                file_name: file_name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(Payload::Text(self.content.clone())),
        }
    }
}

/// A file sent along with a message.
#[derive(Debug, Clone)]
pub enum Attachment {
    File(FileUpload),
    /// The channel saw a file but could not fetch it.
    Failed { file_name: String, reason: String },
}

/// A document attached to an outgoing response.
#[derive(Debug, Clone)]
pub struct OutgoingDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A reply sent back on the channel a message came from.
#[derive(Debug, Clone)]
pub struct OutgoingResponse {
    /// Message text, or the document caption when `document` is set.
    pub content: String,
    pub document: Option<OutgoingDocument>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            document: None,
        }
    }

    pub fn document(caption: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content: caption.into(),
            document: Some(OutgoingDocument {
                file_name: file_name.into(),
                bytes,
            }),
        }
    }
}

/// Progress hints shown while a submission is being checked.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// Work is in progress.
    Working,
    /// Files are about to be sent.
    UploadingDocument,
}

/// A bidirectional message transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Start receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Reply to a previously received message.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    /// Show progress; channels may ignore statuses they cannot render.
    async fn send_status(
        &self,
        status: StatusUpdate,
        metadata: &serde_json::Value,
    ) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError>;
}
