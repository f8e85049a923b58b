//! Telegram channel: long-polls the Bot API for updates.
//!
//! Text messages become text submissions; documents are resolved with
//! `getFile`, downloaded, and attached to the message. Replies go out as plain
//! text (`sendMessage`) and in-memory uploads (`sendDocument`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

use crate::channels::{
    Attachment, Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate,
};
use crate::error::ChannelError;
use crate::ingest::{FileUpload, MAX_FILE_BYTES};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Pause before polling again after a failed `getUpdates`.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram channel connected to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Send a plain-text message, split to fit Telegram's 4096 char limit.
    ///
    /// Account names routinely contain underscores, so no parse mode is set.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });

            let resp = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&body)
                .send()
                .await
                .map_err(|e| send_failed(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let err = resp.text().await.unwrap_or_default();
                return Err(send_failed(format!("sendMessage returned {status}: {err}")));
            }
        }
        Ok(())
    }

    /// Send a document from bytes (in-memory).
    pub async fn send_document_bytes(
        &self,
        chat_id: &str,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("sendDocument failed: {err}")));
        }

        tracing::info!("Telegram document sent to {chat_id}: {file_name}");
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: &str, action: &str) {
        let _ = self
            .client
            .post(self.api_url("sendChatAction"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "action": action
            }))
            .send()
            .await;
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message"]
                });

                let resp = match client
                    .post(api_url(&bot_token, "getUpdates"))
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let status = resp.status();
                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(%status, "Telegram parse error: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let results = match poll_updates(status, &data) {
                    Ok(results) => results,
                    Err(rejected) => {
                        tracing::warn!(
                            %status,
                            retry_after_secs = rejected.backoff.as_secs(),
                            "Telegram getUpdates rejected: {}",
                            rejected.description
                        );
                        tokio::time::sleep(rejected.backoff).await;
                        continue;
                    }
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(message) = update.get("message") else {
                        continue;
                    };

                    let Some(mut incoming) = parse_message(message) else {
                        continue;
                    };

                    // Check allowlist against both username and numeric ID
                    let username = incoming.metadata["username"].as_str().unwrap_or("unknown");
                    if !check_user_allowed(&allowed_users, [username, incoming.user_id.as_str()]) {
                        tracing::warn!(
                            "Telegram: ignoring message from unauthorized user: \
                             username={username}, user_id={}",
                            incoming.user_id
                        );
                        continue;
                    }

                    if let Some(document) = message.get("document") {
                        let attachment = download_document(&client, &bot_token, document).await;
                        if let Attachment::Failed { file_name, reason } = &attachment {
                            tracing::warn!(file_name = %file_name, "Telegram download failed: {reason}");
                        }
                        incoming = incoming.with_attachment(attachment);
                    }

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = chat_id(&msg.metadata).ok_or_else(|| send_failed("No chat_id in message metadata"))?;

        match response.document {
            Some(doc) => {
                let caption = (!response.content.is_empty()).then_some(response.content.as_str());
                self.send_document_bytes(chat_id, doc.bytes, &doc.file_name, caption)
                    .await
            }
            None => self.send_message(chat_id, &response.content).await,
        }
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        metadata: &Value,
    ) -> Result<(), ChannelError> {
        if let Some(chat_id) = chat_id(metadata) {
            match status {
                StatusUpdate::Working => self.send_chat_action(chat_id, "typing").await,
                StatusUpdate::UploadingDocument => {
                    self.send_chat_action(chat_id, "upload_document").await
                }
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(bot_token: &str, method: &str) -> String {
    format!("{TELEGRAM_API_BASE}/bot{bot_token}/{method}")
}

fn file_url(bot_token: &str, file_path: &str) -> String {
    format!("{TELEGRAM_API_BASE}/file/bot{bot_token}/{file_path}")
}

fn send_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason: reason.into(),
    }
}

/// A `getUpdates` reply that carried no updates to process.
#[derive(Debug)]
struct PollRejected {
    description: String,
    backoff: Duration,
}

/// The update list of a `getUpdates` reply.
///
/// Non-2xx statuses, `"ok": false` and bodies without a `result` array are
/// rejected; the backoff honors `parameters.retry_after` when it is longer.
fn poll_updates(status: reqwest::StatusCode, data: &Value) -> Result<&[Value], PollRejected> {
    let ok = data.get("ok").and_then(Value::as_bool).unwrap_or(false);
    match data.get("result").and_then(Value::as_array) {
        Some(results) if ok && status.is_success() => Ok(results),
        _ => {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no result in response")
                .to_string();
            let retry_after = data
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(Value::as_u64)
                .map(Duration::from_secs)
                .unwrap_or_default();
            Err(PollRejected {
                description,
                backoff: retry_after.max(POLL_BACKOFF),
            })
        }
    }
}

fn download_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::DownloadFailed {
        name: "telegram".into(),
        reason: reason.into(),
    }
}

fn chat_id(metadata: &Value) -> Option<&str> {
    metadata.get("chat_id").and_then(Value::as_str)
}

/// Build an `IncomingMessage` from a Bot API `message` object.
///
/// Returns `None` for messages carrying neither text nor a document
/// (stickers, photos, service messages).
fn parse_message(message: &Value) -> Option<IncomingMessage> {
    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if text.is_empty() && message.get("document").is_none() {
        return None;
    }

    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_else(|| username.to_string());

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();

    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(Value::as_str);

    Some(
        IncomingMessage::new("telegram", user_id, text)
            .with_metadata(serde_json::json!({
                "chat_id": chat_id,
                "username": username,
            }))
            .with_user_name(first_name.unwrap_or(username)),
    )
}

/// Resolve and download a `document` object; failures are carried in the
/// returned attachment so the sender still gets an answer.
async fn download_document(client: &reqwest::Client, bot_token: &str, document: &Value) -> Attachment {
    let file_name = document
        .get("file_name")
        .and_then(Value::as_str)
        .unwrap_or("upload")
        .to_string();
    let mime_type = document
        .get("mime_type")
        .and_then(Value::as_str)
        .map(String::from);

    match fetch_document_bytes(client, bot_token, document).await {
        Ok(bytes) => Attachment::File(FileUpload {
            file_name,
            mime_type,
            bytes,
        }),
        Err(ChannelError::DownloadFailed { reason, .. }) => Attachment::Failed { file_name, reason },
        Err(e) => Attachment::Failed {
            file_name,
            reason: e.to_string(),
        },
    }
}

async fn fetch_document_bytes(
    client: &reqwest::Client,
    bot_token: &str,
    document: &Value,
) -> Result<Vec<u8>, ChannelError> {
    if let Some(size) = document.get("file_size").and_then(Value::as_u64) {
        if size > MAX_FILE_BYTES {
            return Err(download_failed(format!(
                "file is {} MB; the limit is {} MB",
                size / (1024 * 1024),
                MAX_FILE_BYTES / (1024 * 1024)
            )));
        }
    }

    let file_id = document
        .get("file_id")
        .and_then(Value::as_str)
        .ok_or_else(|| download_failed("document has no file_id"))?;

    let data: Value = client
        .post(api_url(bot_token, "getFile"))
        .json(&serde_json::json!({ "file_id": file_id }))
        .send()
        .await
        .map_err(|e| download_failed(format!("getFile failed: {e}")))?
        .json()
        .await
        .map_err(|e| download_failed(format!("getFile returned invalid JSON: {e}")))?;

    let file_path = data
        .get("result")
        .and_then(|r| r.get("file_path"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no file_path in response");
            download_failed(format!("getFile failed: {description}"))
        })?;

    let resp = client
        .get(file_url(bot_token, file_path))
        .send()
        .await
        .map_err(|e| download_failed(format!("download failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(download_failed(format!("download returned {}", resp.status())));
    }

    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| download_failed(format!("download interrupted: {e}")))
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Never cut inside a multi-byte character.
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
