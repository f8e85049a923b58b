//! CLI channel: stdin/stdout REPL for local checks.
//!
//! A plain line is a text submission; `/file <path>` submits a local file.
//! Exported documents are written to the export directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{
    Attachment, Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate,
};
use crate::error::ChannelError;
use crate::export::{RenderedExport, write_to_dir};
use crate::ingest::{FileUpload, MAX_FILE_BYTES};

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    export_dir: PathBuf,
}

impl CliChannel {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let msg = match line.strip_prefix("/file ") {
                            Some(path) => file_message(Path::new(path.trim())).await,
                            None => IncomingMessage::new("cli", "local-user", line),
                        };
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        match response.document {
            Some(doc) => {
                let export = RenderedExport {
                    file_name: doc.file_name,
                    caption: response.content,
                    bytes: doc.bytes,
                };
                let path = write_to_dir(&export, &self.export_dir).await.map_err(|e| {
                    ChannelError::SendFailed {
                        name: "cli".into(),
                        reason: e.to_string(),
                    }
                })?;
                println!("{} → {}", export.caption, path.display());
            }
            None => println!("\n{}\n", response.content),
        }
        eprint!("> ");
        Ok(())
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        match status {
            StatusUpdate::Working => eprintln!("⏳ Checking..."),
            StatusUpdate::UploadingDocument => {}
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Read a local file into an attachment message.
async fn file_message(path: &Path) -> IncomingMessage {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let attachment = match read_upload(path).await {
        Ok(bytes) => Attachment::File(FileUpload {
            file_name,
            mime_type: None,
            bytes,
        }),
        Err(reason) => Attachment::Failed { file_name, reason },
    };

    IncomingMessage::new("cli", "local-user", "").with_attachment(attachment)
}

async fn read_upload(path: &Path) -> Result<Vec<u8>, String> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| e.to_string())?;
    if meta.len() > MAX_FILE_BYTES {
        return Err(format!("file is larger than {} bytes", MAX_FILE_BYTES));
    }
    tokio::fs::read(path).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_message_reads_local_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("accounts.txt");
        std::fs::write(&path, "alice\nbob").unwrap();

        let msg = file_message(&path).await;
        match msg.attachment {
            Some(Attachment::File(file)) => {
                assert_eq!(file.file_name, "accounts.txt");
                assert_eq!(file.bytes, b"alice\nbob");
            }
            other => panic!("expected file attachment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_message_missing_file_is_failed_attachment() {
        let msg = file_message(Path::new("/nonexistent/path/accounts.xlsx")).await;
        match msg.attachment {
            Some(Attachment::Failed { file_name, reason }) => {
                assert_eq!(file_name, "accounts.xlsx");
                assert!(!reason.is_empty());
            }
            other => panic!("expected failed attachment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn respond_writes_documents_to_export_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ch = CliChannel::new(tmp.path());
        let msg = IncomingMessage::new("cli", "local-user", "a");

        ch.respond(
            &msg,
            OutgoingResponse::document("caption", "out.xlsx", b"PK-bytes".to_vec()),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(tmp.path().join("out.xlsx")).unwrap(), b"PK-bytes");
    }
}
