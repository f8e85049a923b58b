//! Error types for account-check.

use std::time::Duration;

/// Errors that end the process.
///
/// Ingest, reference and export failures never get here: they are answered
/// or degraded per request by the checker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to download attachment on channel {name}: {reason}")]
    DownloadFailed { name: String, reason: String },
}

/// Why a submitted payload produced no identifiers to check.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no valid identifiers found")]
    EmptyInput,

    #[error("unsupported file type: {file_name}")]
    UnsupportedFormat { file_name: String },

    #[error("could not read {file_name}: {reason}")]
    Decode { file_name: String, reason: String },
}

/// Failures while loading the reference column.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("Reference request to {source_name} failed: {reason}")]
    Request { source_name: String, reason: String },

    #[error("Reference source {source_name} returned HTTP {status}: {body}")]
    Status {
        source_name: String,
        status: u16,
        body: String,
    },

    #[error("Invalid reference data from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Reference fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Failures while rendering an export workbook.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to render {file_name}: {reason}")]
    Render { file_name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for account-check.
pub type Result<T> = std::result::Result<T, Error>;
