//! Custom error types for the backup tool.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chunk namespace unavailable: {0}")]
    NamespaceUnavailable(String),

    #[error("Failed to scan {path}: {source}")]
    ScanFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Prefix digits must be between 1 and 4, got {0}")]
    InvalidPrefixDigits(u8),

    #[error("No previous backup metadata found, run a full backup first")]
    NoPriorBackup,

    #[error("Unsupported metadata schema version: {0}")]
    UnsupportedSchemaVersion(u32),

    #[error("Failed to write archive: {0}")]
    ArchiveWrite(String),

    #[error("Checksum error: {0}")]
    Checksum(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to persist backup metadata: {0}")]
    MetadataPersist(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BackupError>;
