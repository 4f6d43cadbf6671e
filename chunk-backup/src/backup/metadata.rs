//! Persisted backup metadata, exchanged between successive runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fs::snapshot::Snapshot;
use crate::utils::errors::{BackupError, Result};

/// Well-known name of the metadata document on the remote.
pub const METADATA_FILE_NAME: &str = "backup-metadata.json";

/// Current metadata schema version. A reader encountering any other value
/// must fail rather than guess.
pub const SCHEMA_VERSION: u32 = 1;

/// Durable state of the most recent backup run: the snapshot baseline for
/// the next diff, the grouping granularity it was taken with, and the
/// checksum of the last successfully uploaded archive per group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub schema_version: u32,

    /// Grouping granularity fixed at the first full backup; incremental
    /// runs must reuse it, otherwise group identities stop corresponding.
    pub prefix_digits: u8,

    /// When the run that produced this document started
    pub captured_at: DateTime<Utc>,

    pub snapshot: Snapshot,

    /// archive_id -> hex SHA-256 of the last successfully uploaded archive.
    /// A group that failed this run keeps its previous entry (or none).
    pub checksums: BTreeMap<String, String>,
}

impl Metadata {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let metadata: Metadata = serde_json::from_slice(bytes)?;
        if metadata.schema_version != SCHEMA_VERSION {
            return Err(BackupError::UnsupportedSchemaVersion(metadata.schema_version));
        }
        Ok(metadata)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
