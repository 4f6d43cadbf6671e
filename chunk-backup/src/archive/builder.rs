//! Archive builder — materializes one group into a checksummed tar.gz.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::archive::groups::ArchiveGroup;
use crate::utils::errors::{BackupError, Result};

/// A file written to the scratch directory, unlinked when dropped.
///
/// Group processing creates the archive and its checksum record as scratch
/// artifacts, so they are cleaned up on success, skip and error paths alike.
#[derive(Debug)]
pub struct ScratchArtifact {
    path: PathBuf,
}

impl ScratchArtifact {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchArtifact {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Builds archive artifacts for groups of shards.
pub struct ArchiveBuilder {
    chunk_path: PathBuf,
    scratch_dir: PathBuf,
}

impl ArchiveBuilder {
    pub fn new(chunk_path: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunk_path: chunk_path.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Write `<archive_id>.tar.gz` for the group into the scratch directory.
    ///
    /// Members are appended in their sorted order and each subtree is walked
    /// in sorted order, so identical content always produces identical
    /// archive bytes. A member that disappeared between listing and archiving
    /// is skipped, not an error.
    pub fn build(&self, group: &ArchiveGroup) -> Result<ScratchArtifact> {
        fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            BackupError::ArchiveWrite(format!(
                "failed to create scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            ))
        })?;

        let artifact = ScratchArtifact::new(self.scratch_dir.join(group.archive_name()));
        let file = File::create(artifact.path()).map_err(|e| {
            BackupError::ArchiveWrite(format!(
                "failed to create {}: {}",
                artifact.path().display(),
                e
            ))
        })?;

        let gz = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(gz);

        for member in &group.members {
            let member_path = self.chunk_path.join(member);
            if !member_path.is_dir() {
                // Raced away between listing and archiving
                debug!("shard {} no longer present, skipping", member);
                continue;
            }
            self.append_member(&mut tar, member, &member_path)?;
        }

        let gz = tar
            .into_inner()
            .map_err(|e| BackupError::ArchiveWrite(format!("failed to finish archive: {}", e)))?;
        gz.finish()
            .map_err(|e| BackupError::ArchiveWrite(format!("failed to finish archive: {}", e)))?;

        Ok(artifact)
    }

    /// Append one shard subtree under its shard-relative name.
    fn append_member(
        &self,
        tar: &mut tar::Builder<GzEncoder<File>>,
        member: &str,
        member_path: &Path,
    ) -> Result<()> {
        for entry in WalkDir::new(member_path).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                BackupError::ArchiveWrite(format!("failed to read shard {}: {}", member, e))
            })?;
            let name = entry
                .path()
                .strip_prefix(&self.chunk_path)
                .unwrap_or(entry.path());

            let file_type = entry.file_type();
            let result = if file_type.is_dir() {
                tar.append_dir(name, entry.path())
            } else if file_type.is_file() {
                tar.append_path_with_name(entry.path(), name)
            } else {
                // Symlinks and special files do not occur in a chunk store
                debug!("skipping special entry {}", entry.path().display());
                continue;
            };

            result.map_err(|e| {
                BackupError::ArchiveWrite(format!(
                    "failed to add {} to archive: {}",
                    entry.path().display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// SHA-256 of the artifact bytes as a lowercase hex digest.
    pub fn checksum(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path).map_err(|e| {
            BackupError::Checksum(format!("failed to open {}: {}", path.display(), e))
        })?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher).map_err(|e| {
            BackupError::Checksum(format!("failed to hash {}: {}", path.display(), e))
        })?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Write the companion checksum record (`<hex>  <archive-name>`) next to
    /// the artifact.
    pub fn write_checksum_file(
        &self,
        archive_path: &Path,
        checksum: &str,
    ) -> Result<ScratchArtifact> {
        let record_path = PathBuf::from(format!("{}.sha256", archive_path.display()));
        let archive_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let record = ScratchArtifact::new(record_path);
        fs::write(record.path(), format!("{}  {}\n", checksum, archive_name)).map_err(|e| {
            BackupError::Checksum(format!(
                "failed to write checksum record {}: {}",
                record.path().display(),
                e
            ))
        })?;

        Ok(record)
    }
}

/// Extract the hex digest from a `<hex>  <name>` checksum record.
pub fn parse_checksum_record(content: &[u8]) -> Option<String> {
    String::from_utf8_lossy(content)
        .split_whitespace()
        .next()
        .map(|s| s.to_string())
}
