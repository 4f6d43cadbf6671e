//! Local-filesystem storage backend.
//!
//! Resolves remote paths under a root directory. Used by the orchestrator
//! tests and usable as a real target (e.g. a mounted backup disk).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::storage::{RemoteEntry, Storage};
use crate::utils::errors::{BackupError, Result};

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, remote_path: &str) -> PathBuf {
        self.root.join(remote_path.trim_start_matches('/'))
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::Storage(format!("{}: {}", parent.display(), e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list(&self, remote_path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve(remote_path);
        let mut read_dir = fs::read_dir(&dir)
            .await
            .map_err(|e| BackupError::Storage(format!("{}: {}", dir.display(), e)))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| BackupError::Storage(format!("{}: {}", dir.display(), e)))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| BackupError::Storage(format!("{}: {}", dir.display(), e)))?;
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                is_dir: metadata.is_dir(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let target = self.resolve(remote_path);
        self.ensure_parent(&target).await?;

        // Copy to a staging name, then rename, so a failed upload never
        // leaves a partial file under the target name.
        let staging = PathBuf::from(format!("{}.partial", target.display()));
        if let Err(e) = fs::copy(local_path, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(BackupError::Upload(format!(
                "failed to upload {} to {}: {}",
                local_path.display(),
                target.display(),
                e
            )));
        }
        fs::rename(&staging, &target).await.map_err(|e| {
            BackupError::Upload(format!(
                "failed to upload {} to {}: {}",
                local_path.display(),
                target.display(),
                e
            ))
        })?;
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let source = self.resolve(remote_path);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::Storage(format!("{}: {}", parent.display(), e)))?;
        }
        fs::copy(&source, local_path)
            .await
            .map_err(|e| BackupError::Storage(format!("{}: {}", source.display(), e)))?;
        Ok(())
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        let path = self.resolve(remote_path);
        fs::try_exists(&path)
            .await
            .map_err(|e| BackupError::Storage(format!("{}: {}", path.display(), e)))
    }

    async fn read_small_file(&self, remote_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(remote_path);
        fs::read(&path)
            .await
            .map_err(|e| BackupError::Storage(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_then_read_back() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path());

        let local = work.path().join("artifact.tar.gz");
        std::fs::write(&local, b"archive bytes").unwrap();

        storage
            .upload(&local, "backup/artifact.tar.gz")
            .await
            .unwrap();

        assert!(storage.exists("backup/artifact.tar.gz").await.unwrap());
        assert!(!storage.exists("backup/missing").await.unwrap());
        assert_eq!(
            storage.read_small_file("backup/artifact.tar.gz").await.unwrap(),
            b"archive bytes"
        );
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_leaves_no_partial() {
        let root = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path());

        let err = storage
            .upload(Path::new("/nonexistent/file"), "backup/a")
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Upload(_)));
        assert!(!storage.exists("backup/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_download_round_trip() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path());

        let local = work.path().join("up.bin");
        std::fs::write(&local, b"payload").unwrap();
        storage.upload(&local, "dir/up.bin").await.unwrap();

        let fetched = work.path().join("sub/down.bin");
        storage.download("dir/up.bin", &fetched).await.unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_list_reports_names_and_sizes() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path());

        let local = work.path().join("a.bin");
        std::fs::write(&local, b"12345").unwrap();
        storage.upload(&local, "backup/b.bin").await.unwrap();
        storage.upload(&local, "backup/a.bin").await.unwrap();

        let entries = storage.list("backup").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.bin");
        assert_eq!(entries[1].name, "b.bin");
        assert_eq!(entries[0].size, 5);
        assert!(!entries[0].is_dir);
        assert!(entries[0].modified.is_some());
    }
}
