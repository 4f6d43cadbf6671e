//! Abstract remote-storage capability.
//!
//! The backup engine only needs five operations; how they reach the remote
//! (an external sync tool, an object-store API, or a local directory) is a
//! backend concern behind the [`Storage`] trait.

pub mod local;
pub mod rclone;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::utils::errors::Result;

pub use local::LocalStorage;
pub use rclone::RcloneStorage;

/// A remote file or directory as reported by [`Storage::list`].
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// Remote storage operations used by the backup engine.
///
/// `upload` must be all-or-nothing from the caller's perspective: a failed
/// upload must not leave a partial file behind under the remote name.
#[async_trait]
pub trait Storage: Send + Sync {
    /// List the entries directly under a remote path.
    async fn list(&self, remote_path: &str) -> Result<Vec<RemoteEntry>>;

    /// Upload a local file to the given remote path.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Download a remote file to the given local path.
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Whether a remote file exists.
    async fn exists(&self, remote_path: &str) -> Result<bool>;

    /// Read a small remote file (metadata, checksum records) into memory.
    async fn read_small_file(&self, remote_path: &str) -> Result<Vec<u8>>;
}

/// Join a remote base path and a file name with a single `/`.
pub fn remote_join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}
