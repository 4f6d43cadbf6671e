//! Namespace scanner — builds a [`Snapshot`] of the chunk directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::fs::snapshot::{is_shard_name, EntryMeta, ShardTree, Snapshot};
use crate::utils::errors::{BackupError, Result};

/// Scans the chunk namespace root.
///
/// Only top-level directories whose name matches the 4-hex-digit shard shape
/// are accepted; everything else directly under the root is ignored. A scan
/// either covers every accepted shard completely or fails — partial
/// snapshots are never returned.
pub struct ChunkScanner {
    chunk_path: PathBuf,
}

impl ChunkScanner {
    pub fn new(chunk_path: impl Into<PathBuf>) -> Self {
        Self {
            chunk_path: chunk_path.into(),
        }
    }

    /// Build a structural snapshot of every shard under the namespace root.
    pub fn scan(&self) -> Result<Snapshot> {
        let dir = fs::read_dir(&self.chunk_path).map_err(|e| {
            BackupError::NamespaceUnavailable(format!("{}: {}", self.chunk_path.display(), e))
        })?;

        let mut shards = BTreeMap::new();
        for entry in dir {
            let entry = entry.map_err(|e| {
                BackupError::NamespaceUnavailable(format!("{}: {}", self.chunk_path.display(), e))
            })?;

            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().map_err(|e| BackupError::ScanFailure {
                path: entry.path(),
                source: e,
            })?;

            if !file_type.is_dir() || !is_shard_name(&name) {
                continue;
            }

            let tree = self.scan_shard(&entry.path())?;
            shards.insert(name, tree);
        }

        Ok(Snapshot { shards })
    }

    /// Sorted list of accepted shard directory names under the root.
    pub fn shard_names(&self) -> Result<Vec<String>> {
        let dir = fs::read_dir(&self.chunk_path).map_err(|e| {
            BackupError::NamespaceUnavailable(format!("{}: {}", self.chunk_path.display(), e))
        })?;

        let mut names = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| {
                BackupError::NamespaceUnavailable(format!("{}: {}", self.chunk_path.display(), e))
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) && is_shard_name(&name) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Walk one shard subtree depth-first and flatten it into a [`ShardTree`].
    fn scan_shard(&self, shard_path: &Path) -> Result<ShardTree> {
        let shard_meta = fs::metadata(shard_path).map_err(|e| BackupError::ScanFailure {
            path: shard_path.to_path_buf(),
            source: e,
        })?;

        let mut entries: BTreeMap<String, EntryMeta> = BTreeMap::new();
        for entry in WalkDir::new(shard_path).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| shard_path.to_path_buf());
                BackupError::ScanFailure {
                    path,
                    source: e.into(),
                }
            })?;

            let md = entry.metadata().map_err(|e| BackupError::ScanFailure {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?;

            let is_dir = md.is_dir();
            entries.insert(
                relative_key(entry.path(), shard_path),
                EntryMeta {
                    // Directory sizes are aggregated below
                    size: if is_dir { 0 } else { md.len() },
                    mtime: mtime_secs(&md),
                    is_dir,
                },
            );
        }

        // Aggregate file sizes into every ancestor directory
        let files: Vec<(String, u64)> = entries
            .iter()
            .filter(|(_, m)| !m.is_dir)
            .map(|(p, m)| (p.clone(), m.size))
            .collect();

        let mut total = 0u64;
        for (path, size) in files {
            total += size;
            let mut prefix = path.as_str();
            while let Some(idx) = prefix.rfind('/') {
                prefix = &prefix[..idx];
                if let Some(parent) = entries.get_mut(prefix) {
                    parent.size += size;
                }
            }
        }

        Ok(ShardTree {
            size: total,
            mtime: mtime_secs(&shard_meta),
            entries,
        })
    }
}

/// Relative path below the shard directory, `/`-separated on all platforms.
fn relative_key(path: &Path, base: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Modification time as Unix seconds; pre-epoch or unavailable becomes 0.
fn mtime_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_root_is_namespace_unavailable() {
        let dir = TempDir::new().unwrap();
        let scanner = ChunkScanner::new(dir.path().join("missing"));
        assert!(matches!(
            scanner.scan(),
            Err(BackupError::NamespaceUnavailable(_))
        ));
        assert!(matches!(
            scanner.shard_names(),
            Err(BackupError::NamespaceUnavailable(_))
        ));
    }

    #[test]
    fn test_scan_accepts_only_shard_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("0000")).unwrap();
        fs::create_dir(dir.path().join("ABCD")).unwrap();
        fs::create_dir(dir.path().join("lost+found")).unwrap();
        fs::create_dir(dir.path().join("00fg")).unwrap();
        write_file(&dir.path().join("ffff"), b"a file, not a shard");

        let scanner = ChunkScanner::new(dir.path());
        let snapshot = scanner.scan().unwrap();
        assert_eq!(snapshot.shard_names(), vec!["0000", "ABCD"]);
        assert_eq!(scanner.shard_names().unwrap(), vec!["0000", "ABCD"]);
    }

    #[test]
    fn test_directory_sizes_aggregate_descendants() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("0000/a.bin"), b"123");
        write_file(&dir.path().join("0000/sub/b.bin"), b"45678");
        write_file(&dir.path().join("0000/sub/deep/c.bin"), b"9");

        let scanner = ChunkScanner::new(dir.path());
        let snapshot = scanner.scan().unwrap();
        let tree = &snapshot.shards["0000"];

        assert_eq!(tree.size, 9);
        assert_eq!(tree.entries["a.bin"].size, 3);
        assert_eq!(tree.entries["sub"].size, 6);
        assert!(tree.entries["sub"].is_dir);
        assert_eq!(tree.entries["sub/deep"].size, 1);
        assert_eq!(tree.entries["sub/deep/c.bin"].size, 1);
        assert!(tree.entries["a.bin"].mtime > 0);
    }

    #[test]
    fn test_empty_shard_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("00aa")).unwrap();

        let snapshot = ChunkScanner::new(dir.path()).scan().unwrap();
        let tree = &snapshot.shards["00aa"];
        assert_eq!(tree.size, 0);
        assert!(tree.entries.is_empty());
    }

    #[test]
    fn test_rescan_of_unchanged_tree_is_equal() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("0000/a.bin"), b"123");
        write_file(&dir.path().join("ff00/b.bin"), b"4567");

        let scanner = ChunkScanner::new(dir.path());
        let first = scanner.scan().unwrap();
        let second = scanner.scan().unwrap();
        assert_eq!(first, second);
    }
}
