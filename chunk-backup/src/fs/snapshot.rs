//! Structural snapshot of the chunk namespace.
//!
//! A snapshot records size, modification time and entry type for every file
//! and directory below each shard, allowing incremental runs to diff against
//! it and rebuild only the archive groups that changed. It deliberately does
//! not hash file contents: a content change that preserves both size and
//! mtime is invisible to the differ (same heuristic as rsync's default).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shard directory names are exactly four hex digits (0000-ffff).
pub const SHARD_NAME_LEN: usize = 4;

/// Returns true if `name` has the 4-hex-digit shard shape (case-insensitive).
pub fn is_shard_name(name: &str) -> bool {
    name.len() == SHARD_NAME_LEN && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Metadata for a single entry below a shard directory.
///
/// For directories, `size` is the sum of all descendant file sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub size: u64,
    pub mtime: i64,
    pub is_dir: bool,
}

/// One shard's subtree, flattened into a map keyed by `/`-separated paths
/// relative to the shard directory.
///
/// Two shard trees are structurally equal iff `==` holds: the key set
/// enumerates the child names at every level, so plain map equality is
/// equivalent to a recursive, order-independent node comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTree {
    /// Total size of all files in the shard
    pub size: u64,

    /// Modification time of the shard directory itself (Unix seconds)
    pub mtime: i64,

    /// Relative path -> entry metadata, for every descendant
    pub entries: BTreeMap<String, EntryMeta>,
}

/// Immutable structural snapshot of the whole namespace, one entry per
/// accepted top-level shard directory. Built once per backup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub shards: BTreeMap<String, ShardTree>,
}

impl Snapshot {
    /// Sorted names of all shards present in the snapshot.
    pub fn shard_names(&self) -> Vec<String> {
        self.shards.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_name_shape() {
        assert!(is_shard_name("0000"));
        assert!(is_shard_name("00ff"));
        assert!(is_shard_name("ABCD"));
        assert!(is_shard_name("aB3f"));

        assert!(!is_shard_name("000"));
        assert!(!is_shard_name("00000"));
        assert!(!is_shard_name("00fg"));
        assert!(!is_shard_name(".tmp"));
        assert!(!is_shard_name(""));
    }

    #[test]
    fn test_tree_equality_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert(
            "x".to_string(),
            EntryMeta {
                size: 1,
                mtime: 10,
                is_dir: false,
            },
        );
        a.insert(
            "y".to_string(),
            EntryMeta {
                size: 2,
                mtime: 20,
                is_dir: false,
            },
        );

        let mut b = BTreeMap::new();
        b.insert(
            "y".to_string(),
            EntryMeta {
                size: 2,
                mtime: 20,
                is_dir: false,
            },
        );
        b.insert(
            "x".to_string(),
            EntryMeta {
                size: 1,
                mtime: 10,
                is_dir: false,
            },
        );

        let left = ShardTree {
            size: 3,
            mtime: 0,
            entries: a,
        };
        let right = ShardTree {
            size: 3,
            mtime: 0,
            entries: b,
        };
        assert_eq!(left, right);
    }
}
