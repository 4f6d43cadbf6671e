//! Snapshot differ — which top-level shards changed between two runs.

use std::collections::BTreeSet;

use crate::fs::snapshot::Snapshot;

/// Returns the names of shards that differ between `previous` and `current`:
/// added, removed, or structurally changed (size, mtime, entry type, or the
/// entry set itself, anywhere in the subtree).
///
/// This is a metadata-only quick check; a content change that keeps both
/// size and mtime identical is not detected.
pub fn changed_shards(previous: &Snapshot, current: &Snapshot) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();

    for (name, tree) in &current.shards {
        match previous.shards.get(name) {
            None => {
                changed.insert(name.clone());
            }
            Some(old) if old != tree => {
                changed.insert(name.clone());
            }
            Some(_) => {}
        }
    }

    for name in previous.shards.keys() {
        if !current.shards.contains_key(name) {
            changed.insert(name.clone());
        }
    }

    changed
}
