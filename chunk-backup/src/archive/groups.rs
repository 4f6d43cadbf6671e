//! Prefix grouping — deterministic partitioning of shards into archives.
//!
//! Shards sharing the first `prefix_digits` hex characters are bundled into
//! one archive. For a fixed shard set and digit count the produced groups,
//! member order and archive ids are fully determined, which is what lets
//! incremental runs correlate groups across runs by archive id alone.

use std::collections::{BTreeMap, BTreeSet};

use crate::fs::snapshot::{is_shard_name, SHARD_NAME_LEN};
use crate::utils::errors::{BackupError, Result};

/// One partition of the namespace: all present shards whose name starts with
/// `prefix`, covering the inclusive name range `range_start..=range_end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveGroup {
    pub prefix: String,
    pub range_start: String,
    pub range_end: String,
    /// Deterministic identity, `<range_start>-<range_end>`
    pub archive_id: String,
    /// Member shards, lexicographically sorted
    pub members: Vec<String>,
    /// Whether this group needs a rebuild this run
    pub dirty: bool,
}

impl ArchiveGroup {
    /// Artifact file name, e.g. `0000-00ff.tar.gz`
    pub fn archive_name(&self) -> String {
        format!("{}.tar.gz", self.archive_id)
    }

    /// Companion checksum record name, e.g. `0000-00ff.tar.gz.sha256`
    pub fn checksum_name(&self) -> String {
        format!("{}.sha256", self.archive_name())
    }
}

/// Partition `names` into archive groups by their first `prefix_digits`
/// characters. Names not matching the shard shape are ignored. Groups come
/// out sorted by prefix with lexicographically sorted members.
pub fn build_groups(names: &[String], prefix_digits: u8) -> Result<Vec<ArchiveGroup>> {
    if !(1..=4).contains(&prefix_digits) {
        return Err(BackupError::InvalidPrefixDigits(prefix_digits));
    }
    let digits = prefix_digits as usize;

    let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in names {
        if !is_shard_name(name) {
            continue;
        }
        buckets
            .entry(name[..digits].to_string())
            .or_default()
            .push(name.clone());
    }

    let groups = buckets
        .into_iter()
        .map(|(prefix, mut members)| {
            members.sort();
            let range_start = pad_range(&prefix, '0');
            let range_end = pad_range(&prefix, 'f');
            let archive_id = format!("{}-{}", range_start, range_end);
            ArchiveGroup {
                prefix,
                range_start,
                range_end,
                archive_id,
                members,
                dirty: false,
            }
        })
        .collect();

    Ok(groups)
}

/// Flag every group containing at least one changed shard as dirty.
pub fn mark_dirty(groups: &mut [ArchiveGroup], changed: &BTreeSet<String>) {
    for group in groups {
        group.dirty = group.members.iter().any(|m| changed.contains(m));
    }
}

fn pad_range(prefix: &str, fill: char) -> String {
    let mut range = String::with_capacity(SHARD_NAME_LEN);
    range.push_str(prefix);
    while range.len() < SHARD_NAME_LEN {
        range.push(fill);
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_two_digit_grouping_scenario() {
        let shard_names = names(&["0000", "0001", "00ff", "0100", "01aa", "abcd", "ffff"]);
        let groups = build_groups(&shard_names, 2).unwrap();

        assert_eq!(groups.len(), 4);

        assert_eq!(groups[0].prefix, "00");
        assert_eq!(groups[0].archive_id, "0000-00ff");
        assert_eq!(groups[0].members, names(&["0000", "0001", "00ff"]));

        assert_eq!(groups[1].prefix, "01");
        assert_eq!(groups[1].archive_id, "0100-01ff");
        assert_eq!(groups[1].members, names(&["0100", "01aa"]));

        assert_eq!(groups[2].prefix, "ab");
        assert_eq!(groups[2].archive_id, "ab00-abff");
        assert_eq!(groups[2].members, names(&["abcd"]));

        assert_eq!(groups[3].prefix, "ff");
        assert_eq!(groups[3].archive_id, "ff00-ffff");
        assert_eq!(groups[3].members, names(&["ffff"]));

        assert_eq!(groups[0].archive_name(), "0000-00ff.tar.gz");
        assert_eq!(groups[0].checksum_name(), "0000-00ff.tar.gz.sha256");
    }

    #[test]
    fn test_every_shard_lands_in_exactly_one_group() {
        let shard_names = names(&[
            "0000", "0001", "00ff", "0100", "01aa", "7b2c", "7bff", "abcd", "fff0", "ffff",
        ]);

        for digits in 1..=4u8 {
            let groups = build_groups(&shard_names, digits).unwrap();
            let mut seen: Vec<&String> = Vec::new();
            for group in &groups {
                for member in &group.members {
                    assert_eq!(&member[..digits as usize], group.prefix.as_str());
                    seen.push(member);
                }
            }
            seen.sort();
            let mut expected: Vec<&String> = shard_names.iter().collect();
            expected.sort();
            assert_eq!(seen, expected, "prefix_digits={}", digits);
        }
    }

    #[test]
    fn test_grouping_is_deterministic() {
        let shard_names = names(&["ffff", "0000", "01aa", "00ff", "0100", "abcd", "0001"]);
        let first = build_groups(&shard_names, 2).unwrap();
        let second = build_groups(&shard_names, 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_four_digit_grouping_is_one_group_per_shard() {
        let shard_names = names(&["0000", "abcd"]);
        let groups = build_groups(&shard_names, 4).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].archive_id, "0000-0000");
        assert_eq!(groups[1].archive_id, "abcd-abcd");
    }

    #[test]
    fn test_invalid_prefix_digits_rejected() {
        let shard_names = names(&["0000"]);
        assert!(matches!(
            build_groups(&shard_names, 0),
            Err(BackupError::InvalidPrefixDigits(0))
        ));
        assert!(matches!(
            build_groups(&shard_names, 5),
            Err(BackupError::InvalidPrefixDigits(5))
        ));
    }

    #[test]
    fn test_malformed_names_ignored() {
        let shard_names = names(&["0000", "not-a-shard", "00"]);
        let groups = build_groups(&shard_names, 2).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, names(&["0000"]));
    }

    #[test]
    fn test_mark_dirty_flags_touched_groups_only() {
        let shard_names = names(&["0000", "0001", "0100", "ffff"]);
        let mut groups = build_groups(&shard_names, 2).unwrap();

        let changed = BTreeSet::from(["0001".to_string()]);
        mark_dirty(&mut groups, &changed);

        assert!(groups[0].dirty);
        assert!(!groups[1].dirty);
        assert!(!groups[2].dirty);
    }
}
