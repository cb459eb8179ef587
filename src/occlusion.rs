//! Shared tombstone-occlusion rules (§4.2, §4.5) used identically by the
//! memcache and by the store when it walks store files newest-to-oldest.
//! Keeping this in one place is what keeps point reads and `get_full`
//! consistent across tiers.

use std::collections::BTreeMap;

use crate::key::{Column, Edit, Key, Value};

/// Apply one ascending-ordered tier's entries to a running `get_full`
/// accumulation: for every column at `key.row` with timestamp <=
/// `key.timestamp`, record the newest non-tombstone value per column into
/// `results` (first writer across tiers wins — callers pass tiers newest
/// first); a tombstone raises `deletes[column]` to the max tombstoned
/// timestamp seen.
pub fn apply_get_full(
    entries: &[Edit],
    key: &Key,
    deletes: &mut BTreeMap<Column, u64>,
    results: &mut BTreeMap<Column, Vec<u8>>,
) {
    let floor = Key::new(key.row.clone(), Vec::new(), u64::MAX);
    let start = entries.partition_point(|e| e.key < floor);
    for edit in &entries[start..] {
        if edit.key.row != key.row {
            break;
        }
        if edit.key.timestamp > key.timestamp {
            continue;
        }
        match &edit.value {
            Value::Delete => {
                let entry = deletes.entry(edit.key.column.clone()).or_insert(0);
                *entry = (*entry).max(edit.key.timestamp);
            }
            Value::Put(data) => {
                let occluded = deletes.get(&edit.key.column).is_some_and(|&ts| ts >= edit.key.timestamp);
                if !occluded && !results.contains_key(&edit.key.column) {
                    results.insert(edit.key.column.clone(), data.clone());
                }
            }
        }
    }
}

/// Apply one ascending-ordered tier's entries to a running point-read
/// accumulation for a single (row, column): collects up to `num_versions`
/// newest non-tombstone values, tracking the newest tombstone timestamp
/// seen so far in `occluded_at` so later (older) tiers honour it.
pub fn collect_versions(
    entries: &[Edit],
    key: &Key,
    num_versions: usize,
    result: &mut Vec<(Key, Vec<u8>)>,
    occluded_at: &mut Option<u64>,
) {
    let start = entries.partition_point(|e| e.key < *key);
    for edit in &entries[start..] {
        if !edit.key.row_column_equal(key) {
            break;
        }
        match &edit.value {
            Value::Delete => {
                *occluded_at = Some(occluded_at.unwrap_or(0).max(edit.key.timestamp));
            }
            Value::Put(data) => {
                if occluded_at.is_none_or(|ts| edit.key.timestamp > ts) {
                    result.push((edit.key.clone(), data.clone()));
                    if result.len() >= num_versions {
                        return;
                    }
                }
            }
        }
    }
}
