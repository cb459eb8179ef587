//! Closest-row-at-or-before protocol (§4.4), shared by store files and the
//! memcache. Locates the row with the largest key <= a target that has no
//! overriding tombstone across all tiers.
//!
//! The spec describes a seek-based optimisation (position each tier at
//! `candidates.firstKey().row` rather than the tier's own start) that saves
//! work on a huge on-disk tier; since store files here are loaded fully into
//! memory (see `store_file.rs`), this implementation scans each tier's
//! in-memory entries directly and gets the same result without the seek —
//! a deliberate simplification of an access-pattern optimisation, not of the
//! occlusion semantics.

use std::collections::BTreeMap;

use crate::key::{Column, Edit, RowKey, Value};

/// Run the protocol over `tiers` (oldest to newest; callers pass store
/// files oldest-first, then the memcache last, per §4.4) and return the
/// largest candidate row at or before `target_row`, if any.
pub fn closest_row_before<'a>(tiers: impl Iterator<Item = &'a [Edit]>, target_row: &[u8]) -> Option<RowKey> {
    let mut candidates: BTreeMap<(RowKey, Column), u64> = BTreeMap::new();

    for tier in tiers {
        for edit in tier {
            if edit.key.row.as_slice() > target_row {
                break;
            }
            let cand_key = (edit.key.row.clone(), edit.key.column.clone());
            match &edit.value {
                Value::Delete => {
                    if let Some(&best_ts) = candidates.get(&cand_key) {
                        if best_ts <= edit.key.timestamp {
                            candidates.remove(&cand_key);
                        }
                    }
                }
                Value::Put(_) => {
                    let entry = candidates.entry(cand_key).or_insert(0);
                    *entry = (*entry).max(edit.key.timestamp);
                }
            }
        }
    }

    candidates.keys().map(|(row, _)| row.clone()).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn put(row: &[u8], col: &[u8], ts: u64) -> Edit {
        Edit {
            key: Key::new(row.to_vec(), col.to_vec(), ts),
            value: Value::Put(b"v".to_vec()),
        }
    }

    fn del(row: &[u8], col: &[u8], ts: u64) -> Edit {
        Edit {
            key: Key::new(row.to_vec(), col.to_vec(), ts),
            value: Value::Delete,
        }
    }

    #[test]
    fn finds_largest_row_at_or_before_target() {
        let tier: Vec<Edit> = vec![put(b"a", b"cf:x", 10), put(b"m", b"cf:x", 10), put(b"z", b"cf:x", 10)];
        let result = closest_row_before(std::iter::once(tier.as_slice()), b"n");
        assert_eq!(result, Some(b"m".to_vec()));
    }

    #[test]
    fn tombstone_in_later_tier_occludes_earlier_candidate() {
        let older: Vec<Edit> = vec![put(b"m", b"cf:x", 10)];
        let newer: Vec<Edit> = vec![del(b"m", b"cf:x", 20)];
        let result = closest_row_before([older.as_slice(), newer.as_slice()].into_iter(), b"z");
        assert_eq!(result, None);
    }

    #[test]
    fn no_candidate_beyond_target_row() {
        let tier: Vec<Edit> = vec![put(b"z", b"cf:x", 10)];
        let result = closest_row_before(std::iter::once(tier.as_slice()), b"a");
        assert_eq!(result, None);
    }
}
