//! In-memory mutable buffer (§4.2). A live sorted map plus an immutable
//! snapshot taken while a flush is in progress; `add` and `snapshot`
//! contend on an internal read/write lock the way the spec requires, with
//! scanner construction holding the read lock only long enough to clone the
//! snapshot.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::key::{Edit, Key, Value};

#[derive(Default)]
struct Inner {
    live: BTreeMap<Key, Value>,
    snapshot: BTreeMap<Key, Value>,
}

pub struct MemCache {
    inner: RwLock<Inner>,
}

impl Default for MemCache {
    fn default() -> Self {
        MemCache::new()
    }
}

impl MemCache {
    pub fn new() -> Self {
        MemCache {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn add(&self, key: Key, value: Value) {
        self.inner.write().unwrap().live.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().live.is_empty()
    }

    /// Move the live map's contents into the snapshot map atomically,
    /// leaving the live map empty. A no-op if the live map is empty.
    pub fn snapshot(&self) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.live.is_empty() {
            return false;
        }
        inner.snapshot = std::mem::take(&mut inner.live);
        true
    }

    /// Clear the snapshot once its contents are durable on disk.
    pub fn clear_snapshot(&self) {
        self.inner.write().unwrap().snapshot.clear();
    }

    /// Up to `n` newest values row-column-equal to `key`, newest first,
    /// skipping tombstones. Searches live then snapshot.
    pub fn get(&self, key: &Key, n: usize) -> Vec<(Key, Value)> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for map in [&inner.live, &inner.snapshot] {
            for (k, v) in map.range(floor_key(key)..) {
                if !k.row_column_equal(key) {
                    break;
                }
                if k.timestamp > key.timestamp {
                    continue;
                }
                if v.is_tombstone() {
                    continue;
                }
                out.push((k.clone(), v.clone()));
                if out.len() >= n {
                    return out;
                }
            }
        }
        out
    }

    /// For every column at `key.row` with timestamp <= `key.timestamp`,
    /// record the newest non-tombstone value per column into `results`;
    /// tombstones raise `deletes[column]` to the max tombstoned timestamp
    /// seen. A cell is suppressed if `deletes[column] >= its timestamp`.
    pub fn get_full(
        &self,
        key: &Key,
        deletes: &mut BTreeMap<Vec<u8>, u64>,
        results: &mut BTreeMap<Vec<u8>, Vec<u8>>,
    ) {
        let inner = self.inner.read().unwrap();
        for map in [&inner.live, &inner.snapshot] {
            let lower = Key::new(key.row.clone(), Vec::new(), u64::MAX);
            for (k, v) in map.range(lower..) {
                if k.row != key.row {
                    break;
                }
                if k.timestamp > key.timestamp {
                    continue;
                }
                let occluded = deletes.get(&k.column).is_some_and(|&ts| ts >= k.timestamp);
                match v {
                    Value::Delete => {
                        let entry = deletes.entry(k.column.clone()).or_insert(0);
                        *entry = (*entry).max(k.timestamp);
                    }
                    Value::Put(data) => {
                        if !occluded && !results.contains_key(&k.column) {
                            results.insert(k.column.clone(), data.clone());
                        }
                    }
                }
            }
        }
    }

    /// Up to `versions` keys with Key-order >= origin, same row (and same
    /// column if `origin.column` is non-empty), skipping tombstones.
    pub fn get_keys_before(&self, origin: &Key, versions: usize) -> Vec<Key> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for map in [&inner.live, &inner.snapshot] {
            for (k, v) in map.range(origin.clone()..) {
                if k.row != origin.row {
                    break;
                }
                if !origin.column.is_empty() && k.column != origin.column {
                    continue;
                }
                if v.is_tombstone() {
                    continue;
                }
                out.push(k.clone());
                if out.len() >= versions {
                    return out;
                }
            }
        }
        out
    }

    /// Snapshot of (live ∪ snapshot) entries for the shared closest-row
    /// protocol in §4.4, in ascending Key order.
    pub fn combined_entries(&self) -> Vec<Edit> {
        let inner = self.inner.read().unwrap();
        let mut merged: BTreeMap<Key, Value> = inner.snapshot.clone();
        for (k, v) in inner.live.iter() {
            merged.insert(k.clone(), v.clone());
        }
        merged
            .into_iter()
            .map(|(key, value)| Edit { key, value })
            .collect()
    }

    /// The current snapshot's contents alone (not live), in ascending Key
    /// order — what a flush in progress is durably writing out.
    pub fn snapshot_entries(&self) -> Vec<Edit> {
        let inner = self.inner.read().unwrap();
        inner
            .snapshot
            .iter()
            .map(|(key, value)| Edit {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Materialise a snapshot (same semantics as `snapshot()`, but never
    /// mutates — used when a scanner wants a stable view without forcing an
    /// actual flush handoff) and return it filtered for iteration.
    pub fn scanner_entries(&self) -> Vec<Edit> {
        self.combined_entries()
    }
}

fn floor_key(key: &Key) -> Key {
    Key::new(key.row.clone(), key.column.clone(), u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(row: &[u8], col: &[u8], ts: u64) -> Key {
        Key::new(row.to_vec(), col.to_vec(), ts)
    }

    #[test]
    fn get_returns_newest_first_and_skips_tombstones() {
        let mc = MemCache::new();
        mc.add(k(b"r", b"cf:a", 100), Value::Put(b"x".to_vec()));
        mc.add(k(b"r", b"cf:a", 200), Value::Put(b"y".to_vec()));
        mc.add(k(b"r", b"cf:a", 300), Value::Delete);

        let got = mc.get(&k(b"r", b"cf:a", 300), 5);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0.timestamp, 200);
        assert_eq!(got[1].0.timestamp, 100);
    }

    #[test]
    fn snapshot_moves_live_to_snapshot_and_is_noop_when_empty() {
        let mc = MemCache::new();
        assert!(!mc.snapshot());
        mc.add(k(b"r", b"cf:a", 1), Value::Put(b"v".to_vec()));
        assert!(mc.snapshot());
        assert!(mc.is_empty());
        // Still visible via snapshot.
        assert_eq!(mc.get(&k(b"r", b"cf:a", 1), 1).len(), 1);
    }

    #[test]
    fn get_full_applies_tombstone_occlusion_per_column() {
        let mc = MemCache::new();
        mc.add(k(b"r", b"cf:a", 100), Value::Put(b"old".to_vec()));
        mc.add(k(b"r", b"cf:a", 200), Value::Delete);
        mc.add(k(b"r", b"cf:b", 50), Value::Put(b"kept".to_vec()));

        let mut deletes = BTreeMap::new();
        let mut results = BTreeMap::new();
        mc.get_full(&k(b"r", b"", u64::MAX), &mut deletes, &mut results);

        assert!(!results.contains_key(b"cf:a".as_slice()));
        assert_eq!(results.get(b"cf:b".as_slice()).unwrap(), b"kept");
        assert_eq!(*deletes.get(b"cf:a".as_slice()).unwrap(), 200);
    }
}
