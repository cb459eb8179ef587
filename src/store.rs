//! A `Store` owns one column family's on-disk state within a region (§4.3,
//! §4.5): the memcache, the set of immutable store files, and the bloom
//! filter that lets reads skip files that cannot contain a row.
//!
//! Locking mirrors the teacher's `ColumnFamily`: a dedicated lock per
//! concern (flush, compaction, scanner construction) rather than one big
//! mutex, so a long-running compaction doesn't block point reads.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::{Arc, Mutex, RwLock},
};

use crate::bloom::BloomFilter;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::fs_layout;
use crate::key::{Column, Edit, Key, RowKey, Value};
use crate::memcache::MemCache;
use crate::occlusion;
use crate::store_file::StoreFile;
use crate::wal::SequenceId;
use crate::{closest, key};

pub struct Store {
    family: Vec<u8>,
    family_dir: PathBuf,
    memcache: MemCache,
    files: RwLock<BTreeMap<SequenceId, Arc<StoreFile>>>,
    next_file_id: AtomicU64,
    bloom: RwLock<Option<BloomFilter>>,
    config: StoreConfig,
    flush_lock: Mutex<()>,
    compact_lock: Mutex<()>,
    /// Held for read while a scanner snapshots the store's tiers, for write
    /// while flush/compaction swap the file set, so a scanner never observes
    /// a half-installed compaction result.
    new_scanner_lock: RwLock<()>,
}

impl Store {
    /// Open an existing store directory, replaying whichever concrete store
    /// files are present. Reference files (created by a region split) are
    /// not resolved here — a region installs those directly via
    /// [`Store::install_reference`] once it can see the parent's entries.
    pub fn open(family: Vec<u8>, family_dir: PathBuf, config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(fs_layout::mapfiles_dir(&family_dir))?;
        std::fs::create_dir_all(fs_layout::info_dir(&family_dir))?;

        let mut files = BTreeMap::new();
        let mut max_file_id = 0u64;
        if let Ok(read_dir) = std::fs::read_dir(fs_layout::mapfiles_dir(&family_dir)) {
            for entry in read_dir {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                let Some((file_id, parent)) = fs_layout::parse_file_name(&name) else {
                    continue;
                };
                max_file_id = max_file_id.max(file_id);
                if parent.is_some() {
                    continue;
                }
                let info_path = fs_layout::info_dir(&family_dir).join(&name);
                let sf = StoreFile::open_concrete(&entry.path(), &info_path, file_id)?;
                files.insert(sf.sequence_id, Arc::new(sf));
            }
        }

        let bloom = BloomFilter::load(fs_layout::filter_path(&family_dir)).ok();

        Ok(Store {
            family,
            family_dir,
            memcache: MemCache::new(),
            files: RwLock::new(files),
            next_file_id: AtomicU64::new(max_file_id + 1),
            bloom: RwLock::new(bloom),
            config,
            flush_lock: Mutex::new(()),
            compact_lock: Mutex::new(()),
            new_scanner_lock: RwLock::new(()),
        })
    }

    pub fn family(&self) -> &[u8] {
        &self.family
    }

    /// Record one edit in the memcache. Callers are responsible for having
    /// already made the edit durable in the region's WAL (§4.2).
    pub fn add(&self, key: Key, value: Value) {
        self.memcache.add(key, value);
    }

    pub fn memcache_len(&self) -> usize {
        self.memcache.len()
    }

    /// Up to `num_versions` newest values for `key`'s (row, column),
    /// memcache first, then store files newest-to-oldest by sequence id,
    /// honouring tombstone occlusion across tiers (§4.5).
    pub fn get(&self, key: &Key, num_versions: usize) -> Vec<(Key, Vec<u8>)> {
        let mut result = Vec::new();
        let mut occluded_at = None;

        let mem_entries = self.memcache.combined_entries();
        occlusion::collect_versions(&mem_entries, key, num_versions, &mut result, &mut occluded_at);
        if result.len() >= num_versions {
            return result;
        }

        if let Some(bloom) = self.bloom.read().unwrap().as_ref() {
            if !bloom.might_contain(&key.row) {
                return result;
            }
        }

        let _scan_guard = self.new_scanner_lock.read().unwrap();
        let files = self.files.read().unwrap();
        for file in files.values().rev() {
            if result.len() >= num_versions {
                break;
            }
            occlusion::collect_versions(file.entries(), key, num_versions, &mut result, &mut occluded_at);
        }
        result
    }

    /// The newest non-tombstoned value per column at `key.row` as of
    /// `key.timestamp`, across every tier (§4.5).
    pub fn get_full(&self, key: &Key) -> (BTreeMap<Column, u64>, BTreeMap<Column, Vec<u8>>) {
        let mut deletes = BTreeMap::new();
        let mut results = BTreeMap::new();

        let mem_entries = self.memcache.combined_entries();
        occlusion::apply_get_full(&mem_entries, key, &mut deletes, &mut results);

        let _scan_guard = self.new_scanner_lock.read().unwrap();
        let files = self.files.read().unwrap();
        for file in files.values().rev() {
            occlusion::apply_get_full(file.entries(), key, &mut deletes, &mut results);
        }
        (deletes, results)
    }

    /// Up to `versions` keys at or after `origin` (same row, and same column
    /// if `origin.column` is non-empty), skipping tombstones — used by
    /// scanners to list what versions exist without paying for the values.
    pub fn get_keys(&self, origin: &Key, versions: usize) -> Vec<Key> {
        let mut out = self.memcache.get_keys_before(origin, versions);
        if out.len() >= versions {
            return out;
        }

        let files = self.files.read().unwrap();
        for file in files.values().rev() {
            if out.len() >= versions {
                break;
            }
            let entries = file.entries();
            let start = entries.partition_point(|e| e.key < *origin);
            for edit in &entries[start..] {
                if edit.key.row != origin.row {
                    break;
                }
                if !origin.column.is_empty() && edit.key.column != origin.column {
                    continue;
                }
                if edit.value.is_tombstone() {
                    continue;
                }
                out.push(edit.key.clone());
                if out.len() >= versions {
                    break;
                }
            }
        }
        out
    }

    /// Largest row at or before `target_row` with a live (non-tombstoned)
    /// cell, applying the closest-row protocol across every tier (§4.4).
    pub fn get_row_key_at_or_before(&self, target_row: &[u8]) -> Option<RowKey> {
        let mem_entries = self.memcache.combined_entries();
        let files = self.files.read().unwrap();
        let tiers = files
            .values()
            .map(|f| f.entries())
            .chain(std::iter::once(mem_entries.as_slice()));
        closest::closest_row_before(tiers, target_row)
    }

    pub fn needs_compaction(&self) -> bool {
        let files = self.files.read().unwrap();
        files.len() >= self.config.compaction_threshold || files.values().any(|f| f.is_reference())
    }

    /// Move the memcache's live contents to a new store file durable up to
    /// `sequence_id`. Returns `false` if there was nothing to flush.
    pub fn flush(&self, sequence_id: SequenceId) -> Result<bool> {
        let _guard = self.flush_lock.lock().unwrap();
        if !self.memcache.snapshot() {
            return Ok(false);
        }
        let entries = self.memcache.snapshot_entries();
        if entries.is_empty() {
            self.memcache.clear_snapshot();
            return Ok(false);
        }

        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let name = fs_layout::file_name(file_id, None);
        let data_path = fs_layout::mapfiles_dir(&self.family_dir).join(&name);
        let info_path = fs_layout::info_dir(&self.family_dir).join(&name);
        let sf = StoreFile::create(&data_path, &info_path, file_id, sequence_id, entries)?;

        self.grow_bloom(&sf)?;

        let guard = self.new_scanner_lock.write().unwrap();
        self.files.write().unwrap().insert(sequence_id, Arc::new(sf));
        drop(guard);

        self.memcache.clear_snapshot();
        Ok(true)
    }

    /// Merge every current store file into one, dropping tombstones and any
    /// version they occlude, and capping live versions per (row, column) at
    /// `config.max_versions` (§4.5). When two files carry an edit at the
    /// identical (row, column, timestamp) — possible only from a bug
    /// upstream of this store — the one from the file with the larger
    /// sequence id wins (recorded open-question resolution: newer write
    /// wins). Returns `false` if there was nothing to compact.
    pub fn compact(&self) -> Result<bool> {
        let _guard = self.compact_lock.lock().unwrap();
        let snapshot: Vec<Arc<StoreFile>> = {
            let files = self.files.read().unwrap();
            let any_reference = files.values().any(|f| f.is_reference());
            if files.len() < 2 && !any_reference {
                return Ok(false);
            }
            files.values().cloned().collect()
        };

        let mut combined: Vec<(Key, Value, SequenceId)> = Vec::new();
        for file in &snapshot {
            for edit in file.entries() {
                combined.push((edit.key.clone(), edit.value.clone(), file.sequence_id));
            }
        }
        // Ascending Key order (row asc, column asc, timestamp desc); ties at
        // an identical Key broken by sequence id descending so the newer
        // file's copy is considered first within the group below.
        combined.sort_by(|a, b| a.0.cmp(&b.0).then(b.2.cmp(&a.2)));

        let merged = merge_versions(&combined, self.config.max_versions);

        let new_file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let max_seq = snapshot.iter().map(|f| f.sequence_id).max().unwrap_or(0);
        let name = fs_layout::file_name(new_file_id, None);
        let data_path = fs_layout::mapfiles_dir(&self.family_dir).join(&name);
        let info_path = fs_layout::info_dir(&self.family_dir).join(&name);
        let new_file = StoreFile::create(&data_path, &info_path, new_file_id, max_seq, merged)?;

        self.rebuild_bloom(&new_file)?;

        let guard = self.new_scanner_lock.write().unwrap();
        {
            let mut files = self.files.write().unwrap();
            for old in &snapshot {
                files.remove(&old.sequence_id);
            }
            files.insert(max_seq, Arc::new(new_file));
        }
        drop(guard);

        for old in &snapshot {
            self.remove_on_disk(old)?;
        }
        Ok(true)
    }

    fn remove_on_disk(&self, file: &StoreFile) -> Result<()> {
        let name = file.disk_name();
        remove_if_present(&fs_layout::mapfiles_dir(&self.family_dir).join(&name))?;
        if !file.is_reference() {
            remove_if_present(&fs_layout::info_dir(&self.family_dir).join(&name))?;
        }
        Ok(())
    }

    fn grow_bloom(&self, new_file: &StoreFile) -> Result<()> {
        let mut guard = self.bloom.write().unwrap();
        let bloom = guard.get_or_insert_with(|| BloomFilter::new_plain(new_file.len().max(1)));
        for edit in new_file.entries() {
            bloom.insert(&edit.key.row);
        }
        self.save_bloom(bloom)
    }

    fn rebuild_bloom(&self, new_file: &StoreFile) -> Result<()> {
        let mut bloom = BloomFilter::new_plain(new_file.len().max(1));
        for edit in new_file.entries() {
            bloom.insert(&edit.key.row);
        }
        self.save_bloom(&bloom)?;
        *self.bloom.write().unwrap() = Some(bloom);
        Ok(())
    }

    fn save_bloom(&self, bloom: &BloomFilter) -> Result<()> {
        let path = fs_layout::filter_path(&self.family_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        bloom.save(path)?;
        Ok(())
    }

    /// Install a reference file created by a region split, materialised
    /// against the parent store's entries by the caller (§4.6).
    pub fn install_reference(&self, sequence_id: SequenceId, file: StoreFile) {
        self.files.write().unwrap().insert(sequence_id, Arc::new(file));
    }

    /// The byte size of the largest current store file — the same signal
    /// the teacher uses to decide whether a region is a split candidate.
    pub fn largest_file_size(&self) -> u64 {
        self.files.read().unwrap().values().map(|f| f.byte_size_estimate()).max().unwrap_or(0)
    }

    pub fn is_splitable(&self, threshold: u64) -> bool {
        self.largest_file_size() >= threshold
    }

    /// The row approximately bisecting the largest current store file, used
    /// as a candidate split point (§4.6).
    pub fn split_row(&self) -> Option<RowKey> {
        self.files
            .read()
            .unwrap()
            .values()
            .max_by_key(|f| f.byte_size_estimate())
            .and_then(|f| f.mid_key())
            .map(|k| k.row.clone())
    }

    /// Snapshot of this store's tiers for a scanner: memcache entries, then
    /// store files newest-to-oldest — the same tier order `get` walks.
    pub fn scan_tiers(&self) -> (Vec<Edit>, Vec<Arc<StoreFile>>) {
        let _guard = self.new_scanner_lock.read().unwrap();
        let mem_entries = self.memcache.combined_entries();
        let files = self.files.read().unwrap().values().rev().cloned().collect();
        (mem_entries, files)
    }

    /// Like [`Store::scan_tiers`], but clones each tier into an owned
    /// `Vec<Edit>` so a [`crate::scanner::StoreScanner`] can outlive the
    /// store lock it was built under (§4.8).
    pub fn owned_scan_tiers(&self) -> Vec<Vec<Edit>> {
        let (mem_entries, files) = self.scan_tiers();
        let mut tiers = vec![mem_entries];
        tiers.extend(files.iter().map(|f| f.entries().to_vec()));
        tiers
    }

    pub fn family_dir(&self) -> &std::path::Path {
        &self.family_dir
    }

    /// Every current store file (concrete or reference), oldest to newest by
    /// sequence id — used by a region split to build reference files
    /// against each of a parent's current files (§4.6).
    pub fn concrete_files(&self) -> Vec<Arc<StoreFile>> {
        self.files.read().unwrap().values().cloned().collect()
    }
}

fn remove_if_present(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Shared by `compact` (test-exercised directly): per (row, column) run,
/// drop tombstones and anything they occlude, keep at most `max_versions`
/// live puts, and collapse exact-key duplicates to the first (highest
/// sequence id) entry.
fn merge_versions(combined: &[(Key, Value, SequenceId)], max_versions: usize) -> Vec<Edit> {
    let mut merged = Vec::new();
    let mut i = 0;
    while i < combined.len() {
        let row = combined[i].0.row.clone();
        let column = combined[i].0.column.clone();
        let mut occluded_at: Option<u64> = None;
        let mut versions = 0usize;
        let mut last_ts: Option<key::Timestamp> = None;
        while i < combined.len() && combined[i].0.row == row && combined[i].0.column == column {
            let (k, v, _) = &combined[i];
            if last_ts == Some(k.timestamp) {
                i += 1;
                continue;
            }
            last_ts = Some(k.timestamp);
            match v {
                Value::Delete => {
                    occluded_at = Some(occluded_at.unwrap_or(0).max(k.timestamp));
                }
                Value::Put(data) => {
                    let occluded = occluded_at.is_some_and(|ts| k.timestamp <= ts);
                    if !occluded && versions < max_versions {
                        merged.push(Edit {
                            key: k.clone(),
                            value: Value::Put(data.clone()),
                        });
                        versions += 1;
                    }
                }
            }
            i += 1;
        }
    }
    merged
}
