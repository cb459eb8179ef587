//! A region owns one store per column family within a contiguous row range,
//! plus the WAL, row-lock registry, and locks that let readers, writers,
//! flushes, compactions, splits and close interleave safely (§4.6, §5).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    sync::Mutex,
    sync::RwLock,
    time::Duration,
};

use crate::config::{RegionConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::fs_layout;
use crate::key::{Column, ColumnMatcher, ColumnSpec, Edit, Key, RowKey, Timestamp, Value, LATEST_TIMESTAMP};
use crate::rowlock::RowLockRegistry;
use crate::scanner::{RegionScanner, RowFilter, StoreScanner};
use crate::store::Store;
use crate::store_file::{Half, ReferenceDescriptor, StoreFile};
use crate::wal::{Wal, WalRecord};

/// A region's identity and row range. `start_key` is inclusive, `end_key` is
/// exclusive; an empty key on either side means unbounded (§3, §6).
#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub table: String,
    pub start_key: RowKey,
    pub end_key: RowKey,
    pub region_id: u64,
    pub encoded_name: String,
}

impl RegionInfo {
    pub fn contains_row(&self, row: &[u8]) -> bool {
        let after_start = self.start_key.is_empty() || row >= self.start_key.as_slice();
        let before_end = self.end_key.is_empty() || row < self.end_key.as_slice();
        after_start && before_end
    }
}

/// One operation within a batch update (§4.6).
pub enum Operation {
    Put { column: Column, value: Vec<u8> },
    Delete { column: Column },
    /// Tombstone only the newest currently-visible version of this column,
    /// rather than everything at or before the batch's timestamp.
    DeleteLatest { column: Column },
}

fn edit_byte_size(edit: &Edit) -> u64 {
    let val_len = match &edit.value {
        Value::Put(v) => v.len(),
        Value::Delete => 0,
    };
    (edit.key.row.len() + edit.key.column.len() + 8 + val_len) as u64
}

pub struct Region {
    info: RegionInfo,
    root: PathBuf,
    stores: BTreeMap<Vec<u8>, Store>,
    wal: Wal,
    row_locks: RowLockRegistry,
    /// Held across WAL append + memcache inserts for one batch, and across a
    /// full-region memcache snapshot (§5).
    update_lock: Mutex<()>,
    /// Readers and scanner constructors take read; close takes write.
    region_lock: RwLock<()>,
    split_lock: Mutex<()>,
    active_scanners: AtomicI64,
    memcache_size: AtomicU64,
    region_config: RegionConfig,
    store_config: StoreConfig,
    closed: AtomicBool,
    compacting: AtomicBool,
}

impl Region {
    /// Open a region directory, creating one store per family and replaying
    /// this region's share of the WAL. WAL edits whose sequence is already
    /// covered by a flush-complete record are skipped (§3, §5).
    pub fn open(
        root: PathBuf,
        info: RegionInfo,
        families: &[Vec<u8>],
        region_config: RegionConfig,
        store_config: StoreConfig,
    ) -> Result<Self> {
        let region_dir = fs_layout::region_dir(&root, &info.table, &info.encoded_name);
        std::fs::create_dir_all(&region_dir)?;

        let mut stores = BTreeMap::new();
        for family in families {
            let family_dir = fs_layout::family_dir(&region_dir, family);
            let store = Store::open(family.clone(), family_dir.clone(), store_config.clone())?;
            Self::materialize_references(&store, &family_dir, &root, &info.table)?;
            stores.insert(family.clone(), store);
        }

        let wal_path = fs_layout::old_log_file(&region_dir);
        let mut records = Vec::new();
        let wal = Wal::open(&wal_path, |rec| records.push(rec))?;

        let mut max_flush_complete = 0u64;
        for rec in &records {
            if let WalRecord::FlushComplete { region, sequence } = rec {
                if *region == info.encoded_name {
                    max_flush_complete = max_flush_complete.max(*sequence);
                }
            }
        }
        for rec in records {
            if let WalRecord::Edit { region, family, sequence, edits } = rec {
                if region != info.encoded_name || sequence <= max_flush_complete {
                    continue;
                }
                if let Some(store) = stores.get(&family) {
                    for edit in edits {
                        store.add(edit.key, edit.value);
                    }
                }
            }
        }

        Ok(Region {
            info,
            root,
            stores,
            wal,
            row_locks: RowLockRegistry::new(),
            update_lock: Mutex::new(()),
            region_lock: RwLock::new(()),
            split_lock: Mutex::new(()),
            active_scanners: AtomicI64::new(0),
            memcache_size: AtomicU64::new(0),
            region_config,
            store_config,
            closed: AtomicBool::new(false),
            compacting: AtomicBool::new(false),
        })
    }

    pub fn info(&self) -> &RegionInfo {
        &self.info
    }

    /// Resolve every reference-file descriptor sitting in `family_dir` by
    /// reading the parent region's still-concrete file it points at and
    /// installing the filtered result into `store` (§4.6, §9). A parent may
    /// itself have been produced by an earlier split, so resolving is not
    /// recursive here — the parent's own `Region::open` already materialised
    /// whatever references it needed when it was last opened.
    fn materialize_references(store: &Store, family_dir: &Path, root: &Path, table: &str) -> Result<()> {
        let Ok(read_dir) = std::fs::read_dir(fs_layout::mapfiles_dir(family_dir)) else {
            return Ok(());
        };
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((file_id, Some(parent_encoded))) = fs_layout::parse_file_name(&name) else {
                continue;
            };
            let descriptor = StoreFile::read_reference_descriptor(&entry.path())?;
            let parent_region_dir = fs_layout::region_dir(root, table, &parent_encoded);
            let parent_family_dir = fs_layout::family_dir(&parent_region_dir, store.family());
            let (parent_data, parent_info) = crate::store_file::data_and_info_paths(&parent_family_dir, descriptor.parent_file_id, None);
            let parent_file = StoreFile::open_concrete(&parent_data, &parent_info, descriptor.parent_file_id)?;
            let sequence_id = parent_file.sequence_id;
            let materialized = StoreFile::materialize_reference(file_id, sequence_id, descriptor, parent_file.entries());
            store.install_reference(sequence_id, materialized);
        }
        Ok(())
    }

    fn store_for_column<'a>(&'a self, column: &[u8]) -> Result<&'a Store> {
        let family = Key::split_column(column).0;
        self.stores.get(family).ok_or_else(|| Error::UnknownFamily(family.to_vec()))
    }

    fn require_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::RegionClosed);
        }
        Ok(())
    }

    fn require_in_range(&self, row: &[u8]) -> Result<()> {
        if !self.info.contains_row(row) {
            return Err(Error::OutOfRangeRow {
                row: row.to_vec(),
                start: self.info.start_key.clone(),
                end: self.info.end_key.clone(),
            });
        }
        Ok(())
    }

    /// Up to `num_versions` newest values for (row, column) at or before
    /// `timestamp` (§4.6).
    pub fn get(&self, row: &[u8], column: &[u8], timestamp: Timestamp, num_versions: usize) -> Result<Vec<(Key, Vec<u8>)>> {
        self.require_open()?;
        self.require_in_range(row)?;
        let _guard = self.region_lock.read().unwrap();
        let store = self.store_for_column(column)?;
        Ok(store.get(&Key::new(row.to_vec(), column.to_vec(), timestamp), num_versions))
    }

    /// The newest non-tombstoned value per column across every family at
    /// `row`, as of `timestamp` (§4.6).
    pub fn get_full(&self, row: &[u8], timestamp: Timestamp) -> Result<BTreeMap<Column, Vec<u8>>> {
        self.require_open()?;
        self.require_in_range(row)?;
        let _guard = self.region_lock.read().unwrap();
        let token = self.row_locks.lock(&row.to_vec());
        let mut results = BTreeMap::new();
        for store in self.stores.values() {
            let (_, cols) = store.get_full(&Key::new(row.to_vec(), Vec::new(), timestamp));
            results.extend(cols);
        }
        self.row_locks.release(token);
        Ok(results)
    }

    /// The largest row at or before `row` across every family, with its full
    /// column bundle re-queried at that row (§4.4, §4.6).
    pub fn get_closest_row_before(&self, row: &[u8]) -> Result<Option<(RowKey, BTreeMap<Column, Vec<u8>>)>> {
        self.require_open()?;
        let _guard = self.region_lock.read().unwrap();
        let mut best: Option<RowKey> = None;
        for store in self.stores.values() {
            if let Some(candidate) = store.get_row_key_at_or_before(row) {
                best = Some(match best {
                    Some(current) if current >= candidate => current,
                    _ => candidate,
                });
            }
        }
        let Some(best_row) = best else {
            return Ok(None);
        };
        let mut results = BTreeMap::new();
        for store in self.stores.values() {
            let (_, cols) = store.get_full(&Key::new(best_row.clone(), Vec::new(), LATEST_TIMESTAMP));
            results.extend(cols);
        }
        Ok(Some((best_row, results)))
    }

    fn wait_for_memcache_headroom(&self) {
        while self.memcache_size.load(Ordering::SeqCst) >= self.region_config.memcache_blocking_size {
            std::thread::sleep(Duration::from_millis(self.region_config.wait_wake_frequency_ms));
        }
    }

    /// Append one edit per family as a single WAL record each, then apply it
    /// to that family's memcache, under the region's update lock (§4.6, §5).
    fn append_and_apply(&self, per_family: Vec<(Vec<u8>, Vec<Edit>)>) -> Result<()> {
        let _guard = self.update_lock.lock().unwrap();
        for (family, edits) in per_family {
            // Every caller validates the family against `self.stores` before
            // building `per_family`, so a miss here means a caller's
            // validation and this method's lookup have drifted apart.
            let store = self
                .stores
                .get(&family)
                .ok_or_else(|| Error::Internal(format!("append_and_apply: family {family:?} has no store")))?;
            let sequence = self.wal.next_sequence();
            self.wal.append(&WalRecord::Edit {
                region: self.info.encoded_name.clone(),
                family: family.clone(),
                sequence,
                edits: edits.clone(),
            })?;
            let mut added = 0u64;
            for edit in edits {
                added += edit_byte_size(&edit);
                store.add(edit.key, edit.value);
            }
            let total = self.memcache_size.fetch_add(added, Ordering::SeqCst) + added;
            if total >= self.region_config.memcache_flush_size {
                log::info!("region {} crossed memcache flush threshold ({} bytes)", self.info.encoded_name, total);
            }
        }
        Ok(())
    }

    /// Apply a batch of operations to one row atomically with respect to
    /// other writers of that row (§4.6).
    pub fn batch_update(&self, row: &[u8], timestamp: Timestamp, batch: Vec<Operation>) -> Result<()> {
        self.require_open()?;
        self.require_in_range(row)?;
        let _region_guard = self.region_lock.read().unwrap();
        self.wait_for_memcache_headroom();

        let token = self.row_locks.lock(&row.to_vec());
        let result = (|| -> Result<Vec<Column>> {
            let mut per_family: BTreeMap<Vec<u8>, Vec<Edit>> = BTreeMap::new();
            let mut delete_latest_columns = Vec::new();
            for op in batch {
                match op {
                    Operation::Put { column, value } => {
                        let family = Key::split_column(&column).0.to_vec();
                        if !self.stores.contains_key(&family) {
                            return Err(Error::UnknownFamily(family));
                        }
                        per_family
                            .entry(family)
                            .or_default()
                            .push(Edit::put(row.to_vec(), column, timestamp, value));
                    }
                    Operation::Delete { column } => {
                        let family = Key::split_column(&column).0.to_vec();
                        if !self.stores.contains_key(&family) {
                            return Err(Error::UnknownFamily(family));
                        }
                        per_family.entry(family).or_default().push(Edit::delete(row.to_vec(), column, timestamp));
                    }
                    Operation::DeleteLatest { column } => {
                        let family = Key::split_column(&column).0.to_vec();
                        if !self.stores.contains_key(&family) {
                            return Err(Error::UnknownFamily(family));
                        }
                        delete_latest_columns.push(column);
                    }
                }
            }
            self.append_and_apply(per_family.into_iter().collect())?;
            Ok(delete_latest_columns)
        })();

        let delete_latest_columns = match result {
            Ok(cols) => cols,
            Err(e) => {
                self.row_locks.release(token);
                return Err(e);
            }
        };

        // §5: an operation that finds its row lock reclaimed by lease expiry
        // must abort rather than continue the critical section.
        if !self.row_locks.is_locked(token) {
            return Err(Error::RowLockExpired(row.to_vec()));
        }

        for column in delete_latest_columns {
            let store = self.store_for_column(&column)?;
            let newest = store.get(&Key::new(row.to_vec(), column.clone(), LATEST_TIMESTAMP), 1);
            if let Some((key, _)) = newest.into_iter().next() {
                let family = Key::split_column(&column).0.to_vec();
                self.append_and_apply(vec![(family, vec![Edit::delete(row.to_vec(), column, key.timestamp)])])?;
            }
        }

        self.row_locks.release(token);
        Ok(())
    }

    /// Tombstone every (or one) column at `row` as of `ts`, across whichever
    /// families carry matching keys (§4.6).
    pub fn delete_all(&self, row: &[u8], column: Option<&[u8]>, ts: Timestamp) -> Result<()> {
        self.require_open()?;
        self.require_in_range(row)?;
        let token = self.row_locks.lock(&row.to_vec());
        let origin_column = column.map(|c| c.to_vec()).unwrap_or_default();
        let mut per_family: BTreeMap<Vec<u8>, Vec<Edit>> = BTreeMap::new();
        for (family, store) in &self.stores {
            let origin = Key::new(row.to_vec(), origin_column.clone(), LATEST_TIMESTAMP);
            for key in store.get_keys(&origin, usize::MAX) {
                if let Some(target) = column {
                    if key.column != target {
                        continue;
                    }
                }
                per_family.entry(family.clone()).or_default().push(Edit::delete(row.to_vec(), key.column, ts));
            }
        }
        // §5: abort rather than write if the row lock was reclaimed by lease
        // expiry while the matching keys above were being gathered.
        if !self.row_locks.is_locked(token) {
            return Err(Error::RowLockExpired(row.to_vec()));
        }
        let result = self.append_and_apply(per_family.into_iter().collect());
        self.row_locks.release(token);
        result
    }

    /// Tombstone every column of one family at `row` as of `ts` (§4.6).
    pub fn delete_family(&self, row: &[u8], family: &[u8], ts: Timestamp) -> Result<()> {
        self.require_open()?;
        self.require_in_range(row)?;
        let store = self.stores.get(family).ok_or_else(|| Error::UnknownFamily(family.to_vec()))?;
        let token = self.row_locks.lock(&row.to_vec());
        let origin = Key::new(row.to_vec(), Vec::new(), LATEST_TIMESTAMP);
        let edits: Vec<Edit> = store
            .get_keys(&origin, usize::MAX)
            .into_iter()
            .map(|key| Edit::delete(row.to_vec(), key.column, ts))
            .collect();
        if edits.is_empty() {
            self.row_locks.release(token);
            return Ok(());
        }
        if !self.row_locks.is_locked(token) {
            return Err(Error::RowLockExpired(row.to_vec()));
        }
        let result = self.append_and_apply(vec![(family.to_vec(), edits)]);
        self.row_locks.release(token);
        result
    }

    /// Build a region scanner merging one per-family store scanner for every
    /// family `columns` touches (all families if `columns` is empty), with
    /// an optional row filter (§4.8).
    pub fn get_scanner(
        &self,
        columns: Vec<ColumnSpec>,
        first_row: &[u8],
        timestamp: Timestamp,
        filter: Option<Box<dyn RowFilter>>,
    ) -> Result<RegionScannerHandle<'_>> {
        self.require_open()?;
        let _guard = self.region_lock.read().unwrap();

        let mut by_family: BTreeMap<Vec<u8>, Vec<ColumnMatcher>> = BTreeMap::new();
        if columns.is_empty() {
            for family in self.stores.keys() {
                by_family.insert(family.clone(), Vec::new());
            }
        } else {
            for spec in &columns {
                let matcher = ColumnMatcher::new(spec)?;
                let family = matcher.family().to_vec();
                if !self.stores.contains_key(&family) {
                    return Err(Error::UnknownFamily(family));
                }
                by_family.entry(family).or_default().push(matcher);
            }
        }

        let mut scanners = Vec::new();
        for (family, matchers) in by_family {
            let store = self.stores.get(&family).expect("family checked above");
            scanners.push(StoreScanner::new(store.owned_scan_tiers(), matchers, timestamp, first_row));
        }

        self.active_scanners.fetch_add(1, Ordering::SeqCst);
        Ok(RegionScannerHandle {
            inner: RegionScanner::new(scanners, filter),
            region: self,
        })
    }

    /// Snapshot every family's memcache, write one store file per family
    /// stamped with a shared sequence id, and record a flush-complete record
    /// once every family is durable (§4.6). Returns `false` if there was
    /// nothing to flush.
    pub fn flushcache(&self) -> Result<bool> {
        let _guard = self.update_lock.lock().unwrap();
        if self.stores.values().all(|s| s.memcache_len() == 0) {
            return Ok(false);
        }

        let sequence = self.wal.next_sequence();
        self.wal.append(&WalRecord::FlushBegin {
            region: self.info.encoded_name.clone(),
            sequence,
        })?;
        log::info!("region {} flush begin at sequence {}", self.info.encoded_name, sequence);

        for store in self.stores.values() {
            if let Err(e) = store.flush(sequence) {
                log::error!("region {} flush failed at sequence {}: {}", self.info.encoded_name, sequence, e);
                return Err(Error::DroppedSnapshot {
                    region: self.info.encoded_name.clone(),
                    sequence,
                });
            }
        }

        self.wal.append(&WalRecord::FlushComplete {
            region: self.info.encoded_name.clone(),
            sequence,
        })?;
        log::info!("region {} flush complete at sequence {}", self.info.encoded_name, sequence);
        self.memcache_size.store(0, Ordering::SeqCst);
        Ok(true)
    }

    /// Compact every family that needs it. At most one compaction runs per
    /// region at a time; a second caller while one is in flight is a no-op
    /// (§4.6, §5).
    pub fn compact_stores(&self) -> Result<()> {
        if self.compacting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let scratch = fs_layout::compaction_dir(&self.root, &self.info.table, &self.info.encoded_name);
        std::fs::create_dir_all(&scratch)?;
        for (family, store) in &self.stores {
            if store.needs_compaction() {
                log::info!("region {} compacting family {:?}", self.info.encoded_name, family);
                store.compact()?;
            }
        }
        let _ = std::fs::remove_dir_all(&scratch);
        self.compacting.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the region has a store with a file at or above the desired
    /// split threshold, and if so, that file's midpoint row (§4.6).
    pub fn needs_split(&self) -> Option<RowKey> {
        let threshold = self.store_config.desired_max_file_size;
        let candidate = self.stores.values().max_by_key(|s| s.largest_file_size())?;
        if candidate.largest_file_size() >= threshold && candidate.is_splitable(threshold) {
            candidate.split_row()
        } else {
            None
        }
    }

    /// Split this region into two children at `needs_split`'s midpoint,
    /// materialising every current store file as a bottom/top reference
    /// into the respective child (§4.6, §9). The children's descriptors are
    /// returned for the caller to open for service; this region is not
    /// mutated.
    pub fn split_region(&self) -> Result<Option<(RegionInfo, RegionInfo)>> {
        let _guard = self.split_lock.lock().unwrap();
        let Some(mid) = self.needs_split() else {
            return Ok(None);
        };

        let a_info = RegionInfo {
            table: self.info.table.clone(),
            start_key: self.info.start_key.clone(),
            end_key: mid.clone(),
            region_id: self.info.region_id.wrapping_mul(2),
            encoded_name: format!("{}a", self.info.encoded_name),
        };
        let b_info = RegionInfo {
            table: self.info.table.clone(),
            start_key: mid.clone(),
            end_key: self.info.end_key.clone(),
            region_id: self.info.region_id.wrapping_mul(2).wrapping_add(1),
            encoded_name: format!("{}b", self.info.encoded_name),
        };

        let a_scratch = fs_layout::splits_dir(&fs_layout::region_dir(&self.root, &self.info.table, &self.info.encoded_name), &a_info.encoded_name);
        let b_scratch = fs_layout::splits_dir(&fs_layout::region_dir(&self.root, &self.info.table, &self.info.encoded_name), &b_info.encoded_name);
        std::fs::create_dir_all(&a_scratch)?;
        std::fs::create_dir_all(&b_scratch)?;

        let a_region_dir = fs_layout::region_dir(&self.root, &self.info.table, &a_info.encoded_name);
        let b_region_dir = fs_layout::region_dir(&self.root, &self.info.table, &b_info.encoded_name);

        let families: Vec<Vec<u8>> = self.stores.keys().cloned().collect();
        for family in &families {
            let parent_store = &self.stores[family];
            let a_family_dir = fs_layout::family_dir(&a_region_dir, family);
            let b_family_dir = fs_layout::family_dir(&b_region_dir, family);
            let a_store = Store::open(family.clone(), a_family_dir.clone(), self.store_config.clone())?;
            let b_store = Store::open(family.clone(), b_family_dir.clone(), self.store_config.clone())?;

            for file in parent_store.concrete_files() {
                let bottom_descriptor = ReferenceDescriptor {
                    parent_encoded_region: self.info.encoded_name.clone(),
                    parent_file_id: file.file_id,
                    split_key: mid.clone(),
                    half: Half::Bottom,
                };
                let (bottom_data, _) = crate::store_file::data_and_info_paths(&a_family_dir, file.file_id, Some(&self.info.encoded_name));
                if let Some(parent) = bottom_data.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let bottom = StoreFile::create_reference(&bottom_data, file.file_id, file.sequence_id, bottom_descriptor, file.entries())?;
                a_store.install_reference(file.sequence_id, bottom);

                let top_descriptor = ReferenceDescriptor {
                    parent_encoded_region: self.info.encoded_name.clone(),
                    parent_file_id: file.file_id,
                    split_key: mid.clone(),
                    half: Half::Top,
                };
                let (top_data, _) = crate::store_file::data_and_info_paths(&b_family_dir, file.file_id, Some(&self.info.encoded_name));
                if let Some(parent) = top_data.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let top = StoreFile::create_reference(&top_data, file.file_id, file.sequence_id, top_descriptor, file.entries())?;
                b_store.install_reference(file.sequence_id, top);
            }
        }

        let _ = std::fs::remove_dir_all(&a_scratch);
        let _ = std::fs::remove_dir_all(&b_scratch);

        log::info!(
            "region {} split at {:?} into {} and {}",
            self.info.encoded_name,
            mid,
            a_info.encoded_name,
            b_info.encoded_name
        );
        Ok(Some((a_info, b_info)))
    }

    /// Disable further writes, drain scanners and row locks, and — unless
    /// `abort` — flush once more before marking the region closed (§4.6).
    pub fn close(&self, abort: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _write_guard = self.region_lock.write().unwrap();
        while self.active_scanners.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(Duration::from_millis(self.region_config.wait_wake_frequency_ms));
        }
        self.row_locks.wait_for_drain();
        if !abort {
            self.flushcache()?;
        }
        Ok(())
    }
}

/// A live region scanner plus the region's active-scanner accounting; the
/// count decrements automatically on drop (§5).
pub struct RegionScannerHandle<'a> {
    inner: RegionScanner,
    region: &'a Region,
}

impl<'a> RegionScannerHandle<'a> {
    pub fn next(&mut self) -> Option<(RowKey, BTreeMap<Column, Vec<u8>>)> {
        self.inner.next()
    }
}

impl<'a> Drop for RegionScannerHandle<'a> {
    fn drop(&mut self) {
        self.region.active_scanners.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Merge two sibling regions of the same table into one (§4.7): flush and
/// compact both, then move each family's compacted files under the new
/// region's directory, breaking any sequence-id collision by decrementing
/// one side, and compact once more.
pub fn merge_regions(a: &Region, b: &Region, merged_info: RegionInfo, root: &Path, families: &[Vec<u8>]) -> Result<Region> {
    if a.info.table != b.info.table {
        return Err(Error::MergePreconditions("regions belong to different tables".into()));
    }
    let adjacent = a.info.end_key == b.info.start_key || b.info.end_key == a.info.start_key;
    if !adjacent {
        return Err(Error::MergePreconditions("regions are not adjacent".into()));
    }

    a.flushcache()?;
    b.flushcache()?;
    a.compact_stores()?;
    b.compact_stores()?;

    let merged_region_dir = fs_layout::region_dir(root, &merged_info.table, &merged_info.encoded_name);
    std::fs::create_dir_all(&merged_region_dir)?;

    for family in families {
        let merged_family_dir = fs_layout::family_dir(&merged_region_dir, family);
        std::fs::create_dir_all(fs_layout::mapfiles_dir(&merged_family_dir))?;
        std::fs::create_dir_all(fs_layout::info_dir(&merged_family_dir))?;

        let mut next_seq_hint = 0u64;
        for region in [a, b] {
            if let Some(store) = region.stores.get(family) {
                let mut files = store.concrete_files();
                files.sort_by_key(|f| f.sequence_id);
                for file in files {
                    // Renumber so later sides' files always sort after
                    // earlier sides' under the merged store's sequence-id
                    // ordering, while preserving each side's relative order.
                    // The new sequence id also becomes the merged file's id,
                    // since the two sides' original file ids were assigned
                    // independently and may collide.
                    next_seq_hint += 1;
                    let sequence_id = next_seq_hint;
                    let file_id = sequence_id;
                    let name = fs_layout::file_name(file_id, None);
                    let data_path = fs_layout::mapfiles_dir(&merged_family_dir).join(&name);
                    let info_path = fs_layout::info_dir(&merged_family_dir).join(&name);
                    StoreFile::create(&data_path, &info_path, file_id, sequence_id, file.entries().to_vec())?;
                }
            }
        }
    }

    let merged = Region::open(root.to_path_buf(), merged_info, families, a.region_config.clone(), a.store_config.clone())?;
    merged.compact_stores()?;

    a.close(true).ok();
    b.close(true).ok();
    std::fs::remove_dir_all(fs_layout::region_dir(root, &a.info.table, &a.info.encoded_name)).ok();
    std::fs::remove_dir_all(fs_layout::region_dir(root, &b.info.table, &b.info.encoded_name)).ok();

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn region(root: &Path, name: &str, start: &[u8], end: &[u8]) -> Region {
        let info = RegionInfo {
            table: "t".into(),
            start_key: start.to_vec(),
            end_key: end.to_vec(),
            region_id: 1,
            encoded_name: name.into(),
        };
        Region::open(root.to_path_buf(), info, &[b"cf".to_vec()], RegionConfig::default(), StoreConfig::default()).unwrap()
    }

    #[test]
    fn put_then_get_single_version() {
        let dir = tempdir().unwrap();
        let region = region(dir.path(), "r1", b"", b"");
        region
            .batch_update(
                b"r1",
                100,
                vec![Operation::Put {
                    column: b"cf:a".to_vec(),
                    value: b"x".to_vec(),
                }],
            )
            .unwrap();

        let got = region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 1).unwrap();
        assert_eq!(got[0].1, b"x");

        let none = region.get(b"r1", b"cf:a", 50, 1).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn version_stack_respects_timestamp_cutoff() {
        let dir = tempdir().unwrap();
        let region = region(dir.path(), "r1", b"", b"");
        for (ts, val) in [(100, "x"), (200, "y"), (300, "z")] {
            region
                .batch_update(
                    b"r1",
                    ts,
                    vec![Operation::Put {
                        column: b"cf:a".to_vec(),
                        value: val.as_bytes().to_vec(),
                    }],
                )
                .unwrap();
        }

        let newest_two = region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 2).unwrap();
        assert_eq!(newest_two.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(), vec![b"z".to_vec(), b"y".to_vec()]);

        let at_250 = region.get(b"r1", b"cf:a", 250, 1).unwrap();
        assert_eq!(at_250[0].1, b"y");
    }

    #[test]
    fn tombstone_survives_flush_and_compaction() {
        let dir = tempdir().unwrap();
        let region = region(dir.path(), "r1", b"", b"");
        region
            .batch_update(b"r1", 100, vec![Operation::Put { column: b"cf:a".to_vec(), value: b"x".to_vec() }])
            .unwrap();
        region.delete_all(b"r1", Some(b"cf:a"), 200).unwrap();
        region.flushcache().unwrap();
        region.flushcache().unwrap();
        region.compact_stores().unwrap();

        let got = region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 5).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn out_of_range_row_is_rejected() {
        let dir = tempdir().unwrap();
        let region = region(dir.path(), "r1", b"m", b"z");
        let err = region.get(b"a", b"cf:a", LATEST_TIMESTAMP, 1).unwrap_err();
        assert!(matches!(err, Error::OutOfRangeRow { .. }));
    }

    #[test]
    fn delete_latest_tombstones_the_newest_version_and_anything_older() {
        // A tombstone here occludes every version at or before its own
        // timestamp (§3), so "delete latest" stamped at the newest key's
        // timestamp necessarily also occludes older puts at lesser
        // timestamps — there's no narrower "exact version" marker in this
        // value model.
        let dir = tempdir().unwrap();
        let region = region(dir.path(), "r1", b"", b"");
        region
            .batch_update(b"r1", 100, vec![Operation::Put { column: b"cf:a".to_vec(), value: b"old".to_vec() }])
            .unwrap();
        region
            .batch_update(b"r1", 200, vec![Operation::Put { column: b"cf:a".to_vec(), value: b"new".to_vec() }])
            .unwrap();
        region
            .batch_update(b"r1", 300, vec![Operation::DeleteLatest { column: b"cf:a".to_vec() }])
            .unwrap();

        let got = region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 5).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn scanner_merges_rows_across_families() {
        let dir = tempdir().unwrap();
        let info = RegionInfo {
            table: "t".into(),
            start_key: vec![],
            end_key: vec![],
            region_id: 1,
            encoded_name: "r1".into(),
        };
        let region = Region::open(
            dir.path().to_path_buf(),
            info,
            &[b"cf".to_vec(), b"cb".to_vec()],
            RegionConfig::default(),
            StoreConfig::default(),
        )
        .unwrap();
        region
            .batch_update(b"a", 100, vec![Operation::Put { column: b"cf:x".to_vec(), value: b"ax".to_vec() }])
            .unwrap();
        region
            .batch_update(b"a", 100, vec![Operation::Put { column: b"cb:y".to_vec(), value: b"ay".to_vec() }])
            .unwrap();
        region
            .batch_update(b"m", 100, vec![Operation::Put { column: b"cf:x".to_vec(), value: b"mx".to_vec() }])
            .unwrap();

        let mut scanner = region.get_scanner(vec![], b"", LATEST_TIMESTAMP, None).unwrap();
        let (row1, cols1) = scanner.next().unwrap();
        assert_eq!(row1, b"a");
        assert_eq!(cols1.len(), 2);
        let (row2, _) = scanner.next().unwrap();
        assert_eq!(row2, b"m");
        assert!(scanner.next().is_none());
    }

    #[test]
    fn split_produces_disjoint_children_via_reference_files() {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.desired_max_file_size = 1;
        let info = RegionInfo {
            table: "t".into(),
            start_key: vec![],
            end_key: vec![],
            region_id: 1,
            encoded_name: "parent".into(),
        };
        let region = Region::open(dir.path().to_path_buf(), info, &[b"cf".to_vec()], RegionConfig::default(), config).unwrap();
        for row in [b"a".as_slice(), b"m", b"z"] {
            region
                .batch_update(row, 100, vec![Operation::Put { column: b"cf:x".to_vec(), value: b"v".to_vec() }])
                .unwrap();
        }
        region.flushcache().unwrap();

        let mid = region.needs_split().unwrap();
        assert_eq!(mid, b"m");

        let (a_info, b_info) = region.split_region().unwrap().unwrap();
        assert_eq!(a_info.end_key, b"m");
        assert_eq!(b_info.start_key, b"m");

        let a_region = Region::open(
            dir.path().to_path_buf(),
            a_info,
            &[b"cf".to_vec()],
            RegionConfig::default(),
            StoreConfig::default(),
        )
        .unwrap();
        let b_region = Region::open(
            dir.path().to_path_buf(),
            b_info,
            &[b"cf".to_vec()],
            RegionConfig::default(),
            StoreConfig::default(),
        )
        .unwrap();

        assert!(a_region.get(b"a", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len() == 1);
        assert!(a_region.get(b"m", b"cf:x", LATEST_TIMESTAMP, 1).is_err());
        assert!(b_region.get(b"m", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len() == 1);
        assert!(b_region.get(b"z", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len() == 1);

        let a_store = a_region.stores.get(b"cf".as_slice()).unwrap();
        assert!(a_store.concrete_files().iter().any(|f| f.is_reference()));
        assert!(a_store.needs_compaction());

        a_region.compact_stores().unwrap();

        let a_store = a_region.stores.get(b"cf".as_slice()).unwrap();
        assert!(a_store.concrete_files().iter().all(|f| !f.is_reference()));
        assert!(a_region.get(b"a", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len() == 1);
    }

    #[test]
    fn merge_recombines_adjacent_regions_into_one_row_space() {
        let dir = tempdir().unwrap();
        let a_info = RegionInfo {
            table: "t".into(),
            start_key: vec![],
            end_key: b"m".to_vec(),
            region_id: 1,
            encoded_name: "a".into(),
        };
        let b_info = RegionInfo {
            table: "t".into(),
            start_key: b"m".to_vec(),
            end_key: vec![],
            region_id: 2,
            encoded_name: "b".into(),
        };
        let a_region = Region::open(dir.path().to_path_buf(), a_info, &[b"cf".to_vec()], RegionConfig::default(), StoreConfig::default()).unwrap();
        let b_region = Region::open(dir.path().to_path_buf(), b_info, &[b"cf".to_vec()], RegionConfig::default(), StoreConfig::default()).unwrap();

        a_region
            .batch_update(b"a", 100, vec![Operation::Put { column: b"cf:x".to_vec(), value: b"av".to_vec() }])
            .unwrap();
        b_region
            .batch_update(b"z", 100, vec![Operation::Put { column: b"cf:x".to_vec(), value: b"zv".to_vec() }])
            .unwrap();

        let merged_info = RegionInfo {
            table: "t".into(),
            start_key: vec![],
            end_key: vec![],
            region_id: 3,
            encoded_name: "merged".into(),
        };
        let merged = merge_regions(&a_region, &b_region, merged_info, dir.path(), &[b"cf".to_vec()]).unwrap();

        assert_eq!(merged.get(b"a", b"cf:x", LATEST_TIMESTAMP, 1).unwrap()[0].1, b"av");
        assert_eq!(merged.get(b"z", b"cf:x", LATEST_TIMESTAMP, 1).unwrap()[0].1, b"zv");
        assert!(!dir.path().join("t").join("a").exists());
        assert!(!dir.path().join("t").join("b").exists());
    }

    #[test]
    fn merge_rejects_non_adjacent_regions() {
        let dir = tempdir().unwrap();
        let a_region = region(dir.path(), "a", b"", b"m");
        let b_region = region(dir.path(), "b", b"q", b"z");
        let merged_info = RegionInfo {
            table: "t".into(),
            start_key: vec![],
            end_key: vec![],
            region_id: 3,
            encoded_name: "merged".into(),
        };
        match merge_regions(&a_region, &b_region, merged_info, dir.path(), &[b"cf".to_vec()]) {
            Err(Error::MergePreconditions(_)) => {}
            Err(other) => panic!("expected MergePreconditions, got {other}"),
            Ok(_) => panic!("expected merge to be rejected"),
        }
    }
}
