//! Scanner protocol (§4.8): a per-store scanner merges a store's tiers into
//! per-row bundles; a region scanner merges one per-store scanner per family
//! and applies an optional row filter.
//!
//! Tiers here are owned `Vec<Edit>` (see `store_file.rs` and `memcache.rs`,
//! which load their contents fully into memory), so sub-iterators are plain
//! cursor indices over owned buffers rather than the seek-based
//! sub-iterators the spec describes over on-disk readers — same merge
//! result, and it lets a scanner outlive the store lock it was built under.

use std::collections::BTreeMap;

use crate::key::{Column, ColumnMatcher, Edit, RowKey, Timestamp, Value};

/// Applied by a region scanner to decide which rows/cells survive a scan
/// (§4.8). `filter_row` and `filter_cell` return `true` to discard the row;
/// `filter_all_remaining` stops the scan outright.
pub trait RowFilter {
    fn filter_row(&mut self, row: &[u8]) -> bool {
        let _ = row;
        false
    }
    fn filter_cell(&mut self, row: &[u8], column: &[u8], value: &[u8]) -> bool {
        let _ = (row, column, value);
        false
    }
    fn filter_all_remaining(&mut self) -> bool {
        false
    }
}

/// Merges one store's tiers (memcache, then store files newest-to-oldest)
/// into per-row column bundles.
pub struct StoreScanner {
    matchers: Vec<ColumnMatcher>,
    timestamp: Timestamp,
    tiers: Vec<Vec<Edit>>,
    positions: Vec<usize>,
}

impl StoreScanner {
    pub fn new(tiers: Vec<Vec<Edit>>, matchers: Vec<ColumnMatcher>, timestamp: Timestamp, first_row: &[u8]) -> Self {
        let positions = tiers
            .iter()
            .map(|tier| tier.partition_point(|e| e.key.row.as_slice() < first_row))
            .collect();
        StoreScanner {
            matchers,
            timestamp,
            tiers,
            positions,
        }
    }

    fn column_matches(&self, column: &[u8]) -> bool {
        self.matchers.is_empty() || self.matchers.iter().any(|m| m.matches(column))
    }

    /// The next row with at least one surviving (non-tombstoned, matching,
    /// in-range) cell, or `None` once every tier is exhausted.
    pub fn next(&mut self) -> Option<(RowKey, BTreeMap<Column, Vec<u8>>)> {
        loop {
            let row = self
                .tiers
                .iter()
                .enumerate()
                .filter_map(|(t, tier)| tier.get(self.positions[t]).map(|e| &e.key.row))
                .min()
                .cloned()?;

            let mut results = BTreeMap::new();
            let mut occluded = std::collections::BTreeSet::new();
            for (t, tier) in self.tiers.iter().enumerate() {
                let mut idx = self.positions[t];
                while idx < tier.len() && tier[idx].key.row == row {
                    let edit = &tier[idx];
                    if edit.key.timestamp <= self.timestamp && self.column_matches(&edit.key.column) {
                        if !results.contains_key(&edit.key.column) && !occluded.contains(&edit.key.column) {
                            match &edit.value {
                                Value::Put(data) => {
                                    results.insert(edit.key.column.clone(), data.clone());
                                }
                                Value::Delete => {
                                    occluded.insert(edit.key.column.clone());
                                }
                            }
                        }
                    }
                    idx += 1;
                }
                self.positions[t] = idx;
            }

            if !results.is_empty() {
                return Some((row, results));
            }
            // Every cell on this row was tombstoned or filtered out; move on.
        }
    }
}

/// Merges one `StoreScanner` per family into a single row-ordered stream,
/// applying an optional `RowFilter`.
pub struct RegionScanner {
    family_scanners: Vec<StoreScanner>,
    peeked: Vec<Option<(RowKey, BTreeMap<Column, Vec<u8>>)>>,
    filter: Option<Box<dyn RowFilter>>,
}

impl RegionScanner {
    pub fn new(family_scanners: Vec<StoreScanner>, filter: Option<Box<dyn RowFilter>>) -> Self {
        let peeked = vec![None; family_scanners.len()];
        RegionScanner {
            family_scanners,
            peeked,
            filter,
        }
    }

    pub fn next(&mut self) -> Option<(RowKey, BTreeMap<Column, Vec<u8>>)> {
        loop {
            if let Some(filter) = self.filter.as_mut() {
                if filter.filter_all_remaining() {
                    return None;
                }
            }

            for i in 0..self.family_scanners.len() {
                if self.peeked[i].is_none() {
                    self.peeked[i] = self.family_scanners[i].next();
                }
            }

            let row = self.peeked.iter().flatten().map(|(r, _)| r.clone()).min()?;

            let mut merged = BTreeMap::new();
            for slot in self.peeked.iter_mut() {
                if matches!(slot, Some((r, _)) if *r == row) {
                    let (_, cols) = slot.take().unwrap();
                    for (c, v) in cols {
                        merged.entry(c).or_insert(v);
                    }
                }
            }

            if let Some(filter) = self.filter.as_mut() {
                if filter.filter_row(&row) {
                    continue;
                }
                let mut discard = false;
                for (column, value) in &merged {
                    if filter.filter_cell(&row, column, value) {
                        discard = true;
                        break;
                    }
                }
                if discard {
                    continue;
                }
            }

            if merged.is_empty() {
                continue;
            }
            return Some((row, merged));
        }
    }
}
