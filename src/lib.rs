//! A per-region, per-column-family sorted key-value storage engine.
//!
//! ```text
//! Region
//!  ├─ Wal                  durable, shared by every Store in the region
//!  ├─ RowLockRegistry       per-row mutual exclusion for batch updates
//!  └─ Store (one per family)
//!      ├─ MemCache          live + snapshot in-memory buffer
//!      ├─ BloomFilter       skips store files that can't hold a row
//!      └─ StoreFile...      immutable, sorted, on disk
//! ```
//!
//! Reads walk tiers newest-to-oldest (memcache, then store files by
//! sequence id) applying the same tombstone-occlusion rule everywhere —
//! see [`occlusion`]. [`closest`] implements the separate "largest row at or
//! before" protocol scanners use for exclusive-end-bound seeks.

pub mod bloom;
pub mod closest;
pub mod config;
pub mod error;
pub mod filter;
pub mod fs_layout;
pub mod key;
pub mod memcache;
pub mod occlusion;
pub mod region;
pub mod rowlock;
pub mod scanner;
pub mod store;
pub mod store_file;
pub mod wal;

pub use error::{Error, Result};
pub use filter::{ColumnFilter, Filter, FilterSet};
pub use key::{Column, ColumnMatcher, ColumnSpec, Edit, Key, RowKey, Timestamp, Value, LATEST_TIMESTAMP};
pub use region::{Operation, Region, RegionInfo, RegionScannerHandle};
pub use scanner::{RegionScanner, RowFilter, StoreScanner};
