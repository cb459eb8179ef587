//! Error kinds (§7). A single closed enum, propagated with `?` everywhere.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("row {row:?} is outside region range [{start:?}, {end:?})")]
    OutOfRangeRow {
        row: Vec<u8>,
        start: Vec<u8>,
        end: Vec<u8>,
    },

    #[error("unknown column family {0:?}")]
    UnknownFamily(Vec<u8>),

    #[error("region is closed")]
    RegionClosed,

    #[error("flush of region {region} at sequence {sequence} failed before flush-complete; WAL replay required")]
    DroppedSnapshot { region: String, sequence: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid column matcher: {0}")]
    InvalidColumnMatcher(String),

    #[error("cannot merge regions: {0}")]
    MergePreconditions(String),

    #[error("row lock for {0:?} was reclaimed by lease expiry")]
    RowLockExpired(Vec<u8>),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
