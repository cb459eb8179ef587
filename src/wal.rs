//! Write-ahead log client view (§4, §6).
//!
//! Every edit is durable in the WAL before it becomes visible in a memcache.
//! A single `Wal` is shared by every family store of a region (and, in the
//! original system, by every region hosted by a server); it hands out
//! monotonically increasing sequence ids and guarantees that a batch of
//! edits sharing one sequence id lands as a single atomic on-disk record.
//!
//! On-disk format follows the teacher's length-prefixed bincode framing:
//! `[u32 big-endian length][bincode(WalRecord)]` repeated to EOF.

use std::{
    fs::{File, OpenOptions},
    io::{BufReader, Read, Result as IoResult, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    sync::Mutex,
};

use crate::key::Edit;

pub type SequenceId = u64;

/// One durable WAL record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum WalRecord {
    /// A batch of edits against one family, sharing one sequence id.
    Edit {
        region: String,
        family: Vec<u8>,
        sequence: SequenceId,
        edits: Vec<Edit>,
    },
    /// Opened when a flush snapshot is taken; marks the sequence id the
    /// flush is durable up to once matched by a `FlushComplete`.
    FlushBegin { region: String, sequence: SequenceId },
    /// Recovery may skip any `Edit` record with sequence <= this for the
    /// named region.
    FlushComplete { region: String, sequence: SequenceId },
}

impl WalRecord {
    pub fn sequence(&self) -> SequenceId {
        match self {
            WalRecord::Edit { sequence, .. } => *sequence,
            WalRecord::FlushBegin { sequence, .. } => *sequence,
            WalRecord::FlushComplete { sequence, .. } => *sequence,
        }
    }
}

pub struct Wal {
    file: Mutex<File>,
    path: PathBuf,
    next_sequence: AtomicU64,
}

impl Wal {
    /// Open (or create) the log at `path` and replay it, handing the
    /// replayed records to `on_record` in append order. The next sequence
    /// id is seeded one past the largest one observed on replay.
    pub fn open(path: impl AsRef<Path>, mut on_record: impl FnMut(WalRecord)) -> IoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;

        let mut max_seq = 0u64;
        let mut reader = BufReader::new(file.try_clone()?);
        loop {
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            if reader.read_exact(&mut buf).is_err() {
                break;
            }
            let record: WalRecord = match bincode::deserialize(&buf) {
                Ok(r) => r,
                Err(_) => break,
            };
            max_seq = max_seq.max(record.sequence());
            on_record(record);
        }

        let mut file = file;
        file.seek(SeekFrom::End(0))?;

        Ok(Wal {
            file: Mutex::new(file),
            path,
            next_sequence: AtomicU64::new(max_seq + 1),
        })
    }

    /// Allocate a fresh, unique sequence id.
    pub fn next_sequence(&self) -> SequenceId {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Append one record, fsync-style flush included. Returns once the
    /// record is durable.
    pub fn append(&self, record: &WalRecord) -> IoResult<()> {
        let buf = bincode::serialize(record).expect("WalRecord is always serializable");
        let len = (buf.len() as u32).to_be_bytes();
        let mut file = self.file.lock().unwrap();
        file.write_all(&len)?;
        file.write_all(&buf)?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
