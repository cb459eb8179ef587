//! Sorted, immutable on-disk store file (§4.3).
//!
//! Format mirrors the teacher's SSTable: a big-endian `u32` entry count
//! followed by length-prefixed bincode-encoded (Key, Value) pairs in
//! ascending [`Key`] order. Reads load the whole file into memory, matching
//! the teacher's `SSTableReader::open` — adequate at this scale and keeps
//! `get_closest`/`final_key`/`mid_key` simple binary searches over a `Vec`.
//!
//! A sidecar info file next to the data file carries the maximum WAL
//! sequence id the data file reflects; it is written only after the data
//! file is complete, so a reader never observes a store file without
//! knowing how durable it is.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use crate::key::{Edit, Key, RowKey};
use crate::wal::SequenceId;

/// Which half of a parent file a reference exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Half {
    Bottom,
    Top,
}

/// On-disk contents of a reference file (§6): everything needed to locate
/// the parent's data and filter it to one half.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReferenceDescriptor {
    pub parent_encoded_region: String,
    pub parent_file_id: u64,
    pub split_key: RowKey,
    pub half: Half,
}

/// Either a concrete on-disk file or a reference into a parent's file,
/// filtered to one half by `split_key` (§3, §9).
pub enum StoreFileOrigin {
    Concrete,
    Reference(ReferenceDescriptor),
}

/// An immutable sorted sequence of (Key, Value) with the max sequence id it
/// covers. Entries are loaded and, for references, filtered once at open
/// time.
pub struct StoreFile {
    pub file_id: u64,
    pub sequence_id: SequenceId,
    pub origin: StoreFileOrigin,
    entries: Vec<Edit>,
}

fn write_entries(path: &Path, entries: &[Edit]) -> std::io::Result<()> {
    let f = File::create(path)?;
    let mut w = BufWriter::new(f);
    w.write_all(&(entries.len() as u32).to_be_bytes())?;
    for edit in entries {
        let buf = bincode::serialize(edit).expect("Edit is always serializable");
        w.write_all(&(buf.len() as u32).to_be_bytes())?;
        w.write_all(&buf)?;
    }
    w.flush()
}

fn read_entries(path: &Path) -> std::io::Result<Vec<Edit>> {
    let f = File::open(path)?;
    let mut r = BufReader::new(f);
    let mut count_buf = [0u8; 4];
    r.read_exact(&mut count_buf)?;
    let count = u32::from_be_bytes(count_buf) as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        let edit: Edit = bincode::deserialize(&buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        entries.push(edit);
    }
    Ok(entries)
}

fn write_info(path: &Path, sequence_id: SequenceId) -> std::io::Result<()> {
    let mut f = File::create(path)?;
    f.write_all(&sequence_id.to_be_bytes())
}

fn read_info(path: &Path) -> std::io::Result<SequenceId> {
    let mut f = File::open(path)?;
    let mut buf = [0u8; 8];
    f.read_exact(&mut buf)?;
    Ok(SequenceId::from_be_bytes(buf))
}

impl StoreFile {
    /// Write a brand-new concrete store file: data first, then — once the
    /// data is durable — the info sidecar. Entries must already be sorted
    /// in [`Key`] order.
    pub fn create(
        data_path: &Path,
        info_path: &Path,
        file_id: u64,
        sequence_id: SequenceId,
        entries: Vec<Edit>,
    ) -> std::io::Result<StoreFile> {
        write_entries(data_path, &entries)?;
        write_info(info_path, sequence_id)?;
        Ok(StoreFile {
            file_id,
            sequence_id,
            origin: StoreFileOrigin::Concrete,
            entries,
        })
    }

    pub fn open_concrete(data_path: &Path, info_path: &Path, file_id: u64) -> std::io::Result<StoreFile> {
        let entries = read_entries(data_path)?;
        let sequence_id = read_info(info_path)?;
        Ok(StoreFile {
            file_id,
            sequence_id,
            origin: StoreFileOrigin::Concrete,
            entries,
        })
    }

    /// Write a reference descriptor at `ref_path`, then open it by reading
    /// the parent's already-open entries and filtering to the chosen half.
    pub fn create_reference(
        ref_path: &Path,
        file_id: u64,
        sequence_id: SequenceId,
        descriptor: ReferenceDescriptor,
        parent_entries: &[Edit],
    ) -> std::io::Result<StoreFile> {
        let buf = bincode::serialize(&descriptor).expect("ReferenceDescriptor is always serializable");
        std::fs::write(ref_path, buf)?;
        Ok(Self::materialize_reference(file_id, sequence_id, descriptor, parent_entries))
    }

    pub fn materialize_reference(
        file_id: u64,
        sequence_id: SequenceId,
        descriptor: ReferenceDescriptor,
        parent_entries: &[Edit],
    ) -> StoreFile {
        let entries = filter_half(parent_entries, &descriptor.split_key, descriptor.half);
        StoreFile {
            file_id,
            sequence_id,
            origin: StoreFileOrigin::Reference(descriptor),
            entries,
        }
    }

    pub fn read_reference_descriptor(ref_path: &Path) -> std::io::Result<ReferenceDescriptor> {
        let buf = std::fs::read(ref_path)?;
        bincode::deserialize(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.origin, StoreFileOrigin::Reference(_))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Edit] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edit> {
        self.entries.iter()
    }

    /// Smallest Key >= `search` (or the largest Key <= `search` when
    /// `before_or_equal` is set).
    pub fn get_closest(&self, search: &Key, before_or_equal: bool) -> Option<&Edit> {
        let idx = self.entries.partition_point(|e| &e.key < search);
        if before_or_equal {
            if idx < self.entries.len() && &self.entries[idx].key == search {
                return Some(&self.entries[idx]);
            }
            idx.checked_sub(1).map(|i| &self.entries[i])
        } else {
            self.entries.get(idx)
        }
    }

    pub fn final_key(&self) -> Option<&Key> {
        self.entries.last().map(|e| &e.key)
    }

    /// A key partitioning the file roughly in half, for split consideration.
    pub fn mid_key(&self) -> Option<&Key> {
        if self.entries.is_empty() {
            return None;
        }
        Some(&self.entries[self.entries.len() / 2].key)
    }

    /// The on-disk file name this file would be written/removed under,
    /// following the `{id}` / `{id}.{parent}` convention (§6).
    pub fn disk_name(&self) -> String {
        match &self.origin {
            StoreFileOrigin::Concrete => crate::fs_layout::file_name(self.file_id, None),
            StoreFileOrigin::Reference(d) => crate::fs_layout::file_name(self.file_id, Some(&d.parent_encoded_region)),
        }
    }

    pub fn byte_size_estimate(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| {
                let val_len = match &e.value {
                    crate::key::Value::Put(v) => v.len(),
                    crate::key::Value::Delete => 0,
                };
                (e.key.row.len() + e.key.column.len() + 8 + val_len) as u64
            })
            .sum()
    }
}

fn filter_half(entries: &[Edit], split_key: &RowKey, half: Half) -> Vec<Edit> {
    entries
        .iter()
        .filter(|e| match half {
            Half::Bottom => e.key.row < *split_key,
            Half::Top => e.key.row >= *split_key,
        })
        .cloned()
        .collect()
}

/// Convenience for callers that just need a concrete file's path pair given
/// a family directory.
pub fn data_and_info_paths(family_dir: &Path, file_id: u64, parent_encoded: Option<&str>) -> (PathBuf, PathBuf) {
    let name = crate::fs_layout::file_name(file_id, parent_encoded);
    (
        crate::fs_layout::mapfiles_dir(family_dir).join(&name),
        crate::fs_layout::info_dir(family_dir).join(&name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Value;
    use tempfile::tempdir;

    fn edit(row: &[u8], col: &[u8], ts: u64, val: &str) -> Edit {
        Edit {
            key: Key::new(row.to_vec(), col.to_vec(), ts),
            value: Value::Put(val.as_bytes().to_vec()),
        }
    }

    #[test]
    fn create_and_reopen_round_trips_entries_and_sequence() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        let info = dir.path().join("info");

        let mut entries = vec![
            edit(b"a", b"cf:x", 100, "1"),
            edit(b"b", b"cf:x", 100, "2"),
            edit(b"c", b"cf:x", 100, "3"),
        ];
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let sf = StoreFile::create(&data, &info, 1, 42, entries).unwrap();
        assert_eq!(sf.sequence_id, 42);

        let reopened = StoreFile::open_concrete(&data, &info, 1).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.sequence_id, 42);
        assert_eq!(reopened.final_key().unwrap().row, b"c");
    }

    #[test]
    fn get_closest_searches_both_directions() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        let info = dir.path().join("info");
        let entries = vec![edit(b"b", b"cf:x", 100, "1"), edit(b"d", b"cf:x", 100, "2")];
        let sf = StoreFile::create(&data, &info, 1, 1, entries).unwrap();

        let search = Key::new(b"c".to_vec(), b"cf:x".to_vec(), 100);
        assert_eq!(sf.get_closest(&search, false).unwrap().key.row, b"d");
        assert_eq!(sf.get_closest(&search, true).unwrap().key.row, b"b");
    }

    #[test]
    fn reference_filters_to_chosen_half() {
        let parent = vec![
            edit(b"a", b"cf:x", 100, "1"),
            edit(b"m", b"cf:x", 100, "2"),
            edit(b"z", b"cf:x", 100, "3"),
        ];
        let bottom = StoreFile::materialize_reference(
            2,
            1,
            ReferenceDescriptor {
                parent_encoded_region: "parent".into(),
                parent_file_id: 1,
                split_key: b"m".to_vec(),
                half: Half::Bottom,
            },
            &parent,
        );
        assert_eq!(bottom.len(), 1);
        assert_eq!(bottom.entries()[0].key.row, b"a");

        let top = StoreFile::materialize_reference(
            3,
            1,
            ReferenceDescriptor {
                parent_encoded_region: "parent".into(),
                parent_file_id: 1,
                split_key: b"m".to_vec(),
                half: Half::Top,
            },
            &parent,
        );
        assert_eq!(top.len(), 2);
    }
}
