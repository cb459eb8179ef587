//! Filesystem layout helpers (§6). The distributed filesystem itself is an
//! external collaborator — these functions only compute the paths the rest
//! of the engine reads and writes, assuming atomic rename, hierarchical
//! directories, random-access read and append-style sequential write.

use std::path::{Path, PathBuf};

pub fn region_dir(root: &Path, table: &str, encoded_region: &str) -> PathBuf {
    root.join(table).join(encoded_region)
}

pub fn family_dir(region_dir: &Path, family: &[u8]) -> PathBuf {
    region_dir.join(String::from_utf8_lossy(family).to_string())
}

pub fn mapfiles_dir(family_dir: &Path) -> PathBuf {
    family_dir.join("mapfiles")
}

pub fn info_dir(family_dir: &Path) -> PathBuf {
    family_dir.join("info")
}

pub fn filter_path(family_dir: &Path) -> PathBuf {
    family_dir.join("filter").join("filter")
}

pub fn compaction_dir(root: &Path, table: &str, encoded_region: &str) -> PathBuf {
    root.join(table).join("compaction.dir").join(encoded_region)
}

pub fn splits_dir(region_dir: &Path, child_encoded: &str) -> PathBuf {
    region_dir.join("splits").join(child_encoded)
}

pub fn merges_dir(region_dir: &Path) -> PathBuf {
    region_dir.join("merges")
}

pub fn old_log_file(region_dir: &Path) -> PathBuf {
    region_dir.join("oldlogfile.log")
}

/// Store file name: `^(\d+)(?:\.(.+))?$` — group 1 is the file id, an
/// optional group 2 is the parent encoded region name marking a reference.
pub fn file_name(file_id: u64, parent_encoded_region: Option<&str>) -> String {
    match parent_encoded_region {
        Some(parent) => format!("{:010}.{}", file_id, parent),
        None => format!("{:010}", file_id),
    }
}

pub fn parse_file_name(name: &str) -> Option<(u64, Option<String>)> {
    let mut parts = name.splitn(2, '.');
    let id_part = parts.next()?;
    if id_part.is_empty() || !id_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = id_part.parse::<u64>().ok()?;
    Some((id, parts.next().map(|s| s.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_round_trips() {
        assert_eq!(parse_file_name(&file_name(7, None)), Some((7, None)));
        assert_eq!(
            parse_file_name(&file_name(7, Some("parentregion"))),
            Some((7, Some("parentregion".to_string())))
        );
    }

    #[test]
    fn parse_rejects_non_numeric_prefix() {
        assert_eq!(parse_file_name("abc.def"), None);
    }
}
