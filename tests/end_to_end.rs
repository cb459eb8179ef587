//! End-to-end scenarios (§8): each test drives a `Region` through the public
//! API the way a client would, rather than reaching into private fields the
//! way the `#[cfg(test)]` unit tests scattered through `src/` do.

use regionstore::{LATEST_TIMESTAMP, Operation, Region, RegionInfo};
use regionstore::config::{RegionConfig, StoreConfig};
use tempfile::tempdir;

fn open_region(root: &std::path::Path, name: &str, start: &[u8], end: &[u8], families: &[&[u8]], store_config: StoreConfig) -> Region {
    let info = RegionInfo {
        table: "t".into(),
        start_key: start.to_vec(),
        end_key: end.to_vec(),
        region_id: 1,
        encoded_name: name.into(),
    };
    let families: Vec<Vec<u8>> = families.iter().map(|f| f.to_vec()).collect();
    Region::open(root.to_path_buf(), info, &families, RegionConfig::default(), store_config).unwrap()
}

#[test]
fn put_get_single_version() {
    let dir = tempdir().unwrap();
    let region = open_region(dir.path(), "r1", b"", b"", &[b"cf"], StoreConfig::default());

    region
        .batch_update(b"r1", 100, vec![Operation::Put { column: b"cf:a".to_vec(), value: b"x".to_vec() }])
        .unwrap();

    let got = region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 1).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].1, b"x");

    let stale = region.get(b"r1", b"cf:a", 50, 1).unwrap();
    assert!(stale.is_empty());
}

#[test]
fn version_stack_newest_first_and_as_of_cutoff() {
    let dir = tempdir().unwrap();
    let region = open_region(dir.path(), "r1", b"", b"", &[b"cf"], StoreConfig::default());

    for (ts, val) in [(100, "x"), (200, "y"), (300, "z")] {
        region
            .batch_update(b"r1", ts, vec![Operation::Put { column: b"cf:a".to_vec(), value: val.as_bytes().to_vec() }])
            .unwrap();
    }

    let newest_two = region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 2).unwrap();
    assert_eq!(newest_two.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(), vec![b"z".to_vec(), b"y".to_vec()]);

    let at_250 = region.get(b"r1", b"cf:a", 250, 1).unwrap();
    assert_eq!(at_250.len(), 1);
    assert_eq!(at_250[0].1, b"y");
}

#[test]
fn tombstone_visibility_survives_flush_and_compaction() {
    let dir = tempdir().unwrap();
    let region = open_region(dir.path(), "r1", b"", b"", &[b"cf"], StoreConfig::default());

    region
        .batch_update(b"r1", 100, vec![Operation::Put { column: b"cf:a".to_vec(), value: b"x".to_vec() }])
        .unwrap();
    region.delete_all(b"r1", Some(b"cf:a"), 200).unwrap();

    assert!(region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 5).unwrap().is_empty());

    region.flushcache().unwrap();
    region.flushcache().unwrap();
    region.compact_stores().unwrap();

    assert!(region.get(b"r1", b"cf:a", LATEST_TIMESTAMP, 5).unwrap().is_empty());
}

#[test]
fn flush_and_read_through() {
    let dir = tempdir().unwrap();
    let region = open_region(dir.path(), "r1", b"", b"", &[b"cf"], StoreConfig::default());

    let rows: Vec<(&[u8], &str)> = vec![(b"a", "1"), (b"b", "2"), (b"c", "3"), (b"d", "4"), (b"e", "5")];
    for (row, val) in &rows {
        region
            .batch_update(row, 100, vec![Operation::Put { column: b"cf:x".to_vec(), value: val.as_bytes().to_vec() }])
            .unwrap();
    }

    assert!(region.flushcache().unwrap());
    assert!(!region.flushcache().unwrap(), "a second flush with nothing new should report no-op");

    for (row, val) in &rows {
        let got = region.get(row, b"cf:x", LATEST_TIMESTAMP, 1).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].1, val.as_bytes());
        assert_eq!(got[0].0.timestamp, 100);
    }
}

#[test]
fn compaction_caps_versions_and_drops_older_ones() {
    let dir = tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.max_versions = 2;
    let region = open_region(dir.path(), "r1", b"", b"", &[b"cf"], config);

    for (ts, val) in [(100, "v1"), (200, "v2"), (300, "v3")] {
        region
            .batch_update(b"r", ts, vec![Operation::Put { column: b"cf:a".to_vec(), value: val.as_bytes().to_vec() }])
            .unwrap();
        region.flushcache().unwrap();
    }

    region.compact_stores().unwrap();

    let got = region.get(b"r", b"cf:a", LATEST_TIMESTAMP, 10).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(), vec![b"v3".to_vec(), b"v2".to_vec()]);
}

#[test]
fn split_produces_disjoint_children_that_later_compact_away_their_references() {
    let dir = tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.desired_max_file_size = 1;
    let region = open_region(dir.path(), "parent", b"", b"", &[b"cf"], config);

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

    let a_region = Region::open(dir.path().to_path_buf(), a_info, &[b"cf".to_vec()], RegionConfig::default(), StoreConfig::default()).unwrap();
    let b_region = Region::open(dir.path().to_path_buf(), b_info, &[b"cf".to_vec()], RegionConfig::default(), StoreConfig::default()).unwrap();

    // Each child sees exactly its own rows.
    assert_eq!(a_region.get(b"a", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len(), 1);
    assert!(a_region.get(b"m", b"cf:x", LATEST_TIMESTAMP, 1).is_err());
    assert_eq!(b_region.get(b"m", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len(), 1);
    assert_eq!(b_region.get(b"z", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len(), 1);

    // Each child still reads correctly after compacting its single reference
    // file away into a materialised concrete one.
    a_region.compact_stores().unwrap();
    b_region.compact_stores().unwrap();
    assert_eq!(a_region.get(b"a", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len(), 1);
    assert_eq!(b_region.get(b"z", b"cf:x", LATEST_TIMESTAMP, 1).unwrap().len(), 1);
}
