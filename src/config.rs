//! Ambient tunables (§4.9). Grouped the way the teacher's `CompactionOptions`
//! groups compaction knobs, but covering the whole store/region lifecycle.

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Minimum file count that forces `needs_compaction()` to report true.
    pub compaction_threshold: usize,
    /// Maximum non-tombstone versions per (row, column) kept by compaction.
    pub max_versions: usize,
    /// Store-file size (bytes) above which a region is a split candidate.
    pub desired_max_file_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            compaction_threshold: 3,
            max_versions: 3,
            desired_max_file_size: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Aggregate memcache size (bytes) across all families that triggers an
    /// asynchronous flush request.
    pub memcache_flush_size: u64,
    /// Aggregate memcache size (bytes) above which `batch_update` blocks
    /// until a flush has drained the region.
    pub memcache_blocking_size: u64,
    /// Wake frequency (ms) for timed waits on flush/compact/close/split
    /// quiescence, so shutdown signals can propagate.
    pub wait_wake_frequency_ms: u64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        RegionConfig {
            memcache_flush_size: 64 * 1024 * 1024,
            memcache_blocking_size: 128 * 1024 * 1024,
            wait_wake_frequency_ms: 50,
        }
    }
}
