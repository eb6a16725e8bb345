//! Configuration options for slicedb.

use std::path::PathBuf;

/// Maximum number of levels in the LSM tree.
pub const MAX_LEVELS: usize = 7;

/// Default cadence of the full-directory obsolete-file scan (6 hours).
pub const DEFAULT_DELETE_OBSOLETE_FILES_PERIOD_MICROS: u64 = 6 * 60 * 60 * 1_000_000;

/// Default number of rotated info log files to retain.
pub const DEFAULT_KEEP_LOG_FILE_NUM: usize = 1000;

/// Default number of open table handles the table cache retains.
pub const DEFAULT_TABLE_CACHE_CAPACITY: usize = 1000;

/// WAL sync mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Sync on every manifest write (safest, slowest).
    Always,
    /// Let the OS decide when to sync.
    #[default]
    None,
}

/// A storage path with a target size, indexed by `path_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPath {
    /// Directory for table files assigned to this path.
    pub path: PathBuf,
    /// Soft size target for this path in bytes (0 = unbounded).
    pub target_size: u64,
}

impl DbPath {
    /// Create a new path entry.
    pub fn new(path: impl Into<PathBuf>, target_size: u64) -> Self {
        Self {
            path: path.into(),
            target_size,
        }
    }
}

/// Options for the file-slice compaction scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoPcCompactionOptions {
    /// Lowest level eligible for slice-based compaction.
    pub start_level: usize,
    /// Slice count per file above which a merge task is queued.
    pub merge_threshold: usize,
}

impl Default for TwoPcCompactionOptions {
    fn default() -> Self {
        Self {
            start_level: 1,
            merge_threshold: 5,
        }
    }
}

/// Engine configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    // === Layout ===
    /// Additional storage paths for table files; `path_id` indexes this
    /// array. When empty, the database directory is the only path.
    pub db_paths: Vec<DbPath>,

    /// Directory for WAL files. Empty means the database directory.
    pub wal_dir: PathBuf,

    /// Directory for info log files. Empty means the database directory.
    pub db_log_dir: PathBuf,

    // === Obsolete-file handling ===
    /// Cadence of the full-directory scan in microseconds.
    /// Zero means every discovery pass does a full scan.
    pub delete_obsolete_files_period_micros: u64,

    /// Upper bound on the WAL recycle list length.
    pub recycle_log_file_num: usize,

    /// WAL time-to-live in seconds. If > 0, delete-eligible WALs are
    /// archived instead of deleted.
    pub wal_ttl_seconds: u64,

    /// Archived WAL size cap in megabytes. If > 0, delete-eligible WALs are
    /// archived instead of deleted.
    pub wal_size_limit_mb: u64,

    /// Number of rotated info log files to retain.
    pub keep_log_file_num: usize,

    // === Consistency ===
    /// Run level-invariant assertions even in release builds.
    pub force_consistency_checks: bool,

    // === Two-phase commit ===
    /// Track WALs referenced by un-flushed prepared sections.
    pub allow_2pc: bool,

    /// Writers append to the log queue without the database mutex.
    pub two_write_queues: bool,

    /// Slice-compaction tuning.
    pub two_pc_compaction: TwoPcCompactionOptions,

    // === Ambient ===
    /// Number of open table handles the table cache retains.
    pub table_cache_capacity: usize,

    /// Manifest sync mode.
    pub sync_mode: SyncMode,

    /// Manifest size after which the version set rolls to a new manifest.
    pub max_manifest_file_size: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            db_paths: Vec::new(),
            wal_dir: PathBuf::new(),
            db_log_dir: PathBuf::new(),
            delete_obsolete_files_period_micros: DEFAULT_DELETE_OBSOLETE_FILES_PERIOD_MICROS,
            recycle_log_file_num: 0,
            wal_ttl_seconds: 0,
            wal_size_limit_mb: 0,
            keep_log_file_num: DEFAULT_KEEP_LOG_FILE_NUM,
            force_consistency_checks: false,
            allow_2pc: false,
            two_write_queues: false,
            two_pc_compaction: TwoPcCompactionOptions::default(),
            table_cache_capacity: DEFAULT_TABLE_CACHE_CAPACITY,
            sync_mode: SyncMode::default(),
            max_manifest_file_size: 64 * 1024 * 1024,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether delete-eligible WAL files are archived instead of deleted.
    pub fn wal_archival_enabled(&self) -> bool {
        self.wal_ttl_seconds > 0 || self.wal_size_limit_mb > 0
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.keep_log_file_num == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "keep_log_file_num must be at least 1".into(),
            ));
        }

        if self.table_cache_capacity == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "table_cache_capacity must be at least 1".into(),
            ));
        }

        if self.two_pc_compaction.start_level >= MAX_LEVELS {
            return Err(crate::Error::InvalidConfiguration(format!(
                "two_pc_compaction.start_level must be below {}",
                MAX_LEVELS
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = Options::default();
        assert!(options.validate().is_ok());
        assert!(!options.wal_archival_enabled());
        assert_eq!(options.two_pc_compaction.start_level, 1);
        assert_eq!(options.two_pc_compaction.merge_threshold, 5);
    }

    #[test]
    fn test_wal_archival_enabled() {
        let mut options = Options::default();
        options.wal_ttl_seconds = 60;
        assert!(options.wal_archival_enabled());

        options.wal_ttl_seconds = 0;
        options.wal_size_limit_mb = 16;
        assert!(options.wal_archival_enabled());
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let mut options = Options::default();
        options.keep_log_file_num = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_start_level() {
        let mut options = Options::default();
        options.two_pc_compaction.start_level = MAX_LEVELS;
        assert!(options.validate().is_err());
    }
}
