//! # slicedb
//!
//! Core of a log-structured merge-tree storage engine, extended with a
//! two-phase-commit-aware WAL retention policy and a file-slice compaction
//! scheme.
//!
//! ## Subsystems
//!
//! - **Version assembly**: incremental construction of immutable on-disk
//!   versions from version edits, maintaining ordering and non-overlap
//!   invariants, tracking moved-to-frozen files and slice references, and
//!   queueing background merge tasks
//! - **File lifecycle**: determining which WAL, table, manifest, and info
//!   log files are obsolete given the current version, outstanding prepared
//!   transactions, and in-flight compactions, then deleting or archiving
//!   them safely
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use slicedb::{FileLifecycle, Options, TableCache, VersionEdit, VersionSet};
//! use std::sync::Arc;
//!
//! let options = Arc::new(Options::default());
//! let versions = Arc::new(VersionSet::new(path, Arc::clone(&options), None));
//!
//! // Apply a compaction result
//! let mut edit = VersionEdit::new();
//! edit.delete_file(1, 12);
//! edit.add_file(2, new_file_meta);
//! versions.log_and_apply(&mut edit)?;
//!
//! // Reclaim whatever the new version obsoleted
//! lifecycle.delete_obsolete_files();
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod types;

// Internal modules
mod cache;
mod files;
mod iterator;
mod metrics;
mod twopc;
mod util;
mod version;
mod wal;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{DbPath, Options, SyncMode, TwoPcCompactionOptions, MAX_LEVELS};
pub use types::{InternalKey, ValueType};

// Version assembly
pub use version::{
    FileDescriptor, FileMetadata, FileSlice, MergeTask, ObsoleteSink, SuperVersion, Version,
    VersionBuilder, VersionEdit, VersionSet,
};

// File lifecycle
pub use files::{
    CandidateFileInfo, EventListener, FileLifecycle, JobContext, TableFileDeletionInfo,
};

// Two-phase commit tracking
pub use twopc::{CfPrepLogs, PrepLogRegistry, PreparedLogTracker};

// Iterators
pub use iterator::{EntryIterator, FileSliceIterator, InternalIterator};

// Cache
pub use cache::{TableCache, TableCacheStats, TableHandle, TableReader};

// WAL bookkeeping
pub use wal::{AliveLogFile, LogState, NullWalWriter, WalManager, WalWriterHandle};

// File naming
pub use util::filename;
pub use util::{BytewiseComparator, Comparator, FileType, InternalKeyComparator};

// Metrics
pub use metrics::{two_pc_metrics, Counter, Gauge, TwoPcMetrics};
