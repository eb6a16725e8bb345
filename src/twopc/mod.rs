//! Two-phase-commit WAL tracking.
//!
//! A prepared transaction writes its prepare record into some WAL; until
//! the matching commit is flushed, that WAL must survive. Two structures
//! track the outstanding references:
//!
//! - [`PreparedLogTracker`]: WALs holding prepare records that have not yet
//!   been matched by a flushed commit. A min-heap paired with completion
//!   counts; an entry is logically removed once its completion count goes
//!   positive (lazy deletion, folded into the find-minimum operation).
//! - [`PrepLogRegistry`]: per-column-family floors for prepare records whose
//!   commits have landed in a memtable but are not yet flushed to a table
//!   file.
//!
//! A log reference migrates from the tracker into a memtable atomically, so
//! WAL-retention floors must consult the tracker before the registry.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
struct TrackerInner {
    /// WAL numbers that have held prepare records.
    min_heap: BinaryHeap<Reverse<u64>>,
    /// How many times each WAL's prepared section was marked flushed.
    completion_counts: HashMap<u64, u32>,
}

/// Tracks which WAL files still hold un-flushed prepared sections.
#[derive(Default)]
pub struct PreparedLogTracker {
    inner: Mutex<TrackerInner>,
}

impl PreparedLogTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `log` holds a prepare record.
    ///
    /// A WAL may hold several prepared sections; each call pushes another
    /// heap entry, matched later by one flush notification.
    pub fn mark_log_containing_prep_section(&self, log: u64) {
        assert!(log != 0, "WAL number 0 cannot hold a prepared section");
        let mut inner = self.inner.lock();
        inner.min_heap.push(Reverse(log));
        inner.completion_counts.entry(log).or_insert(0);
    }

    /// Record that one of `log`'s prepared sections was flushed.
    pub fn mark_log_having_prep_section_flushed(&self, log: u64) {
        assert!(log != 0, "WAL number 0 cannot hold a prepared section");
        let mut inner = self.inner.lock();
        let count = inner
            .completion_counts
            .get_mut(&log)
            .expect("flush of a prepared section that was never marked");
        *count += 1;
    }

    /// Smallest WAL number with an outstanding prepared section, or 0 when
    /// none remain.
    ///
    /// Entries whose completion count is positive are consumed on the way:
    /// the count is decremented and the heap entry popped.
    pub fn find_min_log_containing_outstanding_prep(&self) -> u64 {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        while let Some(&Reverse(min_log)) = inner.min_heap.peek() {
            match inner.completion_counts.get_mut(&min_log) {
                Some(count) if *count > 0 => {
                    // Marked as deleted from the heap; consume one mark.
                    *count -= 1;
                    inner.min_heap.pop();
                }
                _ => return min_log,
            }
        }

        0
    }
}

/// Prep-log floors of one column family's memtables.
///
/// The mutable memtable and the immutable pile each expose the minimum WAL
/// number whose prepared sections they contain; 0 means none.
#[derive(Debug, Default)]
pub struct CfPrepLogs {
    name: String,
    mem_min_prep_log: AtomicU64,
    imm_min_prep_log: AtomicU64,
}

impl CfPrepLogs {
    /// Column family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the mutable memtable's floor (0 = none).
    pub fn set_mem_min_prep_log(&self, log: u64) {
        self.mem_min_prep_log.store(log, Ordering::SeqCst);
    }

    /// Set the immutable memtables' floor (0 = none).
    pub fn set_imm_min_prep_log(&self, log: u64) {
        self.imm_min_prep_log.store(log, Ordering::SeqCst);
    }

    /// The mutable memtable's floor.
    pub fn mem_min_prep_log(&self) -> u64 {
        self.mem_min_prep_log.load(Ordering::SeqCst)
    }

    /// The immutable memtables' floor.
    pub fn imm_min_prep_log(&self) -> u64 {
        self.imm_min_prep_log.load(Ordering::SeqCst)
    }
}

/// Registry of per-column-family memtable prep-log floors.
#[derive(Default)]
pub struct PrepLogRegistry {
    column_families: Mutex<Vec<Arc<CfPrepLogs>>>,
}

impl PrepLogRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a column family and return its floor handle.
    pub fn register(&self, name: impl Into<String>) -> Arc<CfPrepLogs> {
        let cf = Arc::new(CfPrepLogs {
            name: name.into(),
            ..Default::default()
        });
        self.column_families.lock().push(Arc::clone(&cf));
        cf
    }

    /// Minimum prep log referenced by any memtable, excluding zeros;
    /// 0 when no memtable references one.
    pub fn min_prep_log_referenced_by_memtables(&self) -> u64 {
        let mut min_log = 0;

        for cf in self.column_families.lock().iter() {
            for log in [cf.imm_min_prep_log(), cf.mem_min_prep_log()] {
                if log > 0 && (min_log == 0 || log < min_log) {
                    min_log = log;
                }
            }
        }

        min_log
    }
}
