//! Table cache for SSTable reader handles.
//!
//! Caches open reader handles keyed by file number so repeated reads avoid
//! re-opening files. Handles pin their entry: an entry is only evictable
//! once no handle to it is held.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::options::DbPath;
use crate::util::filename::table_file_path;
use crate::version::FileDescriptor;
use crate::{Error, Result};

/// An open table reader.
///
/// The on-disk table format is external to this crate; the reader carries
/// what the engine core needs: the file's identity and verified size.
#[derive(Debug)]
pub struct TableReader {
    file_number: u64,
    path: PathBuf,
    file_size: u64,
}

impl TableReader {
    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get the verified file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

/// A pinned handle to a cached table reader.
///
/// Dropping the handle releases the pin; the cache may then evict the entry
/// under capacity pressure.
#[derive(Debug, Clone)]
pub struct TableHandle {
    reader: Arc<TableReader>,
}

impl TableHandle {
    /// Access the table reader behind this handle.
    pub fn reader(&self) -> &TableReader {
        &self.reader
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.reader.file_number
    }
}

/// Hit/miss counters for the cache.
#[derive(Debug, Default)]
pub struct TableCacheStats {
    /// Lookups served from the cache.
    pub hits: AtomicU64,
    /// Lookups that opened the file.
    pub misses: AtomicU64,
    /// Entries removed by eviction or explicit `evict`.
    pub evictions: AtomicU64,
}

/// Cache of open table reader handles keyed by file number.
pub struct TableCache {
    /// Storage paths; a descriptor's `path_id` selects one.
    db_paths: Vec<DbPath>,
    /// Maximum number of entries retained.
    capacity: usize,
    /// Open readers by file number.
    readers: Mutex<HashMap<u64, Arc<TableReader>>>,
    stats: TableCacheStats,
}

impl TableCache {
    /// Create a new table cache over the given storage paths.
    pub fn new(db_paths: Vec<DbPath>, capacity: usize) -> Self {
        assert!(!db_paths.is_empty(), "table cache needs at least one path");
        Self {
            db_paths,
            capacity: capacity.max(1),
            readers: Mutex::new(HashMap::new()),
            stats: TableCacheStats::default(),
        }
    }

    /// Find or open the reader for a table file, returning a pinned handle.
    pub fn find_table(&self, fd: &FileDescriptor) -> Result<TableHandle> {
        {
            let readers = self.readers.lock();
            if let Some(reader) = readers.get(&fd.number) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(TableHandle {
                    reader: Arc::clone(reader),
                });
            }
        }

        // Open outside the lock; losing a race just re-verifies the file.
        let path = table_file_path(&self.db_paths, fd.number, fd.path_id);
        let meta = std::fs::metadata(&path)
            .map_err(|e| Error::NotFound(format!("table {}: {}", path.display(), e)))?;

        let reader = Arc::new(TableReader {
            file_number: fd.number,
            path,
            file_size: meta.len(),
        });

        let mut readers = self.readers.lock();
        let entry = readers
            .entry(fd.number)
            .or_insert_with(|| Arc::clone(&reader));
        let handle = TableHandle {
            reader: Arc::clone(entry),
        };
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        self.evict_unpinned_locked(&mut readers);
        Ok(handle)
    }

    /// Remove a file's entry, typically because the file was deleted.
    pub fn evict(&self, file_number: u64) {
        if self.readers.lock().remove(&file_number).is_some() {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of cached readers.
    pub fn len(&self) -> usize {
        self.readers.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.readers.lock().is_empty()
    }

    /// Cache statistics.
    pub fn stats(&self) -> &TableCacheStats {
        &self.stats
    }

    /// Drop unpinned entries until the cache fits its capacity.
    fn evict_unpinned_locked(&self, readers: &mut HashMap<u64, Arc<TableReader>>) {
        if readers.len() <= self.capacity {
            return;
        }
        let excess = readers.len() - self.capacity;
        let victims: Vec<u64> = readers
            .iter()
            .filter(|(_, r)| Arc::strong_count(r) == 1)
            .map(|(n, _)| *n)
            .take(excess)
            .collect();
        for number in victims {
            readers.remove(&number);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
