//! Version - immutable snapshot of active SSTable files.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::metrics::two_pc_metrics;

use super::{FileDescriptor, FileMetadata, FileSlice};

/// Collection point for metadata whose last owner went away.
///
/// Versions deliver fully-unreferenced file metas here on drop; the
/// obsolete-file finder drains it into a purge job. The meta keeps its
/// cached table handle attached so the purger can release and evict it.
#[derive(Debug, Default)]
pub struct ObsoleteSink {
    files: Mutex<Vec<Arc<FileMetadata>>>,
}

impl ObsoleteSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a dead meta.
    pub fn push(&self, meta: Arc<FileMetadata>) {
        self.files.lock().push(meta);
    }

    /// Drain metas whose file number is below `min_pending_output`;
    /// newer metas stay queued for a later pass.
    pub fn drain_below(&self, min_pending_output: u64) -> Vec<Arc<FileMetadata>> {
        let mut files = self.files.lock();
        let (ready, keep): (Vec<_>, Vec<_>) = files
            .drain(..)
            .partition(|f| f.number() < min_pending_output);
        *files = keep;
        ready
    }

    /// Number of queued metas.
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Whether the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

/// An immutable snapshot of all table files at a point in time.
///
/// Levels hold the live file hierarchy; the frozen pool holds files moved
/// out of the hierarchy but kept alive because slices still read from them.
/// A version owns one `refs` on every file it holds and releases them all
/// on drop.
#[derive(Debug)]
pub struct Version {
    /// Files at each level. Level 0 is ordered newest-first by sequence
    /// number and may overlap; higher levels are sorted and non-overlapping.
    files: Vec<Vec<Arc<FileMetadata>>>,
    /// Frozen files by number.
    frozen: HashMap<u64, Arc<FileMetadata>>,
    /// Total file size at each level.
    level_sizes: Vec<u64>,
    /// Monotonic version number for diagnostics.
    version_number: u64,
    /// Where dead metas are delivered on drop.
    obsolete_sink: Option<Arc<ObsoleteSink>>,
}

impl Version {
    /// Create an empty version.
    pub fn new(
        num_levels: usize,
        version_number: u64,
        obsolete_sink: Option<Arc<ObsoleteSink>>,
    ) -> Self {
        Self {
            files: vec![Vec::new(); num_levels],
            frozen: HashMap::new(),
            level_sizes: vec![0; num_levels],
            version_number,
            obsolete_sink,
        }
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.files.len()
    }

    /// This version's number.
    pub fn version_number(&self) -> u64 {
        self.version_number
    }

    /// Get files at a specific level.
    pub fn files(&self, level: usize) -> &[Arc<FileMetadata>] {
        &self.files[level]
    }

    /// Get number of files at a level.
    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Get total number of files across all levels (frozen pool excluded).
    pub fn total_files(&self) -> usize {
        self.files.iter().map(|f| f.len()).sum()
    }

    /// Get total size at a level.
    pub fn level_size(&self, level: usize) -> u64 {
        self.level_sizes[level]
    }

    /// Frozen files, in no particular order.
    pub fn frozen_files(&self) -> Vec<Arc<FileMetadata>> {
        self.frozen.values().cloned().collect()
    }

    /// Number of frozen files.
    pub fn frozen_count(&self) -> usize {
        self.frozen.len()
    }

    /// Whether the frozen pool holds the given file number.
    pub fn frozen_contains(&self, number: u64) -> bool {
        self.frozen.contains_key(&number)
    }

    /// Register a file at a level. The version becomes an owner.
    pub fn add_file(&mut self, level: usize, file: Arc<FileMetadata>) {
        file.ref_inc();
        self.level_sizes[level] += file.file_size();
        self.files[level].push(file);
    }

    /// Register a file in the frozen pool. Idempotent per file number.
    pub fn add_frozen_file(&mut self, file: Arc<FileMetadata>) {
        if !self.frozen.contains_key(&file.number()) {
            file.ref_inc();
            self.frozen.insert(file.number(), file);
        }
    }

    /// Attach a slice to a file at `level`, taking a slice reference on the
    /// parent.
    pub fn add_file_slice(&mut self, level: usize, file: &Arc<FileMetadata>, slice: FileSlice) {
        debug_assert_eq!(slice.output_file_number(), file.number());
        debug_assert!(level < self.files.len());

        slice.parent().slice_ref_inc();
        file.attach_slice(slice);
        two_pc_metrics().slices_attached.inc();
    }

    /// Collect descriptors of every file this version keeps alive.
    pub fn add_live_files(&self, live: &mut Vec<FileDescriptor>) {
        for level_files in &self.files {
            for f in level_files {
                live.push(f.fd());
            }
        }
        for f in self.frozen.values() {
            live.push(f.fd());
        }
    }

    /// Iterate over all level files as `(level, file)` pairs.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetadata>)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }
}

impl Drop for Version {
    fn drop(&mut self) {
        let frozen: Vec<_> = self.frozen.drain().map(|(_, f)| f).collect();
        let leveled: Vec<_> = self.files.iter_mut().flat_map(std::mem::take).collect();

        for file in leveled.into_iter().chain(frozen) {
            if file.unref_is_last() {
                match &self.obsolete_sink {
                    Some(sink) => sink.push(file),
                    // No sink: nothing will purge this meta, so release the
                    // cached handle here.
                    None => {
                        file.take_table_handle();
                    }
                }
            }
        }
    }
}
