//! Snapshot of one obsolete-file discovery pass.

use std::sync::Arc;

use crate::version::{FileDescriptor, FileMetadata};
use crate::wal::WalWriterHandle;

/// A file name observed by the full scan, with the storage path it came
/// from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidateFileInfo {
    /// Bare file name.
    pub file_name: String,
    /// Index into the configured storage paths.
    pub path_id: u32,
}

impl CandidateFileInfo {
    /// Create a candidate entry.
    pub fn new(file_name: impl Into<String>, path_id: u32) -> Self {
        Self {
            file_name: file_name.into(),
            path_id,
        }
    }
}

/// Everything one discovery pass learned, captured under the database
/// mutex and consumed by the purger after the mutex is released.
#[derive(Default)]
pub struct JobContext {
    /// Identifier for log events of this job.
    pub job_id: u64,

    /// Dead table-file metas handed over by the version set.
    pub sst_delete_files: Vec<Arc<FileMetadata>>,
    /// Retired manifest file names.
    pub manifest_delete_files: Vec<String>,
    /// WAL numbers that graduated out of the alive queue.
    pub log_delete_files: Vec<u64>,
    /// Snapshot of the recycle list.
    pub log_recycle_files: Vec<u64>,
    /// Everything the full directory scan saw.
    pub full_scan_candidate_files: Vec<CandidateFileInfo>,
    /// Descriptors of every file the current version keeps alive.
    pub sst_live: Vec<FileDescriptor>,

    /// Live manifest number; 0 means discovery never ran.
    pub manifest_file_number: u64,
    /// Manifest being written before CURRENT switches; 0 when idle.
    pub pending_manifest_file_number: u64,
    /// WAL floor: logs below this number are no longer needed.
    pub log_number: u64,
    /// Previous log number, always kept.
    pub prev_log_number: u64,
    /// Files numbered at or above this are in-flight compaction outputs.
    pub min_pending_output: u64,

    /// Bytes of WAL queued for deletion by this pass.
    pub size_log_to_delete: u64,
    /// Total alive-WAL bytes before this pass started deleting.
    pub prev_total_log_size: u64,
    /// Alive-WAL count when this pass started.
    pub num_alive_log_files: usize,

    /// Writers released from the write-side queue, closed by [`Self::clean`].
    pub logs_to_free: Vec<Box<dyn WalWriterHandle>>,
}

impl JobContext {
    /// Create an empty context for a job.
    pub fn new(job_id: u64) -> Self {
        Self {
            job_id,
            min_pending_output: u64::MAX,
            ..Default::default()
        }
    }

    /// Whether the purger has any work.
    pub fn have_something_to_delete(&self) -> bool {
        !self.full_scan_candidate_files.is_empty()
            || !self.sst_delete_files.is_empty()
            || !self.log_delete_files.is_empty()
            || !self.manifest_delete_files.is_empty()
    }

    /// Close released WAL writers and drop the snapshot's contents.
    pub fn clean(&mut self) {
        for mut writer in self.logs_to_free.drain(..) {
            if let Err(e) = writer.close() {
                tracing::warn!(job = self.job_id, error = %e, "failed to close released WAL writer");
            }
        }
        self.sst_delete_files.clear();
        self.manifest_delete_files.clear();
        self.log_delete_files.clear();
        self.log_recycle_files.clear();
        self.full_scan_candidate_files.clear();
        self.sst_live.clear();
    }
}
