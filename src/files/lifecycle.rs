//! Obsolete-file discovery and purging.
//!
//! `find_obsolete_files` runs under the lifecycle's state mutex and fills a
//! [`JobContext`] snapshot; `purge_obsolete_files` consumes the snapshot
//! without the mutex and deletes (or archives) what the snapshot proved
//! dead. Lock nesting order: state mutex, then the write-side log queue.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::cache::TableCache;
use crate::options::{DbPath, Options};
use crate::twopc::{PrepLogRegistry, PreparedLogTracker};
use crate::util::filename::{
    get_children, info_log_prefix, log_file_name, parse_file_name, table_file_name,
    table_file_path, OPTIONS_FILE_PREFIX,
};
use crate::util::FileType;
use crate::version::VersionSet;
use crate::wal::{AliveLogFile, LogState, WalManager, WalWriterHandle};
use crate::Error;

use super::job_context::{CandidateFileInfo, JobContext};

/// Details of one table-file deletion, delivered to listeners.
#[derive(Debug)]
pub struct TableFileDeletionInfo {
    /// Job that performed the deletion.
    pub job_id: u64,
    /// Number of the deleted file.
    pub file_number: u64,
    /// Full path that was deleted.
    pub file_path: PathBuf,
    /// Outcome of the deletion.
    pub status: crate::Result<()>,
    /// Column family the file belonged to.
    pub column_family: String,
}

/// Receives file-deletion notifications.
pub trait EventListener: Send + Sync {
    /// Called after each table-file deletion attempt.
    fn on_table_file_deleted(&self, info: &TableFileDeletionInfo);
}

/// A deletion deferred to the background purge queue.
#[derive(Debug, Clone)]
struct PendingPurgeFile {
    full_path: PathBuf,
    file_type: FileType,
    number: u64,
    path_id: u32,
    job_id: u64,
}

/// State guarded by the lifecycle's dominant mutex.
#[derive(Default)]
struct LifecycleState {
    /// File numbers reserved by in-flight compactions.
    pending_outputs: BTreeSet<u64>,
    /// WALs that may still hold unflushed data, ordered by number.
    alive_log_files: VecDeque<AliveLogFile>,
    /// Reusable WAL numbers, bounded by `recycle_log_file_num`.
    log_recycle_files: Vec<u64>,
    /// Writers released from the write-side queue, awaiting close.
    logs_to_free: Vec<Box<dyn WalWriterHandle>>,
    /// Positive while external scopes have deletions disabled.
    disable_delete_obsolete_files: u32,
    /// Micros timestamp of the last full scan.
    delete_obsolete_files_last_run: u64,
    /// Total bytes across the alive-log queue.
    total_log_size: u64,
    /// Deletions deferred by `schedule_only` purging.
    pending_purge: VecDeque<PendingPurgeFile>,
}

/// Determines which files are obsolete and releases them.
///
/// Owns the alive-log and write-side log queues, the pending-output set,
/// and the recycle list, and coordinates with the version set, the
/// prepared-log tracker, and the WAL manager.
pub struct FileLifecycle {
    db_path: PathBuf,
    /// Storage paths for table files; index 0 is the primary.
    db_paths: Vec<DbPath>,
    wal_dir: PathBuf,
    db_log_dir: Option<PathBuf>,
    info_log_prefix: String,
    options: Arc<Options>,
    versions: Arc<VersionSet>,
    table_cache: Arc<TableCache>,
    wal_manager: WalManager,
    prep_tracker: Option<Arc<PreparedLogTracker>>,
    prep_registry: Arc<PrepLogRegistry>,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    /// The dominant mutex.
    state: Mutex<LifecycleState>,
    /// Write-side log queue; nested inside the state mutex.
    logs: Mutex<VecDeque<LogState>>,
    /// Signals completion of an in-flight WAL sync; waited under the state
    /// mutex.
    log_sync_cv: Condvar,
    next_job_id: AtomicU64,
}

impl FileLifecycle {
    /// Create a lifecycle manager for the database at `db_path`.
    pub fn new(
        db_path: &Path,
        options: Arc<Options>,
        versions: Arc<VersionSet>,
        table_cache: Arc<TableCache>,
    ) -> Self {
        let db_paths = if options.db_paths.is_empty() {
            vec![DbPath::new(db_path, 0)]
        } else {
            options.db_paths.clone()
        };
        let wal_dir = if options.wal_dir.as_os_str().is_empty() {
            db_path.to_path_buf()
        } else {
            options.wal_dir.clone()
        };
        let db_log_dir = if options.db_log_dir.as_os_str().is_empty() {
            None
        } else {
            Some(options.db_log_dir.clone())
        };

        let prep_tracker = options
            .allow_2pc
            .then(|| Arc::new(PreparedLogTracker::new()));

        Self {
            db_path: db_path.to_path_buf(),
            db_paths,
            wal_manager: WalManager::new(Arc::clone(&options), wal_dir.clone()),
            wal_dir,
            info_log_prefix: info_log_prefix(db_log_dir.is_some(), db_path),
            db_log_dir,
            options,
            versions,
            table_cache,
            prep_tracker,
            prep_registry: Arc::new(PrepLogRegistry::new()),
            listeners: RwLock::new(Vec::new()),
            state: Mutex::new(LifecycleState::default()),
            logs: Mutex::new(VecDeque::new()),
            log_sync_cv: Condvar::new(),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// The prepared-log tracker, present when 2PC is enabled.
    pub fn prep_tracker(&self) -> Option<&Arc<PreparedLogTracker>> {
        self.prep_tracker.as_ref()
    }

    /// The per-column-family memtable prep-log registry.
    pub fn prep_registry(&self) -> &Arc<PrepLogRegistry> {
        &self.prep_registry
    }

    /// The WAL manager used for archival.
    pub fn wal_manager(&self) -> &WalManager {
        &self.wal_manager
    }

    /// Register a deletion listener.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    // === WAL queue maintenance ===

    /// Register a newly opened WAL on both queues.
    pub fn register_wal(&self, number: u64, writer: Box<dyn WalWriterHandle>) {
        let mut state = self.state.lock();
        debug_assert!(state
            .alive_log_files
            .back()
            .map(|l| l.number < number)
            .unwrap_or(true));
        state.alive_log_files.push_back(AliveLogFile::new(number, 0));
        self.logs.lock().push_back(LogState::new(number, writer));
    }

    /// Account bytes appended to a WAL.
    pub fn record_log_write(&self, number: u64, bytes: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .alive_log_files
            .iter_mut()
            .find(|l| l.number == number)
        {
            entry.size += bytes;
        }
        state.total_log_size += bytes;
    }

    /// Mark a WAL as having a sync in flight.
    pub fn begin_log_sync(&self, number: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .alive_log_files
            .iter_mut()
            .find(|l| l.number == number)
        {
            entry.getting_synced = true;
        }
        for log in self.logs.lock().iter_mut().filter(|l| l.number == number) {
            log.getting_synced = true;
        }
    }

    /// Mark a WAL's in-flight sync as finished and wake waiters.
    pub fn finish_log_sync(&self, number: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .alive_log_files
            .iter_mut()
            .find(|l| l.number == number)
        {
            entry.getting_synced = false;
        }
        for log in self.logs.lock().iter_mut().filter(|l| l.number == number) {
            log.getting_synced = false;
        }
        self.log_sync_cv.notify_all();
    }

    /// Number of WALs on the alive queue.
    pub fn alive_log_count(&self) -> usize {
        self.state.lock().alive_log_files.len()
    }

    /// Total bytes across the alive-log queue.
    pub fn total_log_size(&self) -> u64 {
        self.state.lock().total_log_size
    }

    // === Pending outputs ===

    /// Reserve a file number for an in-flight compaction output.
    pub fn register_pending_output(&self, number: u64) {
        self.state.lock().pending_outputs.insert(number);
    }

    /// Release a reserved output number.
    pub fn release_pending_output(&self, number: u64) {
        self.state.lock().pending_outputs.remove(&number);
    }

    // === Deletion disabling ===

    /// Suspend obsolete-file deletion (counted; may nest).
    pub fn disable_file_deletions(&self) {
        let mut state = self.state.lock();
        state.disable_delete_obsolete_files += 1;
        tracing::info!(
            depth = state.disable_delete_obsolete_files,
            "file deletions disabled"
        );
    }

    /// Re-enable deletions; `force` clears every nested disable at once.
    /// Runs a deletion pass when the counter reaches zero.
    pub fn enable_file_deletions(&self, force: bool) {
        let run_deletion = {
            let mut state = self.state.lock();
            if force {
                state.disable_delete_obsolete_files = 0;
            } else if state.disable_delete_obsolete_files > 0 {
                state.disable_delete_obsolete_files -= 1;
            }
            state.disable_delete_obsolete_files == 0
        };
        if run_deletion {
            tracing::info!("file deletions enabled");
            self.delete_obsolete_files();
        }
    }

    // === Discovery ===

    /// WAL floor: the lowest log number that must be kept.
    ///
    /// With 2PC enabled, the prepared-section heap is consulted before the
    /// memtable registry: a log reference migrates from the heap into a
    /// memtable atomically, and checking the heap first cannot miss a log
    /// mid-transition.
    pub fn min_log_number_to_keep(&self) -> u64 {
        let mut log_number = self.versions.min_log_number();

        if self.options.allow_2pc {
            if let Some(tracker) = &self.prep_tracker {
                let min_prep = tracker.find_min_log_containing_outstanding_prep();
                if min_prep != 0 && min_prep < log_number {
                    log_number = min_prep;
                }
            }

            let min_mem = self.prep_registry.min_prep_log_referenced_by_memtables();
            if min_mem != 0 && min_mem < log_number {
                log_number = min_mem;
            }
        }

        log_number
    }

    /// Fill `job` with everything that is now safe to delete.
    ///
    /// Holds the state mutex throughout. `force` triggers a full directory
    /// scan regardless of cadence; `no_full_scan` suppresses it entirely.
    pub fn find_obsolete_files(&self, job: &mut JobContext, force: bool, no_full_scan: bool) {
        let mut state = self.state.lock();

        if state.disable_delete_obsolete_files > 0 {
            return;
        }

        let doing_the_full_scan = if no_full_scan {
            false
        } else if force || self.options.delete_obsolete_files_period_micros == 0 {
            true
        } else {
            let now_micros = now_micros();
            if state.delete_obsolete_files_last_run
                + self.options.delete_obsolete_files_period_micros
                < now_micros
            {
                state.delete_obsolete_files_last_run = now_micros;
                true
            } else {
                false
            }
        };

        // Outputs of in-flight compactions must survive even though no
        // version references them yet. The floor is snapshotted while the
        // mutex is held.
        job.min_pending_output = state
            .pending_outputs
            .iter()
            .next()
            .copied()
            .unwrap_or(u64::MAX);

        let (sst_delete, manifest_delete) =
            self.versions.get_obsolete_files(job.min_pending_output);
        job.sst_delete_files = sst_delete;
        job.manifest_delete_files = manifest_delete;

        job.manifest_file_number = self.versions.manifest_file_number();
        job.pending_manifest_file_number = self.versions.pending_manifest_file_number();
        job.log_number = self.min_log_number_to_keep();
        job.prev_log_number = self.versions.prev_log_number();

        self.versions.add_live_files(&mut job.sst_live);

        if doing_the_full_scan {
            for (path_id, db_path) in self.db_paths.iter().enumerate() {
                for file in get_children(&db_path.path) {
                    job.full_scan_candidate_files
                        .push(CandidateFileInfo::new(file, path_id as u32));
                }
            }

            if self.wal_dir != self.db_path {
                for file in get_children(&self.wal_dir) {
                    job.full_scan_candidate_files
                        .push(CandidateFileInfo::new(file, 0));
                }
            }

            if let Some(log_dir) = &self.db_log_dir {
                if log_dir != &self.db_path {
                    for file in get_children(log_dir) {
                        job.full_scan_candidate_files
                            .push(CandidateFileInfo::new(file, 0));
                    }
                }
            }
        }

        // The write-side queue is empty during recovery, in which case no
        // graduation can be due yet.
        if !state.alive_log_files.is_empty() && !self.logs.lock().is_empty() {
            let min_log_number = job.log_number;
            let num_alive_log_files = state.alive_log_files.len();

            // The current log always stays alive.
            while state.alive_log_files.len() > 1
                && state.alive_log_files.front().unwrap().number < min_log_number
            {
                let (earliest_number, earliest_size) = {
                    let front = state.alive_log_files.front().unwrap();
                    (front.number, front.size)
                };

                if self.options.recycle_log_file_num > state.log_recycle_files.len() {
                    tracing::info!(wal = earliest_number, "adding log to recycle list");
                    state.log_recycle_files.push(earliest_number);
                } else {
                    job.log_delete_files.push(earliest_number);
                }

                if job.size_log_to_delete == 0 {
                    job.prev_total_log_size = state.total_log_size;
                    job.num_alive_log_files = num_alive_log_files;
                }
                job.size_log_to_delete += earliest_size;
                state.total_log_size -= earliest_size;

                if self.options.two_write_queues {
                    let _write_queue = self.logs.lock();
                    state.alive_log_files.pop_front();
                } else {
                    state.alive_log_files.pop_front();
                }
            }

            // Drain the write-side queue, waiting out in-flight syncs.
            loop {
                let front = {
                    let logs = self.logs.lock();
                    logs.front().map(|l| (l.number, l.getting_synced))
                };
                match front {
                    Some((number, getting_synced)) if number < min_log_number => {
                        if getting_synced {
                            self.log_sync_cv.wait(&mut state);
                            // The queue may have changed while waiting.
                            continue;
                        }
                        let writer = {
                            let mut logs = self.logs.lock();
                            logs.pop_front().and_then(|mut l| l.release_writer())
                        };
                        if let Some(writer) = writer {
                            state.logs_to_free.push(writer);
                        }
                    }
                    _ => break,
                }
            }

            // The current log cannot be obsolete.
            debug_assert!(!self.logs.lock().is_empty());
        }

        job.logs_to_free = std::mem::take(&mut state.logs_to_free);
        job.log_recycle_files = state.log_recycle_files.clone();
    }

    // === Purging ===

    /// Delete (or archive, or schedule) everything `job` proved dead.
    ///
    /// Must run without the state mutex; it touches only the snapshot and
    /// the filesystem.
    pub fn purge_obsolete_files(&self, job: &mut JobContext, schedule_only: bool) {
        // A zero manifest number means discovery never ran on this context.
        if job.manifest_file_number == 0 {
            return;
        }

        let sst_live_map: HashMap<u64, u32> = job
            .sst_live
            .iter()
            .map(|fd| (fd.number, fd.path_id))
            .collect();
        let log_recycle_set: HashSet<u64> = job.log_recycle_files.iter().copied().collect();

        let mut candidate_files = job.full_scan_candidate_files.clone();
        candidate_files.reserve(
            job.sst_delete_files.len()
                + job.log_delete_files.len()
                + job.manifest_delete_files.len(),
        );

        for file in &job.sst_delete_files {
            candidate_files.push(CandidateFileInfo::new(
                table_file_name(file.number()),
                file.path_id(),
            ));
            // Release the meta's pin on the cached reader.
            file.take_table_handle();
        }
        for &number in &job.log_delete_files {
            if number > 0 {
                candidate_files.push(CandidateFileInfo::new(log_file_name(number), 0));
            }
        }
        for name in &job.manifest_delete_files {
            candidate_files.push(CandidateFileInfo::new(name.clone(), 0));
        }

        // Sort descending so identical names with different path ids fold
        // adjacently, then dedup.
        candidate_files.sort_by(|a, b| b.cmp(a));
        candidate_files.dedup();

        if job.prev_total_log_size > 0 {
            tracing::info!(
                job = job.job_id,
                size_log_to_delete = job.size_log_to_delete,
                prev_total_log_size = job.prev_total_log_size,
                num_alive_log_files = job.num_alive_log_files,
                "deleting WAL files"
            );
        }

        let mut old_info_log_files: Vec<String> = Vec::new();

        for candidate in &candidate_files {
            // A name we cannot recognize is never deleted.
            let Some((file_type, number)) =
                parse_file_name(&candidate.file_name, &self.info_log_prefix)
            else {
                continue;
            };

            let keep = match file_type {
                FileType::Log => {
                    number >= job.log_number
                        || number == job.prev_log_number
                        || log_recycle_set.contains(&number)
                }
                // Keep my manifest, and any newer incarnation's.
                FileType::Descriptor => number >= job.manifest_file_number,
                FileType::Table => {
                    sst_live_map.contains_key(&number) || number >= job.min_pending_output
                }
                FileType::Temp => {
                    // In-flight outputs are in the live set via pending
                    // outputs; the manifest roll writes through a temp file
                    // equal to the pending manifest number; options temp
                    // files are handled by their own rewrite protocol.
                    sst_live_map.contains_key(&number)
                        || number == job.pending_manifest_file_number
                        || candidate.file_name.contains(OPTIONS_FILE_PREFIX)
                }
                FileType::InfoLog => {
                    if number != 0 {
                        old_info_log_files.push(candidate.file_name.clone());
                    }
                    true
                }
                FileType::Current
                | FileType::DbLock
                | FileType::Identity
                | FileType::MetaDatabase
                | FileType::OptionsFile
                | FileType::Blob => true,
            };

            if keep {
                continue;
            }

            let full_path = if file_type == FileType::Table {
                self.table_cache.evict(number);
                table_file_path(&self.db_paths, number, candidate.path_id)
            } else if file_type == FileType::Log {
                self.wal_dir.join(&candidate.file_name)
            } else {
                self.db_path.join(&candidate.file_name)
            };

            if file_type == FileType::Log && self.options.wal_archival_enabled() {
                let _ = self.wal_manager.archive_wal_file(&full_path, number);
                continue;
            }

            if schedule_only {
                let mut state = self.state.lock();
                state.pending_purge.push_back(PendingPurgeFile {
                    full_path,
                    file_type,
                    number,
                    path_id: candidate.path_id,
                    job_id: job.job_id,
                });
            } else {
                self.delete_obsolete_file(job.job_id, &full_path, file_type, number);
            }
        }

        self.prune_info_logs(job.job_id, &mut old_info_log_files);
        self.wal_manager.purge_obsolete_wal_files();
    }

    /// Delete the oldest rotated info logs until at most
    /// `keep_log_file_num` remain.
    fn prune_info_logs(&self, job_id: u64, old_info_log_files: &mut Vec<String>) {
        if old_info_log_files.len() <= self.options.keep_log_file_num {
            return;
        }

        old_info_log_files.sort();
        let end = old_info_log_files.len() - self.options.keep_log_file_num;
        let log_dir = self.db_log_dir.as_deref().unwrap_or(&self.db_path);

        for name in &old_info_log_files[..end] {
            let full_path = log_dir.join(name);
            tracing::info!(job = job_id, file = %full_path.display(), "deleting info log file");
            if let Err(e) = std::fs::remove_file(&full_path) {
                if e.kind() == std::io::ErrorKind::NotFound {
                    tracing::info!(
                        job = job_id,
                        file = %full_path.display(),
                        "tried to delete non-existing info log file"
                    );
                } else {
                    tracing::error!(
                        job = job_id,
                        file = %full_path.display(),
                        error = %e,
                        "failed to delete info log file"
                    );
                }
            }
        }
    }

    /// Delete one obsolete file and log/notify the outcome.
    fn delete_obsolete_file(
        &self,
        job_id: u64,
        full_path: &Path,
        file_type: FileType,
        number: u64,
    ) {
        let status = match std::fs::remove_file(full_path) {
            Ok(()) => {
                tracing::debug!(
                    job = job_id,
                    file = %full_path.display(),
                    kind = file_type.as_str(),
                    number,
                    "deleted obsolete file"
                );
                Ok(())
            }
            Err(e) if !full_path.exists() => {
                tracing::info!(
                    job = job_id,
                    file = %full_path.display(),
                    kind = file_type.as_str(),
                    number,
                    "tried to delete a non-existing file"
                );
                Err(Error::NotFound(e.to_string()))
            }
            Err(e) => {
                tracing::error!(
                    job = job_id,
                    file = %full_path.display(),
                    kind = file_type.as_str(),
                    number,
                    error = %e,
                    "failed to delete obsolete file"
                );
                Err(Error::from(e))
            }
        };

        if file_type == FileType::Table {
            let info = TableFileDeletionInfo {
                job_id,
                file_number: number,
                file_path: full_path.to_path_buf(),
                status,
                column_family: "default".to_string(),
            };
            for listener in self.listeners.read().iter() {
                listener.on_table_file_deleted(&info);
            }
        }
    }

    /// Execute every deletion deferred by `schedule_only` purging.
    /// Runs without the state mutex held across deletions.
    pub fn drain_pending_purges(&self) {
        loop {
            let Some(pending) = self.state.lock().pending_purge.pop_front() else {
                return;
            };
            tracing::debug!(
                job = pending.job_id,
                number = pending.number,
                path_id = pending.path_id,
                "running scheduled purge"
            );
            self.delete_obsolete_file(
                pending.job_id,
                &pending.full_path,
                pending.file_type,
                pending.number,
            );
        }
    }

    /// Number of deletions waiting on the background purge queue.
    pub fn pending_purge_count(&self) -> usize {
        self.state.lock().pending_purge.len()
    }

    /// One full discovery-and-purge pass.
    pub fn delete_obsolete_files(&self) {
        let mut job = JobContext::new(self.next_job_id.fetch_add(1, Ordering::SeqCst));
        self.find_obsolete_files(&mut job, true, false);
        if job.have_something_to_delete() {
            self.purge_obsolete_files(&mut job, false);
        }
        job.clean();
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
