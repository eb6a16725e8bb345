//! VersionSet - manages the current version with atomic updates.
//!
//! The version set is responsible for:
//! - Tracking the current version (atomically swappable)
//! - Applying version edits through a builder
//! - File-number and sequence-number allocation
//! - Logging edits to the manifest, rolling it when it grows too large
//! - Collecting obsolete file metas and retired manifest names for the
//!   file lifecycle manager

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::cache::TableCache;
use crate::options::{Options, MAX_LEVELS};
use crate::util::filename::{current_file_path, manifest_file_name};
use crate::util::{Comparator, InternalKeyComparator};
use crate::{Error, Result};

use super::{
    read_manifest_edits, FileDescriptor, FileMetadata, ManifestLog, ObsoleteSink, SuperVersion,
    Version, VersionBuilder, VersionEdit,
};

/// Manages the set of versions and the manifest they are logged to.
pub struct VersionSet {
    /// Database directory path.
    db_path: PathBuf,
    /// Engine options.
    options: Arc<Options>,
    icmp: InternalKeyComparator,
    /// Table cache used to warm reader handles for new files.
    table_cache: Option<Arc<TableCache>>,
    /// Current version (atomically swappable).
    current: ArcSwap<Version>,
    /// Mutable per-column-family state shared with version assembly.
    super_version: Arc<SuperVersion>,
    /// Dead file metas awaiting purge.
    obsolete_sink: Arc<ObsoleteSink>,
    /// Retired manifest file names awaiting purge.
    obsolete_manifests: Mutex<Vec<String>>,
    /// Next file number to allocate.
    next_file_number: AtomicU64,
    /// Last used sequence number.
    last_sequence: AtomicU64,
    /// Lowest WAL number still needed by unflushed data.
    log_number: AtomicU64,
    /// Previous log number (recovery compatibility).
    prev_log_number: AtomicU64,
    /// Live manifest file number.
    manifest_file_number: AtomicU64,
    /// Manifest being written before CURRENT points at it; 0 when idle.
    pending_manifest_file_number: AtomicU64,
    /// Current manifest writer.
    manifest: Mutex<Option<ManifestLog>>,
    /// Monotonic version-number source.
    next_version_number: AtomicU64,
    /// Comparator name recorded in fresh manifests.
    comparator_name: String,
}

impl VersionSet {
    /// Create a new version set over an empty current version.
    pub fn new(
        db_path: &Path,
        options: Arc<Options>,
        table_cache: Option<Arc<TableCache>>,
    ) -> Self {
        let obsolete_sink = Arc::new(ObsoleteSink::new());
        let current = Version::new(MAX_LEVELS, 0, Some(Arc::clone(&obsolete_sink)));
        let super_version = Arc::new(SuperVersion::new(options.two_pc_compaction));

        Self {
            db_path: db_path.to_path_buf(),
            options,
            icmp: InternalKeyComparator::new(),
            table_cache,
            current: ArcSwap::from_pointee(current),
            super_version,
            obsolete_sink,
            obsolete_manifests: Mutex::new(Vec::new()),
            next_file_number: AtomicU64::new(2), // 1 is reserved for the manifest
            last_sequence: AtomicU64::new(0),
            log_number: AtomicU64::new(0),
            prev_log_number: AtomicU64::new(0),
            manifest_file_number: AtomicU64::new(1),
            pending_manifest_file_number: AtomicU64::new(0),
            manifest: Mutex::new(None),
            next_version_number: AtomicU64::new(1),
            comparator_name: InternalKeyComparator::new()
                .user_comparator()
                .name()
                .to_string(),
        }
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the current version.
    pub fn current(&self) -> Arc<Version> {
        self.current.load_full()
    }

    /// The super version shared with version assembly.
    pub fn super_version(&self) -> &Arc<SuperVersion> {
        &self.super_version
    }

    /// Allocate a new file number.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Peek the next file number without allocating.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.load(Ordering::SeqCst)
    }

    /// Mark a file number as used (recovery).
    pub fn mark_file_number_used(&self, num: u64) {
        let mut current = self.next_file_number.load(Ordering::SeqCst);
        while num >= current {
            match self.next_file_number.compare_exchange(
                current,
                num + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Get the last sequence number.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&self, seq: u64) {
        self.last_sequence.store(seq, Ordering::SeqCst);
    }

    /// Lowest WAL number still referenced by unflushed data.
    pub fn min_log_number(&self) -> u64 {
        self.log_number.load(Ordering::SeqCst)
    }

    /// Set the current log number.
    pub fn set_log_number(&self, num: u64) {
        self.log_number.store(num, Ordering::SeqCst);
    }

    /// Get the previous log number.
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number.load(Ordering::SeqCst)
    }

    /// Live manifest file number.
    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number.load(Ordering::SeqCst)
    }

    /// Manifest number being written before CURRENT switches; 0 when idle.
    pub fn pending_manifest_file_number(&self) -> u64 {
        self.pending_manifest_file_number.load(Ordering::SeqCst)
    }

    /// Collect descriptors of every live file.
    pub fn add_live_files(&self, live: &mut Vec<FileDescriptor>) {
        self.current().add_live_files(live);
    }

    /// Drain obsolete file metas below the pending-output floor, plus all
    /// retired manifest names.
    pub fn get_obsolete_files(
        &self,
        min_pending_output: u64,
    ) -> (Vec<Arc<FileMetadata>>, Vec<String>) {
        let files = self.obsolete_sink.drain_below(min_pending_output);
        let manifests = std::mem::take(&mut *self.obsolete_manifests.lock());
        (files, manifests)
    }

    /// Create the first manifest of a fresh database.
    pub fn create_new_manifest(&self, first_edit: &VersionEdit) -> Result<()> {
        let manifest_number = self.new_file_number();
        self.pending_manifest_file_number
            .store(manifest_number, Ordering::SeqCst);

        let mut log = ManifestLog::create(&self.db_path, manifest_number, self.options.sync_mode)?;
        log.add_edit(first_edit)?;
        log.sync()?;

        self.set_current_file(manifest_number)?;

        self.manifest_file_number
            .store(manifest_number, Ordering::SeqCst);
        self.pending_manifest_file_number.store(0, Ordering::SeqCst);
        *self.manifest.lock() = Some(log);

        Ok(())
    }

    /// Log a version edit and install the version it produces.
    pub fn log_and_apply(&self, edit: &mut VersionEdit) -> Result<()> {
        if edit.log_number.is_none() {
            edit.set_log_number(self.min_log_number());
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number());
        }
        if edit.next_file_number.is_none() {
            edit.set_next_file_number(self.next_file_number());
        }
        if edit.last_sequence.is_none() {
            edit.set_last_sequence(self.last_sequence());
        }

        let base = self.current();
        let mut builder = VersionBuilder::new(
            self.icmp,
            self.table_cache.clone(),
            Arc::clone(&base),
            Some(Arc::clone(&self.super_version)),
            self.options.force_consistency_checks,
        );
        builder.apply(edit);

        if !builder.check_consistency_for_num_levels() {
            return Err(Error::corruption(
                "edit leaves files on levels beyond the configured maximum",
            ));
        }

        let mut version = Version::new(
            base.num_levels(),
            self.next_version_number.fetch_add(1, Ordering::SeqCst),
            Some(Arc::clone(&self.obsolete_sink)),
        );
        builder.save_to(&mut version);

        // Log to the manifest before publishing the version.
        {
            let mut manifest_guard = self.manifest.lock();
            let manifest = manifest_guard
                .as_mut()
                .ok_or_else(|| Error::internal("no active manifest"))?;

            if manifest.size() >= self.options.max_manifest_file_size {
                let rolled = self.roll_manifest(&version, edit)?;
                let retired = manifest.file_number();
                *manifest_guard = Some(rolled);
                self.obsolete_manifests
                    .lock()
                    .push(manifest_file_name(retired));
            } else {
                manifest.add_edit(edit)?;
                manifest.sync()?;
            }
        }

        self.current.store(Arc::new(version));

        if let Some(num) = edit.log_number {
            self.set_log_number(num);
        }
        if let Some(num) = edit.prev_log_number {
            self.prev_log_number.store(num, Ordering::SeqCst);
        }

        Ok(())
    }

    /// Write a fresh manifest holding a snapshot of `version`, point
    /// CURRENT at it, and return its writer.
    fn roll_manifest(&self, version: &Version, edit: &VersionEdit) -> Result<ManifestLog> {
        let manifest_number = self.new_file_number();
        self.pending_manifest_file_number
            .store(manifest_number, Ordering::SeqCst);

        tracing::info!(manifest = manifest_number, "rolling manifest");

        let mut log = ManifestLog::create(&self.db_path, manifest_number, self.options.sync_mode)?;

        // Snapshot: the version already reflects `edit`, so one snapshot
        // edit captures both.
        let mut snapshot = VersionEdit::new();
        snapshot.set_comparator(self.comparator_name.clone());
        snapshot.set_log_number(edit.log_number.unwrap_or_else(|| self.min_log_number()));
        snapshot.set_prev_log_number(edit.prev_log_number.unwrap_or_else(|| self.prev_log_number()));
        snapshot.set_next_file_number(self.next_file_number());
        snapshot.set_last_sequence(edit.last_sequence.unwrap_or_else(|| self.last_sequence()));
        for (level, file) in version.all_files() {
            snapshot.add_file(level, (**file).clone());
        }

        log.add_edit(&snapshot)?;
        log.sync()?;

        self.set_current_file(manifest_number)?;

        self.manifest_file_number
            .store(manifest_number, Ordering::SeqCst);
        self.pending_manifest_file_number.store(0, Ordering::SeqCst);

        Ok(log)
    }

    /// Recover the version set from disk.
    ///
    /// Reads CURRENT to find the active manifest, replays its edits, and
    /// installs the reconstructed version. Returns false for a fresh
    /// database.
    pub fn recover(&self) -> Result<bool> {
        let current_path = current_file_path(&self.db_path);
        if !current_path.exists() {
            return Ok(false);
        }

        let manifest_name = read_current_file(&current_path)?;
        let manifest_number = manifest_name
            .strip_prefix("MANIFEST-")
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::corruption("invalid manifest name in CURRENT"))?;

        let edits = read_manifest_edits(&self.db_path, manifest_number)?;

        let base = Arc::new(Version::new(
            MAX_LEVELS,
            0,
            Some(Arc::clone(&self.obsolete_sink)),
        ));
        let mut builder = VersionBuilder::new(
            self.icmp,
            self.table_cache.clone(),
            base,
            None,
            self.options.force_consistency_checks,
        );

        let mut log_number = None;
        let mut prev_log_number = 0;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut max_file_number = 0;

        for edit in &edits {
            builder.apply(edit);

            for (_, meta) in &edit.new_files {
                max_file_number = max_file_number.max(meta.number());
            }
            if let Some(num) = edit.log_number {
                log_number = Some(num);
            }
            if let Some(num) = edit.prev_log_number {
                prev_log_number = num;
            }
            if let Some(num) = edit.next_file_number {
                next_file_number = Some(num);
            }
            if let Some(seq) = edit.last_sequence {
                last_sequence = Some(seq);
            }
        }

        let next_file_number =
            next_file_number.ok_or_else(|| Error::corruption("no next_file_number in manifest"))?;
        let log_number =
            log_number.ok_or_else(|| Error::corruption("no log_number in manifest"))?;
        let last_sequence =
            last_sequence.ok_or_else(|| Error::corruption("no last_sequence in manifest"))?;

        let mut version = Version::new(
            MAX_LEVELS,
            self.next_version_number.fetch_add(1, Ordering::SeqCst),
            Some(Arc::clone(&self.obsolete_sink)),
        );
        builder.save_to(&mut version);
        drop(builder);

        self.next_file_number
            .store(next_file_number, Ordering::SeqCst);
        self.mark_file_number_used(max_file_number);
        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(manifest_number);
        self.set_last_sequence(last_sequence);
        self.set_log_number(log_number);
        self.prev_log_number.store(prev_log_number, Ordering::SeqCst);
        self.manifest_file_number
            .store(manifest_number, Ordering::SeqCst);

        self.current.store(Arc::new(version));

        let log =
            ManifestLog::open_for_append(&self.db_path, manifest_number, self.options.sync_mode)?;
        *self.manifest.lock() = Some(log);

        Ok(true)
    }

    /// Atomically point CURRENT at the given manifest.
    fn set_current_file(&self, manifest_number: u64) -> Result<()> {
        let current_path = current_file_path(&self.db_path);
        let temp_path = self.db_path.join("CURRENT.tmp");

        {
            let mut file = File::create(&temp_path)?;
            writeln!(file, "{}", manifest_file_name(manifest_number))?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &current_path)?;

        Ok(())
    }
}

/// Read the CURRENT file to get the active manifest name.
fn read_current_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content.trim().to_string())
}

/// Check if a database exists at the given path.
pub fn database_exists(db_path: &Path) -> bool {
    current_file_path(db_path).exists()
}
