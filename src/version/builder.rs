//! VersionBuilder - applies edits onto a base version to assemble the next.
//!
//! Edits are applied in fixed phases (moves, slices, deletes, adds) and then
//! merged against the base version's level files in one ordered pass per
//! level. Consistency violations are treated as a broken durability
//! contract and abort the process.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::cache::TableCache;
use crate::metrics::two_pc_metrics;
use crate::util::InternalKeyComparator;

use super::{FileMetadata, FileSlice, MergeTask, SuperVersion, Version, VersionEdit};

/// Level-0 ordering: newest first by largest sequence number, ties broken
/// by smallest sequence number, then by file number, all descending.
pub fn newest_first_by_seqno(a: &FileMetadata, b: &FileMetadata) -> Ordering {
    b.largest_seqno()
        .cmp(&a.largest_seqno())
        .then_with(|| b.smallest_seqno().cmp(&a.smallest_seqno()))
        .then_with(|| b.number().cmp(&a.number()))
}

/// Level-N ordering: by smallest key ascending, ties by file number.
pub fn by_smallest_key(icmp: &InternalKeyComparator, a: &FileMetadata, b: &FileMetadata) -> Ordering {
    icmp.compare_keys(a.smallest(), b.smallest())
        .then_with(|| a.number().cmp(&b.number()))
}

/// Per-level working state while edits accumulate.
#[derive(Default)]
struct LevelState {
    deleted_files: HashSet<u64>,
    /// Added files by file number. The builder owns one ref on each.
    added_files: HashMap<u64, Arc<FileMetadata>>,
    /// Pending slices keyed by their output file number.
    added_file_slices: BTreeMap<u64, Vec<FileSlice>>,
    /// Files moved into the frozen pool, by file number.
    added_frozen_files: HashMap<u64, Arc<FileMetadata>>,
}

/// Builds a new version by applying a sequence of edits to a base version.
pub struct VersionBuilder {
    icmp: InternalKeyComparator,
    table_cache: Option<Arc<TableCache>>,
    base: Arc<Version>,
    super_version: Option<Arc<SuperVersion>>,
    num_levels: usize,
    levels: Vec<LevelState>,
    /// State for edits targeting levels >= num_levels. The version is only
    /// consistent if these cancel out by the time it is saved.
    invalid_levels: BTreeMap<usize, HashSet<u64>>,
    has_invalid_levels: bool,
    force_consistency_checks: bool,
}

impl VersionBuilder {
    /// Create a builder over `base`.
    ///
    /// `table_cache` enables [`VersionBuilder::load_table_handlers`];
    /// `super_version` receives merge tasks when slice attachment crosses
    /// the configured threshold.
    pub fn new(
        icmp: InternalKeyComparator,
        table_cache: Option<Arc<TableCache>>,
        base: Arc<Version>,
        super_version: Option<Arc<SuperVersion>>,
        force_consistency_checks: bool,
    ) -> Self {
        let num_levels = base.num_levels();
        Self {
            icmp,
            table_cache,
            base,
            super_version,
            num_levels,
            levels: (0..num_levels).map(|_| LevelState::default()).collect(),
            invalid_levels: BTreeMap::new(),
            has_invalid_levels: false,
            force_consistency_checks,
        }
    }

    fn level_cmp(&self, level: usize, a: &FileMetadata, b: &FileMetadata) -> Ordering {
        if level == 0 {
            newest_first_by_seqno(a, b)
        } else {
            by_smallest_key(&self.icmp, a, b)
        }
    }

    fn checks_enabled(&self) -> bool {
        cfg!(debug_assertions) || self.force_consistency_checks
    }

    fn unref_file(f: &Arc<FileMetadata>) {
        if f.unref_is_last() {
            f.take_table_handle();
        }
    }

    /// Apply one edit. Phases are ordered: moves, then slices, then
    /// deletes, then adds. Slices reference output files materialized by
    /// this edit's adds, and deletes resolve against adds from prior edits.
    pub fn apply(&mut self, edit: &VersionEdit) {
        self.check_consistency(&self.base);

        // Move files to the frozen pool
        for (level, meta) in &edit.moved_files {
            if *level >= self.num_levels {
                panic!(
                    "moved file #{} targets invalid level {}",
                    meta.number(),
                    level
                );
            }
            self.levels[*level]
                .added_frozen_files
                .insert(meta.number(), Arc::clone(meta));
        }

        // Stage file slices by output file number
        for (level, slice) in &edit.new_file_slices {
            if *level >= self.num_levels {
                panic!(
                    "file slice for output #{} targets invalid level {}",
                    slice.output_file_number(),
                    level
                );
            }
            self.levels[*level]
                .added_file_slices
                .entry(slice.output_file_number())
                .or_default()
                .push(slice.clone());
        }

        // Delete files
        for &(level, number) in &edit.deleted_files {
            if level < self.num_levels {
                self.levels[level].deleted_files.insert(number);
                self.check_consistency_for_deletes(number, level);

                if let Some(f) = self.levels[level].added_files.remove(&number) {
                    Self::unref_file(&f);
                }
            } else {
                let entry = self.invalid_levels.entry(level).or_default();
                if !entry.remove(&number) {
                    // Deleting a non-existing file on an invalid level.
                    self.has_invalid_levels = true;
                }
            }
        }

        // Add new files
        for (level, meta) in &edit.new_files {
            if *level < self.num_levels {
                let f = Arc::new(meta.clone());
                f.ref_inc();

                assert!(
                    !self.levels[*level].added_files.contains_key(&f.number()),
                    "duplicate add of file #{} at level {}",
                    f.number(),
                    level
                );
                self.levels[*level].deleted_files.remove(&f.number());
                self.levels[*level].added_files.insert(f.number(), f);
            } else {
                let number = meta.number();
                let entry = self.invalid_levels.entry(*level).or_default();
                if !entry.insert(number) {
                    // Creating an already existing file on an invalid level.
                    self.has_invalid_levels = true;
                }
            }
        }
    }

    /// A file being deleted must exist in the base version at some level, in
    /// this builder at the same level, or at a higher level it was moved to.
    fn check_consistency_for_deletes(&self, number: u64, level: usize) {
        if !self.checks_enabled() {
            return;
        }

        let mut found = (0..self.num_levels)
            .any(|l| self.base.files(l).iter().any(|f| f.number() == number));

        if !found {
            // Possibly moved from a lower to a higher level in this builder
            found = (level + 1..self.num_levels)
                .any(|l| self.levels[l].added_files.contains_key(&number));
        }

        if !found {
            found = self.levels[level].added_files.contains_key(&number);
        }

        if !found {
            panic!(
                "file to delete #{} not found at or above level {}",
                number, level
            );
        }
    }

    /// Whether edits on levels beyond num_levels cancelled out.
    pub fn check_consistency_for_num_levels(&self) -> bool {
        if self.has_invalid_levels {
            return false;
        }
        self.invalid_levels.values().all(|files| files.is_empty())
    }

    /// Validate a version's per-level ordering and non-overlap invariants.
    ///
    /// Aborts the process on violation: a version that breaks these would
    /// silently corrupt reads.
    pub fn check_consistency(&self, version: &Version) {
        if !self.checks_enabled() {
            return;
        }

        for level in 0..self.num_levels {
            let files = version.files(level);
            for window in files.windows(2) {
                let f1 = &window[0];
                let f2 = &window[1];

                if level == 0 {
                    if self.level_cmp(0, f1, f2) != Ordering::Less {
                        panic!(
                            "L0 files are not sorted properly: #{} vs #{}",
                            f1.number(),
                            f2.number()
                        );
                    }

                    if f2.smallest_seqno() == f2.largest_seqno() {
                        // An externally ingested file
                        let external_seqno = f2.smallest_seqno();
                        if !(external_seqno < f1.largest_seqno() || external_seqno == 0) {
                            panic!(
                                "L0 file #{} with seqno {}..{} vs. file #{} with global seqno {}",
                                f1.number(),
                                f1.smallest_seqno(),
                                f1.largest_seqno(),
                                f2.number(),
                                external_seqno
                            );
                        }
                    } else if f1.smallest_seqno() <= f2.smallest_seqno() {
                        panic!(
                            "L0 files #{} (seqno {}..{}) and #{} (seqno {}..{}) are not newest-first",
                            f1.number(),
                            f1.smallest_seqno(),
                            f1.largest_seqno(),
                            f2.number(),
                            f2.smallest_seqno(),
                            f2.largest_seqno()
                        );
                    }
                } else {
                    if self.level_cmp(level, f1, f2) != Ordering::Less {
                        panic!(
                            "L{} files are not sorted properly: #{} vs #{}",
                            level,
                            f1.number(),
                            f2.number()
                        );
                    }

                    if self
                        .icmp
                        .compare_keys(f1.largest(), f2.smallest())
                        .is_ge()
                    {
                        panic!(
                            "L{} has overlapping ranges: #{} [..{}] vs #{} [{}..]",
                            level,
                            f1.number(),
                            f1.largest(),
                            f2.number(),
                            f2.smallest()
                        );
                    }
                }
            }
        }
    }

    /// Merge the accumulated state with the base version into `vstorage`.
    pub fn save_to(&self, vstorage: &mut Version) {
        self.check_consistency(&self.base);
        self.check_consistency(vstorage);

        for level in 0..self.num_levels {
            let base_files = self.base.files(level);

            let mut added: Vec<&Arc<FileMetadata>> =
                self.levels[level].added_files.values().collect();
            added.sort_by(|a, b| self.level_cmp(level, a, b));

            // Two-way merge: emit base files up to each added file's slot,
            // then the added file itself.
            let mut base_idx = 0;
            for added_file in &added {
                while base_idx < base_files.len()
                    && self.level_cmp(level, &base_files[base_idx], added_file) != Ordering::Greater
                {
                    self.maybe_add_file(vstorage, level, &base_files[base_idx]);
                    base_idx += 1;
                }
                self.maybe_add_file(vstorage, level, added_file);
            }
            while base_idx < base_files.len() {
                self.maybe_add_file(vstorage, level, &base_files[base_idx]);
                base_idx += 1;
            }

            for frozen in self.levels[level].added_frozen_files.values() {
                vstorage.add_frozen_file(Arc::clone(frozen));
            }
        }

        // Frozen files stay alive across versions while slices read them.
        for file in self.base.frozen_files() {
            if file.slice_refs() > 0 {
                vstorage.add_frozen_file(file);
            }
        }

        self.check_consistency(vstorage);
    }

    fn maybe_add_file(&self, vstorage: &mut Version, level: usize, f: &Arc<FileMetadata>) {
        if self.levels[level].deleted_files.contains(&f.number()) {
            // The file is going away; its slices stop reading their parents.
            for slice in f.slices() {
                slice.parent().slice_ref_dec();
            }
        } else if self.levels[level]
            .added_frozen_files
            .contains_key(&f.number())
        {
            debug_assert_eq!(
                f.slice_count(),
                0,
                "file #{} moved to frozen with slices attached",
                f.number()
            );
            vstorage.add_frozen_file(Arc::clone(f));
        } else {
            vstorage.add_file(level, Arc::clone(f));

            let mut attached = false;
            if let Some(slices) = self.levels[level].added_file_slices.get(&f.number()) {
                for slice in slices {
                    vstorage.add_file_slice(level, f, slice.clone());
                    attached = true;
                }
            }

            if attached {
                if let Some(sv) = &self.super_version {
                    let threshold = sv.compaction_options().merge_threshold;
                    if f.slice_count() > threshold
                        && sv.queue_merge_task(MergeTask::new(
                            level,
                            f.smallest().clone(),
                            f.largest().clone(),
                        ))
                    {
                        two_pc_metrics().merge_tasks_queued.inc();
                    }
                }
            }
        }
    }

    /// Warm table-cache handles for every added file, sharing work across
    /// `max_threads` workers via an atomic cursor. Runs inline when
    /// `max_threads <= 1`; always joins before returning.
    pub fn load_table_handlers(&self, max_threads: usize, prefetch: bool) {
        let Some(cache) = &self.table_cache else {
            return;
        };

        let files: Vec<&Arc<FileMetadata>> = self
            .levels
            .iter()
            .flat_map(|state| state.added_files.values())
            .filter(|f| !f.has_table_handle())
            .collect();
        if files.is_empty() {
            return;
        }

        tracing::debug!(files = files.len(), max_threads, prefetch, "loading table handles");

        let next_idx = AtomicUsize::new(0);
        let load = || loop {
            let idx = next_idx.fetch_add(1, AtomicOrdering::SeqCst);
            let Some(f) = files.get(idx) else {
                break;
            };
            match cache.find_table(&f.fd()) {
                Ok(handle) => f.set_table_handle(handle),
                Err(e) => {
                    tracing::debug!(file = f.number(), error = %e, "table handle load skipped")
                }
            }
        };

        if max_threads <= 1 {
            load();
        } else {
            std::thread::scope(|scope| {
                for _ in 0..max_threads {
                    scope.spawn(&load);
                }
            });
        }
    }
}

impl Drop for VersionBuilder {
    fn drop(&mut self) {
        for state in &self.levels {
            for f in state.added_files.values() {
                Self::unref_file(f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TwoPcCompactionOptions;
    use crate::types::InternalKey;
    use crate::version::FileDescriptor;
    use bytes::Bytes;

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::for_value(Bytes::copy_from_slice(user_key), seq)
    }

    fn make_meta(num: u64, smallest: &[u8], largest: &[u8], seqno: u64) -> FileMetadata {
        FileMetadata::new(
            FileDescriptor::new(num, 0, 1024),
            make_key(smallest, seqno),
            make_key(largest, seqno),
            seqno,
            seqno,
        )
    }

    fn builder_over(base: Arc<Version>) -> VersionBuilder {
        VersionBuilder::new(InternalKeyComparator::new(), None, base, None, true)
    }

    fn level_numbers(v: &Version, level: usize) -> Vec<u64> {
        v.files(level).iter().map(|f| f.number()).collect()
    }

    #[test]
    fn test_empty_edit_preserves_base() {
        let mut base = Version::new(7, 0, None);
        base.add_file(1, Arc::new(make_meta(1, b"a", b"c", 5)));
        base.add_file(1, Arc::new(make_meta(2, b"e", b"g", 6)));
        let base = Arc::new(base);

        let mut builder = builder_over(Arc::clone(&base));
        builder.apply(&VersionEdit::new());

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);

        assert_eq!(level_numbers(&next, 1), vec![1, 2]);
        assert_eq!(next.level_size(1), base.level_size(1));
    }

    #[test]
    fn test_compaction_edit_moves_files_down() {
        // L1 = [F1:(a..c), F2:(e..g)] -> delete both, add F3:(a..g) at L2
        let mut base = Version::new(7, 0, None);
        let f1 = Arc::new(make_meta(1, b"a", b"c", 5));
        let f2 = Arc::new(make_meta(2, b"e", b"g", 6));
        base.add_file(1, Arc::clone(&f1));
        base.add_file(1, Arc::clone(&f2));
        let base = Arc::new(base);

        let mut builder = builder_over(Arc::clone(&base));
        let mut edit = VersionEdit::new();
        edit.delete_file(1, 1);
        edit.delete_file(1, 2);
        edit.add_file(2, make_meta(3, b"a", b"g", 7));
        builder.apply(&edit);

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);

        assert!(level_numbers(&next, 1).is_empty());
        assert_eq!(level_numbers(&next, 2), vec![3]);

        // Old files stay owned by the base version only.
        drop(builder);
        assert_eq!(f1.refs(), 1);
        drop(base);
        assert_eq!(f1.refs(), 0);
        assert_eq!(f2.refs(), 0);
    }

    #[test]
    fn test_interleaved_merge_keeps_key_order() {
        let mut base = Version::new(7, 0, None);
        base.add_file(1, Arc::new(make_meta(1, b"b", b"c", 5)));
        base.add_file(1, Arc::new(make_meta(2, b"k", b"m", 6)));
        let base = Arc::new(base);

        let mut builder = builder_over(base);
        let mut edit = VersionEdit::new();
        edit.add_file(1, make_meta(3, b"e", b"g", 7));
        edit.add_file(1, make_meta(4, b"p", b"r", 8));
        builder.apply(&edit);

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);

        assert_eq!(level_numbers(&next, 1), vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_level0_orders_newest_first() {
        let base = Arc::new(Version::new(7, 0, None));

        let mut builder = builder_over(base);
        let mut edit = VersionEdit::new();
        // Overlapping ranges are fine at L0; order is by seqno descending.
        edit.add_file(0, make_meta(1, b"a", b"m", 10));
        edit.add_file(0, make_meta(2, b"c", b"p", 30));
        edit.add_file(0, make_meta(3, b"b", b"z", 20));
        builder.apply(&edit);

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);

        assert_eq!(level_numbers(&next, 0), vec![2, 3, 1]);
    }

    #[test]
    fn test_delete_resolves_against_prior_edit_add() {
        let base = Arc::new(Version::new(7, 0, None));

        let mut builder = builder_over(base);

        let mut edit1 = VersionEdit::new();
        edit1.add_file(1, make_meta(1, b"a", b"c", 5));
        builder.apply(&edit1);

        let mut edit2 = VersionEdit::new();
        edit2.delete_file(1, 1);
        builder.apply(&edit2);

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);
        assert!(level_numbers(&next, 1).is_empty());
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn test_delete_of_unknown_file_aborts() {
        let base = Arc::new(Version::new(7, 0, None));
        let mut builder = builder_over(base);

        let mut edit = VersionEdit::new();
        edit.delete_file(1, 42);
        builder.apply(&edit);
    }

    #[test]
    #[should_panic(expected = "duplicate add")]
    fn test_duplicate_add_aborts() {
        let base = Arc::new(Version::new(7, 0, None));
        let mut builder = builder_over(base);

        let mut edit = VersionEdit::new();
        edit.add_file(1, make_meta(1, b"a", b"c", 5));
        builder.apply(&edit);

        let mut edit2 = VersionEdit::new();
        edit2.add_file(1, make_meta(1, b"a", b"c", 5));
        builder.apply(&edit2);
    }

    #[test]
    fn test_invalid_level_adds_must_cancel() {
        let base = Arc::new(Version::new(7, 0, None));
        let mut builder = builder_over(base);

        let mut edit = VersionEdit::new();
        edit.add_file(9, make_meta(1, b"a", b"c", 5));
        builder.apply(&edit);
        assert!(!builder.check_consistency_for_num_levels());

        let mut edit2 = VersionEdit::new();
        edit2.delete_file(9, 1);
        builder.apply(&edit2);
        assert!(builder.check_consistency_for_num_levels());
    }

    #[test]
    fn test_repeat_delete_on_invalid_level_is_sticky() {
        let base = Arc::new(Version::new(7, 0, None));
        let mut builder = builder_over(base);

        let mut edit = VersionEdit::new();
        edit.delete_file(9, 1);
        builder.apply(&edit);
        assert!(!builder.check_consistency_for_num_levels());
    }

    #[test]
    fn test_move_to_frozen_and_slice_attachment() {
        // Base L2 holds the parent (to be moved) and the base of the output.
        let mut base = Version::new(7, 0, None);
        let parent = Arc::new(make_meta(10, b"k", b"z", 5));
        base.add_file(2, Arc::clone(&parent));
        let base = Arc::new(base);

        let sv = Arc::new(SuperVersion::new(TwoPcCompactionOptions {
            start_level: 1,
            merge_threshold: 2,
        }));
        let mut builder = VersionBuilder::new(
            InternalKeyComparator::new(),
            None,
            Arc::clone(&base),
            Some(Arc::clone(&sv)),
            true,
        );

        let mut edit = VersionEdit::new();
        edit.move_file_to_frozen(2, Arc::clone(&parent));
        edit.add_file(2, make_meta(11, b"k", b"z", 6));
        for (lo, hi) in [(b"l", b"m"), (b"n", b"o"), (b"p", b"q")] {
            edit.add_file_slice(
                2,
                FileSlice::new(
                    Arc::clone(&parent),
                    make_key(lo, 5),
                    make_key(hi, 5),
                    true,
                    11,
                ),
            );
        }
        builder.apply(&edit);

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);

        // The parent left the level hierarchy for the frozen pool.
        assert_eq!(level_numbers(&next, 2), vec![11]);
        assert!(next.frozen_contains(10));

        // All three slices attached and the threshold (2) was crossed.
        let output = &next.files(2)[0];
        assert_eq!(output.slice_count(), 3);
        assert_eq!(parent.slice_refs(), 3);
        assert_eq!(sv.merge_task_count(), 1);

        let tasks = sv.take_merge_tasks();
        assert_eq!(tasks[0].level, 2);
        assert_eq!(tasks[0].smallest.user_key(), b"k");
        assert_eq!(tasks[0].largest.user_key(), b"z");
    }

    #[test]
    fn test_frozen_files_carry_forward_while_sliced() {
        let parent = Arc::new(make_meta(10, b"k", b"z", 5));
        parent.slice_ref_inc();

        let mut base = Version::new(7, 0, None);
        base.add_frozen_file(Arc::clone(&parent));
        let base = Arc::new(base);

        let builder = builder_over(Arc::clone(&base));
        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);
        assert!(next.frozen_contains(10));

        // Once the slices are gone, the next save drops the frozen file.
        parent.slice_ref_dec();
        let builder = builder_over(base);
        let mut last = Version::new(7, 2, None);
        builder.save_to(&mut last);
        assert!(!last.frozen_contains(10));
    }

    #[test]
    fn test_deleting_output_file_releases_parent_slices() {
        let parent = Arc::new(make_meta(10, b"k", b"z", 5));

        // Base version: L2 holds an output file with one attached slice.
        let mut base = Version::new(7, 0, None);
        let output = Arc::new(make_meta(11, b"k", b"z", 6));
        base.add_file(2, Arc::clone(&output));
        base.add_file_slice(
            2,
            &output,
            FileSlice::new(Arc::clone(&parent), make_key(b"l", 5), make_key(b"m", 5), true, 11),
        );
        let base = Arc::new(base);
        assert_eq!(parent.slice_refs(), 1);

        let mut builder = builder_over(base);
        let mut edit = VersionEdit::new();
        edit.delete_file(2, 11);
        builder.apply(&edit);

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);

        assert!(level_numbers(&next, 2).is_empty());
        assert_eq!(parent.slice_refs(), 0);
    }

    #[test]
    fn test_external_file_allowance_at_level0() {
        let base = Arc::new(Version::new(7, 0, None));
        let mut builder = builder_over(base);

        let mut edit = VersionEdit::new();
        edit.add_file(0, make_meta(1, b"a", b"m", 10));
        // Ingested file: smallest_seqno == largest_seqno == 0
        edit.add_file(0, {
            FileMetadata::new(
                FileDescriptor::new(2, 0, 1024),
                make_key(b"c", 0),
                make_key(b"p", 0),
                0,
                0,
            )
        });
        builder.apply(&edit);

        let mut next = Version::new(7, 1, None);
        builder.save_to(&mut next);
        assert_eq!(level_numbers(&next, 0), vec![1, 2]);
    }
}
