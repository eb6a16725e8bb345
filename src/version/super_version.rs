//! SuperVersion - mutable per-column-family state around the current version.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::options::TwoPcCompactionOptions;

use super::MergeTask;

/// Mutable options and the pending merge-task set.
///
/// Version assembly reads the slice-compaction options from here and queues
/// a merge task whenever a file's attached slices cross the threshold; the
/// background merge worker drains the set.
#[derive(Debug)]
pub struct SuperVersion {
    mutable_options: Mutex<TwoPcCompactionOptions>,
    merge_tasks: Mutex<BTreeSet<MergeTask>>,
}

impl SuperVersion {
    /// Create a super version with the given slice-compaction options.
    pub fn new(options: TwoPcCompactionOptions) -> Self {
        Self {
            mutable_options: Mutex::new(options),
            merge_tasks: Mutex::new(BTreeSet::new()),
        }
    }

    /// Current slice-compaction options.
    pub fn compaction_options(&self) -> TwoPcCompactionOptions {
        *self.mutable_options.lock()
    }

    /// Replace the slice-compaction options.
    pub fn set_compaction_options(&self, options: TwoPcCompactionOptions) {
        *self.mutable_options.lock() = options;
    }

    /// Queue a merge task. Returns false if an identical task was already
    /// pending.
    pub fn queue_merge_task(&self, task: MergeTask) -> bool {
        self.merge_tasks.lock().insert(task)
    }

    /// Number of pending merge tasks.
    pub fn merge_task_count(&self) -> usize {
        self.merge_tasks.lock().len()
    }

    /// Drain all pending merge tasks.
    pub fn take_merge_tasks(&self) -> Vec<MergeTask> {
        std::mem::take(&mut *self.merge_tasks.lock())
            .into_iter()
            .collect()
    }
}

impl Default for SuperVersion {
    fn default() -> Self {
        Self::new(TwoPcCompactionOptions::default())
    }
}
