//! Diagnostics for the file-slice compaction scheme.

use std::sync::OnceLock;

use super::collector::Counter;

/// Counters for slice-compaction activity.
///
/// The slice iterator feeds `compaction_input_bytes` on every forward step;
/// the version builder bumps `merge_tasks_queued` when a file crosses the
/// merge threshold.
#[derive(Debug, Default)]
pub struct TwoPcMetrics {
    /// Bytes of keys and values consumed as slice-compaction input.
    pub compaction_input_bytes: Counter,
    /// Merge tasks enqueued on super versions.
    pub merge_tasks_queued: Counter,
    /// File slices attached to files during version assembly.
    pub slices_attached: Counter,
}

static TWO_PC_METRICS: OnceLock<TwoPcMetrics> = OnceLock::new();

/// Process-wide slice-compaction metrics.
pub fn two_pc_metrics() -> &'static TwoPcMetrics {
    TWO_PC_METRICS.get_or_init(TwoPcMetrics::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_accessor_is_stable() {
        let a = two_pc_metrics() as *const _;
        let b = two_pc_metrics() as *const _;
        assert_eq!(a, b);
    }

    #[test]
    fn test_counters_accumulate() {
        let before = two_pc_metrics().compaction_input_bytes.get();
        two_pc_metrics().compaction_input_bytes.add(16);
        assert!(two_pc_metrics().compaction_input_bytes.get() >= before + 16);
    }
}
