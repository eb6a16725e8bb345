//! Metrics and observability for the engine core.
//!
//! - **Primitives**: atomic `Counter` and `Gauge`
//! - **Slice-compaction diagnostics**: the process-wide input-byte counter
//!   fed by the slice iterator, owned by [`TwoPcMetrics`]

mod collector;
mod two_pc;

pub use collector::{Counter, Gauge};
pub use two_pc::{two_pc_metrics, TwoPcMetrics};
