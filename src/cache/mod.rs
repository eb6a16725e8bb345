//! Caching infrastructure for the engine core.
//!
//! The table cache keeps reader handles for open table files so version
//! assembly and reads avoid repeated opens. Handles pin entries; eviction
//! only touches unpinned readers.

mod table_cache;

pub use table_cache::{TableCache, TableCacheStats, TableHandle, TableReader};
