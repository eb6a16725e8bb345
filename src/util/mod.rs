//! Shared utilities: key comparison and file naming.

pub mod comparator;
pub mod filename;

pub use comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
pub use filename::FileType;
