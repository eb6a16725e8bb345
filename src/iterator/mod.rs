//! Internal iterators over table-file contents.
//!
//! - [`InternalIterator`]: the cursor capability every table-level iterator
//!   implements (positioning, bidirectional stepping, pin queries)
//! - [`EntryIterator`]: a materialized iterator over sorted entries
//! - [`FileSliceIterator`]: a bounded view of another iterator constrained
//!   to a file slice's key range

mod entry_iterator;
mod slice_iterator;

pub use entry_iterator::EntryIterator;
pub use slice_iterator::FileSliceIterator;

use crate::Result;

/// Cursor contract for iterators over encoded internal keys.
///
/// `key`/`value` may only be called while `valid()` holds. Keys are encoded
/// internal keys ordered by the internal key comparator.
pub trait InternalIterator {
    /// Whether the iterator is positioned at an entry.
    fn valid(&self) -> bool;

    /// The encoded internal key at the current position.
    fn key(&self) -> &[u8];

    /// The value at the current position.
    fn value(&self) -> &[u8];

    /// Advance to the next entry.
    fn next(&mut self);

    /// Step back to the previous entry.
    fn prev(&mut self);

    /// Position at the first entry with key >= target.
    fn seek(&mut self, target: &[u8]);

    /// Position at the last entry with key <= target.
    fn seek_for_prev(&mut self, target: &[u8]);

    /// Position at the first entry.
    fn seek_to_first(&mut self);

    /// Position at the last entry.
    fn seek_to_last(&mut self);

    /// Any error the iterator has encountered.
    fn status(&self) -> Result<()>;

    /// Whether the current key's backing memory outlives the iterator
    /// position.
    fn is_key_pinned(&self) -> bool {
        false
    }

    /// Whether the current value's backing memory outlives the iterator
    /// position.
    fn is_value_pinned(&self) -> bool {
        false
    }
}
