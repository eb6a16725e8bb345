//! Bounded iterator over one file slice.

use bytes::Bytes;

use crate::metrics::two_pc_metrics;
use crate::util::{Comparator, InternalKeyComparator};
use crate::version::FileSlice;
use crate::Result;

use super::InternalIterator;

/// A view of a table-file iterator constrained to a slice's key range.
///
/// The slice's upper bound is inclusive; the lower bound is inclusive iff
/// the slice contains its smallest key. The iterator is valid only while
/// the underlying cursor sits inside those bounds, so stepping past either
/// end invalidates it without consuming out-of-range entries.
pub struct FileSliceIterator<I: InternalIterator> {
    icmp: InternalKeyComparator,
    file_iter: I,
    smallest: Bytes,
    largest: Bytes,
    is_contain_smallest: bool,
}

impl<I: InternalIterator> FileSliceIterator<I> {
    /// Create an iterator over `slice`, wrapping the file's own iterator.
    ///
    /// The new iterator is positioned at the slice's first entry.
    pub fn new(slice: &FileSlice, file_iter: I, icmp: InternalKeyComparator) -> Self {
        let mut iter = Self {
            icmp,
            file_iter,
            smallest: slice.smallest().encode(),
            largest: slice.largest().encode(),
            is_contain_smallest: slice.is_contain_smallest(),
        };
        iter.seek_to_first();
        iter
    }

    fn in_bounds(&self, key: &[u8]) -> bool {
        let scmp = self.icmp.compare(key, &self.smallest);
        if scmp.is_lt() || (scmp.is_eq() && !self.is_contain_smallest) {
            return false;
        }
        !self.icmp.compare(key, &self.largest).is_gt()
    }
}

impl<I: InternalIterator> InternalIterator for FileSliceIterator<I> {
    fn valid(&self) -> bool {
        self.file_iter.valid() && self.in_bounds(self.file_iter.key())
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.file_iter.key()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.file_iter.value()
    }

    fn next(&mut self) {
        if !self.valid() {
            return;
        }

        let prev_key = self.file_iter.key().to_vec();
        two_pc_metrics()
            .compaction_input_bytes
            .add((self.file_iter.key().len() + self.file_iter.value().len()) as u64);

        self.file_iter.next();
        if self.valid() {
            // Key order over the slice is strictly increasing.
            assert!(
                self.icmp.compare(self.file_iter.key(), &prev_key).is_gt(),
                "slice iterator stepped to a non-increasing key"
            );
        }
    }

    fn prev(&mut self) {
        if self.valid() {
            self.file_iter.prev();
        }
    }

    fn seek(&mut self, target: &[u8]) {
        self.file_iter.seek(target);
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.file_iter.seek_for_prev(target);
    }

    fn seek_to_first(&mut self) {
        self.file_iter.seek(&self.smallest);
        if !self.is_contain_smallest
            && self.file_iter.valid()
            && self.icmp.compare(self.file_iter.key(), &self.smallest).is_eq()
        {
            self.file_iter.next();
        }
    }

    fn seek_to_last(&mut self) {
        self.file_iter.seek(&self.largest);
    }

    fn status(&self) -> Result<()> {
        self.file_iter.status()
    }

    fn is_key_pinned(&self) -> bool {
        self.file_iter.is_key_pinned()
    }

    fn is_value_pinned(&self) -> bool {
        self.file_iter.is_value_pinned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::EntryIterator;
    use crate::types::InternalKey;
    use crate::version::{FileDescriptor, FileMetadata, FileSlice};
    use std::sync::Arc;

    fn key(user_key: &str, seq: u64) -> InternalKey {
        InternalKey::for_value(Bytes::copy_from_slice(user_key.as_bytes()), seq)
    }

    fn file_iter(user_keys: &[(&str, u64)]) -> EntryIterator {
        let entries = user_keys
            .iter()
            .map(|(k, seq)| (key(k, *seq).encode(), Bytes::from(format!("v-{}", k))))
            .collect();
        EntryIterator::new(InternalKeyComparator::new(), entries)
    }

    fn parent_file() -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            FileDescriptor::new(10, 0, 1024),
            key("a", 100),
            key("z", 1),
            1,
            100,
        ))
    }

    fn slice(smallest: InternalKey, largest: InternalKey, contains: bool) -> FileSlice {
        FileSlice::new(parent_file(), smallest, largest, contains, 11)
    }

    fn user_keys_of<I: InternalIterator>(iter: &mut FileSliceIterator<I>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while iter.valid() {
            out.push(InternalKey::decode(iter.key()).unwrap().user_key().to_vec());
            iter.next();
        }
        out
    }

    #[test]
    fn test_bounded_forward_scan() {
        let inner = file_iter(&[("b", 9), ("d", 8), ("f", 7), ("h", 6), ("j", 5)]);
        let s = slice(key("d", 8), key("h", 6), true);
        let mut iter = FileSliceIterator::new(&s, inner, InternalKeyComparator::new());

        assert_eq!(
            user_keys_of(&mut iter),
            vec![b"d".to_vec(), b"f".to_vec(), b"h".to_vec()]
        );
    }

    #[test]
    fn test_exclusive_lower_bound_skips_smallest() {
        let inner = file_iter(&[("b", 9), ("d", 8), ("f", 7), ("h", 6)]);
        let s = slice(key("d", 8), key("h", 6), false);
        let mut iter = FileSliceIterator::new(&s, inner, InternalKeyComparator::new());

        assert_eq!(user_keys_of(&mut iter), vec![b"f".to_vec(), b"h".to_vec()]);
    }

    #[test]
    fn test_upper_bound_is_inclusive() {
        let inner = file_iter(&[("b", 9), ("d", 8)]);
        let s = slice(key("b", 9), key("d", 8), true);
        let mut iter = FileSliceIterator::new(&s, inner, InternalKeyComparator::new());

        iter.seek_to_last();
        assert!(iter.valid());
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"d");
    }

    #[test]
    fn test_invalid_outside_bounds() {
        let inner = file_iter(&[("b", 9), ("d", 8), ("f", 7)]);
        let s = slice(key("c", 100), key("e", 1), true);
        let mut iter = FileSliceIterator::new(&s, inner, InternalKeyComparator::new());

        // Seek before the slice: underlying cursor lands on "b", out of range.
        iter.seek(&key("a", 100).encode());
        assert!(!iter.valid());

        // Seek past the slice: lands on "f", also out of range.
        iter.seek(&key("f", 7).encode());
        assert!(!iter.valid());
    }

    #[test]
    fn test_next_accumulates_input_bytes() {
        let inner = file_iter(&[("b", 9), ("d", 8), ("f", 7)]);
        let s = slice(key("b", 9), key("f", 7), true);
        let mut iter = FileSliceIterator::new(&s, inner, InternalKeyComparator::new());

        let before = two_pc_metrics().compaction_input_bytes.get();
        iter.next();
        assert!(two_pc_metrics().compaction_input_bytes.get() > before);
    }

    #[test]
    fn test_empty_slice_range() {
        let inner = file_iter(&[("b", 9), ("f", 7)]);
        // Range (c..=e) contains no entries.
        let s = slice(key("c", 100), key("e", 1), true);
        let mut iter = FileSliceIterator::new(&s, inner, InternalKeyComparator::new());
        assert_eq!(user_keys_of(&mut iter), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn test_pin_properties_delegate() {
        let inner = file_iter(&[("b", 9)]);
        let s = slice(key("b", 9), key("b", 9), true);
        let iter = FileSliceIterator::new(&s, inner, InternalKeyComparator::new());

        assert!(iter.is_key_pinned());
        assert!(iter.is_value_pinned());
        assert!(iter.status().is_ok());
    }
}
