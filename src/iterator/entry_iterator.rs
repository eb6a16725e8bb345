//! Materialized iterator over sorted `(key, value)` entries.

use bytes::Bytes;

use crate::util::{Comparator, InternalKeyComparator};
use crate::Result;

use super::InternalIterator;

/// An iterator over a sorted vector of encoded entries.
///
/// Table readers surface their contents through this iterator; tests use it
/// directly as the underlying cursor for slice iteration.
pub struct EntryIterator {
    icmp: InternalKeyComparator,
    /// Entries sorted by encoded internal key.
    entries: Vec<(Bytes, Bytes)>,
    /// Current position; `None` when the iterator is not positioned.
    position: Option<usize>,
}

impl EntryIterator {
    /// Create an iterator over pre-sorted entries.
    pub fn new(icmp: InternalKeyComparator, entries: Vec<(Bytes, Bytes)>) -> Self {
        debug_assert!(entries
            .windows(2)
            .all(|w| icmp.compare(&w[0].0, &w[1].0).is_lt()));
        Self {
            icmp,
            entries,
            position: None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the iterator holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl InternalIterator for EntryIterator {
    fn valid(&self) -> bool {
        matches!(self.position, Some(p) if p < self.entries.len())
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.entries[self.position.unwrap()].0
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.entries[self.position.unwrap()].1
    }

    fn next(&mut self) {
        if let Some(p) = self.position {
            self.position = if p + 1 < self.entries.len() {
                Some(p + 1)
            } else {
                None
            };
        }
    }

    fn prev(&mut self) {
        if let Some(p) = self.position {
            self.position = p.checked_sub(1);
        }
    }

    fn seek(&mut self, target: &[u8]) {
        let idx = self
            .entries
            .partition_point(|(k, _)| self.icmp.compare(k, target).is_lt());
        self.position = (idx < self.entries.len()).then_some(idx);
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        let idx = self
            .entries
            .partition_point(|(k, _)| self.icmp.compare(k, target).is_le());
        self.position = idx.checked_sub(1);
    }

    fn seek_to_first(&mut self) {
        self.position = (!self.entries.is_empty()).then_some(0);
    }

    fn seek_to_last(&mut self) {
        self.position = self.entries.len().checked_sub(1);
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }

    fn is_key_pinned(&self) -> bool {
        true
    }

    fn is_value_pinned(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InternalKey;
    use bytes::Bytes;

    fn entry(user_key: &str, seq: u64) -> (Bytes, Bytes) {
        let key = InternalKey::for_value(Bytes::copy_from_slice(user_key.as_bytes()), seq);
        (key.encode(), Bytes::from(format!("v-{}", user_key)))
    }

    fn make_iter() -> EntryIterator {
        let entries = vec![entry("a", 9), entry("c", 7), entry("e", 5), entry("g", 3)];
        EntryIterator::new(InternalKeyComparator::new(), entries)
    }

    #[test]
    fn test_forward_scan() {
        let mut iter = make_iter();
        iter.seek_to_first();

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(InternalKey::decode(iter.key()).unwrap().user_key().to_vec());
            iter.next();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"c".to_vec(), b"e".to_vec(), b"g".to_vec()]);
    }

    #[test]
    fn test_seek() {
        let mut iter = make_iter();

        // Exact hit
        let target = InternalKey::for_value(Bytes::from("c"), 7).encode();
        iter.seek(&target);
        assert!(iter.valid());
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"c");

        // Between entries lands on the next one
        let target = InternalKey::for_value(Bytes::from("d"), 100).encode();
        iter.seek(&target);
        assert!(iter.valid());
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"e");

        // Past the end invalidates
        let target = InternalKey::for_value(Bytes::from("z"), 1).encode();
        iter.seek(&target);
        assert!(!iter.valid());
    }

    #[test]
    fn test_seek_for_prev() {
        let mut iter = make_iter();

        let target = InternalKey::for_value(Bytes::from("d"), 1).encode();
        iter.seek_for_prev(&target);
        assert!(iter.valid());
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"c");

        // Before the first entry invalidates
        let target = InternalKey::for_value(Bytes::from("0"), 1).encode();
        iter.seek_for_prev(&target);
        assert!(!iter.valid());
    }

    #[test]
    fn test_prev_walks_backwards() {
        let mut iter = make_iter();
        iter.seek_to_last();
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"g");

        iter.prev();
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"e");

        iter.prev();
        iter.prev();
        assert_eq!(InternalKey::decode(iter.key()).unwrap().user_key(), b"a");

        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_empty() {
        let mut iter = EntryIterator::new(InternalKeyComparator::new(), Vec::new());
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        assert!(iter.is_empty());
    }
}
