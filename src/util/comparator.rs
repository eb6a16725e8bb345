//! Key comparison utilities.

use std::cmp::Ordering;

use crate::types::InternalKey;

/// Trait for comparing keys.
pub trait Comparator: Send + Sync {
    /// Compare two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Get the name of this comparator.
    fn name(&self) -> &str;
}

/// Default bytewise comparator (lexicographic ordering).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl BytewiseComparator {
    /// Create a new bytewise comparator.
    pub fn new() -> Self {
        Self
    }
}

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "slicedb.BytewiseComparator"
    }
}

/// Compare encoded internal keys (user_key + packed sequence/type).
///
/// Internal keys are compared by:
/// 1. User key in ascending order
/// 2. Sequence number in descending order (newer first)
/// 3. Type in descending order
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalKeyComparator {
    user_comparator: BytewiseComparator,
}

impl InternalKeyComparator {
    /// Create a new internal key comparator.
    pub fn new() -> Self {
        Self {
            user_comparator: BytewiseComparator::new(),
        }
    }

    /// Extract the user key from an encoded internal key.
    pub fn user_key<'a>(&self, internal_key: &'a [u8]) -> &'a [u8] {
        if internal_key.len() < 8 {
            internal_key
        } else {
            &internal_key[..internal_key.len() - 8]
        }
    }

    /// Get the user comparator.
    pub fn user_comparator(&self) -> &BytewiseComparator {
        &self.user_comparator
    }

    /// Compare two decoded internal keys.
    pub fn compare_keys(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        a.cmp(b)
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let user_key_a = self.user_key(a);
        let user_key_b = self.user_key(b);

        match self.user_comparator.compare(user_key_a, user_key_b) {
            Ordering::Equal => {
                // The last 8 bytes hold packed (sequence << 8 | type);
                // larger packed word sorts first.
                if a.len() >= 8 && b.len() >= 8 {
                    let num_a = u64::from_be_bytes(a[a.len() - 8..].try_into().unwrap());
                    let num_b = u64::from_be_bytes(b[b.len() - 8..].try_into().unwrap());
                    num_b.cmp(&num_a)
                } else {
                    a.len().cmp(&b.len())
                }
            }
            ord => ord,
        }
    }

    fn name(&self) -> &str {
        "slicedb.InternalKeyComparator"
    }
}
