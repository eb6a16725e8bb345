//! File metadata for SSTable files.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::cache::TableHandle;
use crate::types::InternalKey;

/// Locator of a table file: number, storage path index, and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Unique file number.
    pub number: u64,
    /// Index into the configured storage paths.
    pub path_id: u32,
    /// File size in bytes.
    pub file_size: u64,
}

impl FileDescriptor {
    /// Create a new descriptor.
    pub fn new(number: u64, path_id: u32, file_size: u64) -> Self {
        Self {
            number,
            path_id,
            file_size,
        }
    }
}

/// A bounded key range within a parent file, used as slice-compaction input.
///
/// The upper bound is inclusive; the lower bound is inclusive iff
/// `is_contain_smallest`. The range always lies within the parent's range.
#[derive(Debug, Clone)]
pub struct FileSlice {
    /// The file the slice's data lives in.
    parent: Arc<FileMetadata>,
    smallest: InternalKey,
    largest: InternalKey,
    is_contain_smallest: bool,
    /// Number of the file this slice will be attached to.
    output_file_number: u64,
}

impl FileSlice {
    /// Create a slice over `parent` covering `[smallest, largest]`.
    pub fn new(
        parent: Arc<FileMetadata>,
        smallest: InternalKey,
        largest: InternalKey,
        is_contain_smallest: bool,
        output_file_number: u64,
    ) -> Self {
        debug_assert!(smallest <= largest);
        debug_assert!(*parent.smallest() <= smallest && largest <= *parent.largest());
        Self {
            parent,
            smallest,
            largest,
            is_contain_smallest,
            output_file_number,
        }
    }

    /// The file the slice's data lives in.
    pub fn parent(&self) -> &Arc<FileMetadata> {
        &self.parent
    }

    /// Lower bound of the slice.
    pub fn smallest(&self) -> &InternalKey {
        &self.smallest
    }

    /// Upper bound of the slice (inclusive).
    pub fn largest(&self) -> &InternalKey {
        &self.largest
    }

    /// Whether the lower bound is inclusive.
    pub fn is_contain_smallest(&self) -> bool {
        self.is_contain_smallest
    }

    /// Number of the file this slice attaches to.
    pub fn output_file_number(&self) -> u64 {
        self.output_file_number
    }
}

/// Metadata about an SSTable file.
///
/// Shared between versions via `Arc`. The `refs` counter tracks logical
/// owners (the builder while assembling, each version that holds the file);
/// `slice_refs` counts slices in other files that still read from this one.
/// The file's on-disk bytes may be reclaimed only when both reach zero.
#[derive(Debug)]
pub struct FileMetadata {
    /// File locator.
    fd: FileDescriptor,
    /// Smallest key in the file.
    smallest: InternalKey,
    /// Largest key in the file.
    largest: InternalKey,
    /// Smallest sequence number in the file.
    smallest_seqno: u64,
    /// Largest sequence number in the file.
    largest_seqno: u64,
    /// Logical owners: assembling builders and published versions.
    refs: AtomicU32,
    /// Slices in other files still reading from this file.
    slice_refs: AtomicI32,
    /// Slices attached to this file during version assembly.
    file_slices: Mutex<Vec<FileSlice>>,
    /// Cached table reader handle, released on destruction or eviction.
    table_handle: Mutex<Option<TableHandle>>,
}

impl FileMetadata {
    /// Create new file metadata.
    pub fn new(
        fd: FileDescriptor,
        smallest: InternalKey,
        largest: InternalKey,
        smallest_seqno: u64,
        largest_seqno: u64,
    ) -> Self {
        debug_assert!(smallest <= largest);
        Self {
            fd,
            smallest,
            largest,
            smallest_seqno,
            largest_seqno,
            refs: AtomicU32::new(0),
            slice_refs: AtomicI32::new(0),
            file_slices: Mutex::new(Vec::new()),
            table_handle: Mutex::new(None),
        }
    }

    /// Get the file descriptor.
    pub fn fd(&self) -> FileDescriptor {
        self.fd
    }

    /// Get the file number.
    pub fn number(&self) -> u64 {
        self.fd.number
    }

    /// Get the storage path index.
    pub fn path_id(&self) -> u32 {
        self.fd.path_id
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.fd.file_size
    }

    /// Get the smallest key.
    pub fn smallest(&self) -> &InternalKey {
        &self.smallest
    }

    /// Get the largest key.
    pub fn largest(&self) -> &InternalKey {
        &self.largest
    }

    /// Get the smallest sequence number.
    pub fn smallest_seqno(&self) -> u64 {
        self.smallest_seqno
    }

    /// Get the largest sequence number.
    pub fn largest_seqno(&self) -> u64 {
        self.largest_seqno
    }

    /// Current owner count.
    pub fn refs(&self) -> u32 {
        self.refs.load(AtomicOrdering::Acquire)
    }

    /// Register an owner.
    pub fn ref_inc(&self) {
        self.refs.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Drop an owner. Returns true when this was the last owner and no
    /// slices reference the file, i.e. the meta is now destroyable.
    pub fn unref_is_last(&self) -> bool {
        let prev = self.refs.fetch_sub(1, AtomicOrdering::AcqRel);
        debug_assert!(prev > 0, "unref of file {} below zero", self.fd.number);
        prev == 1 && self.slice_refs() <= 0
    }

    /// Current slice reference count.
    pub fn slice_refs(&self) -> i32 {
        self.slice_refs.load(AtomicOrdering::Acquire)
    }

    /// Register a slice reading from this file.
    pub fn slice_ref_inc(&self) {
        self.slice_refs.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Drop a slice reference.
    pub fn slice_ref_dec(&self) {
        let prev = self.slice_refs.fetch_sub(1, AtomicOrdering::AcqRel);
        debug_assert!(prev > 0, "slice_refs of file {} below zero", self.fd.number);
    }

    /// Attach a slice to this file.
    pub fn attach_slice(&self, slice: FileSlice) {
        self.file_slices.lock().push(slice);
    }

    /// Number of slices attached to this file.
    pub fn slice_count(&self) -> usize {
        self.file_slices.lock().len()
    }

    /// Snapshot of the attached slices.
    pub fn slices(&self) -> Vec<FileSlice> {
        self.file_slices.lock().clone()
    }

    /// Store the cached table reader handle.
    pub fn set_table_handle(&self, handle: TableHandle) {
        *self.table_handle.lock() = Some(handle);
    }

    /// Whether a table reader handle is cached.
    pub fn has_table_handle(&self) -> bool {
        self.table_handle.lock().is_some()
    }

    /// Remove and return the cached handle, releasing the pin when the
    /// caller drops it.
    pub fn take_table_handle(&self) -> Option<TableHandle> {
        self.table_handle.lock().take()
    }

    /// Check if the file's key range overlaps with the given user-key range.
    pub fn overlaps(&self, smallest: &[u8], largest: &[u8]) -> bool {
        self.largest.user_key() >= smallest && self.smallest.user_key() <= largest
    }

    /// Encode the durable fields for the manifest.
    pub fn encode(&self) -> Bytes {
        let smallest_encoded = self.smallest.encode();
        let largest_encoded = self.largest.encode();

        let mut buf = BytesMut::with_capacity(44 + smallest_encoded.len() + largest_encoded.len());

        buf.put_u64_le(self.fd.number);
        buf.put_u32_le(self.fd.path_id);
        buf.put_u64_le(self.fd.file_size);
        buf.put_u64_le(self.smallest_seqno);
        buf.put_u64_le(self.largest_seqno);

        buf.put_u32_le(smallest_encoded.len() as u32);
        buf.put_slice(&smallest_encoded);
        buf.put_u32_le(largest_encoded.len() as u32);
        buf.put_slice(&largest_encoded);

        buf.freeze()
    }

    /// Decode metadata from manifest bytes; returns the meta and the bytes
    /// consumed.
    pub fn decode(data: &[u8]) -> crate::Result<(Self, usize)> {
        const FIXED: usize = 8 + 4 + 8 + 8 + 8;
        if data.len() < FIXED {
            return Err(crate::Error::corruption("file metadata too short"));
        }

        let number = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let path_id = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let file_size = u64::from_le_bytes(data[12..20].try_into().unwrap());
        let smallest_seqno = u64::from_le_bytes(data[20..28].try_into().unwrap());
        let largest_seqno = u64::from_le_bytes(data[28..36].try_into().unwrap());

        let mut offset = FIXED;

        let smallest = decode_key(data, &mut offset, "smallest")?;
        let largest = decode_key(data, &mut offset, "largest")?;

        Ok((
            Self::new(
                FileDescriptor::new(number, path_id, file_size),
                smallest,
                largest,
                smallest_seqno,
                largest_seqno,
            ),
            offset,
        ))
    }
}

fn decode_key(data: &[u8], offset: &mut usize, what: &str) -> crate::Result<InternalKey> {
    if data.len() < *offset + 4 {
        return Err(crate::Error::corruption(format!("{} key truncated", what)));
    }
    let len = u32::from_le_bytes(data[*offset..*offset + 4].try_into().unwrap()) as usize;
    *offset += 4;

    if data.len() < *offset + len {
        return Err(crate::Error::corruption(format!("{} key truncated", what)));
    }
    let key = InternalKey::decode(&data[*offset..*offset + len])
        .ok_or_else(|| crate::Error::corruption(format!("invalid {} key", what)))?;
    *offset += len;
    Ok(key)
}

impl Clone for FileMetadata {
    /// Clone the durable fields. Runtime state (owners, slices, cached
    /// handle) starts fresh on the clone.
    fn clone(&self) -> Self {
        Self::new(
            self.fd,
            self.smallest.clone(),
            self.largest.clone(),
            self.smallest_seqno,
            self.largest_seqno,
        )
    }
}

impl PartialEq for FileMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.fd.number == other.fd.number
    }
}

impl Eq for FileMetadata {}

/// A request to merge the slices accumulated on one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTask {
    /// Level of the file whose slices crossed the threshold.
    pub level: usize,
    /// Smallest key of the file.
    pub smallest: InternalKey,
    /// Largest key of the file.
    pub largest: InternalKey,
}

impl MergeTask {
    /// Create a merge task.
    pub fn new(level: usize, smallest: InternalKey, largest: InternalKey) -> Self {
        Self {
            level,
            smallest,
            largest,
        }
    }
}

impl Ord for MergeTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.smallest.cmp(&other.smallest))
            .then_with(|| self.largest.cmp(&other.largest))
    }
}

impl PartialOrd for MergeTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(Bytes::copy_from_slice(user_key), seq, ValueType::Value)
    }

    fn make_meta(num: u64, smallest: &[u8], largest: &[u8]) -> FileMetadata {
        FileMetadata::new(
            FileDescriptor::new(num, 0, 1024),
            make_key(smallest, 1),
            make_key(largest, 100),
            1,
            100,
        )
    }

    #[test]
    fn test_file_metadata_basic() {
        let meta = make_meta(1, b"aaa", b"zzz");

        assert_eq!(meta.number(), 1);
        assert_eq!(meta.file_size(), 1024);
        assert_eq!(meta.smallest().user_key(), b"aaa");
        assert_eq!(meta.largest().user_key(), b"zzz");
        assert_eq!(meta.refs(), 0);
        assert_eq!(meta.slice_refs(), 0);
    }

    #[test]
    fn test_ref_counting() {
        let meta = make_meta(1, b"a", b"z");

        meta.ref_inc();
        meta.ref_inc();
        assert_eq!(meta.refs(), 2);

        assert!(!meta.unref_is_last());
        assert!(meta.unref_is_last());
    }

    #[test]
    fn test_unref_not_last_while_slices_live() {
        let meta = make_meta(1, b"a", b"z");
        meta.ref_inc();
        meta.slice_ref_inc();

        // Last owner gone, but a slice still reads from the file
        assert!(!meta.unref_is_last());

        meta.slice_ref_dec();
        assert_eq!(meta.slice_refs(), 0);
    }

    #[test]
    fn test_slice_attachment() {
        let parent = Arc::new(make_meta(10, b"k", b"z"));
        let output = make_meta(11, b"k", b"z");

        let slice = FileSlice::new(
            Arc::clone(&parent),
            make_key(b"m", 50),
            make_key(b"p", 60),
            true,
            11,
        );

        parent.slice_ref_inc();
        output.attach_slice(slice.clone());

        assert_eq!(output.slice_count(), 1);
        assert_eq!(parent.slice_refs(), 1);
        assert_eq!(output.slices()[0].output_file_number(), 11);
        assert!(slice.is_contain_smallest());
    }

    #[test]
    fn test_encode_decode() {
        let meta = FileMetadata::new(
            FileDescriptor::new(42, 2, 8192),
            make_key(b"start", 10),
            make_key(b"tail", 50),
            10,
            50,
        );

        let encoded = meta.encode();
        let (decoded, consumed) = FileMetadata::decode(&encoded).unwrap();

        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.number(), 42);
        assert_eq!(decoded.path_id(), 2);
        assert_eq!(decoded.file_size(), 8192);
        assert_eq!(decoded.smallest_seqno(), 10);
        assert_eq!(decoded.largest_seqno(), 50);
        assert_eq!(decoded.smallest().user_key(), b"start");
        assert_eq!(decoded.largest().user_key(), b"tail");
    }

    #[test]
    fn test_overlaps() {
        let meta = make_meta(1, b"bbb", b"ddd");

        assert!(meta.overlaps(b"aaa", b"ccc"));
        assert!(meta.overlaps(b"ccc", b"eee"));
        assert!(meta.overlaps(b"bbb", b"ddd"));
        assert!(!meta.overlaps(b"aaa", b"aaz"));
        assert!(!meta.overlaps(b"eee", b"zzz"));
    }

    #[test]
    fn test_merge_task_ordering() {
        let t1 = MergeTask::new(1, make_key(b"a", 1), make_key(b"m", 1));
        let t2 = MergeTask::new(1, make_key(b"n", 1), make_key(b"z", 1));
        let t3 = MergeTask::new(2, make_key(b"a", 1), make_key(b"m", 1));

        assert!(t1 < t2);
        assert!(t2 < t3);
    }
}
