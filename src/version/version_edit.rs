//! VersionEdit - describes changes between versions.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashSet;
use std::sync::Arc;

use crate::options::MAX_LEVELS;
use crate::{Error, Result};

use super::{EditTag, FileMetadata, FileSlice};

/// A VersionEdit describes the changes between two versions.
///
/// It records:
/// - New files to add
/// - Files to delete
/// - Files moved out of the level hierarchy into the frozen pool
/// - File slices to attach to their output files
/// - Updated log/file/sequence counters
///
/// Adds, deletes, and counters are durable (logged to the manifest); moves
/// and new slices reference live metadata by identity and exist only in
/// memory.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    /// Comparator name (set on the first edit of a manifest).
    pub comparator: Option<String>,
    /// Log file number.
    pub log_number: Option<u64>,
    /// Previous log number (kept for recovery compatibility).
    pub prev_log_number: Option<u64>,
    /// Next file number to allocate.
    pub next_file_number: Option<u64>,
    /// Last sequence number used.
    pub last_sequence: Option<u64>,
    /// Files to delete: (level, file_number).
    pub deleted_files: HashSet<(usize, u64)>,
    /// New files to add: (level, FileMetadata).
    pub new_files: Vec<(usize, FileMetadata)>,
    /// Files moved to the frozen pool: (level, meta).
    pub moved_files: Vec<(usize, Arc<FileMetadata>)>,
    /// Slices to attach, keyed during application by their output file.
    pub new_file_slices: Vec<(usize, FileSlice)>,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the comparator name.
    pub fn set_comparator(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    /// Set the log number.
    pub fn set_log_number(&mut self, num: u64) {
        self.log_number = Some(num);
    }

    /// Set the previous log number.
    pub fn set_prev_log_number(&mut self, num: u64) {
        self.prev_log_number = Some(num);
    }

    /// Set the next file number.
    pub fn set_next_file_number(&mut self, num: u64) {
        self.next_file_number = Some(num);
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    /// Record a file deletion.
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.insert((level, file_number));
    }

    /// Record a file addition.
    pub fn add_file(&mut self, level: usize, file: FileMetadata) {
        self.new_files.push((level, file));
    }

    /// Record a move of a live file into the frozen pool.
    pub fn move_file_to_frozen(&mut self, level: usize, file: Arc<FileMetadata>) {
        self.moved_files.push((level, file));
    }

    /// Record a slice to attach to its output file.
    pub fn add_file_slice(&mut self, level: usize, slice: FileSlice) {
        self.new_file_slices.push((level, slice));
    }

    /// Check if the edit is empty.
    pub fn is_empty(&self) -> bool {
        self.comparator.is_none()
            && self.log_number.is_none()
            && self.prev_log_number.is_none()
            && self.next_file_number.is_none()
            && self.last_sequence.is_none()
            && self.deleted_files.is_empty()
            && self.new_files.is_empty()
            && self.moved_files.is_empty()
            && self.new_file_slices.is_empty()
    }

    /// Encode the durable fields of the edit.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);

        if let Some(ref name) = self.comparator {
            buf.put_u8(EditTag::Comparator.to_byte());
            encode_length_prefixed(&mut buf, name.as_bytes());
        }

        if let Some(num) = self.log_number {
            buf.put_u8(EditTag::LogNumber.to_byte());
            encode_varint(&mut buf, num);
        }

        if let Some(num) = self.prev_log_number {
            buf.put_u8(EditTag::PrevLogNumber.to_byte());
            encode_varint(&mut buf, num);
        }

        if let Some(num) = self.next_file_number {
            buf.put_u8(EditTag::NextFileNumber.to_byte());
            encode_varint(&mut buf, num);
        }

        if let Some(seq) = self.last_sequence {
            buf.put_u8(EditTag::LastSequence.to_byte());
            encode_varint(&mut buf, seq);
        }

        for &(level, file_number) in &self.deleted_files {
            buf.put_u8(EditTag::DeletedFile.to_byte());
            encode_varint(&mut buf, level as u64);
            encode_varint(&mut buf, file_number);
        }

        for (level, file) in &self.new_files {
            buf.put_u8(EditTag::NewFile.to_byte());
            encode_varint(&mut buf, *level as u64);
            let meta_bytes = file.encode();
            encode_length_prefixed(&mut buf, &meta_bytes);
        }

        buf.freeze()
    }

    /// Decode an edit from manifest bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut cursor = data;

        while !cursor.is_empty() {
            let tag = cursor.get_u8();
            let tag = EditTag::from_byte(tag)
                .ok_or_else(|| Error::corruption(format!("unknown edit tag: {}", tag)))?;

            match tag {
                EditTag::Comparator => {
                    let name = decode_length_prefixed(&mut cursor)?;
                    edit.comparator = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Error::corruption("invalid comparator name"))?,
                    );
                }
                EditTag::LogNumber => {
                    edit.log_number = Some(decode_varint(&mut cursor)?);
                }
                EditTag::PrevLogNumber => {
                    edit.prev_log_number = Some(decode_varint(&mut cursor)?);
                }
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(decode_varint(&mut cursor)?);
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(decode_varint(&mut cursor)?);
                }
                EditTag::DeletedFile => {
                    let level = decode_varint(&mut cursor)? as usize;
                    if level >= MAX_LEVELS {
                        return Err(Error::corruption("invalid level for deleted file"));
                    }
                    let file_number = decode_varint(&mut cursor)?;
                    edit.deleted_files.insert((level, file_number));
                }
                EditTag::NewFile => {
                    let level = decode_varint(&mut cursor)? as usize;
                    if level >= MAX_LEVELS {
                        return Err(Error::corruption("invalid level for new file"));
                    }
                    let meta_bytes = decode_length_prefixed(&mut cursor)?;
                    let (meta, consumed) = FileMetadata::decode(meta_bytes)?;
                    if consumed != meta_bytes.len() {
                        return Err(Error::corruption("trailing bytes after file metadata"));
                    }
                    edit.new_files.push((level, meta));
                }
            }
        }

        Ok(edit)
    }
}

/// Encode a varint.
fn encode_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Decode a varint.
fn decode_varint(cursor: &mut &[u8]) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        if cursor.is_empty() {
            return Err(Error::corruption("truncated varint"));
        }

        let byte = cursor.get_u8();
        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }

        shift += 7;
        if shift >= 64 {
            return Err(Error::corruption("varint overflow"));
        }
    }
}

/// Encode length-prefixed bytes.
fn encode_length_prefixed(buf: &mut BytesMut, data: &[u8]) {
    encode_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Decode length-prefixed bytes.
fn decode_length_prefixed<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = decode_varint(cursor)? as usize;
    if cursor.len() < len {
        return Err(Error::corruption("truncated length-prefixed data"));
    }
    let data = &cursor[..len];
    *cursor = &cursor[len..];
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InternalKey, ValueType};
    use crate::version::FileDescriptor;

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
    fn test_version_edit_empty() {
        let edit = VersionEdit::new();
        assert!(edit.is_empty());

        let encoded = edit.encode();
        let decoded = VersionEdit::decode(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_version_edit_counters_round_trip() {
        let mut edit = VersionEdit::new();
        edit.set_comparator("bytewise");
        edit.set_log_number(10);
        edit.set_prev_log_number(9);
        edit.set_next_file_number(100);
        edit.set_last_sequence(5000);

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();

        assert_eq!(decoded.comparator.as_deref(), Some("bytewise"));
        assert_eq!(decoded.log_number, Some(10));
        assert_eq!(decoded.prev_log_number, Some(9));
        assert_eq!(decoded.next_file_number, Some(100));
        assert_eq!(decoded.last_sequence, Some(5000));
    }

    #[test]
    fn test_version_edit_files_round_trip() {
        let mut edit = VersionEdit::new();
        edit.delete_file(0, 1);
        edit.delete_file(1, 5);
        edit.add_file(0, make_meta(3, b"a", b"z"));
        edit.add_file(2, make_meta(4, b"aa", b"zz"));

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();

        assert_eq!(decoded.deleted_files.len(), 2);
        assert!(decoded.deleted_files.contains(&(0, 1)));
        assert!(decoded.deleted_files.contains(&(1, 5)));

        assert_eq!(decoded.new_files.len(), 2);
        assert_eq!(decoded.new_files[0].0, 0);
        assert_eq!(decoded.new_files[0].1.number(), 3);
        assert_eq!(decoded.new_files[1].0, 2);
        assert_eq!(decoded.new_files[1].1.number(), 4);
    }

    #[test]
    fn test_moves_and_slices_are_runtime_only() {
        let parent = Arc::new(make_meta(10, b"k", b"z"));
        let mut edit = VersionEdit::new();
        edit.move_file_to_frozen(2, Arc::clone(&parent));
        edit.add_file_slice(
            2,
            FileSlice::new(parent, make_key(b"m", 50), make_key(b"p", 40), true, 11),
        );

        assert!(!edit.is_empty());
        assert_eq!(edit.moved_files.len(), 1);
        assert_eq!(edit.new_file_slices.len(), 1);

        // The durable encoding carries neither.
        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert!(decoded.moved_files.is_empty());
        assert!(decoded.new_file_slices.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let err = VersionEdit::decode(&[0xEE]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_varint_round_trip() {
        let test_values = [0u64, 1, 127, 128, 255, 16383, 16384, u64::MAX >> 1];

        for &val in &test_values {
            let mut buf = BytesMut::new();
            encode_varint(&mut buf, val);

            let mut cursor: &[u8] = &buf;
            let decoded = decode_varint(&mut cursor).unwrap();

            assert_eq!(val, decoded);
            assert!(cursor.is_empty());
        }
    }
}
