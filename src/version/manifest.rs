//! Manifest - append-only log of version edits.
//!
//! Edits are framed into 32 KiB blocks. Each record carries a CRC32
//! checksum over its type and payload; records that do not fit in the
//! remainder of a block are fragmented (FIRST/MIDDLE/LAST). Replay stops at
//! the first torn tail, which is where a crash cut the log.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::options::SyncMode;
use crate::util::filename::manifest_file_path;
use crate::{Error, Result};

use super::VersionEdit;

/// Block size for the manifest log.
const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: CRC (4) + Length (2) + Type (1).
const HEADER_SIZE: usize = 7;

/// Fragment types for manifest records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Fragment {
    /// Reserved for block padding.
    Zero = 0,
    /// Complete record in a single fragment.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment(s) of a record.
    Middle = 3,
    /// Last fragment of a record.
    Last = 4,
}

impl Fragment {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Fragment::Zero),
            1 => Some(Fragment::Full),
            2 => Some(Fragment::First),
            3 => Some(Fragment::Middle),
            4 => Some(Fragment::Last),
            _ => None,
        }
    }
}

fn record_crc(fragment: Fragment, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[fragment as u8]);
    hasher.update(data);
    hasher.finalize()
}

/// Writer for one manifest file.
pub struct ManifestLog {
    writer: BufWriter<File>,
    block_offset: usize,
    sync_mode: SyncMode,
    file_number: u64,
    path: PathBuf,
    /// Bytes appended so far; drives manifest rolling.
    written: u64,
}

impl ManifestLog {
    /// Create a fresh manifest file.
    pub fn create(db_path: &Path, file_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let path = manifest_file_path(db_path, file_number);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE * 4, file),
            block_offset: 0,
            sync_mode,
            file_number,
            path,
            written: 0,
        })
    }

    /// Open an existing manifest for appending (after recovery).
    pub fn open_for_append(db_path: &Path, file_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let path = manifest_file_path(db_path, file_number);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE * 4, file),
            block_offset: file_size as usize % BLOCK_SIZE,
            sync_mode,
            file_number,
            path,
            written: file_size,
        })
    }

    /// File number of this manifest.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Path of this manifest.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended to this manifest so far.
    pub fn size(&self) -> u64 {
        self.written
    }

    /// Append a version edit.
    pub fn add_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        let data = edit.encode();
        self.add_record(&data)?;

        if self.sync_mode == SyncMode::Always {
            self.sync()?;
        }
        Ok(())
    }

    fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data.len();
        let mut ptr = 0;
        let mut begin = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Pad the block tail; readers skip it as Zero fragments.
                if leftover > 0 {
                    self.writer.write_all(&vec![0u8; leftover])?;
                    self.written += leftover as u64;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.min(avail);
            let end = left == fragment_len;

            let fragment = match (begin, end) {
                (true, true) => Fragment::Full,
                (true, false) => Fragment::First,
                (false, true) => Fragment::Last,
                (false, false) => Fragment::Middle,
            };

            self.emit_fragment(fragment, &data[ptr..ptr + fragment_len])?;

            ptr += fragment_len;
            left -= fragment_len;
            begin = false;

            if left == 0 {
                return Ok(());
            }
        }
    }

    fn emit_fragment(&mut self, fragment: Fragment, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let crc = record_crc(fragment, data);

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        header[6] = fragment as u8;

        self.writer.write_all(&header)?;
        self.writer.write_all(data)?;

        let record_size = HEADER_SIZE + data.len();
        self.block_offset += record_size;
        self.written += record_size as u64;

        Ok(())
    }

    /// Flush buffers and sync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Flush and sync, consuming the writer.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

/// Read every edit from a manifest file, in append order.
pub fn read_manifest_edits(db_path: &Path, file_number: u64) -> Result<Vec<VersionEdit>> {
    let path = manifest_file_path(db_path, file_number);
    let mut raw = Vec::new();
    File::open(&path)?.read_to_end(&mut raw)?;

    let mut edits = Vec::new();
    let mut scratch: Vec<u8> = Vec::new();
    let mut in_fragmented_record = false;

    let mut block_start = 0;
    while block_start < raw.len() {
        let block = &raw[block_start..(block_start + BLOCK_SIZE).min(raw.len())];
        let mut offset = 0;

        while offset + HEADER_SIZE <= block.len() {
            let crc_expected =
                u32::from_le_bytes(block[offset..offset + 4].try_into().unwrap());
            let length =
                u16::from_le_bytes(block[offset + 4..offset + 6].try_into().unwrap()) as usize;
            let fragment_byte = block[offset + 6];

            let Some(fragment) = Fragment::from_byte(fragment_byte) else {
                return Err(Error::corruption("invalid manifest fragment type"));
            };

            if fragment == Fragment::Zero && length == 0 {
                // Block tail padding
                offset += HEADER_SIZE;
                continue;
            }

            if offset + HEADER_SIZE + length > block.len() {
                // Torn tail write: stop replay here.
                return Ok(edits);
            }

            let data = &block[offset + HEADER_SIZE..offset + HEADER_SIZE + length];
            let crc_actual = record_crc(fragment, data);
            if crc_expected != crc_actual {
                return Err(Error::CrcMismatch {
                    expected: crc_expected,
                    actual: crc_actual,
                });
            }

            match fragment {
                Fragment::Full => {
                    if in_fragmented_record {
                        return Err(Error::corruption("full record inside fragmented record"));
                    }
                    edits.push(VersionEdit::decode(data)?);
                }
                Fragment::First => {
                    if in_fragmented_record {
                        return Err(Error::corruption("nested first fragment"));
                    }
                    scratch.clear();
                    scratch.extend_from_slice(data);
                    in_fragmented_record = true;
                }
                Fragment::Middle => {
                    if !in_fragmented_record {
                        return Err(Error::corruption("unexpected middle fragment"));
                    }
                    scratch.extend_from_slice(data);
                }
                Fragment::Last => {
                    if !in_fragmented_record {
                        return Err(Error::corruption("unexpected last fragment"));
                    }
                    scratch.extend_from_slice(data);
                    edits.push(VersionEdit::decode(&scratch)?);
                    in_fragmented_record = false;
                }
                Fragment::Zero => {}
            }

            offset += HEADER_SIZE + length;
        }

        block_start += BLOCK_SIZE;
    }

    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InternalKey;
    use crate::version::{FileDescriptor, FileMetadata};
    use bytes::Bytes;
    use tempfile::tempdir;

    fn make_meta(num: u64, smallest: &[u8], largest: &[u8]) -> FileMetadata {
        FileMetadata::new(
            FileDescriptor::new(num, 0, 1024),
            InternalKey::for_value(Bytes::copy_from_slice(smallest), 1),
            InternalKey::for_value(Bytes::copy_from_slice(largest), 100),
            1,
            100,
        )
    }

    #[test]
    fn test_empty_manifest() {
        let dir = tempdir().unwrap();
        let log = ManifestLog::create(dir.path(), 1, SyncMode::None).unwrap();
        log.close().unwrap();

        let edits = read_manifest_edits(dir.path(), 1).unwrap();
        assert!(edits.is_empty());
    }

    #[test]
    fn test_single_edit_round_trip() {
        let dir = tempdir().unwrap();

        let mut log = ManifestLog::create(dir.path(), 1, SyncMode::None).unwrap();
        let mut edit = VersionEdit::new();
        edit.set_comparator("bytewise");
        edit.set_log_number(10);
        edit.set_next_file_number(100);
        log.add_edit(&edit).unwrap();
        log.close().unwrap();

        let edits = read_manifest_edits(dir.path(), 1).unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].comparator.as_deref(), Some("bytewise"));
        assert_eq!(edits[0].log_number, Some(10));
        assert_eq!(edits[0].next_file_number, Some(100));
    }

    #[test]
    fn test_many_edits_round_trip() {
        let dir = tempdir().unwrap();

        let mut log = ManifestLog::create(dir.path(), 1, SyncMode::None).unwrap();
        for i in 0..10u64 {
            let mut edit = VersionEdit::new();
            edit.set_last_sequence(i * 100);
            edit.add_file((i % 7) as usize, make_meta(i, b"start", b"tail"));
            log.add_edit(&edit).unwrap();
        }
        log.close().unwrap();

        let edits = read_manifest_edits(dir.path(), 1).unwrap();
        assert_eq!(edits.len(), 10);
        for (i, edit) in edits.iter().enumerate() {
            assert_eq!(edit.last_sequence, Some((i as u64) * 100));
            assert_eq!(edit.new_files.len(), 1);
            assert_eq!(edit.new_files[0].0, i % 7);
        }
    }

    #[test]
    fn test_fragmented_record_spans_blocks() {
        let dir = tempdir().unwrap();

        // One edit large enough to be fragmented across blocks.
        let mut log = ManifestLog::create(dir.path(), 1, SyncMode::None).unwrap();
        let mut edit = VersionEdit::new();
        let big_key = vec![b'k'; 20_000];
        let mut meta = make_meta(1, &big_key, &{
            let mut hi = big_key.clone();
            hi.push(b'z');
            hi
        });
        for _ in 0..2 {
            log.add_edit(&edit).unwrap();
        }
        edit.add_file(1, meta.clone());
        log.add_edit(&edit).unwrap();
        // A trailing small edit confirms framing recovers after the big one.
        let mut small = VersionEdit::new();
        small.set_log_number(7);
        log.add_edit(&small).unwrap();
        log.close().unwrap();

        let edits = read_manifest_edits(dir.path(), 1).unwrap();
        assert_eq!(edits.len(), 4);
        assert_eq!(edits[2].new_files.len(), 1);
        assert_eq!(edits[3].log_number, Some(7));

        meta = edits[2].new_files[0].1.clone();
        assert_eq!(meta.number(), 1);
    }

    #[test]
    fn test_append_after_reopen() {
        let dir = tempdir().unwrap();

        {
            let mut log = ManifestLog::create(dir.path(), 1, SyncMode::None).unwrap();
            let mut edit = VersionEdit::new();
            edit.set_log_number(1);
            log.add_edit(&edit).unwrap();
            log.close().unwrap();
        }
        {
            let mut log = ManifestLog::open_for_append(dir.path(), 1, SyncMode::None).unwrap();
            let mut edit = VersionEdit::new();
            edit.set_log_number(2);
            log.add_edit(&edit).unwrap();
            log.close().unwrap();
        }

        let edits = read_manifest_edits(dir.path(), 1).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].log_number, Some(1));
        assert_eq!(edits[1].log_number, Some(2));
    }

    #[test]
    fn test_corrupt_record_detected() {
        let dir = tempdir().unwrap();

        let mut log = ManifestLog::create(dir.path(), 1, SyncMode::None).unwrap();
        let mut edit = VersionEdit::new();
        edit.set_log_number(1);
        log.add_edit(&edit).unwrap();
        let path = log.path().to_path_buf();
        log.close().unwrap();

        // Flip one payload byte
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let err = read_manifest_edits(dir.path(), 1).unwrap_err();
        assert!(err.is_corruption() || matches!(err, Error::CrcMismatch { .. }));
    }
}
