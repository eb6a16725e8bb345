//! Version management: the immutable file-set snapshots of the LSM tree.
//!
//! - **FileMetadata**: per-table-file record (key range, seqnos, refs,
//!   attached slices)
//! - **FileSlice**: bounded key range within a parent file
//! - **Version**: immutable snapshot of level files plus the frozen pool
//! - **VersionEdit**: delta between versions
//! - **VersionBuilder**: applies edits onto a base version
//! - **SuperVersion**: mutable options and the pending merge-task set
//! - **ManifestLog**: append-only edit log backing recovery
//! - **VersionSet**: current-version pointer, counters, log-and-apply
//!
//! # Recovery
//!
//! On startup:
//! 1. Read CURRENT to find the active manifest
//! 2. Replay its edits through a builder
//! 3. Install the reconstructed version

mod builder;
mod file_metadata;
mod manifest;
mod super_version;
mod version;
mod version_edit;
mod version_set;

pub use builder::{by_smallest_key, newest_first_by_seqno, VersionBuilder};
pub use file_metadata::{FileDescriptor, FileMetadata, FileSlice, MergeTask};
pub use manifest::{read_manifest_edits, ManifestLog};
pub use super_version::SuperVersion;
pub use version::{ObsoleteSink, Version};
pub use version_edit::VersionEdit;
pub use version_set::VersionSet;

/// Tag values for encoding VersionEdit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EditTag {
    /// Comparator name.
    Comparator = 1,
    /// Log number.
    LogNumber = 2,
    /// Next file number.
    NextFileNumber = 3,
    /// Last sequence number.
    LastSequence = 4,
    /// Deleted file (level, file_number).
    DeletedFile = 6,
    /// New file (level, encoded metadata).
    NewFile = 7,
    /// Previous log number (kept for recovery compatibility).
    PrevLogNumber = 9,
}

impl EditTag {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(EditTag::Comparator),
            2 => Some(EditTag::LogNumber),
            3 => Some(EditTag::NextFileNumber),
            4 => Some(EditTag::LastSequence),
            6 => Some(EditTag::DeletedFile),
            7 => Some(EditTag::NewFile),
            9 => Some(EditTag::PrevLogNumber),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_tag_roundtrip() {
        for tag in [
            EditTag::Comparator,
            EditTag::LogNumber,
            EditTag::NextFileNumber,
            EditTag::LastSequence,
            EditTag::DeletedFile,
            EditTag::NewFile,
            EditTag::PrevLogNumber,
        ] {
            assert_eq!(EditTag::from_byte(tag.to_byte()), Some(tag));
        }
        assert_eq!(EditTag::from_byte(0), None);
        assert_eq!(EditTag::from_byte(8), None);
    }
}
