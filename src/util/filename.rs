//! Database file naming conventions.
//!
//! Every on-disk file maps to a `(FileType, number)` pair. Generation is
//! deterministic; parsing is total over known shapes and returns `None` for
//! anything else. The obsolete-file purger relies on that: a name that does
//! not parse is never deleted.

use std::path::{Path, PathBuf};

use crate::options::DbPath;

/// Prefix of options files and their temp companions.
pub const OPTIONS_FILE_PREFIX: &str = "OPTIONS-";

/// Name of the archive directory kept under the WAL directory.
pub const ARCHIVE_DIR: &str = "archive";

/// File types in the database directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Write-ahead log file.
    Log,
    /// Lock file to prevent concurrent access.
    DbLock,
    /// SSTable data file.
    Table,
    /// Manifest (descriptor) file holding the version-edit log.
    Descriptor,
    /// Current file (points to the live manifest).
    Current,
    /// Temporary file.
    Temp,
    /// Info log file (`LOG`, `LOG.old.{micros}`).
    InfoLog,
    /// Identity file holding the database UUID.
    Identity,
    /// Meta database file.
    MetaDatabase,
    /// Options file.
    OptionsFile,
    /// Blob value file.
    Blob,
}

impl FileType {
    /// Short lowercase label used in log events.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Log => "wal",
            FileType::DbLock => "lock",
            FileType::Table => "table",
            FileType::Descriptor => "manifest",
            FileType::Current => "current",
            FileType::Temp => "temp",
            FileType::InfoLog => "info_log",
            FileType::Identity => "identity",
            FileType::MetaDatabase => "metadb",
            FileType::OptionsFile => "options",
            FileType::Blob => "blob",
        }
    }
}

/// Generate a table file name (without directory).
pub fn table_file_name(number: u64) -> String {
    format!("{:06}.sst", number)
}

/// Generate an SSTable file path within the path selected by `path_id`.
///
/// Falls back to the last configured path when `path_id` is out of range,
/// matching the write-side placement rule.
pub fn table_file_path(db_paths: &[DbPath], number: u64, path_id: u32) -> PathBuf {
    let idx = (path_id as usize).min(db_paths.len().saturating_sub(1));
    db_paths[idx].path.join(table_file_name(number))
}

/// Generate a log (WAL) file name (without directory).
pub fn log_file_name(number: u64) -> String {
    format!("{:06}.log", number)
}

/// Generate a log (WAL) file path.
pub fn log_file_path(wal_dir: &Path, number: u64) -> PathBuf {
    wal_dir.join(log_file_name(number))
}

/// Generate the path of an archived WAL file.
pub fn archived_log_file_path(wal_dir: &Path, number: u64) -> PathBuf {
    wal_dir.join(ARCHIVE_DIR).join(log_file_name(number))
}

/// Generate the archive directory path.
pub fn archival_directory(wal_dir: &Path) -> PathBuf {
    wal_dir.join(ARCHIVE_DIR)
}

/// Generate a manifest file name (without directory).
pub fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// Generate a manifest file path.
pub fn manifest_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(manifest_file_name(number))
}

/// Generate a temporary file name (without directory).
pub fn temp_file_name(number: u64) -> String {
    format!("{:06}.tmp", number)
}

/// Generate a temporary file path.
pub fn temp_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(temp_file_name(number))
}

/// Generate the lock file path.
pub fn lock_file_path(db_path: &Path) -> PathBuf {
    db_path.join("LOCK")
}

/// Generate the current file path.
pub fn current_file_path(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

/// Generate the identity file path.
pub fn identity_file_path(db_path: &Path) -> PathBuf {
    db_path.join("IDENTITY")
}

/// Generate an options file name (without directory).
pub fn options_file_name(number: u64) -> String {
    format!("{}{:06}", OPTIONS_FILE_PREFIX, number)
}

/// The info-log prefix in effect for a database.
///
/// Info logs written into the database directory are named `LOG`. When a
/// separate `db_log_dir` is configured, the prefix embeds the database name
/// so that several databases can share the directory.
pub fn info_log_prefix(has_log_dir: bool, db_name: &Path) -> String {
    if !has_log_dir {
        return "LOG".to_string();
    }
    let flattened: String = db_name
        .to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}_LOG", flattened.trim_start_matches('_'))
}

/// Generate the live info log file name for a prefix.
pub fn info_log_file_name(prefix: &str) -> String {
    prefix.to_string()
}

/// Generate a rotated info log file name for a prefix.
pub fn old_info_log_file_name(prefix: &str, timestamp_micros: u64) -> String {
    format!("{}.old.{}", prefix, timestamp_micros)
}

/// Parse a file name and return its type and number.
///
/// `info_log_prefix` is the value returned by [`info_log_prefix`] for this
/// database. The live info log parses with number `0`; rotated info logs
/// parse with their timestamp as the number.
///
/// Returns `None` if the name doesn't match any known pattern.
pub fn parse_file_name(name: &str, info_log_prefix: &str) -> Option<(FileType, u64)> {
    // Fixed-name files first
    if name == "CURRENT" {
        return Some((FileType::Current, 0));
    }
    if name == "LOCK" {
        return Some((FileType::DbLock, 0));
    }
    if name == "IDENTITY" {
        return Some((FileType::Identity, 0));
    }

    // Info logs: "{prefix}" or "{prefix}.old.{micros}"
    if name == info_log_prefix {
        return Some((FileType::InfoLog, 0));
    }
    if let Some(rest) = name.strip_prefix(info_log_prefix) {
        if let Some(suffix) = rest.strip_prefix(".old.") {
            if let Ok(ts) = suffix.parse::<u64>() {
                return Some((FileType::InfoLog, ts));
            }
        }
        return None;
    }

    // Manifest files: MANIFEST-NNNNNN
    if let Some(suffix) = name.strip_prefix("MANIFEST-") {
        if let Ok(number) = suffix.parse::<u64>() {
            return Some((FileType::Descriptor, number));
        }
        return None;
    }

    // Meta database files: METADB-NNNNNN
    if let Some(suffix) = name.strip_prefix("METADB-") {
        if let Ok(number) = suffix.parse::<u64>() {
            return Some((FileType::MetaDatabase, number));
        }
        return None;
    }

    // Options files: OPTIONS-NNNNNN or OPTIONS-NNNNNN.tmp
    if let Some(suffix) = name.strip_prefix(OPTIONS_FILE_PREFIX) {
        if let Ok(number) = suffix.parse::<u64>() {
            return Some((FileType::OptionsFile, number));
        }
        if let Some(stem) = suffix.strip_suffix(".tmp") {
            if let Ok(number) = stem.parse::<u64>() {
                return Some((FileType::Temp, number));
            }
        }
        return None;
    }

    // Numbered files: NNNNNN.ext
    let dot_pos = name.rfind('.')?;
    let (num_str, ext) = name.split_at(dot_pos);
    let ext = &ext[1..];

    let number = num_str.parse::<u64>().ok()?;
    let file_type = match ext {
        "log" => FileType::Log,
        "sst" => FileType::Table,
        "tmp" => FileType::Temp,
        "blob" => FileType::Blob,
        _ => return None,
    };
    Some((file_type, number))
}

/// List the entries of a directory by bare file name.
///
/// Missing directories read as empty: the obsolete-file scan treats an
/// unreadable path the same as one with nothing in it.
pub fn get_children(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names
}

/// Check if a file exists.
pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

/// Get the file size.
pub fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sync a directory to ensure file operations are durable.
pub fn sync_dir(path: &Path) -> std::io::Result<()> {
    let dir = std::fs::File::open(path)?;
    dir.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_names() {
        assert_eq!(table_file_name(456), "000456.sst");
        assert_eq!(log_file_name(123), "000123.log");
        assert_eq!(manifest_file_name(5), "MANIFEST-000005");
        assert_eq!(temp_file_name(789), "000789.tmp");
        assert_eq!(options_file_name(3), "OPTIONS-000003");
        assert_eq!(old_info_log_file_name("LOG", 99), "LOG.old.99");
    }

    #[test]
    fn test_table_file_path_multi_path() {
        let paths = vec![
            DbPath::new("/data/fast", 0),
            DbPath::new("/data/bulk", 0),
        ];

        assert_eq!(
            table_file_path(&paths, 7, 0),
            Path::new("/data/fast/000007.sst")
        );
        assert_eq!(
            table_file_path(&paths, 7, 1),
            Path::new("/data/bulk/000007.sst")
        );
        // Out-of-range path ids fall back to the last path
        assert_eq!(
            table_file_path(&paths, 7, 9),
            Path::new("/data/bulk/000007.sst")
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let cases = [
            (table_file_name(456), FileType::Table, 456),
            (log_file_name(123), FileType::Log, 123),
            (manifest_file_name(5), FileType::Descriptor, 5),
            (temp_file_name(789), FileType::Temp, 789),
            (options_file_name(3), FileType::OptionsFile, 3),
            ("000010.blob".to_string(), FileType::Blob, 10),
            ("METADB-000002".to_string(), FileType::MetaDatabase, 2),
            (old_info_log_file_name("LOG", 1234), FileType::InfoLog, 1234),
        ];

        for (name, ty, number) in cases {
            assert_eq!(parse_file_name(&name, "LOG"), Some((ty, number)), "{}", name);
        }
    }

    #[test]
    fn test_parse_fixed_names() {
        assert_eq!(parse_file_name("CURRENT", "LOG"), Some((FileType::Current, 0)));
        assert_eq!(parse_file_name("LOCK", "LOG"), Some((FileType::DbLock, 0)));
        assert_eq!(
            parse_file_name("IDENTITY", "LOG"),
            Some((FileType::Identity, 0))
        );
        // Live info log carries number 0
        assert_eq!(parse_file_name("LOG", "LOG"), Some((FileType::InfoLog, 0)));
    }

    #[test]
    fn test_parse_custom_info_log_prefix() {
        let prefix = info_log_prefix(true, Path::new("/data/mydb"));
        assert_eq!(prefix, "data_mydb_LOG");

        assert_eq!(
            parse_file_name("data_mydb_LOG", &prefix),
            Some((FileType::InfoLog, 0))
        );
        assert_eq!(
            parse_file_name("data_mydb_LOG.old.42", &prefix),
            Some((FileType::InfoLog, 42))
        );
        // Under a custom prefix, a bare "LOG" is some other database's file
        assert_eq!(parse_file_name("LOG", &prefix), None);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(parse_file_name("random.txt", "LOG"), None);
        assert_eq!(parse_file_name("abc.log", "LOG"), None);
        assert_eq!(parse_file_name("LOST_FILE", "LOG"), None);
        assert_eq!(parse_file_name("MANIFEST-abc", "LOG"), None);
        assert_eq!(parse_file_name("OPTIONS-xyz", "LOG"), None);
        assert_eq!(parse_file_name("LOG.old.notanumber", "LOG"), None);
    }

    #[test]
    fn test_options_temp_parses_as_temp() {
        assert_eq!(
            parse_file_name("OPTIONS-000011.tmp", "LOG"),
            Some((FileType::Temp, 11))
        );
    }

    #[test]
    fn test_get_children() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("000001.sst"), b"").unwrap();
        std::fs::write(dir.path().join("CURRENT"), b"").unwrap();

        let mut names = get_children(dir.path());
        names.sort();
        assert_eq!(names, vec!["000001.sst", "CURRENT"]);

        // Missing directory reads as empty
        assert!(get_children(&dir.path().join("nope")).is_empty());
    }
}
