//! WAL archival and archive pruning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::options::Options;
use crate::util::filename::{archival_directory, archived_log_file_path, get_children, parse_file_name};
use crate::util::FileType;
use crate::Result;

/// Moves delete-eligible WAL files into the archive and prunes the archive
/// by TTL and total size.
pub struct WalManager {
    options: Arc<Options>,
    wal_dir: PathBuf,
}

impl WalManager {
    /// Create a manager over the given WAL directory.
    pub fn new(options: Arc<Options>, wal_dir: PathBuf) -> Self {
        Self { options, wal_dir }
    }

    /// The archive directory path.
    pub fn archive_dir(&self) -> PathBuf {
        archival_directory(&self.wal_dir)
    }

    /// Move a WAL into the archive instead of deleting it.
    pub fn archive_wal_file(&self, fname: &Path, number: u64) -> Result<()> {
        std::fs::create_dir_all(self.archive_dir())?;
        let target = archived_log_file_path(&self.wal_dir, number);

        match std::fs::rename(fname, &target) {
            Ok(()) => {
                tracing::info!(wal = number, target = %target.display(), "archived WAL file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(wal = number, "WAL to archive already gone");
                Ok(())
            }
            Err(e) => {
                tracing::error!(wal = number, error = %e, "failed to archive WAL file");
                Err(e.into())
            }
        }
    }

    /// Prune the archive: drop WALs past their TTL, then drop the oldest
    /// until the archive fits the size cap.
    pub fn purge_obsolete_wal_files(&self) {
        if !self.options.wal_archival_enabled() {
            return;
        }

        let archive = self.archive_dir();
        let mut archived: Vec<(u64, PathBuf, u64, SystemTime)> = Vec::new();

        for name in get_children(&archive) {
            let Some((FileType::Log, number)) = parse_file_name(&name, "LOG") else {
                continue;
            };
            let path = archive.join(&name);
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            archived.push((number, path, meta.len(), mtime));
        }

        if self.options.wal_ttl_seconds > 0 {
            let ttl = Duration::from_secs(self.options.wal_ttl_seconds);
            let now = SystemTime::now();
            archived.retain(|(number, path, _, mtime)| {
                let expired = now
                    .duration_since(*mtime)
                    .map(|age| age > ttl)
                    .unwrap_or(false);
                if expired {
                    self.delete_archived(*number, path);
                }
                !expired
            });
        }

        if self.options.wal_size_limit_mb > 0 {
            let limit = self.options.wal_size_limit_mb * 1024 * 1024;
            let mut total: u64 = archived.iter().map(|(_, _, size, _)| size).sum();

            // Oldest first
            archived.sort_by_key(|(number, _, _, _)| *number);
            for (number, path, size, _) in &archived {
                if total <= limit {
                    break;
                }
                self.delete_archived(*number, path);
                total -= size;
            }
        }
    }

    fn delete_archived(&self, number: u64, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::info!(wal = number, "deleted archived WAL file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(wal = number, error = %e, "failed to delete archived WAL file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::filename::log_file_name;
    use tempfile::tempdir;

    fn manager_with(wal_dir: &Path, ttl: u64, size_mb: u64) -> WalManager {
        let mut options = Options::default();
        options.wal_ttl_seconds = ttl;
        options.wal_size_limit_mb = size_mb;
        WalManager::new(Arc::new(options), wal_dir.to_path_buf())
    }

    #[test]
    fn test_archive_moves_file() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join(log_file_name(11));
        std::fs::write(&wal_path, b"records").unwrap();

        let manager = manager_with(dir.path(), 60, 0);
        manager.archive_wal_file(&wal_path, 11).unwrap();

        assert!(!wal_path.exists());
        assert!(archived_log_file_path(dir.path(), 11).exists());
    }

    #[test]
    fn test_archive_of_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), 60, 0);
        manager
            .archive_wal_file(&dir.path().join(log_file_name(12)), 12)
            .unwrap();
    }

    #[test]
    fn test_size_cap_drops_oldest_first() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), 0, 1);

        // Three 512 KiB archived WALs: 1.5 MiB total against a 1 MiB cap.
        std::fs::create_dir_all(manager.archive_dir()).unwrap();
        for number in [1u64, 2, 3] {
            std::fs::write(
                archived_log_file_path(dir.path(), number),
                vec![0u8; 512 * 1024],
            )
            .unwrap();
        }

        manager.purge_obsolete_wal_files();

        assert!(!archived_log_file_path(dir.path(), 1).exists());
        assert!(archived_log_file_path(dir.path(), 2).exists());
        assert!(archived_log_file_path(dir.path(), 3).exists());
    }

    #[test]
    fn test_disabled_archival_prunes_nothing() {
        let dir = tempdir().unwrap();
        let manager = manager_with(dir.path(), 0, 0);

        std::fs::create_dir_all(manager.archive_dir()).unwrap();
        std::fs::write(archived_log_file_path(dir.path(), 1), b"x").unwrap();

        manager.purge_obsolete_wal_files();
        assert!(archived_log_file_path(dir.path(), 1).exists());
    }
}
