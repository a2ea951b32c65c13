//! The managed backup directory.
//!
//! Scheduled backups are named `server_backup_<UTC yyyyMMdd_HHmmss>.zip`; the
//! timestamp in the name, not the file's mtime, orders the store. Files that do
//! not follow the pattern are never listed, so never pruned.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{io_err, BackupError};

const PREFIX: &str = "server_backup_";
const SUFFIX: &str = ".zip";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File name for an archive created at `at`.
pub fn archive_file_name(at: DateTime<Utc>) -> String {
    format!("{PREFIX}{}{SUFFIX}", at.format(STAMP_FORMAT))
}

/// Creation time embedded in a managed archive name.
pub fn parse_archive_time(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One archive in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBackup {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// Handle on the backup directory. An absent directory reads as "not
/// configured": listing yields nothing and storing fails.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Managed archives, newest first.
    pub fn list(&self) -> Result<Vec<StoredBackup>, BackupError> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let name = entry.file_name();
            let Some(created_at) = parse_archive_time(&name.to_string_lossy()) else {
                continue;
            };
            let metadata = entry.metadata().map_err(|e| io_err(entry.path(), e))?;
            if !metadata.is_file() {
                continue;
            }
            backups.push(StoredBackup {
                path: entry.path(),
                created_at,
                size: metadata.len(),
            });
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Total bytes held by managed archives.
    pub fn total_size(&self) -> Result<u64, BackupError> {
        Ok(self.list()?.iter().map(|backup| backup.size).sum())
    }

    /// Copy a finished archive into the store under its timestamped name.
    pub fn store_archive(&self, archive: &Path, at: DateTime<Utc>) -> Result<PathBuf, BackupError> {
        if !self.exists() {
            return Err(BackupError::BackupFolderNotFound {
                path: self.dir.clone(),
            });
        }
        let dest = self.dir.join(archive_file_name(at));
        copy_replacing(archive, &dest)?;
        tracing::info!(archive = %dest.display(), "stored backup");
        Ok(dest)
    }

    pub(crate) fn delete(&self, backup: &StoredBackup) -> Result<(), BackupError> {
        std::fs::remove_file(&backup.path).map_err(|e| io_err(&backup.path, e))
    }
}

/// Copy `from` to `to`, replacing an existing file.
pub fn copy_replacing(from: &Path, to: &Path) -> Result<(), BackupError> {
    if to.exists() {
        std::fs::remove_file(to).map_err(|e| io_err(to, e))?;
    }
    std::fs::copy(from, to).map_err(|source| BackupError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    Ok(())
}
