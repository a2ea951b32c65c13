//! Copying a held world into the scratch directory.
//!
//! While the server is in `save hold`, it reports which world files make up a
//! consistent snapshot and how many bytes of each belong to it. The server may
//! keep appending after `save resume`, so every copy is cut back to the
//! reported length; the on-disk size at copy time is never trusted.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{io_err, BackupError};

/// Directory under the server root (and the scratch dir) holding world data.
pub const WORLDS_DIR: &str = "worlds";

/// Config files copied next to the world data when present.
pub const AUX_FILES: [&str; 4] = [
    "server.properties",
    "allowlist.json",
    "whitelist.json",
    "permissions.json",
];

/// One `relativePath:byteCount` token from the server's snapshot list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Relative to `<root>/worlds`.
    pub path: PathBuf,
    pub size: u64,
}

/// Parse a `path:size, path:size` list. Paths may contain `:` themselves, so
/// the size is everything after the last one.
pub fn parse_file_list(line: &str) -> Result<Vec<SnapshotFile>, BackupError> {
    line.split(", ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let malformed = || BackupError::MalformedFileList {
                entry: token.to_string(),
            };
            let (path, size) = token.rsplit_once(':').ok_or_else(malformed)?;
            let size = size.trim().parse::<u64>().map_err(|_| malformed())?;
            if path.is_empty() {
                return Err(malformed());
            }
            Ok(SnapshotFile {
                path: PathBuf::from(path),
                size,
            })
        })
        .collect()
}

/// Copy the listed world files from `root` into `scratch`, then the auxiliary
/// config files that exist.
///
/// Returns the packaging inputs relative to `scratch`: `worlds` first, then
/// each auxiliary file that was actually copied. Any failure on a world file
/// aborts the copy; auxiliary files are best-effort.
pub fn copy_snapshot(root: &Path, files: &[SnapshotFile], scratch: &Path) -> Result<Vec<PathBuf>, BackupError> {
    let source_worlds = root.join(WORLDS_DIR);
    let dest_worlds = scratch.join(WORLDS_DIR);
    std::fs::create_dir_all(&dest_worlds).map_err(|source| BackupError::CreateDir {
        path: dest_worlds.clone(),
        source,
    })?;

    for file in files {
        let from = source_worlds.join(&file.path);
        let to = dest_worlds.join(&file.path);

        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|source| BackupError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if !from.is_file() {
            return Err(BackupError::SourceMissing { path: from });
        }

        tracing::debug!(from = %from.display(), bytes = file.size, "copying snapshot file");
        std::fs::copy(&from, &to).map_err(|source| BackupError::Copy {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        let copy = OpenOptions::new()
            .write(true)
            .open(&to)
            .map_err(|e| io_err(&to, e))?;
        copy.set_len(file.size).map_err(|e| io_err(&to, e))?;
    }

    let mut inputs = vec![PathBuf::from(WORLDS_DIR)];
    for name in AUX_FILES {
        let from = root.join(name);
        if !from.is_file() {
            continue;
        }
        match std::fs::copy(&from, scratch.join(name)) {
            Ok(_) => inputs.push(PathBuf::from(name)),
            Err(err) => {
                tracing::warn!(file = name, error = %err, "skipping auxiliary file");
            }
        }
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn world_file(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(WORLDS_DIR).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn parses_comma_space_list() {
        let files =
            parse_file_list("Bedrock level/db/000001.log:4096, Bedrock level/level.dat:128")
                .unwrap();
        assert_eq!(
            files,
            vec![
                SnapshotFile {
                    path: PathBuf::from("Bedrock level/db/000001.log"),
                    size: 4096
                },
                SnapshotFile {
                    path: PathBuf::from("Bedrock level/level.dat"),
                    size: 128
                },
            ]
        );
    }

    #[test]
    fn rejects_tokens_without_size() {
        let err = parse_file_list("level.dat").unwrap_err();
        assert!(matches!(err, BackupError::MalformedFileList { .. }));
        assert!(parse_file_list("level.dat:big").is_err());
    }

    #[test]
    fn copies_are_cut_to_reported_size() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        world_file(root.path(), "w/db/1.log", b"0123456789");

        let files = parse_file_list("w/db/1.log:4").unwrap();
        let inputs = copy_snapshot(root.path(), &files, scratch.path()).unwrap();

        let copied = std::fs::read(scratch.path().join("worlds/w/db/1.log")).unwrap();
        assert_eq!(copied, b"0123");
        assert_eq!(inputs, vec![PathBuf::from("worlds")]);
    }

    #[test]
    fn auxiliary_files_are_copied_when_present() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        world_file(root.path(), "w/level.dat", b"abc");
        std::fs::write(root.path().join("server.properties"), "a=b\n").unwrap();
        std::fs::write(root.path().join("permissions.json"), "[]").unwrap();

        let files = parse_file_list("w/level.dat:3").unwrap();
        let inputs = copy_snapshot(root.path(), &files, scratch.path()).unwrap();

        assert_eq!(
            inputs,
            vec![
                PathBuf::from("worlds"),
                PathBuf::from("server.properties"),
                PathBuf::from("permissions.json"),
            ]
        );
        assert!(scratch.path().join("permissions.json").exists());
        assert!(!scratch.path().join("whitelist.json").exists());
    }

    #[test]
    fn missing_source_fails_the_copy() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        world_file(root.path(), "w/db/000001.log", &[0u8; 4096]);

        let files = parse_file_list("w/db/000001.log:4096, w/level.dat:128").unwrap();
        let err = copy_snapshot(root.path(), &files, scratch.path()).unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing { .. }), "got: {err}");
        assert_eq!(err.kind(), crate::error::FailureKind::BackupHandshakeIo);
    }
}
