//! Error types for bedrock-backup.

use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy surfaced to the operator for a failed backup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The managed backup store is missing or unusable.
    BackupFolderNotFound,
    /// The snapshot could not be copied (missing source, uncreatable directory).
    BackupHandshakeIo,
    /// The packager finished without producing an archive.
    PackagingFailed,
}

/// All errors that can arise while taking, packaging or storing a backup.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup folder not found: {path}")]
    BackupFolderNotFound { path: PathBuf },

    #[error("no backup folder configured")]
    BackupFolderNotConfigured,

    #[error("could not create scratch directory: {source}")]
    ScratchDir {
        #[source]
        source: std::io::Error,
    },

    /// A file named in the server's snapshot list is not on disk.
    #[error("snapshot file missing: {path}")]
    SourceMissing { path: PathBuf },

    #[error("could not create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `path:size` token in the snapshot list could not be parsed.
    #[error("malformed snapshot entry '{entry}'")]
    MalformedFileList { entry: String },

    /// The backup was abandoned before it finished, e.g. the server stopped.
    #[error("backup interrupted: {reason}")]
    Interrupted { reason: String },

    #[error("packaging failed: {reason}")]
    PackagingFailed { reason: String },

    /// Underlying I/O failure, annotated with the path being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    /// Map onto the operator-facing failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            BackupError::BackupFolderNotFound { .. } | BackupError::BackupFolderNotConfigured => {
                FailureKind::BackupFolderNotFound
            }
            BackupError::PackagingFailed { .. } => FailureKind::PackagingFailed,
            BackupError::ScratchDir { .. }
            | BackupError::SourceMissing { .. }
            | BackupError::CreateDir { .. }
            | BackupError::Copy { .. }
            | BackupError::MalformedFileList { .. }
            | BackupError::Interrupted { .. }
            | BackupError::Io { .. } => FailureKind::BackupHandshakeIo,
        }
    }
}

/// Convenience constructor for [`BackupError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BackupError {
    BackupError::Io {
        path: path.into(),
        source,
    }
}
