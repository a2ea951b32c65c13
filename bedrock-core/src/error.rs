//! Error types for bedrock-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from the server-side files the console reads and
/// rewrites (server.properties, permissions.json, the roster cache).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (roster cache, permission file write path).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The permission file exists but is not a JSON array.
    #[error("permission file at {path} is not a JSON array")]
    PermissionFileShape { path: PathBuf },

    /// A property key that the loaded server.properties does not define.
    #[error("unknown property '{name}'")]
    UnknownProperty { name: String },

    /// A pending value that does not fit the property's type or legal values.
    #[error("invalid value '{value}' for property '{name}': {reason}")]
    InvalidPropertyValue {
        name: String,
        value: String,
        reason: String,
    },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
