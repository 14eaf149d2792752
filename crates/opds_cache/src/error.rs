//! Checksum cache errors.

use std::path::PathBuf;

/// Failures of checksum computation, persistence and asset registration.
///
/// Persistence errors are contained inside the cache: a failed load or save
/// only costs recomputation on a later run. The variants surface to callers
/// from checksum computation and asset registration.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading a file or the cache file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Cause.
        source: std::io::Error,
    },

    /// A record could not be encoded for persistence.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Encoder message.
        reason: String,
    },

    /// The persisted cache was written with a different record schema.
    #[error("cache schema mismatch in {path}: {reason}")]
    SchemaMismatch {
        /// The cache file path.
        path: PathBuf,
        /// What did not match.
        reason: String,
    },

    /// An asset file name is not one of the recognized generated-asset kinds.
    #[error("invalid asset '{name}' registered under key '{key}'")]
    InvalidAsset {
        /// The logical asset key.
        key: String,
        /// The rejected file name.
        name: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
