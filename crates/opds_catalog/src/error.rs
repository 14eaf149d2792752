//! Error types for catalog builds.

use std::path::PathBuf;

use opds_cache::CacheError;

/// Errors that end or interrupt a catalog build.
///
/// [`BuildError::Stopped`] is not a failure: it is the signal raised at a
/// progress checkpoint after a stop was requested, and the orchestrator turns
/// it into [`RunOutcome::Stopped`](crate::RunOutcome::Stopped).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The user asked the build to stop.
    #[error("generation stopped")]
    Stopped,

    /// The output root could not be created.
    #[error("cannot create output folder {path}: {source}")]
    OutputRoot {
        /// The folder that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Writing, copying, or allocating catalog output failed.
    #[error("catalog I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A checksum or asset operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An operation needed a run but none has begun.
    #[error("no catalog run in progress")]
    NoActiveRun,

    /// An ignore-tag pattern does not compile.
    #[error("invalid tag pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A stage handler failed.
    #[error("{message}")]
    Collaborator {
        /// Description of the failure.
        message: String,
    },
}

impl BuildError {
    /// Returns `true` for the cancellation signal.
    pub fn is_stopped(&self) -> bool {
        matches!(self, BuildError::Stopped)
    }

    /// Wraps a failure reported by a stage handler.
    pub fn collaborator(message: impl Into<String>) -> Self {
        BuildError::Collaborator {
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}
