//! Last-known state of a single filesystem path.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

use opds_common::ContentHash;

/// Size and modification time of a file, used to confirm an inherited
/// checksum without re-reading the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStamp {
    /// File length in bytes.
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch, if the
    /// platform reports one.
    pub modified: Option<u64>,
}

impl FileStamp {
    /// Builds a stamp from filesystem metadata.
    pub fn from_metadata(meta: &Metadata) -> Self {
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64);
        Self {
            size: meta.len(),
            modified,
        }
    }

    /// Returns `true` if `other` describes the same file version.
    ///
    /// A stamp without a modification time never matches.
    pub fn matches(&self, other: &FileStamp) -> bool {
        self.modified.is_some() && self == other
    }
}

/// A point-in-time copy of a [`FileIdentity`]'s mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentityState {
    /// Whether the file existed when last observed.
    pub exists: bool,
    /// The content checksum, present only once it is known.
    pub checksum: Option<ContentHash>,
    /// Size and timestamp recorded alongside the checksum.
    pub stamp: FileStamp,
    /// `true` while the entry is carried over from a previous run and has not
    /// been confirmed during this one.
    pub loaded_from_prior_run: bool,
}

/// The cached identity of one normalized path.
///
/// Identities are shared between the cache and its callers through `Arc`, so
/// the mutable part sits behind a lock. The lock is held only for field
/// updates, never across file I/O.
#[derive(Debug)]
pub struct FileIdentity {
    path: PathBuf,
    state: Mutex<IdentityState>,
}

impl FileIdentity {
    /// Creates a fresh identity with an unknown checksum.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_state(path, IdentityState::default())
    }

    /// Creates an identity with the given state.
    pub fn with_state(path: impl Into<PathBuf>, state: IdentityState) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The normalized path this identity describes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The final path component, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> IdentityState {
        *self.lock()
    }

    /// Whether the file existed when last observed.
    pub fn exists(&self) -> bool {
        self.lock().exists
    }

    /// The checksum, if known.
    pub fn checksum(&self) -> Option<ContentHash> {
        self.lock().checksum
    }

    /// Whether a checksum has been recorded.
    pub fn is_checksum_known(&self) -> bool {
        self.lock().checksum.is_some()
    }

    /// Whether the entry is inherited from a previous run and still unconfirmed.
    pub fn is_loaded_from_prior_run(&self) -> bool {
        self.lock().loaded_from_prior_run
    }

    /// Records a freshly computed checksum. The entry counts as confirmed
    /// for this run.
    pub fn record_checksum(&self, checksum: ContentHash, stamp: FileStamp) {
        let mut state = self.lock();
        state.exists = true;
        state.checksum = Some(checksum);
        state.stamp = stamp;
        state.loaded_from_prior_run = false;
    }

    /// Confirms the recorded checksum if `stamp` still describes the same
    /// file version, returning it. Returns `None` when the checksum must be
    /// recomputed.
    pub fn confirm_if_unchanged(&self, stamp: FileStamp) -> Option<ContentHash> {
        let mut state = self.lock();
        let checksum = state.checksum?;
        if !state.stamp.matches(&stamp) {
            return None;
        }
        state.exists = true;
        state.loaded_from_prior_run = false;
        Some(checksum)
    }

    /// Marks the file as gone. The checksum is dropped with it.
    pub fn mark_missing(&self) {
        let mut state = self.lock();
        state.exists = false;
        state.checksum = None;
        state.loaded_from_prior_run = false;
    }

    /// Whether this entry belongs in the persisted cache: the checksum is
    /// known, it was confirmed during this run, and the file still exists.
    pub fn should_persist(&self) -> bool {
        let state = self.lock();
        state.checksum.is_some() && !state.loaded_from_prior_run && state.exists
    }
}
