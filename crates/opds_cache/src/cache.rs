//! The checksum cache: path-keyed file identities with persistence.
//!
//! One [`ChecksumCache`] is owned by each catalog run. It is safe to share
//! across worker threads within a stage: creating an identity is an atomic
//! check-then-insert, and file hashing happens outside the map lock.
//!
//! Persistence is fail-safe. A missing, corrupt, or outdated cache file makes
//! the run start cold; a failed write only costs recomputation next time.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use opds_common::ContentHash;

use crate::error::CacheError;
use crate::identity::{FileIdentity, FileStamp};
use crate::record::{self, IdentityRecord};

/// Name of the persisted cache file within its configured folder.
pub const CACHE_FILE_NAME: &str = "opds.cache";

/// Result of asking the cache for a file's checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    /// The content checksum.
    pub hash: ContentHash,
    /// `true` if the file had to be read and hashed, `false` if an existing
    /// entry was confirmed from its size and timestamp.
    pub recomputed: bool,
}

/// What happened when the persisted cache was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No location has been configured.
    Unconfigured,
    /// The cache file does not exist yet.
    Missing,
    /// Records were read. `discarded` counts records for paths that already
    /// had a live entry.
    Loaded {
        /// Records inserted as inherited entries.
        added: usize,
        /// Records dropped because the path was already live.
        discarded: usize,
    },
    /// The file was written under a different schema and was ignored.
    ColdStart,
    /// The file could not be read. The live map is unchanged.
    Failed,
}

/// Counters reported by [`ChecksumCache::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveReport {
    /// Entries written to disk.
    pub saved: usize,
    /// Entries filtered out (unknown checksum, unconfirmed, or missing file).
    pub ignored: usize,
    /// Whether the cache file was actually written.
    pub written: bool,
}

/// A summary of the live entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of live entries.
    pub entries: usize,
    /// Entries with a known checksum.
    pub known: usize,
    /// Entries inherited from a previous run and not yet confirmed.
    pub inherited: usize,
}

/// Path-keyed store of [`FileIdentity`] values with load/save support.
#[derive(Debug, Default)]
pub struct ChecksumCache {
    entries: Mutex<HashMap<PathBuf, Arc<FileIdentity>>>,
    cache_file: Option<PathBuf>,
}

/// Returns `path` made absolute against the working directory, with `.`
/// dropped and each `..` folded into its parent. Symlinks are not resolved.
/// A `..` above the filesystem root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

impl ChecksumCache {
    /// Creates an empty cache with no persisted location.
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<FileIdentity>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts a new run: drops every live entry, then loads the persisted
    /// cache if a location is configured.
    pub fn initialize(&mut self) -> LoadOutcome {
        self.map().clear();
        self.load()
    }

    /// Sets the folder holding the persisted cache file.
    pub fn configure_location(&mut self, folder: &Path) {
        let file = folder.join(CACHE_FILE_NAME);
        tracing::info!(path = %file.display(), "checksum cache file configured");
        self.cache_file = Some(file);
    }

    /// The configured cache file, if any.
    pub fn location(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    /// Returns the entry for `path` without creating one.
    pub fn lookup(&self, path: &Path) -> Option<Arc<FileIdentity>> {
        let key = normalize(path);
        let found = self.map().get(&key).cloned();
        tracing::trace!(path = %key.display(), hit = found.is_some(), "cache lookup");
        found
    }

    /// Returns the entry for `path`, creating it with an unknown checksum if
    /// absent. Concurrent callers for the same path all receive the same entry.
    pub fn get_or_create(&self, path: &Path) -> Arc<FileIdentity> {
        let key = normalize(path);
        let mut map = self.map();
        if let Some(existing) = map.get(&key) {
            return Arc::clone(existing);
        }
        tracing::trace!(path = %key.display(), "cache entry created");
        let entry = Arc::new(FileIdentity::new(key.clone()));
        map.insert(key, Arc::clone(&entry));
        entry
    }

    /// Drops the entry for `path` if present.
    pub fn remove(&self, path: &Path) -> Option<Arc<FileIdentity>> {
        let key = normalize(path);
        let removed = self.map().remove(&key);
        if removed.is_none() {
            tracing::trace!(path = %key.display(), "remove: no cache entry");
        }
        removed
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Returns the checksum of the file at `path`, hashing it only when the
    /// cached entry cannot be confirmed from the file's size and timestamp.
    ///
    /// A missing file marks the entry as non-existent and returns an error.
    pub fn checksum(&self, path: &Path) -> Result<Checksum, CacheError> {
        let entry = self.get_or_create(path);
        let meta = match std::fs::metadata(entry.path()) {
            Ok(meta) => meta,
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    entry.mark_missing();
                }
                return Err(CacheError::io(entry.path(), e));
            }
        };
        let stamp = FileStamp::from_metadata(&meta);
        if let Some(hash) = entry.confirm_if_unchanged(stamp) {
            return Ok(Checksum {
                hash,
                recomputed: false,
            });
        }
        let hash =
            ContentHash::from_file(entry.path()).map_err(|e| CacheError::io(entry.path(), e))?;
        entry.record_checksum(hash, stamp);
        tracing::trace!(path = %entry.path().display(), %hash, "checksum computed");
        Ok(Checksum {
            hash,
            recomputed: true,
        })
    }

    /// Counts live, known and inherited entries.
    pub fn stats(&self) -> CacheStats {
        let entries: Vec<Arc<FileIdentity>> = self.map().values().cloned().collect();
        let mut stats = CacheStats {
            entries: entries.len(),
            ..CacheStats::default()
        };
        for entry in entries {
            let state = entry.snapshot();
            if state.checksum.is_some() {
                stats.known += 1;
            }
            if state.loaded_from_prior_run {
                stats.inherited += 1;
            }
        }
        stats
    }

    /// Reads the persisted cache into the live map.
    ///
    /// Records for paths that already have a live entry are discarded; the
    /// live entry wins. A schema mismatch abandons the whole file. Other read
    /// failures leave the map as it was.
    pub fn load(&self) -> LoadOutcome {
        let Some(file) = self.cache_file.as_deref() else {
            tracing::trace!("load skipped: cache location not set");
            return LoadOutcome::Unconfigured;
        };
        let raw = match std::fs::read(file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %file.display(), "no checksum cache file present");
                return LoadOutcome::Missing;
            }
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "failed to read checksum cache");
                return LoadOutcome::Failed;
            }
        };
        let records = match record::decode_all(&raw, file) {
            Ok(records) => records,
            Err(e) => {
                tracing::debug!(error = %e, "checksum cache ignored");
                return LoadOutcome::ColdStart;
            }
        };

        let (mut added, mut discarded) = (0, 0);
        let mut map = self.map();
        for rec in records {
            let (path, state) = rec.into_inherited_state();
            if map.contains_key(&path) {
                // Open question upstream: not expected in practice, the live
                // entry is kept.
                tracing::debug!(path = %path.display(), "entry already live, cached record ignored");
                discarded += 1;
                continue;
            }
            let entry = Arc::new(FileIdentity::with_state(path.clone(), state));
            map.insert(path, entry);
            added += 1;
        }
        tracing::info!(path = %file.display(), added, discarded, "checksum cache loaded");
        LoadOutcome::Loaded { added, discarded }
    }

    /// Writes every entry that is worth keeping: checksum known, confirmed
    /// during this run, and file still present.
    ///
    /// Write failures are logged and swallowed.
    pub fn save(&self) -> SaveReport {
        let mut report = SaveReport::default();
        let Some(file) = self.cache_file.as_deref() else {
            tracing::debug!("save skipped: cache location not set");
            return report;
        };

        // Snapshot under the lock, encode without it.
        let entries: Vec<Arc<FileIdentity>> = self.map().values().cloned().collect();
        let mut out = record::header().to_vec();
        for entry in entries {
            if !entry.should_persist() {
                tracing::trace!(path = %entry.path().display(), "not saving cache entry");
                report.ignored += 1;
                continue;
            }
            let encoded = IdentityRecord::from_state(entry.path(), &entry.snapshot())
                .ok_or_else(|| CacheError::Serialization {
                    reason: "checksum vanished during save".to_string(),
                })
                .and_then(|rec| record::encode_record(&rec));
            match encoded {
                Ok(bytes) => {
                    out.extend_from_slice(&bytes);
                    report.saved += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "cache entry not saved");
                    report.ignored += 1;
                }
            }
        }

        if let Some(parent) = file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "cannot create cache folder");
                return report;
            }
        }
        match std::fs::write(file, &out) {
            Ok(()) => report.written = true,
            Err(e) => tracing::warn!(path = %file.display(), error = %e, "failed to write checksum cache"),
        }
        tracing::debug!(saved = report.saved, ignored = report.ignored, "checksum cache saved");
        report
    }

    /// Deletes the persisted cache file and forgets its location.
    pub fn delete_all(&mut self) {
        let Some(file) = self.cache_file.take() else {
            tracing::debug!("delete skipped: cache location not set");
            return;
        };
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::debug!(path = %file.display(), "checksum cache deleted"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %file.display(), error = %e, "failed to delete checksum cache"),
        }
    }
}
