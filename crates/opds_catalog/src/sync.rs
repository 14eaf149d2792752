//! Incremental copying of library files and catalog assets.
//!
//! A target is rewritten only when it is missing or its content checksum
//! differs from the source's. Both checksums go through the run's cache, so
//! a file confirmed unchanged by size and timestamp is never re-read.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use opds_cache::{CatalogAsset, ChecksumCache, FileStamp};

use crate::error::BuildError;
use crate::run::CatalogRun;
use crate::stage::StageProgress;

/// What [`sync_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The target was written.
    Copied,
    /// The target already held the same content.
    Unchanged,
}

/// Counts of files handled by a copy stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSummary {
    /// Files written.
    pub copied: usize,
    /// Files left alone.
    pub unchanged: usize,
}

impl SyncSummary {
    /// Adds one outcome to the tally.
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Copied => self.copied += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Total files handled.
    pub fn total(&self) -> usize {
        self.copied + self.unchanged
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} copied, {} unchanged", self.copied, self.unchanged)
    }
}

/// Copies `source` to `target` unless the target already has the same
/// content, and records the target's checksum in the cache.
pub fn sync_file(
    cache: &ChecksumCache,
    source: &Path,
    target: &Path,
) -> Result<SyncOutcome, BuildError> {
    let wanted = cache.checksum(source)?.hash;

    match std::fs::metadata(target) {
        Ok(_) => {
            if cache.checksum(target)?.hash == wanted {
                tracing::trace!(target = %target.display(), "target unchanged");
                return Ok(SyncOutcome::Unchanged);
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(BuildError::io(target, e)),
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    std::fs::copy(source, target).map_err(|e| BuildError::io(target, e))?;
    let meta = std::fs::metadata(target).map_err(|e| BuildError::io(target, e))?;
    cache
        .get_or_create(target)
        .record_checksum(wanted, FileStamp::from_metadata(&meta));
    tracing::debug!(source = %source.display(), target = %target.display(), "file copied");
    Ok(SyncOutcome::Copied)
}

/// Copies every file recorded for copy into `dest_root`, keeping its path
/// relative to the library root. Advances `progress` once per file.
pub fn copy_pending_files(
    run: &CatalogRun,
    dest_root: &Path,
    progress: &StageProgress,
) -> Result<SyncSummary, BuildError> {
    let mut summary = SyncSummary::default();
    for relative in run.files_to_copy() {
        let source = run.library_root().join(&relative);
        let target = dest_root.join(&relative);
        summary.record(sync_file(run.cache(), &source, &target)?);
        progress.advance()?;
    }
    Ok(summary)
}

/// Copies every registered catalog asset to the path chosen by `target_for`.
/// Advances `progress` once per asset.
pub fn publish_assets<F>(
    run: &CatalogRun,
    progress: &StageProgress,
    target_for: F,
) -> Result<SyncSummary, BuildError>
where
    F: Fn(&str, &CatalogAsset) -> PathBuf,
{
    let mut summary = SyncSummary::default();
    for (key, asset) in run.assets().all_entries() {
        let target = target_for(&key, &asset);
        summary.record(sync_file(run.cache(), asset.identity.path(), &target)?);
        progress.advance()?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.epub");
        let dst = dir.path().join("out/Author/a.epub");
        std::fs::write(&src, b"book").unwrap();

        let cache = ChecksumCache::new();
        assert_eq!(sync_file(&cache, &src, &dst).unwrap(), SyncOutcome::Copied);
        assert_eq!(std::fs::read(&dst).unwrap(), b"book");
        assert!(cache.lookup(&dst).unwrap().should_persist());
    }

    #[test]
    fn identical_target_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.epub");
        let dst = dir.path().join("b.epub");
        std::fs::write(&src, b"same").unwrap();
        std::fs::write(&dst, b"same").unwrap();

        let cache = ChecksumCache::new();
        assert_eq!(sync_file(&cache, &src, &dst).unwrap(), SyncOutcome::Unchanged);
    }

    #[test]
    fn changed_source_is_copied_again() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.epub");
        let dst = dir.path().join("b.epub");
        std::fs::write(&src, b"first").unwrap();

        let cache = ChecksumCache::new();
        assert_eq!(sync_file(&cache, &src, &dst).unwrap(), SyncOutcome::Copied);
        assert_eq!(sync_file(&cache, &src, &dst).unwrap(), SyncOutcome::Unchanged);

        std::fs::write(&src, b"second, longer").unwrap();
        assert_eq!(sync_file(&cache, &src, &dst).unwrap(), SyncOutcome::Copied);
        assert_eq!(std::fs::read(&dst).unwrap(), b"second, longer");
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChecksumCache::new();
        let err = sync_file(&cache, &dir.path().join("gone"), &dir.path().join("t")).unwrap_err();
        assert!(matches!(err, BuildError::Cache(_)));
        assert!(!dir.path().join("t").exists());
    }

    #[test]
    fn summary_display() {
        let mut summary = SyncSummary::default();
        summary.record(SyncOutcome::Copied);
        summary.record(SyncOutcome::Unchanged);
        summary.record(SyncOutcome::Unchanged);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.to_string(), "1 copied, 2 unchanged");
    }
}
