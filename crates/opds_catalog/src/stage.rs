//! Build stages, per-stage progress, and cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BuildError;
use crate::progress::ProgressListener;

/// One named phase of a catalog build. Stages always run in the order of
/// [`Stage::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Read books, tags and columns from the metadata source.
    ReadDatabase,
    /// Tag sections.
    BuildTags,
    /// Author sections.
    BuildAuthors,
    /// Series sections.
    BuildSeries,
    /// Recently added books.
    BuildRecent,
    /// Books by rating.
    BuildRated,
    /// The full book list.
    BuildAllBooks,
    /// Featured books.
    BuildFeatured,
    /// User-defined catalogs.
    BuildCustomCatalogs,
    /// Thumbnail generation.
    BuildThumbnails,
    /// Cover generation.
    BuildCovers,
    /// Metadata rewriting inside format files.
    ReprocessFormatMetadata,
    /// The top-level index document.
    BuildIndex,
    /// Copy pending library files into the output tree.
    CopyLibrary,
    /// Copy generated catalog assets into the output tree.
    CopyCatalog,
    /// Persist the checksum cache and wrap up.
    Finish,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 16] = [
        Stage::ReadDatabase,
        Stage::BuildTags,
        Stage::BuildAuthors,
        Stage::BuildSeries,
        Stage::BuildRecent,
        Stage::BuildRated,
        Stage::BuildAllBooks,
        Stage::BuildFeatured,
        Stage::BuildCustomCatalogs,
        Stage::BuildThumbnails,
        Stage::BuildCovers,
        Stage::ReprocessFormatMetadata,
        Stage::BuildIndex,
        Stage::CopyLibrary,
        Stage::CopyCatalog,
        Stage::Finish,
    ];

    /// The stage's kebab-case name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::ReadDatabase => "read-database",
            Stage::BuildTags => "build-tags",
            Stage::BuildAuthors => "build-authors",
            Stage::BuildSeries => "build-series",
            Stage::BuildRecent => "build-recent",
            Stage::BuildRated => "build-rated",
            Stage::BuildAllBooks => "build-all-books",
            Stage::BuildFeatured => "build-featured",
            Stage::BuildCustomCatalogs => "build-custom-catalogs",
            Stage::BuildThumbnails => "build-thumbnails",
            Stage::BuildCovers => "build-covers",
            Stage::ReprocessFormatMetadata => "reprocess-format-metadata",
            Stage::BuildIndex => "build-index",
            Stage::CopyLibrary => "copy-library",
            Stage::CopyCatalog => "copy-catalog",
            Stage::Finish => "finish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cloneable cancellation flag.
///
/// Requesting a stop never interrupts work directly; it is observed at the
/// next progress checkpoint.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Creates a handle with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the build to stop at its next checkpoint.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The shared flag itself, for callers that set it from a signal
    /// handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress of the stage currently running.
///
/// Shared by reference with stage workers; [`advance`](Self::advance) may be
/// called from several threads.
pub struct StageProgress {
    stage: Stage,
    total: u64,
    position: AtomicU64,
    stop: StopHandle,
    listener: Arc<dyn ProgressListener>,
}

impl StageProgress {
    pub(crate) fn new(
        stage: Stage,
        total: u64,
        stop: StopHandle,
        listener: Arc<dyn ProgressListener>,
    ) -> Self {
        Self {
            stage,
            total,
            position: AtomicU64::new(0),
            stop,
            listener,
        }
    }

    /// The stage this progress belongs to.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The unit count announced when the stage started.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Units completed so far.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Records one completed unit, then checks for a stop request.
    pub fn advance(&self) -> Result<(), BuildError> {
        let position = self.position.fetch_add(1, Ordering::Relaxed) + 1;
        self.listener.stage_progressed(self.stage, position);
        self.checkpoint()
    }

    /// Returns [`BuildError::Stopped`] if a stop has been requested.
    pub fn checkpoint(&self) -> Result<(), BuildError> {
        if self.stop.is_stop_requested() {
            tracing::info!(stage = %self.stage, position = self.position(), "stop requested");
            return Err(BuildError::Stopped);
        }
        Ok(())
    }
}

impl fmt::Debug for StageProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageProgress")
            .field("stage", &self.stage)
            .field("total", &self.total)
            .field("position", &self.position())
            .finish()
    }
}
