//! Run setup and stage sequencing.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use opds_cache::ChecksumCache;
use opds_config::Profile;

use crate::error::BuildError;
use crate::progress::ProgressListener;
use crate::run::{compile_tag_pattern, CatalogRun, RunParts};
use crate::security::{derive_security_code, initial_url};
use crate::source::MetadataSource;
use crate::stage::{Stage, StageProgress, StopHandle};

/// Does the work of each stage. The orchestrator only sequences stages,
/// reports progress and handles cancellation.
pub trait StageHandler {
    /// Expected progress units for `stage`, announced when it starts.
    fn unit_count(&mut self, _stage: Stage, _run: &CatalogRun) -> u64 {
        0
    }

    /// Runs one stage. Implementations call [`StageProgress::advance`] per
    /// unit of work and propagate its error. The returned string, if any, is
    /// the stage's summary.
    fn run_stage(
        &mut self,
        stage: Stage,
        run: &CatalogRun,
        progress: &StageProgress,
    ) -> Result<Option<String>, BuildError>;
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage ran.
    Completed {
        /// Warnings issued during the run.
        warnings: usize,
    },
    /// A stop request was observed while `stage` was current.
    Stopped {
        /// The stage that was interrupted.
        stage: Stage,
    },
}

/// Drives catalog runs, one at a time.
pub struct BuildOrchestrator {
    listener: Arc<dyn ProgressListener>,
    stop: StopHandle,
    run: Option<CatalogRun>,
}

impl BuildOrchestrator {
    /// Creates an orchestrator reporting to `listener`.
    pub fn new(listener: Arc<dyn ProgressListener>) -> Self {
        Self {
            listener,
            stop: StopHandle::new(),
            run: None,
        }
    }

    /// Starts a new run publishing into `output_root`.
    ///
    /// Any previous run is dropped. The output root and catalog folder are
    /// created if needed, the security code is derived (and stored into
    /// `profile` when newly generated), ignore-tag patterns are compiled, and
    /// the checksum cache is initialized from the catalog folder.
    pub fn begin_run(
        &mut self,
        output_root: &Path,
        profile: &mut Profile,
        source: Arc<dyn MetadataSource>,
    ) -> Result<&CatalogRun, BuildError> {
        self.reset();

        let catalog_root = output_root.join(&profile.output.catalog_folder);
        for folder in [output_root, catalog_root.as_path()] {
            std::fs::create_dir_all(folder).map_err(|e| BuildError::OutputRoot {
                path: folder.to_path_buf(),
                source: e,
            })?;
        }

        let ignore_patterns = profile
            .catalog
            .tags_to_ignore
            .iter()
            .map(|p| compile_tag_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;

        let security_code = derive_security_code(profile);
        let initial_url = initial_url(&security_code);

        let mut cache = ChecksumCache::new();
        cache.configure_location(&catalog_root);
        let loaded = cache.initialize();
        tracing::info!(
            output = %output_root.display(),
            ?loaded,
            obfuscated = !security_code.is_empty(),
            "catalog run started"
        );

        self.stop.clear();
        let run = CatalogRun::new(RunParts {
            profile: profile.clone(),
            output_root: output_root.to_path_buf(),
            security_code,
            initial_url,
            cache,
            ignore_patterns,
            source,
            listener: Arc::clone(&self.listener),
            stop: self.stop.clone(),
        });
        Ok(self.run.insert(run))
    }

    /// The current run, if one has begun.
    pub fn run(&self) -> Option<&CatalogRun> {
        self.run.as_ref()
    }

    /// Asks the current run to stop at its next checkpoint.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// A handle that can request a stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Drops the current run and everything it holds.
    pub fn reset(&mut self) {
        if self.run.take().is_some() {
            tracing::debug!("previous catalog run released");
        }
        self.stop.clear();
    }

    /// Runs every stage in order against the current run.
    ///
    /// A stop request ends the run with [`RunOutcome::Stopped`] after saving
    /// the checksum cache. Any other error is reported to the listener and
    /// returned.
    pub fn execute(&mut self, handler: &mut dyn StageHandler) -> Result<RunOutcome, BuildError> {
        let run = self.run.as_ref().ok_or(BuildError::NoActiveRun)?;

        for stage in Stage::ALL {
            let started = Instant::now();
            let result = self.run_one(stage, run, handler);
            match result {
                Ok(summary) => {
                    tracing::debug!(%stage, elapsed = ?started.elapsed(), "stage finished");
                    self.listener
                        .stage_finished(stage, started.elapsed(), summary.as_deref());
                }
                Err(BuildError::Stopped) => {
                    let report = run.cache().save();
                    tracing::info!(%stage, saved = report.saved, "catalog run stopped");
                    self.listener.message(&format!("generation stopped during {stage}"));
                    return Ok(RunOutcome::Stopped { stage });
                }
                Err(e) => {
                    self.listener.error(&format!("{stage} failed"), &e);
                    return Err(e);
                }
            }
        }

        let warnings = run.warning_count();
        tracing::info!(warnings, "catalog run completed");
        Ok(RunOutcome::Completed { warnings })
    }

    fn run_one(
        &self,
        stage: Stage,
        run: &CatalogRun,
        handler: &mut dyn StageHandler,
    ) -> Result<Option<String>, BuildError> {
        let units = handler.unit_count(stage, run);
        let progress = StageProgress::new(
            stage,
            units,
            self.stop.clone(),
            Arc::clone(&self.listener),
        );
        progress.checkpoint()?;
        self.listener.stage_started(stage, units);

        let summary = handler.run_stage(stage, run, &progress)?;
        if stage != Stage::Finish {
            return Ok(summary);
        }

        let report = run.cache().save();
        let saved = format!("{} checksums saved", report.saved);
        Ok(Some(match summary {
            Some(s) => format!("{s}; {saved}"),
            None => saved,
        }))
    }
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("stop", &self.stop)
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}
