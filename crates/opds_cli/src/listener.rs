//! Terminal progress output.

use std::time::Duration;

use opds_catalog::{ProgressListener, Stage};

/// Prints stage lines to stderr, in the style of the other commands.
pub struct TerminalListener {
    quiet: bool,
    verbose: bool,
}

impl TerminalListener {
    /// Creates a listener. `quiet` keeps only errors; `verbose` adds
    /// per-stage start lines.
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self { quiet, verbose }
    }
}

/// Formats a stage-end line.
pub fn stage_line(stage: Stage, elapsed: Duration, summary: Option<&str>) -> String {
    let mut line = format!("{:>26} {:>6} ms", stage.name(), elapsed.as_millis());
    if let Some(summary) = summary {
        line.push_str("  ");
        line.push_str(summary);
    }
    line
}

impl ProgressListener for TerminalListener {
    fn stage_started(&self, stage: Stage, units: u64) {
        tracing::debug!(%stage, units, "stage started");
        if self.verbose && !self.quiet {
            eprintln!("{:>26} ({units} units)", stage.name());
        }
    }

    fn stage_finished(&self, stage: Stage, elapsed: Duration, summary: Option<&str>) {
        if !self.quiet {
            eprintln!("{}", stage_line(stage, elapsed, summary));
        }
    }

    fn message(&self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }

    fn warning(&self, message: &str) {
        if !self.quiet {
            eprintln!("warning: {message}");
        }
    }

    fn error(&self, message: &str, cause: &(dyn std::error::Error + 'static)) {
        eprintln!("error: {message}: {cause}");
    }
}
