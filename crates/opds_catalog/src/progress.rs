//! Progress reporting to a front end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::stage::Stage;

/// Receives build events. Implemented by whatever displays progress (a GUI,
/// a terminal logger, a test recorder).
///
/// Methods may be called from worker threads.
pub trait ProgressListener: Send + Sync {
    /// A stage started with `units` expected progress increments.
    fn stage_started(&self, stage: Stage, units: u64);

    /// One more unit of the current stage is done.
    fn stage_progressed(&self, _stage: Stage, _position: u64) {}

    /// A stage ended.
    fn stage_finished(&self, stage: Stage, elapsed: Duration, summary: Option<&str>);

    /// An informational message.
    fn message(&self, message: &str);

    /// Something was skipped or degraded; the build continues.
    fn warning(&self, message: &str);

    /// The build failed.
    fn error(&self, message: &str, cause: &(dyn std::error::Error + 'static));
}

/// A recorded build event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// See [`ProgressListener::stage_started`].
    StageStarted {
        /// The stage.
        stage: Stage,
        /// Expected unit count.
        units: u64,
    },
    /// See [`ProgressListener::stage_finished`].
    StageFinished {
        /// The stage.
        stage: Stage,
        /// Elapsed wall time in milliseconds.
        elapsed_ms: u64,
        /// Optional human-readable summary.
        summary: Option<String>,
    },
    /// See [`ProgressListener::message`].
    Message(String),
    /// See [`ProgressListener::warning`].
    Warning(String),
    /// See [`ProgressListener::error`].
    Error {
        /// What failed.
        message: String,
        /// The underlying cause, rendered.
        cause: String,
    },
}

/// A thread-safe listener that records every event in order.
///
/// Per-unit progress is not recorded, only counted.
pub struct EventLog {
    events: Mutex<Vec<BuildEvent>>,
    warning_count: AtomicUsize,
    progressed: AtomicUsize,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            warning_count: AtomicUsize::new(0),
            progressed: AtomicUsize::new(0),
        }
    }

    fn push(&self, event: BuildEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event);
    }

    /// A snapshot of all events without draining.
    pub fn events(&self) -> Vec<BuildEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.clone()
    }

    /// Takes all events, leaving the log empty.
    pub fn take_all(&self) -> Vec<BuildEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *events)
    }

    /// Number of warnings received.
    pub fn warning_count(&self) -> usize {
        self.warning_count.load(Ordering::Relaxed)
    }

    /// Number of progress increments received.
    pub fn progress_count(&self) -> usize {
        self.progressed.load(Ordering::Relaxed)
    }

    /// Stages that reported a start, in order.
    pub fn started_stages(&self) -> Vec<Stage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::StageStarted { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }

    /// Stages that reported an end, in order.
    pub fn finished_stages(&self) -> Vec<Stage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::StageFinished { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressListener for EventLog {
    fn stage_started(&self, stage: Stage, units: u64) {
        self.push(BuildEvent::StageStarted { stage, units });
    }

    fn stage_progressed(&self, _stage: Stage, _position: u64) {
        self.progressed.fetch_add(1, Ordering::Relaxed);
    }

    fn stage_finished(&self, stage: Stage, elapsed: Duration, summary: Option<&str>) {
        self.push(BuildEvent::StageFinished {
            stage,
            elapsed_ms: elapsed.as_millis() as u64,
            summary: summary.map(str::to_string),
        });
    }

    fn message(&self, message: &str) {
        self.push(BuildEvent::Message(message.to_string()));
    }

    fn warning(&self, message: &str) {
        self.warning_count.fetch_add(1, Ordering::Relaxed);
        self.push(BuildEvent::Warning(message.to_string()));
    }

    fn error(&self, message: &str, cause: &(dyn std::error::Error + 'static)) {
        self.push(BuildEvent::Error {
            message: message.to_string(),
            cause: cause.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log() {
        let log = EventLog::new();
        assert!(log.events().is_empty());
        assert_eq!(log.warning_count(), 0);
    }

    #[test]
    fn records_in_order() {
        let log = EventLog::new();
        log.stage_started(Stage::BuildTags, 4);
        log.warning("tag skipped");
        log.stage_finished(Stage::BuildTags, Duration::from_millis(12), Some("4 tags"));
        assert_eq!(
            log.events(),
            vec![
                BuildEvent::StageStarted {
                    stage: Stage::BuildTags,
                    units: 4
                },
                BuildEvent::Warning("tag skipped".to_string()),
                BuildEvent::StageFinished {
                    stage: Stage::BuildTags,
                    elapsed_ms: 12,
                    summary: Some("4 tags".to_string())
                },
            ]
        );
        assert_eq!(log.warning_count(), 1);
    }

    #[test]
    fn take_all_drains() {
        let log = EventLog::new();
        log.message("hello");
        assert_eq!(log.take_all().len(), 1);
        assert!(log.take_all().is_empty());
    }

    #[test]
    fn error_renders_cause() {
        let log = EventLog::new();
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        log.error("copy failed", &cause);
        match &log.events()[0] {
            BuildEvent::Error { message, cause } => {
                assert_eq!(message, "copy failed");
                assert_eq!(cause, "disk full");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let log = Arc::new(EventLog::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = Arc::clone(&log);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    log.warning("w");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.warning_count(), 400);
        assert_eq!(log.events().len(), 400);
    }
}
