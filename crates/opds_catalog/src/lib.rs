//! Catalog-build orchestration.
//!
//! A [`BuildOrchestrator`] owns one catalog run at a time. The run holds the
//! checksum cache, the asset deduplicator, the output path allocator, the set
//! of library files pending copy, and the policies derived from the profile
//! (ignored tags, custom columns, filename obfuscation). Stage work is
//! supplied by a [`StageHandler`]; the orchestrator sequences the stages,
//! reports progress, and honours cooperative cancellation.

#![warn(missing_docs)]

pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod paths;
pub mod progress;
pub mod run;
pub mod security;
pub mod source;
pub mod stage;
pub mod sync;

pub use error::BuildError;
pub use filter::{BookFilter, ForbiddenTagsFilter, TaggedFilter};
pub use orchestrator::{BuildOrchestrator, RunOutcome, StageHandler};
pub use paths::OutputPathAllocator;
pub use progress::{BuildEvent, EventLog, ProgressListener};
pub use run::CatalogRun;
pub use source::{MemoryLibrary, MetadataSource};
pub use stage::{Stage, StageProgress, StopHandle};
pub use sync::{sync_file, SyncOutcome, SyncSummary};
