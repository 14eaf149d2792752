//! Incremental build cache for catalog generation.
//!
//! This crate keeps the last-known identity (existence, size, timestamp and
//! content checksum) of every file a catalog run touches, persists it between
//! runs, and deduplicates generated image assets so that expensive per-file
//! work is only redone when the underlying bytes actually changed.

#![warn(missing_docs)]

pub mod assets;
pub mod cache;
pub mod error;
pub mod identity;
mod record;

pub use assets::{AssetDeduplicator, AssetKind, CatalogAsset};
pub use cache::{
    normalize, CacheStats, Checksum, ChecksumCache, LoadOutcome, SaveReport, CACHE_FILE_NAME,
};
pub use error::CacheError;
pub use identity::{FileIdentity, FileStamp, IdentityState};
