//! Shared foundational types used across the OPDS catalog generator.
//!
//! This crate provides content hashing for change detection and the plain
//! metadata records (books, tags, custom columns) exchanged between the
//! metadata source and the catalog builder.

#![warn(missing_docs)]

pub mod hash;
pub mod model;

pub use hash::ContentHash;
pub use model::{Book, CustomColumnType, Tag};
