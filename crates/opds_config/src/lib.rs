//! Parsing and validation of `opds.toml` catalog profiles.
//!
//! A profile names the library to read, where the catalog is generated, and
//! the policies the catalog build applies (ignored tags, filename
//! obfuscation, custom columns, featured and custom catalogs).

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_profile, load_profile_from_str, save_profile, PROFILE_FILE_NAME};
pub use types::*;
