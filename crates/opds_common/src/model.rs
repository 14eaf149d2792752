//! Metadata records supplied by a metadata source.
//!
//! These are plain data carriers. The catalog builder consults them but never
//! mutates them; how they are read (a Calibre database, a JSON export, a test
//! fixture) is up to the source.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A tag attached to one or more books.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    /// Identifier unique within one library.
    pub id: u64,
    /// Display name as entered by the user.
    pub name: String,
}

impl Tag {
    /// Creates a tag.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A user-defined column reported by the metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomColumnType {
    /// Lookup label without the leading `#` (e.g. `genre`).
    pub label: String,
    /// Human-readable column heading.
    pub name: String,
    /// Column datatype as reported by the source (e.g. `text`, `int`).
    pub datatype: String,
}

/// A book with the metadata the catalog stages need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Identifier unique within one library.
    pub id: u64,
    /// Book title.
    pub title: String,
    /// Author names in display order.
    pub authors: Vec<String>,
    /// Tags attached to the book.
    pub tags: Vec<Tag>,
    /// Series name, if the book belongs to one.
    pub series: Option<String>,
    /// Position within the series.
    pub series_index: Option<f64>,
    /// Rating on a 0-10 scale.
    pub rating: Option<u8>,
    /// When the book was added to the library (RFC 3339).
    pub timestamp: Option<String>,
    /// Absolute path of the cover image, if any.
    pub cover: Option<PathBuf>,
    /// Absolute paths of the book's format files.
    pub formats: Vec<PathBuf>,
    /// Custom column values keyed by label (without `#`).
    pub custom: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_order_by_id_then_name() {
        let mut tags = vec![Tag::new(2, "b"), Tag::new(1, "z")];
        tags.sort();
        assert_eq!(tags[0].id, 1);
    }
}
