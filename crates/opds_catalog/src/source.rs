//! The metadata source a catalog run reads from.

use std::collections::BTreeMap;

use opds_common::{Book, CustomColumnType, Tag};

/// Supplies books, tags and custom column definitions.
///
/// How the records are obtained is up to the implementation; the catalog
/// build only reads them.
pub trait MetadataSource: Send + Sync {
    /// Every tag known to the library.
    fn list_of_tags(&self) -> &[Tag];

    /// Custom column definitions, or `None` if the source has none at all.
    fn list_of_custom_column_types(&self) -> Option<&[CustomColumnType]>;

    /// Every book in the library.
    fn list_of_books(&self) -> &[Book];
}

/// An in-memory metadata source.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    /// Books in library order.
    pub books: Vec<Book>,
    /// Distinct tags.
    pub tags: Vec<Tag>,
    /// Custom column definitions, if the source reported any.
    pub custom_columns: Option<Vec<CustomColumnType>>,
}

impl MemoryLibrary {
    /// Builds a library from books, collecting their distinct tags ordered
    /// by id.
    pub fn from_books(books: Vec<Book>, custom_columns: Option<Vec<CustomColumnType>>) -> Self {
        let tags: BTreeMap<u64, Tag> = books
            .iter()
            .flat_map(|b| b.tags.iter())
            .map(|t| (t.id, t.clone()))
            .collect();
        Self {
            books,
            tags: tags.into_values().collect(),
            custom_columns,
        }
    }
}

impl MetadataSource for MemoryLibrary {
    fn list_of_tags(&self) -> &[Tag] {
        &self.tags
    }

    fn list_of_custom_column_types(&self) -> Option<&[CustomColumnType]> {
        self.custom_columns.as_deref()
    }

    fn list_of_books(&self) -> &[Book] {
        &self.books
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_books_collects_distinct_tags() {
        let books = vec![
            Book {
                id: 1,
                tags: vec![Tag::new(2, "Fantasy"), Tag::new(1, "Classic")],
                ..Default::default()
            },
            Book {
                id: 2,
                tags: vec![Tag::new(2, "Fantasy")],
                ..Default::default()
            },
        ];
        let lib = MemoryLibrary::from_books(books, None);
        assert_eq!(lib.list_of_tags(), &[Tag::new(1, "Classic"), Tag::new(2, "Fantasy")]);
        assert_eq!(lib.list_of_books().len(), 2);
        assert!(lib.list_of_custom_column_types().is_none());
    }
}
