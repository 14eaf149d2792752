//! Book filters deciding catalog membership.

use opds_common::Book;

/// A predicate over books. Filters are stored by identifier on the run and
/// consulted by the stages that build filtered sections.
pub trait BookFilter: Send + Sync {
    /// Returns `true` if the book belongs in the filtered section.
    fn passes_filter(&self, book: &Book) -> bool;
}

impl<F> BookFilter for F
where
    F: Fn(&Book) -> bool + Send + Sync,
{
    fn passes_filter(&self, book: &Book) -> bool {
        self(book)
    }
}

fn upper_all(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Rejects books carrying any forbidden tag. Tag names compare
/// case-insensitively; an empty list lets every book through.
#[derive(Debug, Clone, Default)]
pub struct ForbiddenTagsFilter {
    forbidden: Vec<String>,
}

impl ForbiddenTagsFilter {
    /// Creates a filter from tag names.
    pub fn new(forbidden: &[String]) -> Self {
        Self {
            forbidden: upper_all(forbidden),
        }
    }
}

impl BookFilter for ForbiddenTagsFilter {
    fn passes_filter(&self, book: &Book) -> bool {
        if self.forbidden.is_empty() {
            return true;
        }
        !book
            .tags
            .iter()
            .any(|t| self.forbidden.contains(&t.name.to_uppercase()))
    }
}

/// Accepts books carrying at least one of the listed tags.
#[derive(Debug, Clone, Default)]
pub struct TaggedFilter {
    wanted: Vec<String>,
}

impl TaggedFilter {
    /// Creates a filter from tag names.
    pub fn new(wanted: &[String]) -> Self {
        Self {
            wanted: upper_all(wanted),
        }
    }
}

impl BookFilter for TaggedFilter {
    fn passes_filter(&self, book: &Book) -> bool {
        book.tags
            .iter()
            .any(|t| self.wanted.contains(&t.name.to_uppercase()))
    }
}
