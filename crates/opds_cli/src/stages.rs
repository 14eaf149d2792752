//! Stage work for `opds build`: OPDS 2.0 JSON sections, image publishing
//! and library copying.

use std::collections::BTreeMap;
use std::sync::Arc;

use opds_cache::AssetKind;
use opds_catalog::security::INITIAL_URL;
use opds_catalog::sync::{copy_pending_files, publish_assets};
use opds_catalog::{
    BookFilter, BuildError, CatalogRun, ForbiddenTagsFilter, Stage, StageHandler, StageProgress,
    TaggedFilter,
};
use opds_common::Book;
use rayon::prelude::*;
use serde_json::Value;

use crate::feed::{self, LeafNames};

/// Filter identifier for books allowed in the catalog at all.
pub const VISIBLE_FILTER: &str = "visible";
/// Filter identifier for featured books.
pub const FEATURED_FILTER: &str = "featured";
/// Prefix of custom catalog filter identifiers.
pub const CUSTOM_FILTER_PREFIX: &str = "custom:";

/// One top-level section listed in the index document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    title: String,
    document: String,
}

/// Feed documents written so far and the sections the index lists.
#[derive(Debug, Default)]
struct FeedOutput {
    sections: Vec<Section>,
    leaves: LeafNames,
    feeds_written: usize,
}

/// Builds the catalog sections from the run's metadata source.
#[derive(Debug, Default)]
pub struct LibraryStages {
    books: Vec<Book>,
    out: FeedOutput,
}

type Groups<'a> = BTreeMap<String, Vec<&'a Book>>;

fn group_books<'a, F>(books: &'a [Book], keys: F) -> Groups<'a>
where
    F: Fn(&'a Book) -> Vec<String>,
{
    let mut groups: Groups<'a> = BTreeMap::new();
    for book in books {
        for key in keys(book) {
            groups.entry(key).or_default().push(book);
        }
    }
    groups
}

fn tag_groups<'a>(run: &CatalogRun, books: &'a [Book]) -> Groups<'a> {
    group_books(books, |b| {
        b.tags
            .iter()
            .filter(|t| !run.is_tag_ignored(t))
            .map(|t| t.name.clone())
            .collect()
    })
}

fn author_groups(books: &[Book]) -> Groups<'_> {
    group_books(books, |b| b.authors.clone())
}

fn series_groups(books: &[Book]) -> Groups<'_> {
    let mut groups = group_books(books, |b| b.series.iter().cloned().collect());
    for members in groups.values_mut() {
        members.sort_by(|a, b| {
            let (a, b) = (a.series_index.unwrap_or(0.0), b.series_index.unwrap_or(0.0));
            a.total_cmp(&b)
        });
    }
    groups
}

fn recent<'a>(books: &'a [Book], limit: usize) -> Vec<&'a Book> {
    let mut list: Vec<&Book> = books.iter().filter(|b| b.timestamp.is_some()).collect();
    list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    list.truncate(limit);
    list
}

fn rated(books: &[Book]) -> Vec<&Book> {
    let mut list: Vec<&Book> = books.iter().filter(|b| b.rating.is_some()).collect();
    list.sort_by(|a, b| b.rating.cmp(&a.rating).then_with(|| a.title.cmp(&b.title)));
    list
}

fn by_title(books: &[Book]) -> Vec<&Book> {
    let mut list: Vec<&Book> = books.iter().collect();
    list.sort_by_key(|b| b.title.to_lowercase());
    list
}

fn filtered<'a>(books: &'a [Book], filter: &dyn BookFilter) -> Vec<&'a Book> {
    books.iter().filter(|b| filter.passes_filter(b)).collect()
}

fn publications(run: &CatalogRun, books: &[&Book], from_subfolder: bool) -> Vec<Value> {
    books
        .iter()
        .map(|b| feed::publication(run, b, from_subfolder))
        .collect()
}

impl FeedOutput {
    /// Writes `document` under its published name and returns that name.
    fn write(
        &mut self,
        run: &CatalogRun,
        document: &str,
        title: &str,
        navigation: Vec<Value>,
        publications: Vec<Value>,
    ) -> Result<String, BuildError> {
        let document = run.document_name(document);
        feed::write_feed(run, &document, title, navigation, publications)?;
        self.feeds_written += 1;
        Ok(document)
    }

    fn add_section(&mut self, title: &str, document: &str) {
        self.sections.push(Section {
            title: title.to_string(),
            document: document.to_string(),
        });
    }

    /// Writes one feed per group under `folder`, plus a root-level section
    /// feed navigating to them.
    fn write_grouped(
        &mut self,
        run: &CatalogRun,
        progress: &StageProgress,
        folder: &str,
        groups: &Groups<'_>,
    ) -> Result<Option<String>, BuildError> {
        let mut navigation = Vec::with_capacity(groups.len());
        for (name, books) in groups {
            let document = self.leaves.document(folder, name);
            let document =
                self.write(run, &document, name, Vec::new(), publications(run, books, true))?;
            navigation.push(feed::navigation_entry(
                name,
                run.paths().resolve(&document, false)?,
            ));
            progress.advance()?;
        }
        let section = format!("{}.json", folder.to_lowercase());
        let section = self.write(run, &section, folder, navigation, Vec::new())?;
        self.add_section(folder, &section);
        Ok(Some(format!("{} {}", groups.len(), folder.to_lowercase())))
    }

    /// Writes a root-level list of books.
    fn write_list(
        &mut self,
        run: &CatalogRun,
        progress: &StageProgress,
        document: &str,
        title: &str,
        books: &[&Book],
    ) -> Result<Option<String>, BuildError> {
        let document =
            self.write(run, document, title, Vec::new(), publications(run, books, false))?;
        self.add_section(title, &document);
        progress.advance()?;
        Ok(Some(format!("{} books", books.len())))
    }

    fn write_index(
        &mut self,
        run: &CatalogRun,
        progress: &StageProgress,
    ) -> Result<Option<String>, BuildError> {
        let mut navigation = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            navigation.push(feed::navigation_entry(
                &section.title,
                run.paths().resolve(&section.document, false)?,
            ));
        }
        self.write(run, INITIAL_URL, "Catalog", navigation, Vec::new())?;
        progress.advance()?;
        Ok(Some(format!("{} sections", self.sections.len())))
    }
}

impl LibraryStages {
    /// Creates an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_database(
        &mut self,
        run: &CatalogRun,
        progress: &StageProgress,
    ) -> Result<Option<String>, BuildError> {
        let catalog = &run.profile().catalog;
        run.register_filter(
            VISIBLE_FILTER,
            Arc::new(ForbiddenTagsFilter::new(&catalog.forbidden_tags)),
        );
        run.register_filter(
            FEATURED_FILTER,
            Arc::new(TaggedFilter::new(&catalog.featured_tags)),
        );
        for (name, tags) in &run.profile().custom_catalogs {
            run.register_filter(
                format!("{CUSTOM_FILTER_PREFIX}{name}"),
                Arc::new(TaggedFilter::new(tags)),
            );
        }

        let visible = run
            .filter(VISIBLE_FILTER)
            .ok_or_else(|| BuildError::collaborator("visibility filter missing"))?;
        let copy_library = run.profile().output.copy_library;
        self.books.clear();
        for book in run.source().list_of_books() {
            if visible.passes_filter(book) {
                if copy_library {
                    for file in book.formats.iter().chain(book.cover.iter()) {
                        run.record_file_for_copy(file);
                    }
                }
                self.books.push(book.clone());
            }
            progress.advance()?;
        }
        let hidden = run.source().list_of_books().len() - self.books.len();
        Ok(Some(format!("{} books, {hidden} hidden", self.books.len())))
    }

    fn featured(
        &mut self,
        run: &CatalogRun,
        progress: &StageProgress,
    ) -> Result<Option<String>, BuildError> {
        if run.profile().catalog.featured_tags.is_empty() {
            progress.advance()?;
            return Ok(None);
        }
        let filter = run
            .filter(FEATURED_FILTER)
            .ok_or_else(|| BuildError::collaborator("featured filter missing"))?;
        let list = filtered(&self.books, filter.as_ref());
        self.out
            .write_list(run, progress, "featured.json", "Featured", &list)
    }

    fn custom_catalogs(
        &mut self,
        run: &CatalogRun,
        progress: &StageProgress,
    ) -> Result<Option<String>, BuildError> {
        let mut navigation = Vec::new();
        for name in run.profile().custom_catalogs.keys() {
            let Some(filter) = run.filter(&format!("{CUSTOM_FILTER_PREFIX}{name}")) else {
                run.warn(&format!("custom catalog '{name}' has no filter"));
                continue;
            };
            let document = self.out.leaves.document("Custom", name);
            let books = filtered(&self.books, filter.as_ref());
            let entries = publications(run, &books, true);
            let document = self.out.write(run, &document, name, Vec::new(), entries)?;
            navigation.push(feed::navigation_entry(
                name,
                run.paths().resolve(&document, false)?,
            ));
            progress.advance()?;
        }
        let written = navigation.len();
        if written > 0 {
            let section =
                self.out
                    .write(run, "custom.json", "Custom catalogs", navigation, Vec::new())?;
            self.out.add_section("Custom catalogs", &section);
        }
        Ok(Some(format!("{written} custom catalogs")))
    }

    /// Checksums and registers the images of every visible book on the
    /// worker pool.
    fn register_images(
        &self,
        run: &CatalogRun,
        progress: &StageProgress,
        kinds: &[AssetKind],
    ) -> Result<Option<String>, BuildError> {
        self.books.par_iter().try_for_each(|book| {
            for kind in kinds {
                if let Some(source) = feed::asset_source(book, *kind) {
                    run.cache().checksum(&source)?;
                    run.record_image_for_catalog(&feed::image_key(book, *kind), &source);
                }
            }
            progress.advance()
        })?;
        Ok(Some(format!("{} images registered", run.assets().len())))
    }
}

impl StageHandler for LibraryStages {
    fn unit_count(&mut self, stage: Stage, run: &CatalogRun) -> u64 {
        let count = match stage {
            Stage::ReadDatabase => run.source().list_of_books().len(),
            Stage::BuildTags => tag_groups(run, &self.books).len(),
            Stage::BuildAuthors => author_groups(&self.books).len(),
            Stage::BuildSeries => series_groups(&self.books).len(),
            Stage::BuildRecent
            | Stage::BuildRated
            | Stage::BuildAllBooks
            | Stage::BuildFeatured
            | Stage::BuildIndex => 1,
            Stage::BuildCustomCatalogs => run.profile().custom_catalogs.len(),
            Stage::BuildThumbnails | Stage::BuildCovers => self.books.len(),
            Stage::CopyLibrary => run.files_to_copy().len(),
            Stage::CopyCatalog => run.assets().len(),
            Stage::ReprocessFormatMetadata | Stage::Finish => 0,
        };
        count as u64
    }

    fn run_stage(
        &mut self,
        stage: Stage,
        run: &CatalogRun,
        progress: &StageProgress,
    ) -> Result<Option<String>, BuildError> {
        match stage {
            Stage::ReadDatabase => self.read_database(run, progress),
            Stage::BuildTags => {
                let groups = tag_groups(run, &self.books);
                self.out.write_grouped(run, progress, "Tags", &groups)
            }
            Stage::BuildAuthors => {
                let groups = author_groups(&self.books);
                self.out.write_grouped(run, progress, "Authors", &groups)
            }
            Stage::BuildSeries => {
                let groups = series_groups(&self.books);
                self.out.write_grouped(run, progress, "Series", &groups)
            }
            Stage::BuildRecent => {
                let list = recent(&self.books, run.profile().catalog.recent_count);
                self.out
                    .write_list(run, progress, "recent.json", "Recently added", &list)
            }
            Stage::BuildRated => {
                let list = rated(&self.books);
                self.out
                    .write_list(run, progress, "rated.json", "Highest rated", &list)
            }
            Stage::BuildAllBooks => {
                let list = by_title(&self.books);
                self.out
                    .write_list(run, progress, "all.json", "All books", &list)
            }
            Stage::BuildFeatured => self.featured(run, progress),
            Stage::BuildCustomCatalogs => self.custom_catalogs(run, progress),
            Stage::BuildThumbnails => self.register_images(run, progress, &[AssetKind::Thumbnail]),
            Stage::BuildCovers => self.register_images(
                run,
                progress,
                &[AssetKind::ResizedCover, AssetKind::OriginalCover],
            ),
            Stage::ReprocessFormatMetadata => Ok(None),
            Stage::BuildIndex => self.out.write_index(run, progress),
            Stage::CopyLibrary => {
                if !run.profile().output.copy_library {
                    return Ok(Some("skipped".to_string()));
                }
                let summary = copy_pending_files(run, run.output_root(), progress)?;
                Ok(Some(summary.to_string()))
            }
            Stage::CopyCatalog => {
                let summary = publish_assets(run, progress, |key, _| {
                    run.catalog_root().join(feed::image_document(run, key))
                })?;
                Ok(Some(summary.to_string()))
            }
            Stage::Finish => Ok(Some(format!("{} feeds written", self.out.feeds_written))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opds_common::Tag;

    fn book(id: u64, title: &str) -> Book {
        Book {
            id,
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn titles(list: &[&Book]) -> Vec<String> {
        list.iter().map(|b| b.title.clone()).collect()
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let mut books = vec![book(1, "Old"), book(2, "New"), book(3, "Undated"), book(4, "Mid")];
        books[0].timestamp = Some("2020-01-01".to_string());
        books[1].timestamp = Some("2024-01-01".to_string());
        books[3].timestamp = Some("2022-01-01".to_string());
        assert_eq!(titles(&recent(&books, 2)), vec!["New", "Mid"]);
        assert_eq!(recent(&books, 10).len(), 3);
    }

    #[test]
    fn rated_skips_unrated_and_breaks_ties_by_title() {
        let mut books = vec![book(1, "B"), book(2, "A"), book(3, "C"), book(4, "None")];
        books[0].rating = Some(8);
        books[1].rating = Some(8);
        books[2].rating = Some(10);
        assert_eq!(titles(&rated(&books)), vec!["C", "A", "B"]);
    }

    #[test]
    fn all_books_sort_ignoring_case() {
        let books = vec![book(1, "banana"), book(2, "Apple"), book(3, "cherry")];
        assert_eq!(titles(&by_title(&books)), vec!["Apple", "banana", "cherry"]);
    }

    #[test]
    fn books_appear_under_every_author() {
        let mut books = vec![book(1, "Good Omens"), book(2, "Mort")];
        books[0].authors = vec!["Neil Gaiman".to_string(), "Terry Pratchett".to_string()];
        books[1].authors = vec!["Terry Pratchett".to_string()];
        let groups = author_groups(&books);
        assert_eq!(groups.len(), 2);
        assert_eq!(titles(&groups["Terry Pratchett"]), vec!["Good Omens", "Mort"]);
    }

    #[test]
    fn series_members_follow_their_index() {
        let mut books = vec![book(1, "Second"), book(2, "First"), book(3, "Standalone")];
        for (b, index) in books.iter_mut().zip([2.0, 1.0]) {
            b.series = Some("Saga".to_string());
            b.series_index = Some(index);
        }
        let groups = series_groups(&books);
        assert_eq!(groups.len(), 1);
        assert_eq!(titles(&groups["Saga"]), vec!["First", "Second"]);
    }

    #[test]
    fn filtered_applies_the_filter() {
        let mut books = vec![book(1, "Tagged"), book(2, "Plain")];
        books[0].tags = vec![Tag::new(1, "Featured")];
        let filter = TaggedFilter::new(&["featured".to_string()]);
        assert_eq!(titles(&filtered(&books, &filter)), vec!["Tagged"]);
    }
}
