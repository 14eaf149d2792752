//! OPDS 2.0 JSON feed documents.
//!
//! Feeds are written through the run's [`OutputPathAllocator`] so every
//! document lands in its folder and links resolve relative to the linking
//! document.
//!
//! [`OutputPathAllocator`]: opds_catalog::OutputPathAllocator

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use opds_cache::AssetKind;
use opds_catalog::paths::{url_encode, CURRENT_PATH_PREFIX, FOLDER_SEPARATOR, PARENT_PATH_PREFIX};
use opds_catalog::{BuildError, CatalogRun};
use opds_common::Book;
use serde_json::{json, Value};

/// Media type of navigation and acquisition feeds.
pub const OPDS_JSON: &str = "application/opds+json";

/// Folder below the catalog root that catalog images are published to.
pub const IMAGES_FOLDER: &str = "images";

/// Replaces characters that would split a leaf name into folders.
pub fn leaf_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// Assigns each section name a leaf unique within its folder.
///
/// Names that flatten to the same leaf, or to leaves differing only in
/// case, get a `_2`, `_3`, ... suffix in the order they are first seen.
#[derive(Debug, Default)]
pub struct LeafNames {
    assigned: HashMap<(String, String), String>,
    taken: HashSet<(String, String)>,
}

impl LeafNames {
    /// The document name for `name` below `folder`, ending in `.json`.
    /// Repeated calls for the same pair return the same document.
    pub fn document(&mut self, folder: &str, name: &str) -> String {
        let key = (folder.to_string(), name.to_string());
        if let Some(leaf) = self.assigned.get(&key) {
            return format!("{folder}/{leaf}.json");
        }
        let base = leaf_name(name);
        let mut leaf = base.clone();
        let mut n = 1;
        while !self.taken.insert((folder.to_string(), leaf.to_lowercase())) {
            n += 1;
            leaf = format!("{base}_{n}");
        }
        if n > 1 {
            tracing::debug!(folder, name, leaf = %leaf, "section leaf disambiguated");
        }
        self.assigned.insert(key, leaf.clone());
        format!("{folder}/{leaf}.json")
    }
}

/// Whether a document name places the document in a subfolder.
pub fn in_subfolder(document: &str) -> bool {
    document.contains(FOLDER_SEPARATOR)
}

/// Logical key and catalog-relative path of a book's image.
pub fn image_key(book: &Book, kind: AssetKind) -> String {
    format!("{}/{}", book.id, kind.file_name())
}

fn relative_prefix(from_subfolder: bool) -> &'static str {
    if from_subfolder {
        PARENT_PATH_PREFIX
    } else {
        CURRENT_PATH_PREFIX
    }
}

/// Catalog-relative name an image is published under.
pub fn image_document(run: &CatalogRun, key: &str) -> String {
    run.document_name(&format!("{IMAGES_FOLDER}/{key}"))
}

/// The library file backing a book's image of `kind`, if it exists.
///
/// Generated images sit next to the book's cover; the original cover is
/// the cover file itself and must carry the recognized cover name.
pub fn asset_source(book: &Book, kind: AssetKind) -> Option<PathBuf> {
    let cover = book.cover.as_deref()?;
    let source = match kind {
        AssetKind::OriginalCover => cover.to_path_buf(),
        _ => cover.parent()?.join(kind.file_name()),
    };
    let name = source.file_name()?.to_str()?;
    (AssetKind::from_file_name(name) == Some(kind) && source.is_file()).then_some(source)
}

fn encode_path(path: &Path) -> String {
    path.components()
        .map(|c| url_encode(&c.as_os_str().to_string_lossy()))
        .collect::<Vec<_>>()
        .join("/")
}

/// A navigation entry pointing at another feed.
pub fn navigation_entry(title: &str, href: String) -> Value {
    json!({
        "title": title,
        "href": href,
        "type": OPDS_JSON,
    })
}

/// A publication entry for `book` as seen from a document at the catalog
/// root or one folder down.
///
/// Acquisition links point at the published library copy and are included
/// only when the library is copied.
pub fn publication(run: &CatalogRun, book: &Book, from_subfolder: bool) -> Value {
    let mut metadata = json!({
        "@type": "http://schema.org/Book",
        "identifier": format!("urn:calibre:{}", book.id),
        "title": book.title,
        "author": book.authors,
        "subject": book
            .tags
            .iter()
            .filter(|t| !run.is_tag_ignored(t))
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>(),
    });
    if let Some(series) = &book.series {
        metadata["belongsTo"] = json!({
            "series": { "name": series, "position": book.series_index },
        });
    }
    if let Some(modified) = &book.timestamp {
        metadata["modified"] = json!(modified);
    }
    if let Some(rating) = book.rating {
        metadata["rating"] = json!(f64::from(rating) / 2.0);
    }
    for column in run.book_details_custom_columns() {
        if let Some((_, value)) = book.custom.iter().find(|(label, _)| *label == column.label) {
            metadata[column.name.as_str()] = json!(value);
        }
    }

    let mut links = Vec::new();
    if run.profile().output.copy_library {
        // Library files sit next to the catalog folder in the output root.
        let up = if from_subfolder { "../../" } else { "../" };
        for format in &book.formats {
            if let Ok(rel) = format.strip_prefix(run.library_root()) {
                links.push(json!({
                    "rel": "http://opds-spec.org/acquisition",
                    "href": format!("{up}{}", encode_path(rel)),
                    "type": media_type(format),
                }));
            }
        }
    }

    let prefix = relative_prefix(from_subfolder);
    let images: Vec<Value> = [AssetKind::Thumbnail, AssetKind::OriginalCover]
        .into_iter()
        .filter(|kind| asset_source(book, *kind).is_some())
        .map(|kind| {
            json!({
                "href": format!("{prefix}{}", image_document(run, &image_key(book, kind))),
                "type": "image/jpeg",
            })
        })
        .collect();

    json!({
        "metadata": metadata,
        "links": links,
        "images": images,
    })
}

fn media_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("epub") => "application/epub+zip",
        Some("pdf") => "application/pdf",
        Some("mobi") => "application/x-mobipocket-ebook",
        Some("azw3") => "application/vnd.amazon.ebook",
        Some("cbz") => "application/vnd.comicbook+zip",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Writes one feed document named `document`.
pub fn write_feed(
    run: &CatalogRun,
    document: &str,
    title: &str,
    navigation: Vec<Value>,
    publications: Vec<Value>,
) -> Result<(), BuildError> {
    let from_subfolder = in_subfolder(document);
    let path = run.paths().allocate(document)?;
    let self_href = run.paths().resolve(document, from_subfolder)?;
    let start_href = run.paths().resolve(run.initial_url(), from_subfolder)?;

    let mut feed = json!({
        "metadata": { "title": title },
        "links": [
            { "rel": "self", "href": self_href, "type": OPDS_JSON },
            { "rel": "start", "href": start_href, "type": OPDS_JSON },
        ],
    });
    if navigation.is_empty() {
        feed["publications"] = Value::Array(publications);
    } else {
        feed["navigation"] = Value::Array(navigation);
        if !publications.is_empty() {
            feed["publications"] = Value::Array(publications);
        }
    }

    let bytes = serde_json::to_vec_pretty(&feed)
        .map_err(|e| BuildError::collaborator(format!("cannot encode {document}: {e}")))?;
    std::fs::write(&path, bytes).map_err(|source| BuildError::Io {
        path: path.clone(),
        source,
    })?;
    tracing::trace!(document, "feed written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_names_never_nest() {
        assert_eq!(leaf_name("Sci-Fi/Fantasy"), "Sci-Fi_Fantasy");
        assert_eq!(leaf_name("Plain"), "Plain");
    }

    #[test]
    fn flattened_names_get_distinct_leaves() {
        let mut leaves = LeafNames::default();
        assert_eq!(leaves.document("Tags", "Sci-Fi/Fantasy"), "Tags/Sci-Fi_Fantasy.json");
        assert_eq!(leaves.document("Tags", "Sci-Fi_Fantasy"), "Tags/Sci-Fi_Fantasy_2.json");
        assert_eq!(leaves.document("Tags", "sci-fi_fantasy"), "Tags/sci-fi_fantasy_3.json");
        assert_eq!(leaves.document("Tags", "Sci-Fi/Fantasy"), "Tags/Sci-Fi_Fantasy.json");
        assert_eq!(leaves.document("Series", "Sci-Fi_Fantasy"), "Series/Sci-Fi_Fantasy.json");
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        let mut leaves = LeafNames::default();
        assert_eq!(leaves.document("Authors", "A_2"), "Authors/A_2.json");
        assert_eq!(leaves.document("Authors", "A"), "Authors/A.json");
        assert_eq!(leaves.document("Authors", "a"), "Authors/a_3.json");
    }

    #[test]
    fn subfolder_detection() {
        assert!(in_subfolder("Tags/Fantasy.json"));
        assert!(!in_subfolder("index.json"));
    }

    #[test]
    fn media_types() {
        assert_eq!(media_type(Path::new("a/b.EPUB")), "application/epub+zip");
        assert_eq!(media_type(Path::new("a/b")), "application/octet-stream");
    }

    #[test]
    fn paths_are_encoded_per_component() {
        let rel = PathBuf::from("Frank Herbert/Dune (7)/Dune.epub");
        assert_eq!(encode_path(&rel), "Frank%20Herbert/Dune%20%287%29/Dune.epub");
    }

    #[test]
    fn image_keys_are_per_book_and_kind() {
        let book = Book {
            id: 12,
            ..Default::default()
        };
        assert_eq!(image_key(&book, AssetKind::Thumbnail), "12/c2o_thumbnail.jpg");
    }

    #[test]
    fn asset_sources_must_exist_and_be_named() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, b"jpeg").unwrap();
        let mut book = Book {
            id: 1,
            cover: Some(cover.clone()),
            ..Default::default()
        };
        assert_eq!(asset_source(&book, AssetKind::OriginalCover), Some(cover));
        assert_eq!(asset_source(&book, AssetKind::Thumbnail), None);

        std::fs::write(dir.path().join("c2o_thumbnail.jpg"), b"jpeg").unwrap();
        assert!(asset_source(&book, AssetKind::Thumbnail).is_some());

        let odd = dir.path().join("front.png");
        std::fs::write(&odd, b"png").unwrap();
        book.cover = Some(odd);
        assert_eq!(asset_source(&book, AssetKind::OriginalCover), None);
        assert!(asset_source(&Book::default(), AssetKind::OriginalCover).is_none());
    }
}
