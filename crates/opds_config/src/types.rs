//! Profile types deserialized from `opds.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A complete catalog-generation profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Where the source library lives.
    pub library: LibraryConfig,
    /// Where and how the catalog is written.
    pub output: OutputConfig,
    /// Catalog content policies.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Named custom catalogs, each listing the tags a book must carry
    /// (any one of them) to be included.
    #[serde(default)]
    pub custom_catalogs: BTreeMap<String, Vec<String>>,
}

/// Source library settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Root folder of the e-book library. Every copied file must live below it.
    pub root: PathBuf,
    /// Metadata export, relative to `root` unless absolute.
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,
}

/// Output settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Folder the catalog is published into.
    pub root: PathBuf,
    /// Name of the catalog subfolder below `root`.
    #[serde(default = "default_catalog_folder")]
    pub catalog_folder: String,
    /// Mix the security code into generated URLs.
    #[serde(default)]
    pub crypt_filenames: bool,
    /// Per-profile random token. Generated on first use and saved back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_code: Option<String>,
    /// Copy book files from the library into the output tree.
    #[serde(default = "default_true")]
    pub copy_library: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            catalog_folder: default_catalog_folder(),
            crypt_filenames: false,
            security_code: None,
            copy_library: true,
        }
    }
}

/// Catalog content policies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Regular expressions; a tag whose upper-cased name matches one of them
    /// in full, ignoring case, is left out of the catalog.
    #[serde(default)]
    pub tags_to_ignore: Vec<String>,
    /// Books carrying any of these tags are excluded.
    #[serde(default)]
    pub forbidden_tags: Vec<String>,
    /// Books carrying any of these tags are featured.
    #[serde(default)]
    pub featured_tags: Vec<String>,
    /// Custom column labels shown in book details, in display order.
    /// A leading `#` is accepted and ignored.
    #[serde(default)]
    pub book_details_custom_columns: Vec<String>,
    /// Number of books listed in the recent section.
    #[serde(default = "default_recent_count")]
    pub recent_count: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            tags_to_ignore: Vec::new(),
            forbidden_tags: Vec::new(),
            featured_tags: Vec::new(),
            book_details_custom_columns: Vec::new(),
            recent_count: default_recent_count(),
        }
    }
}

impl Profile {
    /// The folder the catalog is generated into.
    pub fn catalog_root(&self) -> PathBuf {
        self.output.root.join(&self.output.catalog_folder)
    }

    /// The metadata export path, resolved against the library root.
    pub fn metadata_path(&self) -> PathBuf {
        self.library.root.join(&self.library.metadata_file)
    }
}

fn default_metadata_file() -> PathBuf {
    PathBuf::from("metadata.json")
}

fn default_catalog_folder() -> String {
    "catalog".to_string()
}

fn default_recent_count() -> usize {
    50
}

fn default_true() -> bool {
    true
}
