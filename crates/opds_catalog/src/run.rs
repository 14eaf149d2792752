//! State of one catalog-generation run.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use opds_cache::{normalize, AssetDeduplicator, CacheError, CatalogAsset, ChecksumCache};
use opds_common::{CustomColumnType, Tag};
use opds_config::Profile;
use regex::Regex;

use crate::error::BuildError;
use crate::filter::BookFilter;
use crate::paths::OutputPathAllocator;
use crate::progress::ProgressListener;
use crate::security::obfuscate;
use crate::source::MetadataSource;
use crate::stage::StopHandle;

/// Marks a custom column label as a database field (`#genre`).
pub const CUSTOM_COLUMN_MARKER: char = '#';

/// Compiles an ignore-tag pattern. The pattern must match the whole
/// upper-cased tag name, ignoring case.
pub fn compile_tag_pattern(pattern: &str) -> Result<Regex, BuildError> {
    Regex::new(&format!("(?i)^(?:{pattern})$")).map_err(|e| BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Everything a run owns: folders, cache, asset map, pending copies,
/// derived policies and the collaborators it reports to.
///
/// Stage handlers receive a shared reference; every mutating operation
/// takes `&self` and is safe to call from worker threads.
pub struct CatalogRun {
    profile: Profile,
    output_root: PathBuf,
    catalog_root: PathBuf,
    library_root: PathBuf,
    security_code: String,
    initial_url: String,
    cache: ChecksumCache,
    assets: AssetDeduplicator,
    paths: OutputPathAllocator,
    files_to_copy: Mutex<BTreeSet<PathBuf>>,
    ignore_patterns: Vec<Regex>,
    tags_to_ignore: OnceLock<BTreeSet<Tag>>,
    custom_columns: OnceLock<Vec<CustomColumnType>>,
    filters: RwLock<HashMap<String, Arc<dyn BookFilter>>>,
    source: Arc<dyn MetadataSource>,
    listener: Arc<dyn ProgressListener>,
    warnings: AtomicUsize,
    stop: StopHandle,
}

/// Inputs assembled by the orchestrator when a run begins.
pub(crate) struct RunParts {
    pub profile: Profile,
    pub output_root: PathBuf,
    pub security_code: String,
    pub initial_url: String,
    pub cache: ChecksumCache,
    pub ignore_patterns: Vec<Regex>,
    pub source: Arc<dyn MetadataSource>,
    pub listener: Arc<dyn ProgressListener>,
    pub stop: StopHandle,
}

impl CatalogRun {
    pub(crate) fn new(parts: RunParts) -> Self {
        let catalog_root = parts.output_root.join(&parts.profile.output.catalog_folder);
        let library_root = normalize(&parts.profile.library.root);
        Self {
            paths: OutputPathAllocator::new(catalog_root.clone()),
            catalog_root,
            library_root,
            output_root: parts.output_root,
            profile: parts.profile,
            security_code: parts.security_code,
            initial_url: parts.initial_url,
            cache: parts.cache,
            assets: AssetDeduplicator::new(),
            files_to_copy: Mutex::new(BTreeSet::new()),
            ignore_patterns: parts.ignore_patterns,
            tags_to_ignore: OnceLock::new(),
            custom_columns: OnceLock::new(),
            filters: RwLock::new(HashMap::new()),
            source: parts.source,
            listener: parts.listener,
            warnings: AtomicUsize::new(0),
            stop: parts.stop,
        }
    }

    /// The profile this run was started with, including any generated
    /// security code.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// The folder the catalog is published into.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// The folder catalog documents are generated in.
    pub fn catalog_root(&self) -> &Path {
        &self.catalog_root
    }

    /// The absolute library root files are copied from.
    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// The obfuscation code; empty when obfuscation is off.
    pub fn security_code(&self) -> &str {
        &self.security_code
    }

    /// Name of the catalog's entry document.
    pub fn initial_url(&self) -> &str {
        &self.initial_url
    }

    /// The file name `document` is published under: the security code is
    /// mixed into the leaf when obfuscation is on.
    pub fn document_name(&self, document: &str) -> String {
        obfuscate(&self.security_code, document)
    }

    /// The run's checksum cache.
    pub fn cache(&self) -> &ChecksumCache {
        &self.cache
    }

    /// The run's image asset map.
    pub fn assets(&self) -> &AssetDeduplicator {
        &self.assets
    }

    /// The run's document allocator.
    pub fn paths(&self) -> &OutputPathAllocator {
        &self.paths
    }

    /// The metadata source.
    pub fn source(&self) -> &dyn MetadataSource {
        self.source.as_ref()
    }

    /// The stop flag shared with the orchestrator.
    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// Records a library file for the copy-library stage.
    ///
    /// The file is kept by its path relative to the library root, once.
    /// The path is normalized first, so `..` segments cannot lead out of
    /// the library. Files outside the library root are reported as a
    /// warning and ignored; the return value tells whether the file was
    /// accepted.
    pub fn record_file_for_copy(&self, file: &Path) -> bool {
        let absolute = normalize(file);
        let relative = match absolute.strip_prefix(&self.library_root) {
            Ok(rel)
                if !rel.as_os_str().is_empty()
                    && rel.components().all(|c| matches!(c, Component::Normal(_))) =>
            {
                rel.to_path_buf()
            }
            _ => {
                self.warn(&format!(
                    "{} is not inside the library folder and will not be copied",
                    file.display()
                ));
                return false;
            }
        };
        let mut pending = self.files_to_copy.lock().unwrap_or_else(|e| e.into_inner());
        if pending.insert(relative) {
            tracing::trace!(path = %file.display(), "file recorded for copy");
        }
        true
    }

    /// The library-relative paths pending copy, sorted.
    pub fn files_to_copy(&self) -> Vec<PathBuf> {
        let pending = self.files_to_copy.lock().unwrap_or_else(|e| e.into_inner());
        pending.iter().cloned().collect()
    }

    /// Registers an image to publish with the catalog under a logical key.
    ///
    /// The first file registered for a key wins. A file whose name is not a
    /// recognized asset kind is reported as a warning and skipped.
    pub fn record_image_for_catalog(&self, key: &str, file: &Path) -> Option<CatalogAsset> {
        match self.assets.register_if_absent(key, self.cache.get_or_create(file)) {
            Ok(asset) => Some(asset),
            Err(e @ CacheError::InvalidAsset { .. }) => {
                self.warn(&e.to_string());
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "image not registered");
                None
            }
        }
    }

    /// Tags left out of the catalog: every known tag whose upper-cased name
    /// matches any configured ignore pattern. Computed on first use.
    pub fn tags_to_ignore(&self) -> &BTreeSet<Tag> {
        self.tags_to_ignore.get_or_init(|| {
            let ignored: BTreeSet<Tag> = self
                .source
                .list_of_tags()
                .iter()
                .filter(|tag| {
                    let upper = tag.name.to_uppercase();
                    self.ignore_patterns.iter().any(|re| re.is_match(&upper))
                })
                .cloned()
                .collect();
            tracing::debug!(count = ignored.len(), "ignored tags resolved");
            ignored
        })
    }

    /// Whether `tag` is one of [`tags_to_ignore`](Self::tags_to_ignore).
    pub fn is_tag_ignored(&self, tag: &Tag) -> bool {
        self.tags_to_ignore().contains(tag)
    }

    /// Custom columns to show in book details, in configured order.
    ///
    /// Labels may carry a leading `#` and match case-insensitively. When
    /// the metadata source reports no custom columns at all, one warning is
    /// issued and the result is empty for the rest of the run. Labels with
    /// no matching column are reported once.
    pub fn book_details_custom_columns(&self) -> &[CustomColumnType] {
        let labels = &self.profile.catalog.book_details_custom_columns;
        if labels.is_empty() {
            return &[];
        }
        self.custom_columns.get_or_init(|| {
            let Some(types) = self.source.list_of_custom_column_types() else {
                self.warn("no custom columns read from the library; book details will omit them");
                return Vec::new();
            };
            let mut resolved = Vec::new();
            for label in labels {
                let wanted = label.strip_prefix(CUSTOM_COLUMN_MARKER).unwrap_or(label);
                let before = resolved.len();
                resolved.extend(
                    types
                        .iter()
                        .filter(|t| t.label.eq_ignore_ascii_case(wanted))
                        .cloned(),
                );
                if resolved.len() == before {
                    self.warn(&format!("custom column '{label}' does not exist in the library"));
                }
            }
            tracing::debug!(count = resolved.len(), "book detail columns resolved");
            resolved
        })
    }

    /// Stores a filter under an identifier, replacing any previous one.
    pub fn register_filter(&self, id: impl Into<String>, filter: Arc<dyn BookFilter>) {
        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        filters.insert(id.into(), filter);
    }

    /// Looks up a filter by identifier.
    pub fn filter(&self, id: &str) -> Option<Arc<dyn BookFilter>> {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
        filters.get(id).cloned()
    }

    /// Identifiers of every registered filter, sorted.
    pub fn filter_ids(&self) -> Vec<String> {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = filters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Reports a skipped or degraded item and counts it.
    pub fn warn(&self, message: &str) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("{message}");
        self.listener.warning(message);
    }

    /// Reports an informational message.
    pub fn message(&self, message: &str) {
        tracing::info!("{message}");
        self.listener.message(message);
    }

    /// Warnings issued so far in this run.
    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CatalogRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogRun")
            .field("output_root", &self.output_root)
            .field("catalog_root", &self.catalog_root)
            .field("library_root", &self.library_root)
            .field("security_code", &self.security_code)
            .field("warnings", &self.warning_count())
            .finish_non_exhaustive()
    }
}
