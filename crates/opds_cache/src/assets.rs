//! Deduplication of generated image assets.
//!
//! Several logical references (the cover of a book shown in an author list,
//! a series list, and the book's own page) usually point at one physical
//! image. The deduplicator keeps the first physical file registered for each
//! logical key so the copy stage handles it once.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::CacheError;
use crate::identity::FileIdentity;

/// The kinds of image the catalog generates or republishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// A small thumbnail derived from the cover.
    Thumbnail,
    /// A cover scaled down for the book details page.
    ResizedCover,
    /// The library's own cover image.
    OriginalCover,
}

impl AssetKind {
    /// All recognized kinds.
    pub const ALL: [AssetKind; 3] = [
        AssetKind::Thumbnail,
        AssetKind::ResizedCover,
        AssetKind::OriginalCover,
    ];

    /// The file name an asset of this kind is stored under.
    pub fn file_name(self) -> &'static str {
        match self {
            AssetKind::Thumbnail => "c2o_thumbnail.jpg",
            AssetKind::ResizedCover => "c2o_resizedcover.jpg",
            AssetKind::OriginalCover => "cover.jpg",
        }
    }

    /// Recognizes an asset kind from a file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.file_name() == name)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Thumbnail => "thumbnail",
            AssetKind::ResizedCover => "resized cover",
            AssetKind::OriginalCover => "original cover",
        };
        f.write_str(name)
    }
}

/// A physical asset chosen to represent a logical key.
#[derive(Debug, Clone)]
pub struct CatalogAsset {
    /// What kind of image this is.
    pub kind: AssetKind,
    /// The file's cached identity.
    pub identity: Arc<FileIdentity>,
}

/// Maps logical asset keys to the one physical file representing each.
#[derive(Debug, Default)]
pub struct AssetDeduplicator {
    assets: Mutex<HashMap<String, CatalogAsset>>,
}

impl AssetDeduplicator {
    /// Creates an empty deduplicator.
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, CatalogAsset>> {
        self.assets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `identity` under `key` unless the key is already taken, and
    /// returns the asset now associated with the key.
    ///
    /// Fails with [`CacheError::InvalidAsset`] if the file name is not one of
    /// the recognized [`AssetKind`]s.
    pub fn register_if_absent(
        &self,
        key: &str,
        identity: Arc<FileIdentity>,
    ) -> Result<CatalogAsset, CacheError> {
        let name = identity.file_name().unwrap_or_default();
        let kind = AssetKind::from_file_name(name).ok_or_else(|| CacheError::InvalidAsset {
            key: key.to_string(),
            name: name.to_string(),
        })?;
        let asset = self
            .map()
            .entry(key.to_string())
            .or_insert_with(|| CatalogAsset { kind, identity })
            .clone();
        Ok(asset)
    }

    /// A snapshot of every registered asset, ordered by key.
    pub fn all_entries(&self) -> BTreeMap<String, CatalogAsset> {
        self.map()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(path: &str) -> Arc<FileIdentity> {
        Arc::new(FileIdentity::new(path))
    }

    #[test]
    fn first_registration_wins() {
        let dedup = AssetDeduplicator::new();
        let first = dedup
            .register_if_absent("12/thumbnail", identity("/lib/a/c2o_thumbnail.jpg"))
            .unwrap();
        let second = dedup
            .register_if_absent("12/thumbnail", identity("/lib/b/c2o_thumbnail.jpg"))
            .unwrap();
        assert!(Arc::ptr_eq(&first.identity, &second.identity));
        assert_eq!(dedup.len(), 1);
        let all = dedup.all_entries();
        assert_eq!(
            all["12/thumbnail"].identity.path(),
            std::path::Path::new("/lib/a/c2o_thumbnail.jpg")
        );
    }

    #[test]
    fn unrecognized_name_is_rejected() {
        let dedup = AssetDeduplicator::new();
        let err = dedup
            .register_if_absent("12/cover", identity("/lib/a/book.epub"))
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidAsset { .. }));
        assert!(dedup.is_empty());
    }

    #[test]
    fn kinds_follow_file_names() {
        for kind in AssetKind::ALL {
            assert_eq!(AssetKind::from_file_name(kind.file_name()), Some(kind));
        }
        assert_eq!(AssetKind::from_file_name("COVER.JPG"), None);
    }

    #[test]
    fn concurrent_registration_keeps_one_asset() {
        use rayon::prelude::*;

        let dedup = AssetDeduplicator::new();
        let results: Vec<CatalogAsset> = (0..32)
            .into_par_iter()
            .map(|i| {
                dedup
                    .register_if_absent("7/cover", identity(&format!("/lib/{i}/cover.jpg")))
                    .unwrap()
            })
            .collect();
        assert_eq!(dedup.len(), 1);
        assert!(results
            .iter()
            .all(|a| Arc::ptr_eq(&a.identity, &results[0].identity)));
    }
}
