//! Allocation of catalog documents to output folders and URLs.
//!
//! A logical document name is `folder/leaf` or just `leaf`. The folder part
//! becomes a subfolder of the catalog root, created on first use. URLs are
//! relative to the referencing document, which lives either at the catalog
//! root or one folder down.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::BuildError;

/// Separates the folder part of a document name from its leaf.
pub const FOLDER_SEPARATOR: char = '/';

/// URL prefix for links from a document inside a subfolder.
pub const PARENT_PATH_PREFIX: &str = "../";

/// URL prefix for links from a document at the catalog root.
pub const CURRENT_PATH_PREFIX: &str = "./";

#[derive(Debug, Default)]
struct Allocations {
    folders: HashMap<String, String>,
    created: HashSet<String>,
}

/// Memoized mapping of document names to output folders.
#[derive(Debug)]
pub struct OutputPathAllocator {
    root: PathBuf,
    state: Mutex<Allocations>,
}

/// Splits a document name into its folder (possibly empty) and leaf.
pub fn split_document_name(name: &str) -> (&str, &str) {
    match name.split_once(FOLDER_SEPARATOR) {
        Some((folder, leaf)) => (folder, leaf),
        None => ("", name),
    }
}

/// Percent-encodes everything except RFC 3986 unreserved characters.
pub fn url_encode(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for byte in component.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

impl OutputPathAllocator {
    /// Creates an allocator for documents below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(Allocations::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, Allocations> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The catalog root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The folder a document was allocated to, if it has been.
    pub fn folder_of(&self, name: &str) -> Option<String> {
        self.state().folders.get(name).cloned()
    }

    /// Number of distinct documents allocated so far.
    pub fn len(&self) -> usize {
        self.state().folders.len()
    }

    /// Returns `true` if nothing has been allocated.
    pub fn is_empty(&self) -> bool {
        self.state().folders.is_empty()
    }

    /// Returns the output path for `name`, creating its folder on first use.
    pub fn allocate(&self, name: &str) -> Result<PathBuf, BuildError> {
        let (folder, _) = split_document_name(name);
        let path = self.root.join(name);
        let needs_folder = {
            let state = self.state();
            if state.folders.contains_key(name) {
                return Ok(path);
            }
            !state.created.contains(folder)
        };

        if needs_folder {
            let dir = self.root.join(folder);
            std::fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
        }

        let mut state = self.state();
        state.created.insert(folder.to_string());
        state
            .folders
            .insert(name.to_string(), folder.to_string());
        tracing::trace!(document = name, folder, "document allocated");
        Ok(path)
    }

    /// Returns the URL of document `name` as linked from a document at the
    /// catalog root (`from_subfolder == false`) or one folder down.
    pub fn resolve(&self, name: &str, from_subfolder: bool) -> Result<String, BuildError> {
        self.allocate(name)?;
        let (folder, leaf) = split_document_name(name);
        let prefix = if from_subfolder {
            PARENT_PATH_PREFIX
        } else {
            CURRENT_PATH_PREFIX
        };
        let mut url = String::from(prefix);
        if name.contains(FOLDER_SEPARATOR) {
            url.push_str(&url_encode(folder));
            url.push(FOLDER_SEPARATOR);
        }
        url.push_str(&url_encode(leaf));
        Ok(url)
    }
}
