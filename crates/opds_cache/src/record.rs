//! On-disk record format for the persisted checksum cache.
//!
//! The file starts with magic bytes and a format version, followed by
//! back-to-back bincode-encoded [`IdentityRecord`]s until end of file.
//! Anything that does not decode under the current schema is reported as a
//! [`CacheError::SchemaMismatch`] so the caller can fall back to a cold start.

use std::path::{Path, PathBuf};

use opds_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::identity::{FileStamp, IdentityState};

/// Magic bytes identifying a persisted checksum cache.
const CACHE_MAGIC: [u8; 4] = *b"OPDC";

/// Current record format version. Increment on any change to
/// [`IdentityRecord`].
pub(crate) const CACHE_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// One persisted file identity. Only entries with a known checksum are
/// ever written, so the checksum is not optional here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct IdentityRecord {
    pub path: PathBuf,
    pub exists: bool,
    pub checksum: ContentHash,
    pub size: u64,
    pub modified: Option<u64>,
}

impl IdentityRecord {
    pub fn from_state(path: &Path, state: &IdentityState) -> Option<Self> {
        Some(Self {
            path: path.to_path_buf(),
            exists: state.exists,
            checksum: state.checksum?,
            size: state.stamp.size,
            modified: state.stamp.modified,
        })
    }

    /// State for an entry rehydrated at run start.
    pub fn into_inherited_state(self) -> (PathBuf, IdentityState) {
        let state = IdentityState {
            exists: self.exists,
            checksum: Some(self.checksum),
            stamp: FileStamp {
                size: self.size,
                modified: self.modified,
            },
            loaded_from_prior_run: true,
        };
        (self.path, state)
    }
}

/// Returns the file header for the current format version.
pub(crate) fn header() -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[..4].copy_from_slice(&CACHE_MAGIC);
    out[4..].copy_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
    out
}

/// Encodes a single record.
pub(crate) fn encode_record(record: &IdentityRecord) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })
}

/// Decodes an entire cache file. `path` is only used for error reporting.
pub(crate) fn decode_all(raw: &[u8], path: &Path) -> Result<Vec<IdentityRecord>, CacheError> {
    let mismatch = |reason: String| CacheError::SchemaMismatch {
        path: path.to_path_buf(),
        reason,
    };

    if raw.len() < HEADER_LEN {
        return Err(mismatch("file shorter than header".to_string()));
    }
    if raw[..4] != CACHE_MAGIC {
        return Err(mismatch("missing magic bytes".to_string()));
    }
    let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if version != CACHE_FORMAT_VERSION {
        return Err(mismatch(format!(
            "format version {version}, expected {CACHE_FORMAT_VERSION}"
        )));
    }

    let mut records = Vec::new();
    let mut offset = HEADER_LEN;
    while offset < raw.len() {
        let (record, used): (IdentityRecord, usize) =
            bincode::serde::decode_from_slice(&raw[offset..], bincode::config::standard())
                .map_err(|e| mismatch(format!("record {}: {e}", records.len())))?;
        if used == 0 {
            return Err(mismatch("zero-length record".to_string()));
        }
        records.push(record);
        offset += used;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, content: &[u8]) -> IdentityRecord {
        IdentityRecord {
            path: PathBuf::from(path),
            exists: true,
            checksum: ContentHash::from_bytes(content),
            size: content.len() as u64,
            modified: Some(1_700_000_000_000_000_000),
        }
    }

    fn file_of(records: &[IdentityRecord]) -> Vec<u8> {
        let mut out = header().to_vec();
        for r in records {
            out.extend(encode_record(r).unwrap());
        }
        out
    }

    #[test]
    fn header_only_decodes_to_nothing() {
        let records = decode_all(&header(), Path::new("opds.cache")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn records_decode_in_order() {
        let input = vec![record("/lib/a.epub", b"a"), record("/lib/b.epub", b"b")];
        let decoded = decode_all(&file_of(&input), Path::new("opds.cache")).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn wrong_magic_is_schema_mismatch() {
        let mut raw = file_of(&[record("/lib/a.epub", b"a")]);
        raw[0] = b'X';
        let err = decode_all(&raw, Path::new("opds.cache")).unwrap_err();
        assert!(matches!(err, CacheError::SchemaMismatch { .. }));
    }

    #[test]
    fn future_version_is_schema_mismatch() {
        let mut raw = file_of(&[]);
        raw[4..8].copy_from_slice(&(CACHE_FORMAT_VERSION + 1).to_le_bytes());
        let err = decode_all(&raw, Path::new("opds.cache")).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn truncated_record_is_schema_mismatch() {
        let mut raw = file_of(&[record("/lib/a.epub", b"a")]);
        raw.truncate(raw.len() - 3);
        assert!(decode_all(&raw, Path::new("opds.cache")).is_err());
    }

    #[test]
    fn inherited_state_is_flagged() {
        let (path, state) = record("/lib/a.epub", b"a").into_inherited_state();
        assert_eq!(path, PathBuf::from("/lib/a.epub"));
        assert!(state.loaded_from_prior_run);
        assert!(state.checksum.is_some());
    }

    #[test]
    fn unknown_checksum_has_no_record() {
        let state = IdentityState::default();
        assert!(IdentityRecord::from_state(Path::new("/lib/a.epub"), &state).is_none());
    }
}
