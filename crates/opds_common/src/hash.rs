//! Content hashing for cache invalidation and incremental catalog builds.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

/// Read buffer size used when hashing files.
const HASH_CHUNK: usize = 64 * 1024;

/// XXH3-128 digest of a file's bytes.
///
/// Equal digests are taken to mean equal content: a book file, cover or
/// generated image whose digest is unchanged since the previous run does
/// not need to be processed or copied again.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Digest of an in-memory buffer.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxh3_128(data).to_le_bytes())
    }

    /// Digest of everything `reader` yields, read in fixed-size chunks.
    ///
    /// Equal to [`from_bytes`](Self::from_bytes) over the same input.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut state = Xxh3::new();
        let mut chunk = vec![0u8; HASH_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(Self(state.digest128().to_le_bytes())),
                Ok(n) => state.update(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Digest of the file at `path`.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Lowercase hex, 32 characters.
impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_string();
        f.debug_tuple("ContentHash").field(&&hex[..8]).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_digest() {
        let cover = b"\xff\xd8\xff\xe0 jpeg cover";
        assert_eq!(ContentHash::from_bytes(cover), ContentHash::from_bytes(cover));
    }

    #[test]
    fn one_changed_byte_changes_digest() {
        assert_ne!(
            ContentHash::from_bytes(b"chapter one"),
            ContentHash::from_bytes(b"chapter One")
        );
    }

    #[test]
    fn large_file_streams_to_same_digest() {
        let data: Vec<u8> = (0..3 * HASH_CHUNK as u32 + 17).map(|i| (i % 251) as u8).collect();
        let streamed = ContentHash::from_reader(&data[..]).unwrap();
        assert_eq!(streamed, ContentHash::from_bytes(&data));
    }

    #[test]
    fn file_digest_matches_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        std::fs::write(&path, b"not really an epub").unwrap();
        assert_eq!(
            ContentHash::from_file(&path).unwrap(),
            ContentHash::from_bytes(b"not really an epub")
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ContentHash::from_file(Path::new("/nonexistent/book.epub")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn hex_rendering() {
        let h = ContentHash::from_bytes(b"");
        let hex = h.to_string();
        assert_eq!(hex.len(), 32);
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_eq!(format!("{h:?}"), format!("ContentHash({:?})", &hex[..8]));
    }

    #[test]
    fn survives_json() {
        let h = ContentHash::from_bytes(b"metadata.json");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(serde_json::from_str::<ContentHash>(&json).unwrap(), h);
    }
}
