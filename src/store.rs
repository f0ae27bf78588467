// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Persistent stores behind the model cache.
//!
//! Two stores survive across process lifetimes: a blob cache holding the raw
//! model bytes keyed by URL, and a small tag store mapping a model
//! descriptor to the last freshness tag seen for it. Writes are
//! last-writer-wins and need no locking.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::error::{InferenceError, Result};

/// Byte-blob cache addressed by URL.
pub trait BlobCache: Send + Sync {
    /// Read the bytes stored for `url`, or `None` on a miss.
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>>;
    /// Store `bytes` for `url`, overwriting any previous entry.
    fn put(&self, url: &str, bytes: &[u8]) -> Result<()>;
}

/// Key-value store of freshness tags addressed by descriptor.
pub trait TagStore: Send + Sync {
    /// Read the last-known tag for `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Persist `tag` for `key`.
    fn set(&self, key: &str, tag: &str) -> Result<()>;
}

/// File name for a store key: the hex SHA-256 of the key. Fixed at 64
/// characters, so long URLs stay under filesystem name limits.
fn key_file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Read a whole file, mapping "not found" to `None`.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(InferenceError::Io(e)),
    }
}

/// Write to a sibling temp file, then rename over `dest`, so a crash never
/// leaves a truncated entry behind.
fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = dest.with_extension("part");
    let _ = fs::remove_file(&temp_path);

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&temp_path, dest)) {
        let _ = fs::remove_file(&temp_path);
        return Err(InferenceError::Io(e));
    }
    Ok(())
}

/// Blob cache stored as one file per URL under a directory.
#[derive(Debug, Clone)]
pub struct FsBlobCache {
    root: PathBuf,
}

impl FsBlobCache {
    /// Create a blob cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the file backing `url`.
    #[must_use]
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root.join(key_file_name(url))
    }
}

impl BlobCache for FsBlobCache {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.path_for(url))
    }

    fn put(&self, url: &str, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.path_for(url), bytes)
    }
}

/// Tag store stored as one small text file per key under a directory.
#[derive(Debug, Clone)]
pub struct FsTagStore {
    root: PathBuf,
}

impl FsTagStore {
    /// Create a tag store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TagStore for FsTagStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(bytes) = read_optional(&self.root.join(key_file_name(key)))? else {
            return Ok(None);
        };
        let tag = String::from_utf8_lossy(&bytes).trim().to_string();
        Ok((!tag.is_empty()).then_some(tag))
    }

    fn set(&self, key: &str, tag: &str) -> Result<()> {
        write_atomic(&self.root.join(key_file_name(key)), tag.as_bytes())
    }
}

/// In-process blob cache. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBlobCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobCache for MemoryBlobCache {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| InferenceError::Io(io::Error::other("blob cache lock poisoned")))?;
        Ok(entries.get(url).cloned())
    }

    fn put(&self, url: &str, bytes: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| InferenceError::Io(io::Error::other("blob cache lock poisoned")))?;
        entries.insert(url.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// In-process tag store.
#[derive(Debug, Default)]
pub struct MemoryTagStore {
    tags: RwLock<HashMap<String, String>>,
}

impl MemoryTagStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagStore for MemoryTagStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let tags = self
            .tags
            .read()
            .map_err(|_| InferenceError::Io(io::Error::other("tag store lock poisoned")))?;
        Ok(tags.get(key).cloned())
    }

    fn set(&self, key: &str, tag: &str) -> Result<()> {
        let mut tags = self
            .tags
            .write()
            .map_err(|_| InferenceError::Io(io::Error::other("tag store lock poisoned")))?;
        tags.insert(key.to_string(), tag.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://huggingface.co/org/repo/resolve/main/model.onnx";

    #[test]
    fn test_fs_blob_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsBlobCache::new(dir.path().join("blobs"));

        assert!(cache.get(URL).unwrap().is_none());
        cache.put(URL, b"first").unwrap();
        cache.put(URL, b"second").unwrap();
        assert_eq!(cache.get(URL).unwrap().as_deref(), Some(&b"second"[..]));
        assert!(!cache.path_for(URL).with_extension("part").exists());
    }

    #[test]
    fn test_fs_blob_keys_are_single_path_components() {
        let cache = FsBlobCache::new("/cache");
        let path = cache.path_for(URL);
        assert_eq!(path.parent(), Some(Path::new("/cache")));
        assert_ne!(cache.path_for(URL), cache.path_for("https://other/url"));
    }

    #[test]
    fn test_long_keys_fit_in_one_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "https://huggingface.co/org/repo/resolve/main/{}/model.onnx",
            "nested-directory".repeat(16)
        );
        assert!(url.len() > 250);

        let blobs = FsBlobCache::new(dir.path());
        assert_eq!(
            blobs.path_for(&url).file_name().map(|n| n.len()),
            Some(64)
        );
        assert!(blobs.get(&url).unwrap().is_none());
        blobs.put(&url, b"weights").unwrap();
        assert_eq!(blobs.get(&url).unwrap().as_deref(), Some(&b"weights"[..]));

        let tags = FsTagStore::new(dir.path().join("tags"));
        tags.set(&url, "abc123").unwrap();
        assert_eq!(tags.get(&url).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_fs_tag_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tags = FsTagStore::new(dir.path());

        assert_eq!(tags.get("org/repo/model.onnx").unwrap(), None);
        tags.set("org/repo/model.onnx", "abc123").unwrap();
        assert_eq!(
            tags.get("org/repo/model.onnx").unwrap().as_deref(),
            Some("abc123")
        );
        assert_eq!(tags.get("org/repo/other.onnx").unwrap(), None);
    }

    #[test]
    fn test_memory_stores() {
        let blobs = MemoryBlobCache::new();
        blobs.put(URL, &[1, 2, 3]).unwrap();
        assert_eq!(blobs.get(URL).unwrap(), Some(vec![1, 2, 3]));

        let tags = MemoryTagStore::new();
        assert_eq!(tags.get("k").unwrap(), None);
        tags.set("k", "v1").unwrap();
        tags.set("k", "v2").unwrap();
        assert_eq!(tags.get("k").unwrap().as_deref(), Some("v2"));
    }
}
