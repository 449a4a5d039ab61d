//! Object storage for uploaded documents and template files.
//!
//! Paths are bucket-relative, `/`-separated and may not escape the bucket.
//! Listing a prefix treats it as a folder and returns every object below it.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Bucket holding documents uploaded by signed-in users.
pub const DOCUMENTS_BUCKET: &str = "documents";
/// Bucket holding anonymous public analysis uploads.
pub const PUBLIC_DOCUMENTS_BUCKET: &str = "public-documents";
/// Bucket holding template attachments.
pub const TEMPLATE_FILES_BUCKET: &str = "template-files";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object path `{0}`")]
    InvalidPath(String),

    #[error("i/o error on `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A bucketed blob store.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync {
    /// Writes `bytes` at `path`, replacing any existing object.
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Returns the sorted paths of all objects under the `prefix` folder.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Removes the given objects. Paths that do not exist are skipped; the
    /// return value counts objects actually removed.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<usize, StorageError>;
}

fn segments(path: &str) -> Result<Vec<&str>, StorageError> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts
        .iter()
        .any(|part| part.is_empty() || *part == "." || *part == "..")
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Filesystem store laying objects out as `root/bucket/path`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        let mut full = self.root.clone();
        for part in segments(bucket)? {
            full.push(part);
        }
        for part in segments(path)? {
            full.push(part);
        }
        Ok(full)
    }
}

fn io_error(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let target = self.resolve(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| io_error(&target, e))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.resolve(bucket, prefix)?;
        let prefix = segments(prefix)?.join("/");

        let mut found = Vec::new();
        let mut pending = vec![(base, prefix)];
        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&dir, e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child = format!("{relative}/{name}");
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error(&entry.path(), e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), child));
                } else {
                    found.push(child);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for path in paths {
            let target = self.resolve(bucket, path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&target, e)),
            }
        }
        Ok(removed)
    }
}

/// In-process store, useful for tests and single-node development.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads an object back, if present.
    pub async fn get(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    /// Number of objects across all buckets.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = segments(path)?.join("/");
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), path), bytes.to_vec());
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let folder = format!("{}/", segments(prefix)?.join("/"));
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|(b, p)| b == bucket && p.starts_with(&folder))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<usize, StorageError> {
        let mut objects = self.objects.lock().await;
        let mut removed = 0;
        for path in paths {
            let path = segments(path)?.join("/");
            if objects.remove(&(bucket.to_string(), path)).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_rejected() {
        assert!(segments("../etc/passwd").is_err());
        assert!(segments("/abs").is_err());
        assert!(segments("a//b").is_err());
        assert!(segments("a\\b").is_err());
        assert_eq!(segments("a/b/").unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn fs_store_lists_recursively_and_removes_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put(PUBLIC_DOCUMENTS_BUCKET, "s1/a.pdf", b"a", Some("application/pdf"))
            .await
            .unwrap();
        store
            .put(PUBLIC_DOCUMENTS_BUCKET, "s1/nested/b.txt", b"b", None)
            .await
            .unwrap();
        store
            .put(PUBLIC_DOCUMENTS_BUCKET, "s2/c.txt", b"c", None)
            .await
            .unwrap();

        let listed = store.list(PUBLIC_DOCUMENTS_BUCKET, "s1").await.unwrap();
        assert_eq!(listed, vec!["s1/a.pdf", "s1/nested/b.txt"]);

        assert_eq!(store.remove(PUBLIC_DOCUMENTS_BUCKET, &listed).await.unwrap(), 2);
        assert_eq!(store.remove(PUBLIC_DOCUMENTS_BUCKET, &listed).await.unwrap(), 0);
        assert!(store.list(PUBLIC_DOCUMENTS_BUCKET, "s1").await.unwrap().is_empty());
        assert_eq!(store.list(PUBLIC_DOCUMENTS_BUCKET, "s2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_a_missing_folder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list(DOCUMENTS_BUCKET, "nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_prefix_is_a_folder() {
        let store = MemoryObjectStore::new();
        store.put(TEMPLATE_FILES_BUCKET, "ab/x", b"1", None).await.unwrap();
        store.put(TEMPLATE_FILES_BUCKET, "abc/y", b"2", None).await.unwrap();

        assert_eq!(store.list(TEMPLATE_FILES_BUCKET, "ab").await.unwrap(), vec!["ab/x"]);
        assert_eq!(store.get(TEMPLATE_FILES_BUCKET, "abc/y").await, Some(b"2".to_vec()));
    }
}
