//! Object Store Abstraction
//!
//! The chunk engine only needs four primitives from its object store:
//! put, get, delete and paginated prefix listing. Failures come back as
//! `std::io::Error`; the error kind carries the store's failure class and
//! is mapped onto the chunk error taxonomy in `chunks::error`.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests and DST
//! - `LocalFsObjectStore`: For development and the CLI
//! - `S3ObjectStore`: For production (feature-gated)

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{ErrorKind, Result as IoResult};
use std::ops::Bound;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by every `ObjectStore` method
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Metadata for a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Result of a list operation
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Objects matching the prefix, ascending by key
    pub objects: Vec<ObjectMeta>,
    /// Continuation token for pagination (if more results exist)
    pub continuation_token: Option<String>,
}

/// Object store abstraction trait
///
/// Every method is a suspension point. Dropping the returned future
/// abandons the request, which is how caller cancellation reaches the store.
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()>;

    /// Get an object's contents
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>>;

    /// Delete an object. Deleting a missing key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// List one page of objects under a prefix
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        (**self).put(key, data)
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        (**self).get(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        (**self).delete(key)
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        (**self).list(prefix, continuation_token)
    }
}

// ============================================================================
// InMemoryObjectStore - For tests and DST
// ============================================================================

/// In-memory object store for unit tests and deterministic simulation
///
/// Listing pages are cut at `page_size` keys; the continuation token is the
/// last key of the page (S3 `StartAfter` semantics).
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    page_size: Option<usize>,
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store with unbounded list pages
    pub fn new() -> Self {
        InMemoryObjectStore {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            page_size: None,
        }
    }

    /// Create a store whose listings are split into pages of `page_size` keys
    pub fn with_page_size(page_size: usize) -> Self {
        debug_assert!(page_size > 0, "page_size must be positive");
        InMemoryObjectStore {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            page_size: Some(page_size.max(1)),
        }
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// All keys, ascending (for testing)
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().insert(key.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.data.read().get(key).cloned().ok_or_else(|| {
                std::io::Error::new(ErrorKind::NotFound, format!("Key not found: {}", key))
            })
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            let data = self.data.read();
            let start = match continuation_token {
                Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
                _ => Bound::Included(prefix.to_string()),
            };
            let limit = self.page_size.unwrap_or(usize::MAX);

            let mut objects = Vec::new();
            let mut continuation_token = None;
            for (key, value) in data.range((start, Bound::Unbounded)) {
                // Prefixed keys are contiguous in BTreeMap order
                if !key.starts_with(prefix) {
                    break;
                }
                if objects.len() == limit {
                    continuation_token = objects.last().map(|o: &ObjectMeta| o.key.clone());
                    break;
                }
                objects.push(ObjectMeta {
                    key: key.clone(),
                    size_bytes: value.len() as u64,
                });
            }

            Ok(ListResult {
                objects,
                continuation_token,
            })
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store for development and testing
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    /// Get the full path for a key
    ///
    /// Keys stay inside the base directory: parent and absolute components
    /// are rejected with `InvalidInput`.
    fn full_path(&self, key: &str) -> IoResult<PathBuf> {
        let escapes = Path::new(key).components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("key escapes the store directory: {}", key),
            ));
        }
        Ok(self.base_path.join(key))
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Walk `dir` recursively, collecting keys (paths relative to `base`) that start with `prefix`
fn walk_dir(dir: &Path, base: &Path, prefix: &str, objects: &mut Vec<ObjectMeta>) -> IoResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            walk_dir(&path, base, prefix, objects)?;
        } else if path.is_file() {
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            // Keys always use '/' regardless of platform separator
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if key.starts_with(prefix) {
                objects.push(ObjectMeta {
                    key,
                    size_bytes: entry.metadata()?.len(),
                });
            }
        }
    }
    Ok(())
}

impl ObjectStore for LocalFsObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, data).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move { tokio::fs::read(self.full_path(key)?).await })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.full_path(key)?).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
                Err(e) => Err(e),
            }
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        _continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            let base = self.base_path.clone();
            self.full_path(prefix)?;
            let prefix = prefix.to_string();

            let objects = tokio::task::spawn_blocking(move || -> IoResult<Vec<ObjectMeta>> {
                // Start from the deepest existing directory named by the prefix
                let dir_part = match prefix.rfind('/') {
                    Some(idx) => &prefix[..idx],
                    None => "",
                };
                let search_dir = base.join(dir_part);
                if !search_dir.is_dir() {
                    return Ok(Vec::new());
                }

                let mut objects = Vec::new();
                walk_dir(&search_dir, &base, &prefix, &mut objects)?;
                objects.sort_by(|a, b| a.key.cmp(&b.key));
                Ok(objects)
            })
            .await
            .map_err(std::io::Error::other)??;

            Ok(ListResult {
                objects,
                continuation_token: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_put_get() {
        let store = InMemoryObjectStore::new();

        store.put("test/key1", b"hello world").await.unwrap();
        let data = store.get("test/key1").await.unwrap();

        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_inmemory_get_missing_is_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_inmemory_delete_is_idempotent() {
        let store = InMemoryObjectStore::new();

        store.put("test/key1", b"data").await.unwrap();
        store.delete("test/key1").await.unwrap();
        store.delete("test/key1").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_list_prefix_sorted() {
        let store = InMemoryObjectStore::new();

        store.put("chunks/b", b"2").await.unwrap();
        store.put("chunks/a", b"1").await.unwrap();
        store.put("chunksx/c", b"3").await.unwrap();
        store.put("other/d", b"4").await.unwrap();

        let result = store.list("chunks/", None).await.unwrap();
        let keys: Vec<_> = result.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["chunks/a", "chunks/b"]);
        assert!(result.continuation_token.is_none());
    }

    #[tokio::test]
    async fn test_inmemory_list_pages() {
        let store = InMemoryObjectStore::with_page_size(2);
        for i in 0..5 {
            store.put(&format!("p/{}", i), b"x").await.unwrap();
        }

        let mut token: Option<String> = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.list("p/", token.as_deref()).await.unwrap();
            pages += 1;
            seen.extend(page.objects.into_iter().map(|o| o.key));
            token = page.continuation_token;
            if token.is_none() {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen, vec!["p/0", "p/1", "p/2", "p/3", "p/4"]);
    }

    #[tokio::test]
    async fn test_arc_dyn_store_delegates() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        store.put("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_localfs_put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());

        store.put("1/s/chunks/a.jsonl/chunk_2", b"two").await.unwrap();
        store.put("1/s/chunks/a.jsonl/chunk_1", b"one").await.unwrap();
        store.put("1/s/chunks/b.jsonl/chunk_1", b"other").await.unwrap();

        assert_eq!(store.get("1/s/chunks/a.jsonl/chunk_1").await.unwrap(), b"one");

        let result = store.list("1/s/chunks/a.jsonl/", None).await.unwrap();
        let keys: Vec<_> = result.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["1/s/chunks/a.jsonl/chunk_1", "1/s/chunks/a.jsonl/chunk_2"]
        );

        let all = store.list("1/s/chunks/", None).await.unwrap();
        assert_eq!(all.objects.len(), 3);

        store.delete("1/s/chunks/a.jsonl/chunk_1").await.unwrap();
        store.delete("1/s/chunks/a.jsonl/chunk_1").await.unwrap();
        let err = store.get("1/s/chunks/a.jsonl/chunk_1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_localfs_rejects_keys_outside_base() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("store");
        let store = LocalFsObjectStore::new(base.clone());
        std::fs::write(root.path().join("victim"), b"keep").unwrap();

        for key in ["1/claude-code/../../../escaped/chunk", "/abs/chunk"] {
            let err = store.put(key, b"x").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{}", key);
        }
        assert!(!root.path().join("escaped").exists());

        let err = store.delete("../victim").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(root.path().join("victim").is_file());

        let err = store.get("../victim").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = store.list("../", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // Dots inside a name are not parent components
        store.put("1/s/chunks/a..b.jsonl/chunk", b"ok").await.unwrap();
        assert_eq!(store.get("1/s/chunks/a..b.jsonl/chunk").await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_localfs_list_missing_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());
        let result = store.list("nothing/here/", None).await.unwrap();
        assert!(result.objects.is_empty());
    }
}
