//! S3 Object Store Implementation
//!
//! Provides an S3-compatible object store for production use.
//! Uses the `object_store` crate from the Arrow ecosystem.
//!
//! Supports:
//! - AWS S3
//! - S3-compatible services (MinIO, LocalStack, etc.)
//! - Custom endpoints

use crate::storage::config::S3Config;
use crate::storage::object_store::{ListResult, ObjectMeta, ObjectStore, StoreFuture};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;

/// Keys returned per listing page
const PAGE_SIZE: usize = 1000;

/// S3 Object Store for production deployments
#[derive(Clone)]
pub struct S3ObjectStore {
    store: Arc<dyn ObjectStoreTrait>,
    prefix: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    ///
    /// Credentials come from the environment:
    /// - AWS_ACCESS_KEY_ID
    /// - AWS_SECRET_ACCESS_KEY
    pub fn new(config: S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        // Use custom endpoint for S3-compatible services (MinIO)
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 store: {}", e),
            )
        })?;

        Ok(S3ObjectStore {
            store: Arc::new(store),
            prefix: config.prefix,
        })
    }

    /// Create from an existing object store (for testing)
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, prefix: String) -> Self {
        S3ObjectStore { store, prefix }
    }

    fn full_path(&self, key: &str) -> ObjectPath {
        ObjectPath::from(join_prefix(&self.prefix, key))
    }

    /// Convert object_store errors to IoError, keeping the failure class
    fn map_error(err: object_store::Error) -> IoError {
        let kind = match &err {
            object_store::Error::NotFound { .. } => ErrorKind::NotFound,
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => ErrorKind::PermissionDenied,
            object_store::Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            object_store::Error::Precondition { .. } => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        IoError::new(kind, err.to_string())
    }
}

fn join_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), key)
    }
}

fn strip_prefix(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    let with_slash = format!("{}/", prefix.trim_end_matches('/'));
    path.strip_prefix(&with_slash).unwrap_or(path).to_string()
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key);
            self.store
                .put(&path, bytes::Bytes::copy_from_slice(data).into())
                .await
                .map_err(Self::map_error)?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.full_path(key);
            let result = self.store.get(&path).await.map_err(Self::map_error)?;
            let data = result.bytes().await.map_err(Self::map_error)?;
            Ok(data.to_vec())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key);
            // S3 delete is idempotent - ignore not found errors
            match self.store.delete(&path).await {
                Ok(()) => Ok(()),
                Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            use futures::{future, StreamExt, TryStreamExt};

            // Chunk prefixes end in '/', which object_store paths cannot carry;
            // list the directory and filter on the raw key prefix instead.
            let full_prefix = join_prefix(&self.prefix, prefix);
            let dir = ObjectPath::from(full_prefix.trim_end_matches('/'));

            // S3 lists in key order, so a page resumes strictly after the token
            // and stops one key past PAGE_SIZE.
            let stream = match continuation_token {
                Some(after) => self
                    .store
                    .list_with_offset(Some(&dir), &self.full_path(after)),
                None => self.store.list(Some(&dir)),
            };

            let mut objects: Vec<ObjectMeta> = stream
                .try_filter(|meta| {
                    future::ready(meta.location.as_ref().starts_with(full_prefix.as_str()))
                })
                .map_ok(|meta| ObjectMeta {
                    key: strip_prefix(&self.prefix, meta.location.as_ref()),
                    size_bytes: meta.size as u64,
                })
                .take(PAGE_SIZE + 1)
                .try_collect()
                .await
                .map_err(Self::map_error)?;
            objects.sort_by(|a, b| a.key.cmp(&b.key));

            let continuation_token = if objects.len() > PAGE_SIZE {
                objects.truncate(PAGE_SIZE);
                objects.last().map(|o| o.key.clone())
            } else {
                None
            };

            Ok(ListResult {
                objects,
                continuation_token,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{encode_chunk_name, ChunkErrorKind, ChunkStore};
    use crate::storage::ChunkConfig;
    use object_store::memory::InMemory;
    use std::collections::HashSet;

    fn store(prefix: &str) -> S3ObjectStore {
        S3ObjectStore::from_store(Arc::new(InMemory::new()), prefix.to_string())
    }

    #[test]
    fn test_prefix_join_and_strip() {
        assert_eq!(join_prefix("", "a/b"), "a/b");
        assert_eq!(join_prefix("root", "a/b"), "root/a/b");
        assert_eq!(join_prefix("root/", "a/b"), "root/a/b");
        assert_eq!(strip_prefix("root", "root/a/b"), "a/b");
        assert_eq!(strip_prefix("", "a/b"), "a/b");
    }

    #[tokio::test]
    async fn test_roundtrip_under_prefix() {
        let s3 = store("sync");
        s3.put("1/claude-code/s/chunks/f/chunk_00000001_00000002.jsonl", b"a\nb\n")
            .await
            .unwrap();

        let data = s3
            .get("1/claude-code/s/chunks/f/chunk_00000001_00000002.jsonl")
            .await
            .unwrap();
        assert_eq!(data, b"a\nb\n");

        let listed = s3.list("1/claude-code/s/chunks/", None).await.unwrap();
        assert_eq!(listed.objects.len(), 1);
        assert_eq!(
            listed.objects[0].key,
            "1/claude-code/s/chunks/f/chunk_00000001_00000002.jsonl"
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let err = store("").get("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        store("").delete("nope").await.unwrap();
    }

    fn file_key(file: &str, line: u64) -> String {
        format!("1/claude-code/s/chunks/{}/{}", file, encode_chunk_name(line, line))
    }

    async fn seed(s3: &S3ObjectStore, file: &str, count: u64) -> Vec<String> {
        let mut keys = Vec::new();
        for line in 1..=count {
            let key = file_key(file, line);
            s3.put(&key, b"x\n").await.unwrap();
            keys.push(key);
        }
        keys
    }

    #[tokio::test]
    async fn test_list_pages_resume_after_token() {
        let s3 = store("sync");
        let mut expected = seed(&s3, "f", 1205).await;
        expected.sort();
        seed(&s3, "g", 3).await;
        s3.put("1/claude-code/s/notes.txt", b"n").await.unwrap();

        let prefix = "1/claude-code/s/chunks/f/";
        let first = s3.list(prefix, None).await.unwrap();
        assert_eq!(first.objects.len(), PAGE_SIZE);
        let token = first.continuation_token.clone().unwrap();
        assert_eq!(token, first.objects[PAGE_SIZE - 1].key);
        assert!(!token.starts_with("sync/"));

        let second = s3.list(prefix, Some(&token)).await.unwrap();
        assert_eq!(second.objects.len(), 205);
        assert!(second.continuation_token.is_none());
        assert!(second.objects[0].key > token);

        let listed: Vec<String> = first
            .objects
            .into_iter()
            .chain(second.objects)
            .map(|o| o.key)
            .collect();
        let unique: HashSet<&String> = listed.iter().collect();
        assert_eq!(unique.len(), listed.len());
        assert_eq!(listed, expected);
    }

    #[tokio::test]
    async fn test_chunk_store_pages_through_s3() {
        let s3 = store("sync");
        seed(&s3, "f", 1205).await;
        seed(&s3, "g", 3).await;

        let capped = ChunkStore::new(
            s3.clone(),
            ChunkConfig {
                max_chunks_per_file: 1100,
                ..ChunkConfig::default()
            },
        );
        let err = capped.list_chunks(1, "s", "f").await.unwrap_err();
        assert_eq!(err.kind(), ChunkErrorKind::TooManyChunks);

        let cs = ChunkStore::new(s3.clone(), ChunkConfig::default());
        assert_eq!(cs.list_chunks(1, "s", "f").await.unwrap().len(), 1205);

        // Deleting while paging must not skip keys
        assert_eq!(cs.delete_all_session_chunks(1, "s").await.unwrap(), 1208);
        assert!(s3.list("1/claude-code/s/chunks/", None).await.unwrap().objects.is_empty());
        assert_eq!(s3.get("1/claude-code/s/notes.txt").await.unwrap(), b"n");
    }
}
