//! Backend adapter contract.
//!
//! A [`Backend`] is the only thing a storage adapter has to implement. It
//! deals in backend container names and normalized paths; registration,
//! permissions, readiness and bulk logic live in [`Provider`](crate::Provider).

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::pin::Pin;

use filestorage_common::{Result, StoragePath, StorageResponse};

use crate::config::BucketConfig;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Collect a stream into a single buffer.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Bytes> {
    let mut data = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data.freeze())
}

/// Data handed to `put_file`.
pub enum Contents {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl Contents {
    pub fn into_stream(self) -> ByteStream {
        match self {
            Contents::Bytes(data) => Box::pin(stream::once(async move { Ok(data) })),
            Contents::Stream(stream) => stream,
        }
    }

    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            Contents::Bytes(data) => Ok(data),
            Contents::Stream(stream) => collect_stream(stream).await,
        }
    }
}

impl fmt::Debug for Contents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contents::Bytes(data) => write!(f, "Contents::Bytes({} bytes)", data.len()),
            Contents::Stream(_) => f.write_str("Contents::Stream(..)"),
        }
    }
}

impl From<Bytes> for Contents {
    fn from(data: Bytes) -> Self {
        Contents::Bytes(data)
    }
}

impl From<Vec<u8>> for Contents {
    fn from(data: Vec<u8>) -> Self {
        Contents::Bytes(Bytes::from(data))
    }
}

impl From<&[u8]> for Contents {
    fn from(data: &[u8]) -> Self {
        Contents::Bytes(Bytes::copy_from_slice(data))
    }
}

impl From<String> for Contents {
    fn from(text: String) -> Self {
        Contents::Bytes(Bytes::from(text))
    }
}

impl From<&str> for Contents {
    fn from(text: &str) -> Self {
        Contents::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<ByteStream> for Contents {
    fn from(stream: ByteStream) -> Self {
        Contents::Stream(stream)
    }
}

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata for a stored object or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Path inside the bucket.
    pub path: StoragePath,
    pub kind: EntryKind,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Last modification time, when the backend reports one.
    pub modified: Option<DateTime<Utc>>,
    /// ETag or revision ID.
    pub etag: Option<String>,
}

impl ObjectInfo {
    pub fn file(path: StoragePath, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            kind: EntryKind::File,
            size: Some(size),
            modified,
            etag: None,
        }
    }

    pub fn directory(path: StoragePath, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            kind: EntryKind::Directory,
            size: None,
            modified,
            etag: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("/")
    }
}

/// Storage adapter for one kind of backend.
///
/// All operations are async. Bucket arguments are backend container names,
/// never aliases. Implementations report failures with the shared error
/// taxonomy; raw backend errors must not leak.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Adapter type name (e.g., "local", "memory").
    fn type_name(&self) -> &str;

    /// Whether `copy`/`rename` may span two buckets of this backend.
    fn supports_cross_bucket_operations(&self) -> bool {
        false
    }

    /// Open clients, create roots. Called once before the first operation.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Release backend resources.
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create the backing container; returns the native response.
    async fn create_bucket(&self, config: &BucketConfig) -> Result<Value>;

    /// Delete the backing container and everything in it.
    async fn destroy_bucket(&self, bucket: &str) -> Result<Value>;

    /// Containers that exist on the backend.
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Write an object, replacing any previous one.
    async fn put(
        &self,
        bucket: &str,
        path: &StoragePath,
        data: ByteStream,
    ) -> Result<StorageResponse<ObjectInfo>>;

    /// Read an object as a stream.
    ///
    /// # Errors
    /// - `NOT_FOUND` if there is no file at `path`
    async fn get_stream(&self, bucket: &str, path: &StoragePath) -> Result<ByteStream>;

    /// Metadata for `path`, or `None` when nothing exists there.
    async fn stat(&self, bucket: &str, path: &StoragePath) -> Result<Option<ObjectInfo>>;

    /// Direct children of the directory at `path`.
    async fn list(&self, bucket: &str, path: &StoragePath) -> Result<Vec<ObjectInfo>>;

    /// Delete a file. Returns false when it did not exist.
    async fn delete(&self, bucket: &str, path: &StoragePath) -> Result<bool>;

    async fn create_dir(&self, bucket: &str, path: &StoragePath) -> Result<ObjectInfo>;

    /// Delete a directory and its contents. Returns false when it did not exist.
    async fn delete_dir(&self, bucket: &str, path: &StoragePath) -> Result<bool>;

    /// Copy a file. The default pulls the source and pushes it back.
    async fn copy(
        &self,
        from_bucket: &str,
        from: &StoragePath,
        to_bucket: &str,
        to: &StoragePath,
    ) -> Result<StorageResponse<ObjectInfo>> {
        let data = self.get_stream(from_bucket, from).await?;
        let put = self.put(to_bucket, to, data).await?;
        Ok(StorageResponse::new(
            put.result,
            json!({ "strategy": "stream", "put": put.native }),
        ))
    }

    /// Move a file. The default copies then deletes the source.
    async fn rename(
        &self,
        from_bucket: &str,
        from: &StoragePath,
        to_bucket: &str,
        to: &StoragePath,
    ) -> Result<StorageResponse<ObjectInfo>> {
        let copied = self.copy(from_bucket, from, to_bucket, to).await?;
        self.delete(from_bucket, from).await?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_info_serialization() {
        let info = ObjectInfo::file(StoragePath::parse("/docs/a.txt"), 1024, Some(Utc::now()));

        let json = serde_json::to_string(&info).unwrap();
        let deserialized: ObjectInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.path, info.path);
        assert_eq!(deserialized.kind, EntryKind::File);
        assert_eq!(deserialized.size, Some(1024));
        assert_eq!(deserialized.name(), "a.txt");
    }

    #[tokio::test]
    async fn test_contents_conversions() {
        let text = Contents::from("Hello world!").into_bytes().await.unwrap();
        assert_eq!(&text[..], b"Hello world!");

        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let stream: ByteStream = Box::pin(stream::iter(chunks));
        let joined = Contents::from(stream).into_bytes().await.unwrap();
        assert_eq!(&joined[..], b"abcd");
    }
}
