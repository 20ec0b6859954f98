//! File handles.
//!
//! A [`File`] is a value-like handle on an object inside a bucket. Several
//! handles may denote the same object. Structural operations (`save`,
//! `delete`, `move_to`) update the handle in place once the provider call
//! succeeded, so a caller can keep one handle across renames.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;

use filestorage_common::{Error, Result, StoragePath};

use crate::backend::{ByteStream, Contents, ObjectInfo};
use crate::bucket::Bucket;
use crate::provider::CopyOptions;
use crate::transfer;

#[derive(Clone)]
pub struct File {
    bucket: Bucket,
    path: StoragePath,
    exists: bool,
    info: Option<ObjectInfo>,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("bucket", &self.bucket.absolute_name())
            .field("path", &self.path.to_string_path())
            .field("exists", &self.exists)
            .field("size", &self.size())
            .finish()
    }
}

impl File {
    /// Handle on `path`; existence is unknown until checked.
    pub fn new(bucket: Bucket, path: impl Into<StoragePath>) -> Self {
        Self {
            bucket,
            path: path.into(),
            exists: false,
            info: None,
        }
    }

    pub(crate) fn from_info(bucket: Bucket, info: ObjectInfo) -> Self {
        Self {
            bucket,
            path: info.path.clone(),
            exists: true,
            info: Some(info),
        }
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn path(&self) -> &StoragePath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("/")
    }

    /// Existence as of the last operation on this handle.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn size(&self) -> Option<u64> {
        self.info.as_ref().and_then(|i| i.size)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.info.as_ref().and_then(|i| i.modified)
    }

    pub fn uri(&self) -> String {
        self.bucket.uri(&self.path)
    }

    /// JSON summary used in bulk error details.
    pub fn descriptor(&self) -> Value {
        json!({
            "bucket": self.bucket.absolute_name(),
            "path": self.path.to_string_path(),
            "uri": self.uri(),
            "size": self.size(),
        })
    }

    /// Ask the provider whether the file exists and refresh the cached metadata.
    pub async fn refresh(&mut self) -> Result<bool> {
        let found = self
            .bucket
            .provider()?
            .stat_file(&self.bucket, &self.path)
            .await?;
        self.exists = found.is_some();
        self.info = found.and_then(|f| f.info);
        Ok(self.exists)
    }

    /// Metadata, fetched on first use.
    ///
    /// # Errors
    /// - `NOT_FOUND` if the file does not exist
    pub async fn metadata(&mut self) -> Result<ObjectInfo> {
        if self.info.is_none() && !self.refresh().await? {
            return Err(Error::not_found(format!("file {} not found", self.uri())));
        }
        self.info
            .clone()
            .ok_or_else(|| Error::not_found(format!("file {} not found", self.uri())))
    }

    /// Write contents, replacing the object.
    pub async fn save(&mut self, contents: impl Into<Contents>) -> Result<()> {
        let response = self
            .bucket
            .provider()?
            .put_file(&self.bucket, &self.path, contents)
            .await?;
        self.exists = true;
        self.info = response.result.info;
        Ok(())
    }

    pub async fn contents(&self) -> Result<Bytes> {
        self.bucket
            .provider()?
            .get_file_contents(&self.bucket, &self.path)
            .await
    }

    /// Contents decoded as UTF-8.
    pub async fn text(&self) -> Result<String> {
        let data = self.contents().await?;
        String::from_utf8(data.to_vec())
            .map_err(|_| Error::invalid_params(format!("file {} is not valid UTF-8", self.uri())))
    }

    pub async fn stream(&self) -> Result<ByteStream> {
        self.bucket
            .provider()?
            .get_file_stream(&self.bucket, &self.path)
            .await
    }

    /// Delete the object. Returns false if it was already gone.
    pub async fn delete(&mut self) -> Result<bool> {
        let deleted = self
            .bucket
            .provider()?
            .delete_file(&self.bucket, &self.path)
            .await?;
        self.exists = false;
        self.info = None;
        Ok(deleted)
    }

    /// Copy to `dest` in the same bucket; returns the new file.
    pub async fn copy_to(&self, dest: impl Into<StoragePath>, options: &CopyOptions) -> Result<File> {
        let bucket = self.bucket.clone();
        self.copy_to_bucket(&bucket, dest, options).await
    }

    /// Copy into another bucket, possibly on another provider.
    pub async fn copy_to_bucket(
        &self,
        bucket: &Bucket,
        dest: impl Into<StoragePath>,
        options: &CopyOptions,
    ) -> Result<File> {
        let dest = dest.into();
        Ok(transfer::copy_file(&self.bucket, &self.path, bucket, &dest, options)
            .await?
            .into_result())
    }

    /// Rename inside the same bucket; this handle follows the file.
    pub async fn move_to(&mut self, dest: impl Into<StoragePath>, options: &CopyOptions) -> Result<()> {
        let bucket = self.bucket.clone();
        self.move_to_bucket(&bucket, dest, options).await
    }

    /// Move into another bucket; this handle follows the file.
    pub async fn move_to_bucket(
        &mut self,
        bucket: &Bucket,
        dest: impl Into<StoragePath>,
        options: &CopyOptions,
    ) -> Result<()> {
        let dest = dest.into();
        let moved = transfer::move_file(&self.bucket, &self.path, bucket, &dest, options)
            .await?
            .into_result();
        self.bucket = moved.bucket;
        self.path = moved.path;
        self.exists = true;
        self.info = moved.info;
        Ok(())
    }
}
