//! Local filesystem backend.
//!
//! Every bucket is a directory directly under the provider root.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::warn;

use filestorage_common::{Error, Result, StoragePath, StorageResponse};

use crate::backend::{Backend, ByteStream, ObjectInfo};
use crate::config::{BucketConfig, ProviderConfig};
use crate::storage::ProviderFactory;

/// Local filesystem storage backend.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`.
    ///
    /// The directory is created on `init`, not here.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Factory for the type registry.
    ///
    /// The root comes from the provider root, falling back to a `root`
    /// option. A leading `~/` expands to the home directory.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` if no root is configured
    pub fn factory() -> ProviderFactory {
        Arc::new(|config: &ProviderConfig| -> Result<Box<dyn Backend>> {
            let root = config
                .root
                .as_deref()
                .or_else(|| config.option_str("root"))
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| {
                    Error::invalid_params(format!(
                        "local provider '{}' needs a root directory",
                        config.name
                    ))
                })?;
            Ok(Box::new(LocalBackend::new(expand_home(root))))
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing `bucket`.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` if the name would resolve outside the root
    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if !is_plain_segment(bucket) || bucket.contains(['/', '\\']) {
            return Err(Error::invalid_params(format!(
                "bucket name '{}' is not a plain directory name",
                bucket
            )));
        }
        Ok(self.root.join(bucket))
    }

    /// Filesystem location of `path` inside `bucket`.
    ///
    /// `.` and `..` are rejected rather than resolved, so the result always
    /// stays below the bucket directory.
    fn to_fs_path(&self, bucket: &str, path: &StoragePath) -> Result<PathBuf> {
        let mut fs_path = self.bucket_dir(bucket)?;
        for component in path.components() {
            if !is_plain_segment(component) {
                return Err(Error::invalid_params(format!(
                    "path {} contains a '{}' segment",
                    path, component
                )));
            }
            fs_path.push(component);
        }
        Ok(fs_path)
    }

    fn create_info(path: &StoragePath, fs_meta: &std::fs::Metadata) -> ObjectInfo {
        let modified: Option<DateTime<Utc>> = fs_meta.modified().ok().map(Into::into);
        if fs_meta.is_dir() {
            ObjectInfo::directory(path.clone(), modified)
        } else {
            let mut info = ObjectInfo::file(path.clone(), fs_meta.len(), modified);
            info.etag = modified.map(|m| format!("{}-{}", m.timestamp(), fs_meta.len()));
            info
        }
    }

    async fn require_bucket(&self, bucket: &str) -> Result<()> {
        if self.bucket_exists(bucket).await? {
            Ok(())
        } else {
            Err(Error::not_found(format!("bucket '{}' does not exist", bucket)))
        }
    }

    async fn metadata(fs_path: &Path) -> Result<Option<std::fs::Metadata>> {
        match fs::metadata(fs_path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Prepare a file target: it must not be a directory and its parent
    /// chain is created.
    async fn prepare_target(&self, bucket: &str, path: &StoragePath) -> Result<PathBuf> {
        if path.is_root() {
            return Err(Error::invalid_params("cannot write a file at the bucket root"));
        }
        self.require_bucket(bucket).await?;
        let fs_path = self.to_fs_path(bucket, path)?;
        if let Some(meta) = Self::metadata(&fs_path).await? {
            if meta.is_dir() {
                return Err(Error::invalid_params(format!("{} is a directory", path)));
            }
        }
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(fs_path)
    }

    async fn source_file(&self, bucket: &str, path: &StoragePath) -> Result<PathBuf> {
        let fs_path = self.to_fs_path(bucket, path)?;
        match Self::metadata(&fs_path).await? {
            Some(meta) if meta.is_file() => Ok(fs_path),
            _ => Err(Error::not_found(format!(
                "file {} not found in bucket '{}'",
                path, bucket
            ))),
        }
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.trim().is_empty() && segment != "." && segment != ".."
}

fn expand_home(root: &str) -> PathBuf {
    match (root.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(root),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn type_name(&self) -> &str {
        "local"
    }

    fn supports_cross_bucket_operations(&self) -> bool {
        true
    }

    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::wrap_native(
                format!("cannot create root directory {}", self.root.display()),
                e,
            )
        })
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(Self::metadata(&self.bucket_dir(bucket)?)
            .await?
            .is_some_and(|m| m.is_dir()))
    }

    async fn create_bucket(&self, config: &BucketConfig) -> Result<Value> {
        let dir = self.bucket_dir(&config.name)?;
        fs::create_dir_all(&dir).await?;
        Ok(json!({ "created": dir.display().to_string() }))
    }

    async fn destroy_bucket(&self, bucket: &str) -> Result<Value> {
        let dir = self.bucket_dir(bucket)?;
        fs::remove_dir_all(&dir).await?;
        Ok(json!({ "destroyed": dir.display().to_string() }))
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let file_name = entry.file_name();
                match file_name.to_str() {
                    Some(name) => names.push(name.to_string()),
                    None => warn!(
                        root = %self.root.display(),
                        entry = %file_name.to_string_lossy(),
                        "Skipping container with a non UTF-8 name"
                    ),
                }
            }
        }
        Ok(names)
    }

    async fn put(
        &self,
        bucket: &str,
        path: &StoragePath,
        mut data: ByteStream,
    ) -> Result<StorageResponse<ObjectInfo>> {
        let fs_path = self.prepare_target(bucket, path).await?;

        let mut file = fs::File::create(&fs_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(StorageResponse::new(
            Self::create_info(path, &fs_meta),
            json!({ "file": fs_path.display().to_string(), "written": written }),
        ))
    }

    async fn get_stream(&self, bucket: &str, path: &StoragePath) -> Result<ByteStream> {
        let fs_path = self.source_file(bucket, path).await?;
        let file = fs::File::open(&fs_path).await?;
        Ok(Box::pin(ReaderStream::new(file).map_err(Error::from)))
    }

    async fn stat(&self, bucket: &str, path: &StoragePath) -> Result<Option<ObjectInfo>> {
        self.require_bucket(bucket).await?;
        let fs_path = self.to_fs_path(bucket, path)?;
        Ok(Self::metadata(&fs_path)
            .await?
            .map(|meta| Self::create_info(path, &meta)))
    }

    async fn list(&self, bucket: &str, path: &StoragePath) -> Result<Vec<ObjectInfo>> {
        self.require_bucket(bucket).await?;
        let fs_path = self.to_fs_path(bucket, path)?;
        match Self::metadata(&fs_path).await? {
            Some(meta) if meta.is_dir() => {}
            _ => {
                return Err(Error::not_found(format!(
                    "directory {} not found in bucket '{}'",
                    path, bucket
                )))
            }
        }

        let mut results = Vec::new();
        let mut entries = fs::read_dir(&fs_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(
                    bucket,
                    path = %path,
                    entry = %file_name.to_string_lossy(),
                    "Skipping entry with a non UTF-8 name"
                );
                continue;
            };
            let fs_meta = entry.metadata().await?;
            results.push(Self::create_info(&path.join(name), &fs_meta));
        }
        Ok(results)
    }

    async fn delete(&self, bucket: &str, path: &StoragePath) -> Result<bool> {
        self.require_bucket(bucket).await?;
        let fs_path = self.to_fs_path(bucket, path)?;
        match Self::metadata(&fs_path).await? {
            None => Ok(false),
            Some(meta) if meta.is_dir() => {
                Err(Error::invalid_params(format!("{} is a directory", path)))
            }
            Some(_) => {
                fs::remove_file(&fs_path).await?;
                Ok(true)
            }
        }
    }

    async fn create_dir(&self, bucket: &str, path: &StoragePath) -> Result<ObjectInfo> {
        self.require_bucket(bucket).await?;
        let fs_path = self.to_fs_path(bucket, path)?;
        if let Some(meta) = Self::metadata(&fs_path).await? {
            if !meta.is_dir() {
                return Err(Error::invalid_params(format!("{} is a file", path)));
            }
        }
        fs::create_dir_all(&fs_path).await?;
        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(Self::create_info(path, &fs_meta))
    }

    async fn delete_dir(&self, bucket: &str, path: &StoragePath) -> Result<bool> {
        if path.is_root() {
            return Err(Error::invalid_params("cannot delete the bucket root"));
        }
        self.require_bucket(bucket).await?;
        let fs_path = self.to_fs_path(bucket, path)?;
        match Self::metadata(&fs_path).await? {
            None => Ok(false),
            Some(meta) if !meta.is_dir() => {
                Err(Error::invalid_params(format!("{} is a file", path)))
            }
            Some(_) => {
                fs::remove_dir_all(&fs_path).await?;
                Ok(true)
            }
        }
    }

    async fn copy(
        &self,
        from_bucket: &str,
        from: &StoragePath,
        to_bucket: &str,
        to: &StoragePath,
    ) -> Result<StorageResponse<ObjectInfo>> {
        let from_path = self.source_file(from_bucket, from).await?;
        let to_path = self.prepare_target(to_bucket, to).await?;
        let bytes = fs::copy(&from_path, &to_path).await?;

        let fs_meta = fs::metadata(&to_path).await?;
        Ok(StorageResponse::new(
            Self::create_info(to, &fs_meta),
            json!({ "strategy": "fs-copy", "bytes": bytes }),
        ))
    }

    async fn rename(
        &self,
        from_bucket: &str,
        from: &StoragePath,
        to_bucket: &str,
        to: &StoragePath,
    ) -> Result<StorageResponse<ObjectInfo>> {
        let from_path = self.source_file(from_bucket, from).await?;
        let to_path = self.prepare_target(to_bucket, to).await?;
        fs::rename(&from_path, &to_path).await?;

        let fs_meta = fs::metadata(&to_path).await?;
        Ok(StorageResponse::new(
            Self::create_info(to, &fs_meta),
            json!({ "strategy": "fs-rename" }),
        ))
    }
}
