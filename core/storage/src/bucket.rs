//! Bucket handles.

use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Weak};

use filestorage_common::{Error, Result, StoragePath};

use crate::backend::Contents;
use crate::config::BucketConfig;
use crate::directory::Directory;
use crate::file::File;
use crate::pattern::{ListOptions, Listing};
use crate::provider::{CopyOptions, DeleteOptions, Provider};

struct BucketInner {
    config: BucketConfig,
    absolute_name: String,
    provider_name: String,
    provider: Weak<Provider>,
}

/// A named container bound to exactly one provider.
///
/// Cheap to clone; clones denote the same registered bucket.
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<BucketInner>,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.inner.config.name)
            .field("absolute_name", &self.inner.absolute_name)
            .field("provider", &self.inner.provider_name)
            .finish()
    }
}

impl Bucket {
    pub(crate) fn new(
        config: BucketConfig,
        absolute_name: String,
        provider_name: String,
        provider: Weak<Provider>,
    ) -> Self {
        Self {
            inner: Arc::new(BucketInner {
                config,
                absolute_name,
                provider_name,
                provider,
            }),
        }
    }

    /// Name as given at registration (the backend container name).
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Storage-wide alias.
    pub fn absolute_name(&self) -> &str {
        &self.inner.absolute_name
    }

    pub fn provider_name(&self) -> &str {
        &self.inner.provider_name
    }

    pub fn config(&self) -> &BucketConfig {
        &self.inner.config
    }

    /// Owning provider.
    ///
    /// # Errors
    /// - `NOT_FOUND` once the provider has been dropped
    pub fn provider(&self) -> Result<Arc<Provider>> {
        self.inner.provider.upgrade().ok_or_else(|| {
            Error::not_found(format!(
                "provider '{}' of bucket '{}' no longer exists",
                self.inner.provider_name, self.inner.absolute_name
            ))
        })
    }

    /// Whether both handles denote the same registration.
    pub fn same_as(&self, other: &Bucket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Qualified URI of `path` inside this bucket.
    pub fn uri(&self, path: &StoragePath) -> String {
        format!(
            "storage://{}:{}{}",
            self.inner.provider_name, self.inner.config.name, path
        )
    }

    pub fn file(&self, path: impl Into<StoragePath>) -> File {
        File::new(self.clone(), path)
    }

    pub fn directory(&self, path: impl Into<StoragePath>) -> Directory {
        Directory::new(self.clone(), path)
    }

    pub fn root(&self) -> Directory {
        Directory::new(self.clone(), StoragePath::root())
    }

    pub async fn put_file(
        &self,
        path: impl Into<StoragePath>,
        contents: impl Into<Contents>,
    ) -> Result<File> {
        let path = path.into();
        Ok(self
            .provider()?
            .put_file(self, &path, contents)
            .await?
            .into_result())
    }

    pub async fn get_file_contents(&self, path: impl Into<StoragePath>) -> Result<Bytes> {
        self.provider()?
            .get_file_contents(self, &path.into())
            .await
    }

    pub async fn file_exists(&self, path: impl Into<StoragePath>) -> Result<bool> {
        self.provider()?.file_exists(self, &path.into()).await
    }

    pub async fn list_files(
        &self,
        path: impl Into<StoragePath>,
        options: &ListOptions,
    ) -> Result<Listing<File>> {
        self.provider()?
            .list_files(self, &path.into(), options)
            .await
    }

    pub async fn delete_file(&self, path: impl Into<StoragePath>) -> Result<bool> {
        self.provider()?.delete_file(self, &path.into()).await
    }

    pub async fn copy_files(
        &self,
        src: impl Into<StoragePath>,
        dest: impl Into<StoragePath>,
        pattern: &str,
    ) -> Result<Vec<File>> {
        self.provider()?
            .copy_files(self, &src.into(), &dest.into(), pattern, &CopyOptions::default())
            .await
    }

    pub async fn delete_files(
        &self,
        path: impl Into<StoragePath>,
        pattern: &str,
        options: &DeleteOptions,
    ) -> Result<Vec<File>> {
        self.provider()?
            .delete_files(self, &path.into(), pattern, options)
            .await
    }
}
