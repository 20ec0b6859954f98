//! Directory handles.

use std::fmt;

use filestorage_common::{Error, Result, StoragePath};

use crate::backend::ObjectInfo;
use crate::bucket::Bucket;
use crate::file::File;
use crate::pattern::{ListOptions, Listing};
use crate::provider::CopyOptions;
use crate::transfer;

/// A container node inside a bucket.
#[derive(Clone)]
pub struct Directory {
    bucket: Bucket,
    path: StoragePath,
    exists: bool,
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("bucket", &self.bucket.absolute_name())
            .field("path", &self.path.to_string_path())
            .field("exists", &self.exists)
            .finish()
    }
}

impl Directory {
    pub fn new(bucket: Bucket, path: impl Into<StoragePath>) -> Self {
        let path = path.into();
        Self {
            bucket,
            exists: path.is_root(),
            path,
        }
    }

    pub(crate) fn from_info(bucket: Bucket, info: ObjectInfo) -> Self {
        Self {
            bucket,
            path: info.path,
            exists: true,
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

    pub fn uri(&self) -> String {
        self.bucket.uri(&self.path)
    }

    /// Handle on a file below this directory.
    pub fn file(&self, relative: &str) -> File {
        File::new(self.bucket.clone(), self.path.join(relative))
    }

    /// Handle on a subdirectory.
    pub fn directory(&self, relative: &str) -> Directory {
        Directory::new(self.bucket.clone(), self.path.join(relative))
    }

    pub fn parent(&self) -> Option<Directory> {
        self.path
            .parent()
            .map(|p| Directory::new(self.bucket.clone(), p))
    }

    pub async fn refresh(&mut self) -> Result<bool> {
        self.exists = self
            .bucket
            .provider()?
            .directory_exists(&self.bucket, &self.path)
            .await?;
        Ok(self.exists)
    }

    /// Create the directory (and missing parents where the backend has them).
    pub async fn create(&mut self) -> Result<()> {
        self.bucket
            .provider()?
            .make_directory(&self.bucket, &self.path)
            .await?;
        self.exists = true;
        Ok(())
    }

    pub async fn list_files(&self, options: &ListOptions) -> Result<Listing<File>> {
        self.bucket
            .provider()?
            .list_files(&self.bucket, &self.path, options)
            .await
    }

    pub async fn list_directories(&self, options: &ListOptions) -> Result<Listing<Directory>> {
        self.bucket
            .provider()?
            .list_directories(&self.bucket, &self.path, options)
            .await
    }

    /// Delete the directory with everything below it.
    pub async fn delete(&mut self) -> Result<bool> {
        let deleted = self
            .bucket
            .provider()?
            .delete_directory(&self.bucket, &self.path)
            .await?;
        self.exists = false;
        Ok(deleted)
    }

    pub async fn remove_empty_directories(&self) -> Result<bool> {
        self.bucket
            .provider()?
            .remove_empty_directories(&self.bucket, &self.path)
            .await
    }

    /// Copy the files matching `pattern` into `dest`, keeping relative paths.
    pub async fn copy_to(&self, dest: &Directory, pattern: &str, options: &CopyOptions) -> Result<Vec<File>> {
        transfer::copy_files(&self.bucket, &self.path, &dest.bucket, &dest.path, pattern, options).await
    }

    /// Move every file into `dest` and remove this directory; the handle
    /// then points at `dest`.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` if `dest` is this directory or lies below it
    pub async fn move_to(&mut self, dest: &Directory, options: &CopyOptions) -> Result<Vec<File>> {
        if dest.bucket.same_as(&self.bucket) && dest.path.starts_with(&self.path) {
            return Err(Error::invalid_params(format!(
                "cannot move {} into itself ({})",
                self.path, dest.path
            )));
        }
        let moved =
            transfer::move_files(&self.bucket, &self.path, &dest.bucket, &dest.path, "**", options)
                .await?;
        if !self.path.is_root() {
            self.bucket
                .provider()?
                .delete_directory(&self.bucket, &self.path)
                .await?;
        }
        self.bucket = dest.bucket.clone();
        self.path = dest.path.clone();
        self.exists = true;
        Ok(moved)
    }
}
