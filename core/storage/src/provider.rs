//! Provider lifecycle manager.
//!
//! A [`Provider`] is one configured backend instance. It owns the adapter,
//! its readiness state and a private bucket registry mirrored into the
//! storage-wide bucket index. Every file and directory primitive goes
//! through here so that ownership, permissions and readiness are checked
//! the same way for every backend.

use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use filestorage_common::{Error, Mode, Result, StoragePath, StorageResponse};

use crate::backend::{collect_stream, Backend, ByteStream, Contents, EntryKind};
use crate::bucket::Bucket;
use crate::bulk;
use crate::config::{BucketAliasStrategy, BucketConfig, ProviderConfig};
use crate::directory::Directory;
use crate::events::{self, StorageEvent};
use crate::file::File;
use crate::pattern::{ListOptions, Listing};
use crate::registry::Registry;
use crate::transfer;

/// Readiness of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Ready,
    Disposed,
}

/// Storage-wide collaborators handed to each provider.
#[derive(Clone)]
pub struct ProviderContext {
    pub strategy: BucketAliasStrategy,
    /// Storage-wide bucket index keyed by alias.
    pub bucket_index: Registry<Bucket>,
    pub events: broadcast::Sender<StorageEvent>,
    pub logger: bool,
}

impl ProviderContext {
    /// Context for a provider used on its own, outside a `FileStorage`.
    pub fn standalone(strategy: BucketAliasStrategy) -> Self {
        Self {
            strategy,
            bucket_index: Registry::new("bucket index"),
            events: events::channel(),
            logger: true,
        }
    }
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self::standalone(BucketAliasStrategy::default())
    }
}

/// Options for copy and move operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Replace an existing destination instead of failing.
    pub overwrite: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

/// Options for pattern deletes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Remove directories left empty by the deletion.
    pub cleanup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
    /// Enumerating directory entries: read plus execute, as on POSIX.
    List,
}

/// Check that an instance name only uses `[a-zA-Z0-9_-]`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_bucket_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_params("bucket name cannot be empty"));
    }
    if name.contains(['/', '\\', ':']) {
        return Err(Error::invalid_params(format!(
            "bucket name '{}' cannot contain '/', '\\' or ':'",
            name
        )));
    }
    Ok(())
}

/// One configured backend instance.
pub struct Provider {
    config: ProviderConfig,
    backend: Box<dyn Backend>,
    state: Mutex<ProviderState>,
    buckets: Registry<Bucket>,
    context: ProviderContext,
    this: Weak<Provider>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.config.name)
            .field("type", &self.config.provider_type)
            .field("mode", &self.config.mode)
            .field("buckets", &self.buckets.keys())
            .finish()
    }
}

impl Provider {
    /// Create a provider around `backend`.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` if the name uses characters outside `[a-zA-Z0-9_-]`
    pub fn new(
        config: ProviderConfig,
        backend: Box<dyn Backend>,
        context: ProviderContext,
    ) -> Result<Arc<Self>> {
        if !is_valid_name(&config.name) {
            return Err(Error::invalid_params(format!(
                "invalid provider name '{}': only [a-zA-Z0-9_-] allowed",
                config.name
            )));
        }

        let buckets = Registry::new(format!("provider '{}' buckets", config.name));
        buckets.mirror_into(&context.bucket_index)?;

        Ok(Arc::new_cyclic(|this| Self {
            config,
            backend,
            state: Mutex::new(ProviderState::Uninitialized),
            buckets,
            context,
            this: this.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn provider_type(&self) -> &str {
        &self.config.provider_type
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn can_read(&self) -> bool {
        self.config.mode.can_read()
    }

    pub fn can_write(&self) -> bool {
        self.config.mode.can_write()
    }

    pub fn can_execute(&self) -> bool {
        self.config.mode.can_execute()
    }

    pub fn supports_cross_bucket_operations(&self) -> bool {
        self.backend.supports_cross_bucket_operations()
    }

    pub fn strategy(&self) -> BucketAliasStrategy {
        self.context.strategy
    }

    /// Subscribe to bucket lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.context.events.subscribe()
    }

    pub async fn state(&self) -> ProviderState {
        *self.state.lock().await
    }

    pub(crate) fn logging(&self) -> bool {
        self.context.logger
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Initialize the backend. Calling it on a ready provider is a no-op.
    ///
    /// # Errors
    /// - `NOT_FOUND` once the provider has been disposed
    /// - whatever the backend reports while connecting
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            ProviderState::Ready => Ok(()),
            ProviderState::Disposed => Err(Error::not_found(format!(
                "provider '{}' has been disposed",
                self.name()
            ))),
            ProviderState::Uninitialized => {
                self.backend.init().await?;
                *state = ProviderState::Ready;
                if self.logging() {
                    debug!(provider = %self.name(), "Provider initialized");
                }
                Ok(())
            }
        }
    }

    /// Ensure the provider is ready, initializing it on first use.
    pub async fn make_ready(&self) -> Result<()> {
        self.init().await
    }

    /// Release the backend and every bucket this provider registered.
    ///
    /// Aliases owned by the released buckets become available again.
    pub async fn dispose(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == ProviderState::Disposed {
            return Ok(());
        }
        let released = self.buckets.clear();
        self.buckets.unmirror(&self.context.bucket_index);
        *state = ProviderState::Disposed;
        if self.logging() {
            info!(
                provider = %self.name(),
                buckets = released.len(),
                "Provider disposed"
            );
        }
        self.backend.dispose().await
    }

    // ---- buckets ----

    /// Register a bucket.
    ///
    /// # Preconditions
    /// - The provider has not been disposed
    /// - `config.create` requires a writable mode
    ///
    /// # Postconditions
    /// - The bucket is reachable here and through the storage-wide index
    ///   under its alias
    /// - On failure nothing is registered and `BucketAddError` is emitted
    ///
    /// # Errors
    /// - `DUPLICATED_ELEMENT` if the resolved alias is registered anywhere
    ///   in the storage
    /// - `NOT_FOUND` if the container is missing and `create` is not set
    /// - `NATIVE_ERROR` if creating the container fails
    pub async fn add_bucket(&self, config: BucketConfig) -> Result<Bucket> {
        let name = config.name.clone();
        events::emit(
            &self.context.events,
            StorageEvent::BeforeAddBucket {
                provider: self.name().to_string(),
                bucket: name.clone(),
            },
        );

        match self.register_bucket(config).await {
            Ok(bucket) => {
                if self.logging() {
                    info!(
                        provider = %self.name(),
                        bucket = %name,
                        alias = %bucket.absolute_name(),
                        "Bucket added"
                    );
                }
                events::emit(
                    &self.context.events,
                    StorageEvent::BucketAdded {
                        provider: self.name().to_string(),
                        bucket: name,
                        alias: bucket.absolute_name().to_string(),
                    },
                );
                Ok(bucket)
            }
            Err(err) => {
                if self.logging() {
                    warn!(provider = %self.name(), bucket = %name, "Failed to add bucket: {}", err);
                }
                events::emit(
                    &self.context.events,
                    StorageEvent::add_error(self.name(), &name, &err),
                );
                Err(err)
            }
        }
    }

    async fn register_bucket(&self, config: BucketConfig) -> Result<Bucket> {
        validate_bucket_name(&config.name)?;
        let alias = self.context.strategy.alias(self.name(), &config.name);
        if self.context.bucket_index.has(&alias) {
            return Err(Error::duplicated(format!(
                "bucket alias '{}' is already registered",
                alias
            )));
        }

        if config.create && !config.mode.unwrap_or(self.config.mode).can_write() {
            return Err(Error::permission(format!(
                "provider '{}' cannot create bucket '{}': not writable",
                self.name(),
                config.name
            )));
        }

        self.make_ready().await?;
        let exists = self.backend.bucket_exists(&config.name).await?;
        if !exists {
            if !config.create {
                return Err(Error::not_found(format!(
                    "container '{}' does not exist on provider '{}'",
                    config.name,
                    self.name()
                )));
            }
            self.backend.create_bucket(&config).await.map_err(|e| {
                Error::native(format!("failed to create container '{}'", config.name))
                    .with_source(Box::new(e))
            })?;
        }

        let bucket = Bucket::new(config, alias.clone(), self.name().to_string(), self.this.clone());
        self.buckets.add(&alias, bucket.clone(), false)?;
        Ok(bucket)
    }

    /// Bucket registered under `name` (or its alias).
    pub fn get_bucket(&self, name: &str) -> Result<Bucket> {
        let alias = self.context.strategy.alias(self.name(), name);
        self.buckets
            .get(&alias)
            .or_else(|| self.buckets.get(name))
            .ok_or_else(|| {
                Error::not_found(format!(
                    "bucket '{}' is not registered with provider '{}'",
                    name,
                    self.name()
                ))
            })
    }

    pub fn has_bucket(&self, name: &str) -> bool {
        self.get_bucket(name).is_ok()
    }

    /// Registered buckets ordered by alias.
    pub fn buckets(&self) -> Vec<Bucket> {
        self.buckets.values()
    }

    /// Unregister a bucket without touching its container.
    pub fn remove_bucket(&self, name: &str) -> Result<Bucket> {
        let bucket = self.get_bucket(name)?;
        self.buckets.remove(bucket.absolute_name());
        Ok(bucket)
    }

    /// Delete a bucket's container and unregister it.
    ///
    /// # Errors
    /// - `NOT_FOUND` if the bucket is not registered here
    /// - `PERMISSION_ERROR` if the provider is not writable
    /// - `NATIVE_ERROR` if the backend fails
    pub async fn destroy_bucket(&self, name: &str) -> Result<()> {
        events::emit(
            &self.context.events,
            StorageEvent::BeforeDestroyBucket {
                provider: self.name().to_string(),
                bucket: name.to_string(),
            },
        );

        let outcome = async {
            let bucket = self.get_bucket(name)?;
            self.check_access(&bucket, Access::Write)?;
            self.make_ready().await?;
            self.backend
                .destroy_bucket(bucket.name())
                .await
                .map_err(|e| {
                    Error::native(format!("failed to destroy container '{}'", bucket.name()))
                        .with_source(Box::new(e))
                })?;
            self.buckets.remove(bucket.absolute_name());
            Ok::<Bucket, Error>(bucket)
        }
        .await;

        match outcome {
            Ok(bucket) => {
                if self.logging() {
                    info!(provider = %self.name(), bucket = %name, "Bucket destroyed");
                }
                events::emit(
                    &self.context.events,
                    StorageEvent::BucketDestroyed {
                        provider: self.name().to_string(),
                        bucket: name.to_string(),
                        alias: bucket.absolute_name().to_string(),
                    },
                );
                Ok(())
            }
            Err(err) => {
                events::emit(
                    &self.context.events,
                    StorageEvent::destroy_error(self.name(), name, &err),
                );
                Err(err)
            }
        }
    }

    /// Containers on the backend that are not registered as buckets.
    pub async fn list_unregistered_buckets(&self) -> Result<Vec<BucketConfig>> {
        if !(self.can_read() && self.can_execute()) {
            return Err(Error::permission(format!(
                "provider '{}' cannot list its containers",
                self.name()
            )));
        }
        self.make_ready().await?;
        let mut names = self.backend.list_buckets().await?;
        names.sort();
        Ok(names
            .into_iter()
            .filter(|name| !self.has_bucket(name))
            .map(BucketConfig::new)
            .collect())
    }

    // ---- guards ----

    fn owns(&self, bucket: &Bucket) -> Result<()> {
        match self.buckets.get(bucket.absolute_name()) {
            Some(registered) if registered.same_as(bucket) => Ok(()),
            _ => Err(Error::not_found(format!(
                "bucket '{}' is not registered with provider '{}'",
                bucket.absolute_name(),
                self.name()
            ))),
        }
    }

    pub(crate) fn check_access(&self, bucket: &Bucket, access: Access) -> Result<()> {
        let mode = bucket.config().mode.unwrap_or(self.config.mode);
        let allowed = match access {
            Access::Read => mode.can_read(),
            Access::Write => mode.can_write(),
            Access::List => mode.can_read() && mode.can_execute(),
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::permission(format!(
                "{:?} access denied on bucket '{}' (mode {})",
                access,
                bucket.absolute_name(),
                mode
            )))
        }
    }

    /// Ownership, permission and readiness checks, in that order.
    pub(crate) async fn prepare(&self, bucket: &Bucket, access: Access) -> Result<()> {
        self.owns(bucket)?;
        self.check_access(bucket, access)?;
        self.make_ready().await
    }

    // ---- files ----

    /// Write `contents` to `path`, replacing any existing file.
    pub async fn put_file(
        &self,
        bucket: &Bucket,
        path: &StoragePath,
        contents: impl Into<Contents>,
    ) -> Result<StorageResponse<File>> {
        if path.is_root() {
            return Err(Error::invalid_params("cannot write a file at the bucket root"));
        }
        self.prepare(bucket, Access::Write).await?;
        let response = self
            .backend
            .put(bucket.name(), path, contents.into().into_stream())
            .await?;
        Ok(response.map(|info| File::from_info(bucket.clone(), info)))
    }

    pub async fn get_file_stream(&self, bucket: &Bucket, path: &StoragePath) -> Result<ByteStream> {
        self.prepare(bucket, Access::Read).await?;
        self.backend.get_stream(bucket.name(), path).await
    }

    pub async fn get_file_contents(&self, bucket: &Bucket, path: &StoragePath) -> Result<Bytes> {
        let stream = self.get_file_stream(bucket, path).await?;
        collect_stream(stream).await
    }

    pub async fn file_exists(&self, bucket: &Bucket, path: &StoragePath) -> Result<bool> {
        Ok(self.stat_file(bucket, path).await?.is_some())
    }

    /// Like [`file_exists`](Self::file_exists) but returns the file handle.
    pub async fn stat_file(&self, bucket: &Bucket, path: &StoragePath) -> Result<Option<File>> {
        self.prepare(bucket, Access::Read).await?;
        Ok(self
            .backend
            .stat(bucket.name(), path)
            .await?
            .filter(|info| info.kind == EntryKind::File)
            .map(|info| File::from_info(bucket.clone(), info)))
    }

    pub async fn list_files(
        &self,
        bucket: &Bucket,
        path: &StoragePath,
        options: &ListOptions,
    ) -> Result<Listing<File>> {
        self.prepare(bucket, Access::List).await?;
        let entries = bulk::walk(self.backend(), bucket.name(), path, options, EntryKind::File)
            .await?
            .into_iter()
            .map(|info| File::from_info(bucket.clone(), info))
            .collect();
        Ok(Listing { entries })
    }

    pub async fn list_directories(
        &self,
        bucket: &Bucket,
        path: &StoragePath,
        options: &ListOptions,
    ) -> Result<Listing<Directory>> {
        self.prepare(bucket, Access::List).await?;
        let entries = bulk::walk(self.backend(), bucket.name(), path, options, EntryKind::Directory)
            .await?
            .into_iter()
            .map(|info| Directory::from_info(bucket.clone(), info))
            .collect();
        Ok(Listing { entries })
    }

    /// Copy a file inside one bucket.
    pub async fn copy_file(
        &self,
        bucket: &Bucket,
        src: &StoragePath,
        dest: &StoragePath,
        options: &CopyOptions,
    ) -> Result<StorageResponse<File>> {
        self.copy_file_to(bucket, src, bucket, dest, options).await
    }

    /// Move a file inside one bucket.
    pub async fn move_file(
        &self,
        bucket: &Bucket,
        src: &StoragePath,
        dest: &StoragePath,
        options: &CopyOptions,
    ) -> Result<StorageResponse<File>> {
        self.move_file_to(bucket, src, bucket, dest, options).await
    }

    /// Native copy between two buckets of this provider.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` if the buckets differ and the backend cannot copy
    ///   across buckets
    pub async fn copy_file_to(
        &self,
        src_bucket: &Bucket,
        src: &StoragePath,
        dest_bucket: &Bucket,
        dest: &StoragePath,
        options: &CopyOptions,
    ) -> Result<StorageResponse<File>> {
        self.prepare_native_transfer(src_bucket, src, dest_bucket, dest, options, Access::Read)
            .await?;
        let response = self
            .backend
            .copy(src_bucket.name(), src, dest_bucket.name(), dest)
            .await?;
        Ok(response.map(|info| File::from_info(dest_bucket.clone(), info)))
    }

    /// Native move between two buckets of this provider.
    pub async fn move_file_to(
        &self,
        src_bucket: &Bucket,
        src: &StoragePath,
        dest_bucket: &Bucket,
        dest: &StoragePath,
        options: &CopyOptions,
    ) -> Result<StorageResponse<File>> {
        self.prepare_native_transfer(src_bucket, src, dest_bucket, dest, options, Access::Write)
            .await?;
        let response = self
            .backend
            .rename(src_bucket.name(), src, dest_bucket.name(), dest)
            .await?;
        Ok(response.map(|info| File::from_info(dest_bucket.clone(), info)))
    }

    async fn prepare_native_transfer(
        &self,
        src_bucket: &Bucket,
        src: &StoragePath,
        dest_bucket: &Bucket,
        dest: &StoragePath,
        options: &CopyOptions,
        src_access: Access,
    ) -> Result<()> {
        if !src_bucket.same_as(dest_bucket) && !self.supports_cross_bucket_operations() {
            return Err(Error::invalid_params(format!(
                "provider '{}' cannot copy between buckets natively",
                self.name()
            )));
        }
        if dest.is_root() {
            return Err(Error::invalid_params("cannot write a file at the bucket root"));
        }
        self.prepare(src_bucket, src_access).await?;
        self.prepare(dest_bucket, Access::Write).await?;

        match self.backend.stat(src_bucket.name(), src).await? {
            Some(info) if info.kind == EntryKind::File => {}
            _ => {
                return Err(Error::not_found(format!(
                    "file {} not found in bucket '{}'",
                    src,
                    src_bucket.absolute_name()
                )))
            }
        }
        if !options.overwrite && self.backend.stat(dest_bucket.name(), dest).await?.is_some() {
            return Err(Error::duplicated(format!(
                "{} already exists in bucket '{}'",
                dest,
                dest_bucket.absolute_name()
            )));
        }
        Ok(())
    }

    /// Delete a file. Returns false if nothing was there.
    pub async fn delete_file(&self, bucket: &Bucket, path: &StoragePath) -> Result<bool> {
        self.prepare(bucket, Access::Write).await?;
        self.backend.delete(bucket.name(), path).await
    }

    // ---- directories ----

    pub async fn make_directory(&self, bucket: &Bucket, path: &StoragePath) -> Result<Directory> {
        self.prepare(bucket, Access::Write).await?;
        let info = self.backend.create_dir(bucket.name(), path).await?;
        Ok(Directory::from_info(bucket.clone(), info))
    }

    pub async fn directory_exists(&self, bucket: &Bucket, path: &StoragePath) -> Result<bool> {
        if path.is_root() {
            self.prepare(bucket, Access::Read).await?;
            return Ok(true);
        }
        self.prepare(bucket, Access::Read).await?;
        Ok(matches!(
            self.backend.stat(bucket.name(), path).await?,
            Some(info) if info.is_directory()
        ))
    }

    /// Delete a directory recursively.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` for the bucket root; use `destroy_bucket` instead
    pub async fn delete_directory(&self, bucket: &Bucket, path: &StoragePath) -> Result<bool> {
        if path.is_root() {
            return Err(Error::invalid_params("cannot delete the bucket root"));
        }
        self.prepare(bucket, Access::Write).await?;
        self.backend.delete_dir(bucket.name(), path).await
    }

    // ---- bulk ----

    /// Copy every file under `src` matching `pattern` to the same relative
    /// location under `dest`.
    pub async fn copy_files(
        &self,
        bucket: &Bucket,
        src: &StoragePath,
        dest: &StoragePath,
        pattern: &str,
        options: &CopyOptions,
    ) -> Result<Vec<File>> {
        transfer::copy_files(bucket, src, bucket, dest, pattern, options).await
    }

    /// Move every file under `src` matching `pattern` under `dest`.
    pub async fn move_files(
        &self,
        bucket: &Bucket,
        src: &StoragePath,
        dest: &StoragePath,
        pattern: &str,
        options: &CopyOptions,
    ) -> Result<Vec<File>> {
        transfer::move_files(bucket, src, bucket, dest, pattern, options).await
    }

    /// Delete every file under `path` matching `pattern`.
    ///
    /// Returns the deleted files. With `cleanup`, directories left empty are
    /// removed walking up towards the bucket root.
    ///
    /// # Errors
    /// - `PERMISSION_ERROR` before anything is listed if the bucket is not
    ///   writable
    /// - `NATIVE_ERROR` carrying the deleted entries if a deletion fails
    pub async fn delete_files(
        &self,
        bucket: &Bucket,
        path: &StoragePath,
        pattern: &str,
        options: &DeleteOptions,
    ) -> Result<Vec<File>> {
        self.prepare(bucket, Access::Write).await?;
        let listing = self
            .list_files(bucket, path, &ListOptions::recursive().with_pattern(pattern))
            .await?;
        if self.logging() {
            debug!(
                bucket = %bucket.absolute_name(),
                path = %path,
                pattern,
                matches = listing.len(),
                "Deleting files"
            );
        }

        let deleted = bulk::run_sequential(listing.entries, |mut file| async move {
            file.delete().await?;
            Ok(file)
        })
        .await?;

        if options.cleanup {
            let parents: Vec<StoragePath> = deleted
                .iter()
                .filter_map(|file| file.path().parent())
                .collect();
            bulk::prune_upwards(self.backend(), bucket.name(), parents).await?;
        }
        Ok(deleted)
    }

    /// Remove every empty directory under `path` (and `path` itself unless it
    /// is the bucket root). Returns whether anything was removed.
    pub async fn remove_empty_directories(
        &self,
        bucket: &Bucket,
        path: &StoragePath,
    ) -> Result<bool> {
        self.prepare(bucket, Access::Write).await?;
        self.check_access(bucket, Access::List)?;
        bulk::remove_empty_directories(self.backend(), bucket.name(), path).await
    }
}
