//! The `FileStorage` orchestrator.
//!
//! Holds the process-wide provider type registry, the live provider
//! instances of one storage and the storage-wide bucket index. Every
//! operation taking a URI resolves it to a bucket and a path first, then
//! delegates to the owning provider (or to the transfer engine when two
//! endpoints are involved).

use bytes::Bytes;
use std::sync::{Arc, LazyLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

use filestorage_common::{Error, Result, StoragePath, StorageResponse};

use crate::backend::{Backend, ByteStream, Contents};
use crate::bucket::Bucket;
use crate::config::{BucketAliasStrategy, BucketConfig, ProviderConfig, ProviderSource, StorageConfig};
use crate::directory::Directory;
use crate::events::{self, StorageEvent};
use crate::file::File;
use crate::pattern::{ListOptions, Listing};
use crate::provider::{is_valid_name, CopyOptions, DeleteOptions, Provider, ProviderContext};
use crate::registry::Registry;
use crate::transfer;
use crate::uri::{self, FileLocation};

/// Constructor for one backend type.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Box<dyn Backend>> + Send + Sync>;

static PROVIDER_TYPES: LazyLock<Registry<ProviderFactory>> =
    LazyLock::new(|| Registry::new("provider types"));

/// Uniform access to every registered provider and bucket.
pub struct FileStorage {
    strategy: BucketAliasStrategy,
    logger: bool,
    providers: Registry<Arc<Provider>>,
    buckets: Registry<Bucket>,
    events: broadcast::Sender<StorageEvent>,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("strategy", &self.strategy)
            .field("providers", &self.providers.keys())
            .field("buckets", &self.buckets.keys())
            .finish()
    }
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl FileStorage {
    // ---- provider types (process-wide) ----

    /// Register a backend type under `name`.
    ///
    /// # Errors
    /// - `DUPLICATED_ELEMENT` if the name is taken and `replace` is false
    pub fn register_provider_type(
        name: &str,
        factory: ProviderFactory,
        replace: bool,
    ) -> Result<()> {
        PROVIDER_TYPES.add(name, factory, replace)
    }

    /// Remove a backend type. Providers already built from it keep working.
    pub fn unregister_provider_type(name: &str) -> bool {
        PROVIDER_TYPES.remove(name).is_some()
    }

    pub fn has_provider_type(name: &str) -> bool {
        PROVIDER_TYPES.has(name)
    }

    pub fn provider_types() -> Vec<String> {
        PROVIDER_TYPES.keys()
    }

    pub fn clear_provider_types() {
        PROVIDER_TYPES.clear();
    }

    // ---- construction ----

    /// Create an empty storage. Providers listed in `config` are ignored;
    /// use [`from_config`](Self::from_config) to register them.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            strategy: config.bucket_alias_strategy,
            logger: config.logger,
            providers: Registry::new("providers"),
            buckets: Registry::new("bucket index"),
            events: events::channel(),
        }
    }

    /// Create a storage and register every provider and bucket in `config`.
    pub async fn from_config(config: StorageConfig) -> Result<Self> {
        let entries = config.providers.clone();
        let storage = Self::new(config);
        for entry in entries {
            let provider = storage.add_provider(entry.source).await?;
            for bucket in entry.buckets {
                provider.add_bucket(bucket).await?;
            }
        }
        Ok(storage)
    }

    pub fn strategy(&self) -> BucketAliasStrategy {
        self.strategy
    }

    /// Subscribe to bucket lifecycle events of every provider.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn context(&self) -> ProviderContext {
        ProviderContext {
            strategy: self.strategy,
            bucket_index: self.buckets.clone(),
            events: self.events.clone(),
            logger: self.logger,
        }
    }

    // ---- providers ----

    /// Instantiate a provider from a URI or a configuration.
    ///
    /// # Preconditions
    /// - The backend type is registered with [`register_provider_type`](Self::register_provider_type)
    ///
    /// # Postconditions
    /// - The provider is registered under its name; it initializes lazily
    ///
    /// # Errors
    /// - `INVALID_PARAMS` for a malformed URI or an invalid instance name
    /// - `NOT_FOUND` if the backend type is not registered
    /// - `DUPLICATED_ELEMENT` if a provider with that name exists
    pub async fn add_provider(&self, source: impl Into<ProviderSource>) -> Result<Arc<Provider>> {
        let config = source.into().resolve()?;
        if !is_valid_name(&config.name) {
            return Err(Error::invalid_params(format!(
                "invalid provider name '{}': only [a-zA-Z0-9_-] allowed",
                config.name
            )));
        }
        if self.providers.has(&config.name) {
            return Err(Error::duplicated(format!(
                "provider '{}' is already registered",
                config.name
            )));
        }

        let factory = PROVIDER_TYPES.get(&config.provider_type).ok_or_else(|| {
            Error::not_found(format!(
                "provider type '{}' is not registered",
                config.provider_type
            ))
        })?;
        let backend = factory(&config)?;
        let provider = Provider::new(config, backend, self.context())?;
        self.providers.add(provider.name(), provider.clone(), false)?;

        if self.logger {
            info!(
                provider = %provider.name(),
                provider_type = %provider.provider_type(),
                mode = %provider.mode(),
                "Provider added"
            );
        }
        Ok(provider)
    }

    pub fn get_provider(&self, name: &str) -> Result<Arc<Provider>> {
        self.providers
            .get(name)
            .ok_or_else(|| Error::not_found(format!("provider '{}' is not registered", name)))
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.has(name)
    }

    /// Live providers ordered by name.
    pub fn providers(&self) -> Vec<Arc<Provider>> {
        self.providers.values()
    }

    /// Dispose a provider and release its name and bucket aliases.
    pub async fn dispose_provider(&self, name: &str) -> Result<()> {
        let provider = self
            .providers
            .remove(name)
            .ok_or_else(|| Error::not_found(format!("provider '{}' is not registered", name)))?;
        provider.dispose().await
    }

    /// Dispose every provider.
    pub async fn dispose(&self) -> Result<()> {
        for provider in self.providers.clear() {
            provider.dispose().await?;
        }
        Ok(())
    }

    // ---- buckets ----

    /// Register a bucket on the provider called `provider`.
    pub async fn add_bucket(&self, provider: &str, config: BucketConfig) -> Result<Bucket> {
        self.get_provider(provider)?.add_bucket(config).await
    }

    /// Bucket by alias or by file URI.
    pub fn get_bucket(&self, alias_or_uri: &str) -> Result<Bucket> {
        if uri::is_uri(alias_or_uri) {
            return self.resolve(alias_or_uri).map(|(bucket, _)| bucket);
        }
        self.buckets
            .get(alias_or_uri)
            .ok_or_else(|| Error::not_found(format!("bucket '{}' is not registered", alias_or_uri)))
    }

    pub fn has_bucket(&self, alias_or_uri: &str) -> bool {
        self.get_bucket(alias_or_uri).is_ok()
    }

    /// Every registered bucket ordered by alias.
    pub fn buckets(&self) -> Vec<Bucket> {
        self.buckets.values()
    }

    /// Delete a bucket's container and unregister it.
    pub async fn destroy_bucket(&self, alias_or_uri: &str) -> Result<()> {
        let bucket = self.get_bucket(alias_or_uri)?;
        bucket.provider()?.destroy_bucket(bucket.name()).await
    }

    /// Resolve a file URI to its bucket and normalized path.
    ///
    /// `provider:bucket` authorities name the bucket through its provider;
    /// otherwise the scheme is taken as the bucket alias.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` for a malformed URI
    /// - `NOT_FOUND` if the provider or bucket is not registered
    pub fn resolve(&self, uri: &str) -> Result<(Bucket, StoragePath)> {
        match uri::parse_file_uri(uri)? {
            FileLocation::Qualified {
                provider,
                bucket,
                path,
            } => {
                let provider = self.get_provider(&provider)?;
                Ok((provider.get_bucket(&bucket)?, path))
            }
            FileLocation::Aliased { alias, path } => {
                let bucket = self.buckets.get(&alias).ok_or_else(|| {
                    Error::not_found(format!("bucket '{}' is not registered", alias))
                })?;
                Ok((bucket, path))
            }
        }
    }

    // ---- entities ----

    pub fn file(&self, uri: &str) -> Result<File> {
        let (bucket, path) = self.resolve(uri)?;
        Ok(File::new(bucket, path))
    }

    pub fn directory(&self, uri: &str) -> Result<Directory> {
        let (bucket, path) = self.resolve(uri)?;
        Ok(Directory::new(bucket, path))
    }

    // ---- single files ----

    pub async fn put_file(
        &self,
        uri: &str,
        contents: impl Into<Contents>,
    ) -> Result<StorageResponse<File>> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.put_file(&bucket, &path, contents).await
    }

    pub async fn get_file_stream(&self, uri: &str) -> Result<ByteStream> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.get_file_stream(&bucket, &path).await
    }

    pub async fn get_file_contents(&self, uri: &str) -> Result<Bytes> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.get_file_contents(&bucket, &path).await
    }

    pub async fn file_exists(&self, uri: &str) -> Result<bool> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.file_exists(&bucket, &path).await
    }

    /// The file at `uri` with its metadata, if it exists.
    pub async fn stat_file(&self, uri: &str) -> Result<Option<File>> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.stat_file(&bucket, &path).await
    }

    pub async fn delete_file(&self, uri: &str) -> Result<bool> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.delete_file(&bucket, &path).await
    }

    pub async fn list_files(&self, uri: &str, options: &ListOptions) -> Result<Listing<File>> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.list_files(&bucket, &path, options).await
    }

    pub async fn list_directories(
        &self,
        uri: &str,
        options: &ListOptions,
    ) -> Result<Listing<Directory>> {
        let (bucket, path) = self.resolve(uri)?;
        bucket
            .provider()?
            .list_directories(&bucket, &path, options)
            .await
    }

    pub async fn make_directory(&self, uri: &str) -> Result<Directory> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.make_directory(&bucket, &path).await
    }

    pub async fn delete_directory(&self, uri: &str) -> Result<bool> {
        let (bucket, path) = self.resolve(uri)?;
        bucket.provider()?.delete_directory(&bucket, &path).await
    }

    // ---- transfers ----

    /// Copy one file between any two registered buckets.
    pub async fn copy_file(
        &self,
        src: &str,
        dest: &str,
        options: &CopyOptions,
    ) -> Result<StorageResponse<File>> {
        let (src_bucket, src_path) = self.resolve(src)?;
        let (dest_bucket, dest_path) = self.resolve(dest)?;
        if self.logger {
            debug!(src, dest, "Copying file");
        }
        transfer::copy_file(&src_bucket, &src_path, &dest_bucket, &dest_path, options).await
    }

    /// Move one file between any two registered buckets.
    pub async fn move_file(
        &self,
        src: &str,
        dest: &str,
        options: &CopyOptions,
    ) -> Result<StorageResponse<File>> {
        let (src_bucket, src_path) = self.resolve(src)?;
        let (dest_bucket, dest_path) = self.resolve(dest)?;
        if self.logger {
            debug!(src, dest, "Moving file");
        }
        transfer::move_file(&src_bucket, &src_path, &dest_bucket, &dest_path, options).await
    }

    /// Copy every file under `src` matching `pattern` below `dest`.
    pub async fn copy_files(
        &self,
        src: &str,
        dest: &str,
        pattern: &str,
        options: &CopyOptions,
    ) -> Result<Vec<File>> {
        let (src_bucket, src_path) = self.resolve(src)?;
        let (dest_bucket, dest_path) = self.resolve(dest)?;
        transfer::copy_files(&src_bucket, &src_path, &dest_bucket, &dest_path, pattern, options)
            .await
    }

    /// Move every file under `src` matching `pattern` below `dest`.
    pub async fn move_files(
        &self,
        src: &str,
        dest: &str,
        pattern: &str,
        options: &CopyOptions,
    ) -> Result<Vec<File>> {
        let (src_bucket, src_path) = self.resolve(src)?;
        let (dest_bucket, dest_path) = self.resolve(dest)?;
        transfer::move_files(&src_bucket, &src_path, &dest_bucket, &dest_path, pattern, options)
            .await
    }

    pub async fn delete_files(
        &self,
        uri: &str,
        pattern: &str,
        options: &DeleteOptions,
    ) -> Result<Vec<File>> {
        let (bucket, path) = self.resolve(uri)?;
        bucket
            .provider()?
            .delete_files(&bucket, &path, pattern, options)
            .await
    }

    pub async fn remove_empty_directories(&self, uri: &str) -> Result<bool> {
        let (bucket, path) = self.resolve(uri)?;
        bucket
            .provider()?
            .remove_empty_directories(&bucket, &path)
            .await
    }
}
