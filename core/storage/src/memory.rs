//! In-memory backend.
//!
//! Modeled on an object store: each bucket is a flat, ordered map from key
//! to object. A directory exists implicitly while some key lives below it,
//! or explicitly through a marker written by `create_dir`. All data is lost
//! on drop.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use filestorage_common::{Error, Result, StoragePath, StorageResponse};

use crate::backend::{collect_stream, Backend, ByteStream, ObjectInfo};
use crate::config::{BucketConfig, ProviderConfig};
use crate::storage::ProviderFactory;

#[derive(Debug, Clone)]
enum Entry {
    Object {
        data: Bytes,
        modified: DateTime<Utc>,
        etag: String,
    },
    Marker {
        modified: DateTime<Utc>,
    },
}

type Objects = BTreeMap<String, Entry>;

/// In-memory storage backend.
///
/// Useful for testing and development.
pub struct MemoryBackend {
    buckets: RwLock<HashMap<String, Objects>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Factory for the type registry.
    pub fn factory() -> ProviderFactory {
        Arc::new(|_config: &ProviderConfig| -> Result<Box<dyn Backend>> {
            Ok(Box::new(MemoryBackend::new()))
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Objects>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Objects>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(path: &StoragePath) -> String {
        path.components().join("/")
    }

    fn prefix(key: &str) -> String {
        if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key)
        }
    }

    fn bucket<'a>(buckets: &'a HashMap<String, Objects>, name: &str) -> Result<&'a Objects> {
        buckets
            .get(name)
            .ok_or_else(|| Error::not_found(format!("bucket '{}' does not exist", name)))
    }

    fn bucket_mut<'a>(buckets: &'a mut HashMap<String, Objects>, name: &str) -> Result<&'a mut Objects> {
        buckets
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("bucket '{}' does not exist", name)))
    }

    fn has_children(objects: &Objects, key: &str) -> bool {
        let prefix = Self::prefix(key);
        objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn info(path: StoragePath, entry: &Entry) -> ObjectInfo {
        match entry {
            Entry::Object {
                data,
                modified,
                etag,
            } => {
                let mut info = ObjectInfo::file(path, data.len() as u64, Some(*modified));
                info.etag = Some(etag.clone());
                info
            }
            Entry::Marker { modified } => ObjectInfo::directory(path, Some(*modified)),
        }
    }

    fn lookup(objects: &Objects, path: &StoragePath) -> Option<ObjectInfo> {
        if path.is_root() {
            return Some(ObjectInfo::directory(StoragePath::root(), None));
        }
        let key = Self::key(path);
        match objects.get(&key) {
            Some(entry) => Some(Self::info(path.clone(), entry)),
            None if Self::has_children(objects, &key) => {
                Some(ObjectInfo::directory(path.clone(), None))
            }
            None => None,
        }
    }

    /// Reject writes whose parent chain runs through an object.
    fn check_parents(objects: &Objects, path: &StoragePath) -> Result<()> {
        let mut current = path.parent();
        while let Some(parent) = current {
            if parent.is_root() {
                break;
            }
            if let Some(Entry::Object { .. }) = objects.get(&Self::key(&parent)) {
                return Err(Error::invalid_params(format!(
                    "parent {} of {} is a file",
                    parent, path
                )));
            }
            current = parent.parent();
        }
        Ok(())
    }

    fn new_object(data: Bytes) -> Entry {
        Entry::Object {
            data,
            modified: Utc::now(),
            etag: Uuid::new_v4().to_string(),
        }
    }

    fn source_object(objects: &Objects, path: &StoragePath, bucket: &str) -> Result<Bytes> {
        match objects.get(&Self::key(path)) {
            Some(Entry::Object { data, .. }) => Ok(data.clone()),
            _ => Err(Error::not_found(format!(
                "file {} not found in bucket '{}'",
                path, bucket
            ))),
        }
    }

    fn check_target(objects: &Objects, path: &StoragePath) -> Result<()> {
        if path.is_root() {
            return Err(Error::invalid_params("cannot write a file at the bucket root"));
        }
        Self::check_parents(objects, path)?;
        let key = Self::key(path);
        if matches!(objects.get(&key), Some(Entry::Marker { .. })) || Self::has_children(objects, &key) {
            return Err(Error::invalid_params(format!("{} is a directory", path)));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn type_name(&self) -> &str {
        "memory"
    }

    fn supports_cross_bucket_operations(&self) -> bool {
        true
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.read().contains_key(bucket))
    }

    async fn create_bucket(&self, config: &BucketConfig) -> Result<Value> {
        let mut buckets = self.write();
        if buckets.contains_key(&config.name) {
            return Err(Error::duplicated(format!(
                "bucket '{}' already exists",
                config.name
            )));
        }
        buckets.insert(config.name.clone(), Objects::new());
        Ok(json!({ "created": config.name }))
    }

    async fn destroy_bucket(&self, bucket: &str) -> Result<Value> {
        let removed = self
            .write()
            .remove(bucket)
            .ok_or_else(|| Error::not_found(format!("bucket '{}' does not exist", bucket)))?;
        Ok(json!({ "destroyed": bucket, "objects": removed.len() }))
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(self.read().keys().cloned().collect())
    }

    async fn put(
        &self,
        bucket: &str,
        path: &StoragePath,
        data: ByteStream,
    ) -> Result<StorageResponse<ObjectInfo>> {
        Self::check_target(Self::bucket(&self.read(), bucket)?, path)?;
        let data = collect_stream(data).await?;

        let mut buckets = self.write();
        let objects = Self::bucket_mut(&mut buckets, bucket)?;
        Self::check_target(objects, path)?;
        let entry = Self::new_object(data);
        let info = Self::info(path.clone(), &entry);
        objects.insert(Self::key(path), entry);
        Ok(StorageResponse::new(
            info.clone(),
            json!({ "key": Self::key(path), "etag": info.etag }),
        ))
    }

    async fn get_stream(&self, bucket: &str, path: &StoragePath) -> Result<ByteStream> {
        let data = Self::source_object(Self::bucket(&self.read(), bucket)?, path, bucket)?;
        Ok(Box::pin(stream::once(async move { Ok(data) })))
    }

    async fn stat(&self, bucket: &str, path: &StoragePath) -> Result<Option<ObjectInfo>> {
        let buckets = self.read();
        Ok(Self::lookup(Self::bucket(&buckets, bucket)?, path))
    }

    async fn list(&self, bucket: &str, path: &StoragePath) -> Result<Vec<ObjectInfo>> {
        let buckets = self.read();
        let objects = Self::bucket(&buckets, bucket)?;
        match Self::lookup(objects, path) {
            Some(info) if info.is_directory() => {}
            _ => {
                return Err(Error::not_found(format!(
                    "directory {} not found in bucket '{}'",
                    path, bucket
                )))
            }
        }

        let prefix = Self::prefix(&Self::key(path));
        let mut children: BTreeMap<String, ObjectInfo> = BTreeMap::new();
        for (key, entry) in objects.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    children
                        .entry(dir.to_string())
                        .or_insert_with(|| ObjectInfo::directory(path.join(dir), None));
                }
                None if !rest.is_empty() => {
                    children.insert(rest.to_string(), Self::info(path.join(rest), entry));
                }
                None => {}
            }
        }
        Ok(children.into_values().collect())
    }

    async fn delete(&self, bucket: &str, path: &StoragePath) -> Result<bool> {
        let mut buckets = self.write();
        let objects = Self::bucket_mut(&mut buckets, bucket)?;
        let key = Self::key(path);
        match objects.get(&key) {
            Some(Entry::Object { .. }) => {
                objects.remove(&key);
                Ok(true)
            }
            Some(Entry::Marker { .. }) => Err(Error::invalid_params(format!(
                "{} is a directory",
                path
            ))),
            None => Ok(false),
        }
    }

    async fn create_dir(&self, bucket: &str, path: &StoragePath) -> Result<ObjectInfo> {
        let mut buckets = self.write();
        let objects = Self::bucket_mut(&mut buckets, bucket)?;
        if let Some(existing) = Self::lookup(objects, path) {
            if existing.is_directory() {
                return Ok(existing);
            }
            return Err(Error::invalid_params(format!("{} is a file", path)));
        }
        Self::check_parents(objects, path)?;

        let entry = Entry::Marker {
            modified: Utc::now(),
        };
        let info = Self::info(path.clone(), &entry);
        objects.insert(Self::key(path), entry);
        Ok(info)
    }

    async fn delete_dir(&self, bucket: &str, path: &StoragePath) -> Result<bool> {
        if path.is_root() {
            return Err(Error::invalid_params("cannot delete the bucket root"));
        }
        let mut buckets = self.write();
        let objects = Self::bucket_mut(&mut buckets, bucket)?;
        let key = Self::key(path);
        if let Some(Entry::Object { .. }) = objects.get(&key) {
            return Err(Error::invalid_params(format!("{} is a file", path)));
        }

        let prefix = Self::prefix(&key);
        let below: Vec<String> = objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let marker = objects.remove(&key).is_some();
        for k in &below {
            objects.remove(k);
        }
        Ok(marker || !below.is_empty())
    }

    async fn copy(
        &self,
        from_bucket: &str,
        from: &StoragePath,
        to_bucket: &str,
        to: &StoragePath,
    ) -> Result<StorageResponse<ObjectInfo>> {
        let mut buckets = self.write();
        let data = Self::source_object(Self::bucket(&buckets, from_bucket)?, from, from_bucket)?;
        let objects = Self::bucket_mut(&mut buckets, to_bucket)?;
        Self::check_target(objects, to)?;

        let entry = Self::new_object(data);
        let info = Self::info(to.clone(), &entry);
        objects.insert(Self::key(to), entry);
        Ok(StorageResponse::new(info, json!({ "strategy": "memory-copy" })))
    }

    async fn rename(
        &self,
        from_bucket: &str,
        from: &StoragePath,
        to_bucket: &str,
        to: &StoragePath,
    ) -> Result<StorageResponse<ObjectInfo>> {
        let mut buckets = self.write();
        let data = Self::source_object(Self::bucket(&buckets, from_bucket)?, from, from_bucket)?;
        Self::check_target(Self::bucket(&buckets, to_bucket)?, to)?;

        Self::bucket_mut(&mut buckets, from_bucket)?.remove(&Self::key(from));
        let objects = Self::bucket_mut(&mut buckets, to_bucket)?;
        let entry = Self::new_object(data);
        let info = Self::info(to.clone(), &entry);
        objects.insert(Self::key(to), entry);
        Ok(StorageResponse::new(info, json!({ "strategy": "memory-rename" })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Contents;

    async fn backend_with(bucket: &str) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .create_bucket(&BucketConfig::new(bucket))
            .await
            .unwrap();
        backend
    }

    async fn put(backend: &MemoryBackend, bucket: &str, path: &str, data: &str) {
        backend
            .put(bucket, &StoragePath::parse(path), Contents::from(data).into_stream())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let backend = backend_with("b").await;
        put(&backend, "b", "/test.txt", "Hello, World!").await;

        let stream = backend
            .get_stream("b", &StoragePath::parse("/test.txt"))
            .await
            .unwrap();
        let data = collect_stream(stream).await.unwrap();
        assert_eq!(&data[..], b"Hello, World!");
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let backend = MemoryBackend::new();
        let err = backend
            .stat("nope", &StoragePath::parse("/a"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_implicit_directories() {
        let backend = backend_with("b").await;
        put(&backend, "b", "/a/b/c.txt", "x").await;

        let info = backend
            .stat("b", &StoragePath::parse("/a/b"))
            .await
            .unwrap()
            .unwrap();
        assert!(info.is_directory());

        let root = backend.list("b", &StoragePath::root()).await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name(), "a");

        assert!(backend.delete("b", &StoragePath::parse("/a/b/c.txt")).await.unwrap());
        assert!(backend
            .stat("b", &StoragePath::parse("/a"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_explicit_directory_survives_empty() {
        let backend = backend_with("b").await;
        let dir = StoragePath::parse("/empty");
        backend.create_dir("b", &dir).await.unwrap();

        assert!(backend.list("b", &dir).await.unwrap().is_empty());
        assert!(backend.stat("b", &dir).await.unwrap().unwrap().is_directory());
        assert!(backend.delete_dir("b", &dir).await.unwrap());
        assert!(backend.stat("b", &dir).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_returns_false() {
        let backend = backend_with("b").await;
        assert!(!backend
            .delete("b", &StoragePath::parse("/nothing.txt"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_put_under_file_rejected() {
        let backend = backend_with("b").await;
        put(&backend, "b", "/file", "x").await;
        let err = backend
            .put(
                "b",
                &StoragePath::parse("/file/child"),
                Contents::from("y").into_stream(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), filestorage_common::ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn test_cross_bucket_rename() {
        let backend = backend_with("one").await;
        backend.create_bucket(&BucketConfig::new("two")).await.unwrap();
        put(&backend, "one", "/old.txt", "data").await;

        backend
            .rename(
                "one",
                &StoragePath::parse("/old.txt"),
                "two",
                &StoragePath::parse("/dir/new.txt"),
            )
            .await
            .unwrap();

        assert!(backend
            .stat("one", &StoragePath::parse("/old.txt"))
            .await
            .unwrap()
            .is_none());
        let moved = backend
            .stat("two", &StoragePath::parse("/dir/new.txt"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.size, Some(4));
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let backend = backend_with("b").await;
        put(&backend, "b", "/original.txt", "abc").await;

        backend
            .copy(
                "b",
                &StoragePath::parse("/original.txt"),
                "b",
                &StoragePath::parse("/copy.txt"),
            )
            .await
            .unwrap();

        let names: Vec<String> = backend
            .list("b", &StoragePath::root())
            .await
            .unwrap()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["copy.txt", "original.txt"]);
    }
}
