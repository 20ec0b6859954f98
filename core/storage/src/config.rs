//! Storage, provider and bucket configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use filestorage_common::{Error, Mode, Result};

use crate::uri;

/// How a bucket's storage-wide alias is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BucketAliasStrategy {
    /// The alias is the bare bucket name.
    #[default]
    #[serde(rename = "NAME")]
    Name,
    /// The alias is `providerName:bucketName`.
    #[serde(rename = "PROVIDER:NAME")]
    ProviderName,
}

impl BucketAliasStrategy {
    /// Resolve the storage-wide alias of `bucket` owned by `provider`.
    pub fn alias(&self, provider: &str, bucket: &str) -> String {
        match self {
            BucketAliasStrategy::Name => bucket.to_string(),
            BucketAliasStrategy::ProviderName => format!("{}:{}", provider, bucket),
        }
    }
}

impl FromStr for BucketAliasStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "NAME" => Ok(BucketAliasStrategy::Name),
            "PROVIDER:NAME" => Ok(BucketAliasStrategy::ProviderName),
            other => Err(Error::invalid_params(format!(
                "unknown bucket alias strategy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BucketAliasStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketAliasStrategy::Name => f.write_str("NAME"),
            BucketAliasStrategy::ProviderName => f.write_str("PROVIDER:NAME"),
        }
    }
}

/// Normalized provider configuration.
///
/// Backend-specific settings live in `options` and are validated by the
/// adapter when it is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Instance name, unique within a storage.
    pub name: String,
    /// Registered provider type used to construct the adapter.
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Permission mode gating operations.
    #[serde(default)]
    pub mode: Mode,
    /// Backend location (filesystem root, endpoint, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Backend-specific options.
    #[serde(default, flatten)]
    pub options: Map<String, Value>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
            mode: Mode::default(),
            root: None,
            options: Map::new(),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// String option lookup.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Either a provider URI or an already structured configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderSource {
    Uri(String),
    Config(ProviderConfig),
}

impl ProviderSource {
    /// Parse the source once into a normalized configuration.
    pub fn resolve(self) -> Result<ProviderConfig> {
        match self {
            ProviderSource::Uri(value) => uri::parse_provider_uri(&value),
            ProviderSource::Config(config) => Ok(config),
        }
    }
}

impl From<&str> for ProviderSource {
    fn from(value: &str) -> Self {
        ProviderSource::Uri(value.to_string())
    }
}

impl From<String> for ProviderSource {
    fn from(value: String) -> Self {
        ProviderSource::Uri(value)
    }
}

impl From<ProviderConfig> for ProviderSource {
    fn from(config: ProviderConfig) -> Self {
        ProviderSource::Config(config)
    }
}

/// Bucket registration settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    /// Backend container name.
    pub name: String,
    /// Create the backing container if it does not exist.
    #[serde(default)]
    pub create: bool,
    /// Overrides the provider mode for this bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    /// Backend-specific options.
    #[serde(default, flatten)]
    pub options: Map<String, Value>,
}

impl BucketConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Ask the provider to create the backing container when missing.
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// A provider declared in a storage configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(flatten)]
    pub source: ProviderSource,
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
}

fn default_logger() -> bool {
    true
}

/// Top-level storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Emit `tracing` events from the storage layers.
    #[serde(default = "default_logger")]
    pub logger: bool,
    #[serde(default)]
    pub bucket_alias_strategy: BucketAliasStrategy,
    /// Providers (and their buckets) registered by `FileStorage::from_config`.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            logger: true,
            bucket_alias_strategy: BucketAliasStrategy::default(),
            providers: Vec::new(),
        }
    }
}

impl StorageConfig {
    pub fn with_strategy(mut self, strategy: BucketAliasStrategy) -> Self {
        self.bucket_alias_strategy = strategy;
        self
    }

    pub fn with_logger(mut self, logger: bool) -> Self {
        self.logger = logger;
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::invalid_params(format!("invalid storage configuration: {}", e)))
    }

    /// Load a JSON configuration file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_strategies() {
        assert_eq!(BucketAliasStrategy::Name.alias("p1", "b"), "b");
        assert_eq!(BucketAliasStrategy::ProviderName.alias("p1", "b"), "p1:b");
        assert_eq!(
            "provider:name".parse::<BucketAliasStrategy>().unwrap(),
            BucketAliasStrategy::ProviderName
        );
        assert!("BUCKET".parse::<BucketAliasStrategy>().is_err());
    }

    #[test]
    fn test_uri_source_resolves() {
        let config = ProviderSource::from("memory://?name=cache&mode=0500")
            .resolve()
            .unwrap();
        assert_eq!(config.name, "cache");
        assert!(config.mode.can_read());
        assert!(!config.mode.can_write());
    }

    #[test]
    fn test_storage_config_from_json() {
        let config = StorageConfig::from_json(
            r#"{
                "bucketAliasStrategy": "PROVIDER:NAME",
                "providers": [
                    { "uri": "memory://?name=mem", "buckets": [{ "name": "b", "create": true }] },
                    { "config": { "name": "disk", "type": "local", "root": "/tmp/x", "mode": "0755", "fsync": true } }
                ]
            }"#,
        )
        .unwrap();

        assert!(config.logger);
        assert_eq!(config.bucket_alias_strategy, BucketAliasStrategy::ProviderName);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].buckets[0], BucketConfig::new("b").with_create(true));

        match &config.providers[1].source {
            ProviderSource::Config(provider) => {
                assert_eq!(provider.provider_type, "local");
                assert_eq!(provider.mode.bits(), 0o755);
                assert_eq!(provider.options.get("fsync"), Some(&Value::Bool(true)));
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_is_invalid_params() {
        let err = StorageConfig::from_json("{ nope").unwrap_err();
        assert_eq!(err.kind(), filestorage_common::ErrorKind::InvalidParams);
    }
}
