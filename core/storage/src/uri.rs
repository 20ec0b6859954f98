//! Storage URI resolution.
//!
//! Two URI families are understood:
//!
//! - provider URIs, `type://[root]?key=value&...`, turned into a
//!   [`ProviderConfig`](crate::config::ProviderConfig);
//! - file URIs, either qualified `scheme://provider:bucket/path` or short
//!   `alias://path` where the scheme is a bucket alias.

use percent_encoding::percent_decode_str;
use url::form_urlencoded;

use filestorage_common::{Error, Mode, Result, StoragePath};

use crate::config::ProviderConfig;

/// Raw pieces of a `scheme://authority/path?query` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriParts {
    pub scheme: String,
    pub authority: String,
    /// Path after the authority, percent-decoded, including the leading `/`.
    pub path: String,
    /// Query pairs in order of appearance.
    pub query: Vec<(String, String)>,
}

impl UriParts {
    /// Last value given for `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Where a file URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    /// `scheme://provider:bucket/path`
    Qualified {
        provider: String,
        bucket: String,
        path: StoragePath,
    },
    /// `alias://path`
    Aliased { alias: String, path: StoragePath },
}

impl FileLocation {
    pub fn path(&self) -> &StoragePath {
        match self {
            FileLocation::Qualified { path, .. } => path,
            FileLocation::Aliased { path, .. } => path,
        }
    }
}

/// Whether `value` looks like a URI rather than a plain path or alias.
pub fn is_uri(value: &str) -> bool {
    value.contains("://")
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Split a URI into scheme, authority, path and query.
pub fn split_uri(uri: &str) -> Result<UriParts> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| Error::invalid_params(format!("'{}' is not a storage URI", uri)))?;
    if scheme.trim().is_empty() {
        return Err(Error::invalid_params(format!("'{}' has no scheme", uri)));
    }

    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, query),
        None => (rest, ""),
    };
    let (authority, path) = match location.find('/') {
        Some(idx) => (&location[..idx], &location[idx..]),
        None => (location, ""),
    };

    let query = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    Ok(UriParts {
        scheme: scheme.trim().to_string(),
        authority: decode(authority),
        path: decode(path),
        query,
    })
}

/// Build a provider configuration from `type://[root]?params`.
///
/// `name` and `mode` are generic keys; `root` may be given either as the
/// URI location or as a parameter. Every other key is passed through to the
/// adapter as a string option. Repeated keys resolve last-wins.
pub fn parse_provider_uri(uri: &str) -> Result<ProviderConfig> {
    let parts = split_uri(uri)?;
    let provider_type = parts.scheme.to_lowercase();

    let mut config = ProviderConfig::new(provider_type.clone(), provider_type);
    let location = format!("{}{}", parts.authority, parts.path);
    if !location.is_empty() {
        config.root = Some(location);
    }

    for (key, value) in &parts.query {
        match key.to_lowercase().as_str() {
            "name" => config.name = value.clone(),
            "mode" => config.mode = value.parse::<Mode>()?,
            "root" => config.root = Some(value.clone()),
            "type" => {
                return Err(Error::invalid_params(
                    "the provider type comes from the URI scheme",
                ))
            }
            _ => {
                config
                    .options
                    .insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }
    }

    Ok(config)
}

/// Resolve a file URI to its location.
pub fn parse_file_uri(uri: &str) -> Result<FileLocation> {
    let parts = split_uri(uri)?;

    if let Some((provider, bucket)) = parts.authority.split_once(':') {
        if provider.is_empty() || bucket.is_empty() {
            return Err(Error::invalid_params(format!(
                "'{}' must name both provider and bucket",
                uri
            )));
        }
        return Ok(FileLocation::Qualified {
            provider: provider.to_string(),
            bucket: bucket.to_string(),
            path: StoragePath::parse(&parts.path),
        });
    }

    Ok(FileLocation::Aliased {
        alias: parts.scheme,
        path: StoragePath::parse(&format!("{}{}", parts.authority, parts.path)),
    })
}
