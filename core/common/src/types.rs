//! Common types used throughout the storage layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A normalized, backend-agnostic path inside a bucket.
///
/// Normalization lower-cases the input, turns backslashes into forward
/// slashes and collapses repeated separators. `.` and `..` are kept as plain
/// components; resolving them is left to filesystem adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StoragePath {
    components: Vec<String>,
}

impl StoragePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse and normalize a path string.
    ///
    /// Never fails: empty or whitespace-only input is the root.
    pub fn parse(path: &str) -> Self {
        if path.trim().is_empty() {
            return Self::root();
        }

        let lowered = path.to_lowercase().replace('\\', "/");
        let components = lowered
            .split('/')
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        Self { components }
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Append a relative path (which may contain several segments).
    pub fn join(&self, child: &str) -> Self {
        let mut components = self.components.clone();
        components.extend(Self::parse(child).components);
        Self { components }
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Whether `base` is this path or one of its ancestors.
    pub fn starts_with(&self, base: &StoragePath) -> bool {
        self.components.starts_with(&base.components)
    }

    /// Suffix of this path below `base`, without a leading slash.
    ///
    /// Returns `None` when `base` is not an ancestor (or self).
    pub fn relative_to(&self, base: &StoragePath) -> Option<String> {
        if !self.starts_with(base) {
            return None;
        }
        Some(self.components[base.components.len()..].join("/"))
    }

    /// Replace the `from` prefix of this path with `to`, keeping the suffix.
    pub fn rebase(&self, from: &StoragePath, to: &StoragePath) -> Option<Self> {
        let suffix = self.relative_to(from)?;
        Some(to.join(&suffix))
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl Default for StoragePath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

impl From<&str> for StoragePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for StoragePath {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl From<&String> for StoragePath {
    fn from(path: &String) -> Self {
        Self::parse(path)
    }
}

impl From<&StoragePath> for StoragePath {
    fn from(path: &StoragePath) -> Self {
        path.clone()
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.to_string_path()
    }
}

/// Normalize a path string: lower-cased, `/`-separated, always absolute.
pub fn normalize_path(path: &str) -> String {
    StoragePath::parse(path).to_string_path()
}

/// POSIX-style permission mode attached to a provider.
///
/// Only the owner nibble is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mode(u32);

impl Mode {
    const OWNER_READ: u32 = 0o400;
    const OWNER_WRITE: u32 = 0o200;
    const OWNER_EXECUTE: u32 = 0o100;

    /// Everything allowed (`0777`).
    pub const ALL: Mode = Mode(0o777);

    /// Create a mode from raw bits.
    pub fn new(bits: u32) -> Result<Self> {
        if bits > 0o7777 {
            return Err(Error::invalid_params(format!(
                "mode {:o} is out of range",
                bits
            )));
        }
        Ok(Self(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn can_read(&self) -> bool {
        self.0 & Self::OWNER_READ != 0
    }

    pub fn can_write(&self) -> bool {
        self.0 & Self::OWNER_WRITE != 0
    }

    pub fn can_execute(&self) -> bool {
        self.0 & Self::OWNER_EXECUTE != 0
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromStr for Mode {
    type Err = Error;

    /// Parse an octal string such as `0755`, `755` or `0o755`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0o")
            .or_else(|| trimmed.strip_prefix("0O"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(Error::invalid_params("mode cannot be empty"));
        }
        let bits = u32::from_str_radix(digits, 8)
            .map_err(|_| Error::invalid_params(format!("invalid octal mode '{}'", s)))?;
        Self::new(bits)
    }
}

impl TryFrom<String> for Mode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        format!("{:04o}", mode.0)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

/// Result envelope pairing a normalized value with the raw backend response.
///
/// The native part is for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResponse<T, N = serde_json::Value> {
    pub result: T,
    pub native: N,
}

impl<T, N> StorageResponse<T, N> {
    pub fn new(result: T, native: N) -> Self {
        Self { result, native }
    }

    /// Transform the result, keeping the native response.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StorageResponse<U, N> {
        StorageResponse {
            result: f(self.result),
            native: self.native,
        }
    }

    pub fn into_result(self) -> T {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_storage_path_root() {
        let path = StoragePath::root();
        assert!(path.is_root());
        assert_eq!(path.to_string_path(), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("   "), "/");
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_path("Test/1/3A"), "/test/1/3a");
        assert_eq!(normalize_path("\\Foo\\\\Bar//baz/"), "/foo/bar/baz");
        assert_eq!(normalize_path("a/./b/../c"), "/a/./b/../c");
        assert_eq!(normalize_path("Test/1/3A"), normalize_path("test/1/3a"));
    }

    #[test]
    fn test_storage_path_join() {
        let path = StoragePath::root().join("foo").join("Bar/baz");
        assert_eq!(path.to_string_path(), "/foo/bar/baz");
    }

    #[test]
    fn test_storage_path_parent_and_name() {
        let path = StoragePath::parse("/foo/bar");
        assert_eq!(path.parent().unwrap().to_string_path(), "/foo");
        assert_eq!(path.name(), Some("bar"));
        assert!(StoragePath::root().parent().is_none());
    }

    #[test]
    fn test_relative_and_rebase() {
        let base = StoragePath::parse("/multiple");
        let file = StoragePath::parse("/multiple/1/file 1 1.txt");
        assert_eq!(file.relative_to(&base).as_deref(), Some("1/file 1 1.txt"));
        assert_eq!(
            file.rebase(&base, &StoragePath::parse("/copy"))
                .unwrap()
                .to_string_path(),
            "/copy/1/file 1 1.txt"
        );
        assert!(StoragePath::parse("/other").relative_to(&base).is_none());
        assert!(!StoragePath::parse("/multiplex").starts_with(&base));
    }

    #[test]
    fn test_mode_parsing() {
        let mode: Mode = "0755".parse().unwrap();
        assert!(mode.can_read() && mode.can_write() && mode.can_execute());

        let mode: Mode = "0o444".parse().unwrap();
        assert!(mode.can_read());
        assert!(!mode.can_write());
        assert!(!mode.can_execute());

        let mode: Mode = "0044".parse().unwrap();
        assert!(!mode.can_read());

        assert!("0999".parse::<Mode>().is_err());
        assert!("".parse::<Mode>().is_err());
        assert_eq!(Mode::default().to_string(), "0777");
    }

    #[test]
    fn test_response_map() {
        let response = StorageResponse::new(2, serde_json::json!({ "etag": "x" }));
        let mapped = response.map(|n| n * 2);
        assert_eq!(mapped.result, 4);
        assert_eq!(mapped.native["etag"], "x");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-zA-Z0-9 ./\\\\_-]{0,40}") {
            let once = normalize_path(&path);
            prop_assert_eq!(normalize_path(&once), once.clone());
            prop_assert!(once.starts_with('/'));
        }

        #[test]
        fn normalize_ignores_case(path in "[a-zA-Z0-9/]{0,40}") {
            prop_assert_eq!(normalize_path(&path), normalize_path(&path.to_uppercase()));
        }
    }
}
