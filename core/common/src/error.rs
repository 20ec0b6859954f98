//! Error taxonomy shared by every storage layer.
//!
//! Errors are flat and tagged: the [`ErrorKind`] says what went wrong, the
//! message says where, and the optional detail carries structured context
//! (for example the entries a bulk operation completed before failing).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Boxed source error carried by [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Anything that could not be classified.
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
    /// A backend call failed.
    #[serde(rename = "NATIVE_ERROR")]
    Native,
    /// An element with the same key is already registered.
    DuplicatedElement,
    /// The addressed element does not exist.
    NotFound,
    /// Caller supplied parameters were rejected before any backend call.
    InvalidParams,
    /// The provider's permission mode forbids the operation.
    #[serde(rename = "PERMISSION_ERROR")]
    Permission,
}

impl ErrorKind {
    /// Taxonomy code, e.g. `NATIVE_ERROR`.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "UNKNOWN_ERROR",
            ErrorKind::Native => "NATIVE_ERROR",
            ErrorKind::DuplicatedElement => "DUPLICATED_ELEMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidParams => "INVALID_PARAMS",
            ErrorKind::Permission => "PERMISSION_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Storage error.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    detail: Option<Value>,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            source: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn native(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Native, message)
    }

    pub fn duplicated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicatedElement, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    /// Wrap a backend error as `NATIVE_ERROR`, keeping it as the source.
    pub fn wrap_native<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let detail = json!({ "native": source.to_string() });
        Self {
            kind: ErrorKind::Native,
            message: message.into(),
            detail: Some(detail),
            source: Some(Box::new(source)),
        }
    }

    /// Attach a structured detail payload.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Attach a source error.
    pub fn with_source(mut self, source: BoxError) -> Self {
        self.source = Some(source);
        self
    }

    /// Build the error raised when a bulk operation halts on `failed`.
    ///
    /// `completed` holds descriptors of the entries processed before the failure.
    pub fn partial(failed: &str, cause: Error, completed: Vec<Value>) -> Self {
        let detail = json!({
            "failed": failed,
            "cause": cause.to_string(),
            "causeKind": cause.kind.code(),
            "completed": completed,
        });
        Self {
            kind: ErrorKind::Native,
            message: format!(
                "bulk operation halted at {} after {} completed entries",
                failed,
                completed_len(&detail)
            ),
            detail: Some(detail),
            source: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_duplicated(&self) -> bool {
        self.kind == ErrorKind::DuplicatedElement
    }

    /// Paths a halted bulk operation finished before failing.
    pub fn completed_paths(&self) -> Vec<String> {
        self.detail
            .as_ref()
            .and_then(|d| d.get("completed"))
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("path").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn completed_len(detail: &Value) -> usize {
    detail
        .get("completed")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            std::io::ErrorKind::AlreadyExists => ErrorKind::DuplicatedElement,
            _ => ErrorKind::Native,
        };
        Self {
            kind,
            message: err.to_string(),
            detail: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Result type alias using the storage Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_taxonomy_code() {
        let err = Error::duplicated("bucket 'photos' already registered");
        assert_eq!(
            err.to_string(),
            "DUPLICATED_ELEMENT: bucket 'photos' already registered"
        );
        assert!(err.is_duplicated());
    }

    #[test]
    fn test_io_error_mapping() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::from(std::io::Error::other("disk on fire"));
        assert_eq!(err.kind(), ErrorKind::Native);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_partial_carries_completed_entries() {
        let completed = vec![json!({ "path": "/a.txt" }), json!({ "path": "/b.txt" })];
        let err = Error::partial("/c.txt", Error::native("socket closed"), completed);

        assert_eq!(err.kind(), ErrorKind::Native);
        assert_eq!(err.completed_paths(), vec!["/a.txt", "/b.txt"]);
        assert_eq!(
            err.detail().and_then(|d| d.get("failed")).and_then(Value::as_str),
            Some("/c.txt")
        );
    }

    #[test]
    fn test_kind_serializes_as_code() {
        let json = serde_json::to_string(&ErrorKind::Permission).unwrap();
        assert_eq!(json, "\"PERMISSION_ERROR\"");
        let json = serde_json::to_string(&ErrorKind::InvalidParams).unwrap();
        assert_eq!(json, "\"INVALID_PARAMS\"");
    }
}
