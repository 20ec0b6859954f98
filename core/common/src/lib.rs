//! Common types shared across the storage crates.
//!
//! This crate holds the error taxonomy and the path, permission and
//! response types every other layer builds on.

pub mod error;
pub mod types;

pub use error::{BoxError, Error, ErrorKind, Result};
pub use types::{normalize_path, Mode, StoragePath, StorageResponse};
