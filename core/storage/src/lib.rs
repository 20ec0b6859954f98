//! Backend-agnostic file storage.
//!
//! This crate provides one API over heterogeneous file and object backends.
//! Callers register backend types, add providers (configured backend
//! instances), register buckets on them and then address files through
//! storage URIs, including copies and moves between providers.
//!
//! # Design Principles
//! - Adapter isolation: a backend only implements [`Backend`]; naming,
//!   permissions, readiness and bulk logic live above it
//! - Async operations: all I/O operations are async
//! - Streaming support: cross-provider transfers pipe streams
//! - Unified error semantics: every failure carries an [`ErrorKind`]

pub mod backend;
pub mod bucket;
pub(crate) mod bulk;
pub mod config;
pub mod directory;
pub mod events;
pub mod file;
pub mod local;
pub mod memory;
pub mod pattern;
pub mod provider;
pub mod registry;
pub mod storage;
pub mod transfer;
pub mod uri;

pub use backend::{collect_stream, Backend, ByteStream, Contents, EntryKind, ObjectInfo};
pub use bucket::Bucket;
pub use config::{
    BucketAliasStrategy, BucketConfig, ProviderConfig, ProviderEntry, ProviderSource,
    StorageConfig,
};
pub use directory::Directory;
pub use events::StorageEvent;
pub use file::File;
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use pattern::{EntryFilter, GlobPattern, ListOptions, Listing};
pub use provider::{CopyOptions, DeleteOptions, Provider, ProviderContext, ProviderState};
pub use registry::Registry;
pub use storage::{FileStorage, ProviderFactory};

pub use filestorage_common::{Error, ErrorKind, Mode, Result, StoragePath, StorageResponse};
