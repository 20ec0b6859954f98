//! Bucket lifecycle notifications.

use serde::Serialize;
use tokio::sync::broadcast;

use filestorage_common::{Error, ErrorKind};

/// Capacity of the notification channel; slow subscribers lag past it.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observable side effects of bucket registration and removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageEvent {
    BeforeAddBucket {
        provider: String,
        bucket: String,
    },
    BucketAdded {
        provider: String,
        bucket: String,
        alias: String,
    },
    BucketAddError {
        provider: String,
        bucket: String,
        kind: ErrorKind,
        message: String,
    },
    BeforeDestroyBucket {
        provider: String,
        bucket: String,
    },
    BucketDestroyed {
        provider: String,
        bucket: String,
        alias: String,
    },
    BucketDestroyError {
        provider: String,
        bucket: String,
        kind: ErrorKind,
        message: String,
    },
}

impl StorageEvent {
    pub(crate) fn add_error(provider: &str, bucket: &str, error: &Error) -> Self {
        StorageEvent::BucketAddError {
            provider: provider.to_string(),
            bucket: bucket.to_string(),
            kind: error.kind(),
            message: error.message().to_string(),
        }
    }

    pub(crate) fn destroy_error(provider: &str, bucket: &str, error: &Error) -> Self {
        StorageEvent::BucketDestroyError {
            provider: provider.to_string(),
            bucket: bucket.to_string(),
            kind: error.kind(),
            message: error.message().to_string(),
        }
    }

    /// Provider that emitted the event.
    pub fn provider(&self) -> &str {
        match self {
            StorageEvent::BeforeAddBucket { provider, .. }
            | StorageEvent::BucketAdded { provider, .. }
            | StorageEvent::BucketAddError { provider, .. }
            | StorageEvent::BeforeDestroyBucket { provider, .. }
            | StorageEvent::BucketDestroyed { provider, .. }
            | StorageEvent::BucketDestroyError { provider, .. } => provider,
        }
    }
}

/// Create a notification channel sender.
pub fn channel() -> broadcast::Sender<StorageEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Send without caring whether anybody listens.
pub(crate) fn emit(sender: &broadcast::Sender<StorageEvent>, event: StorageEvent) {
    let _ = sender.send(event);
}
