//! Queue backends for qmill.
//!
//! A queue is a namespaced, blocking, multi-producer/multi-consumer list.
//! Two backends are provided:
//!
//! - [`RedisListQueue`]: durable and shared across processes, built on Redis
//!   lists. This is what production deployments run on.
//! - [`InMemoryQueue`]: process-local, used for tests and single-process
//!   development.
//!
//! All keys a backend touches live under its namespace, rendered as
//! `namespace:key`. Distinct namespaces never observe each other's entries.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use memory::{InMemoryQueue, MemoryStore};
pub use redis::RedisListQueue;

/// Separator between namespace and logical key.
pub const NAMESPACE_DELIMITER: char = ':';

/// A namespaced queue key, rendered as `namespace:key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    namespace: String,
    key: String,
}

impl QueueKey {
    /// Pair a namespace with a logical key.
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// The namespace part.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The logical key part.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, NAMESPACE_DELIMITER, self.key)
    }
}

/// Trait that all queue backends must implement.
///
/// Logical keys passed to these methods are rendered under the backend's
/// namespace before hitting the store.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// The namespace this handle operates under.
    fn namespace(&self) -> &str;

    /// Append a payload to the tail of a list (normal FIFO enqueue).
    async fn push_tail(&self, key: &str, payload: &[u8]) -> Result<()>;

    /// Append a payload to the head of a list, ahead of any backlog
    /// (priority enqueue, e.g. a forced stop).
    async fn push_head(&self, key: &str, payload: &[u8]) -> Result<()>;

    /// Remove and return the head element.
    ///
    /// With `block == true` the call suspends until an element arrives or
    /// `timeout` elapses (`None` waits without bound) and returns `None` on
    /// expiry. With `block == false` it returns `None` immediately when the
    /// list is empty. Removal is atomic: no two concurrent poppers observe
    /// the same element.
    async fn pop(&self, key: &str, block: bool, timeout: Option<Duration>)
    -> Result<Option<Vec<u8>>>;

    /// Approximate number of elements in a list. Diagnostics only; do not
    /// drive control flow off this under concurrent pushers and poppers.
    async fn len(&self, key: &str) -> Result<u64>;

    /// Whether a list is (approximately) empty.
    async fn is_empty(&self, key: &str) -> Result<bool> {
        Ok(self.len(key).await? == 0)
    }

    /// Set an auxiliary scalar value. Unrelated to list semantics.
    async fn set_value(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read an auxiliary scalar value.
    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key, list or scalar.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key under this handle's namespace. Returns the number
    /// of keys removed. Other namespaces are untouched.
    async fn clear_namespace(&self) -> Result<u64>;
}
