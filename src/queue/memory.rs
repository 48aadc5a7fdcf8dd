//! In-memory queue implementation for qmill.
//!
//! Backed by a [`MemoryStore`] that can be shared between handles, so
//! several namespaced queues can sit on one store the way several
//! [`RedisListQueue`](super::RedisListQueue) handles sit on one server.
//! Used for tests and single-process development; nothing survives a
//! restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{NAMESPACE_DELIMITER, QueueBackend};
use crate::error::Result;

#[derive(Default)]
struct ListSlot {
    items: VecDeque<Vec<u8>>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct StoreInner {
    lists: Mutex<HashMap<String, ListSlot>>,
    values: Mutex<HashMap<String, Vec<u8>>>,
}

/// Shared storage behind one or more [`InMemoryQueue`] handles.
///
/// Cloning is cheap and clones observe the same data. Locks are held only
/// for map access, never across an await point.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, full_key: &str, payload: &[u8], head: bool) {
        let mut lists = self.inner.lists.lock().unwrap();
        let slot = lists.entry(full_key.to_string()).or_default();
        if head {
            slot.items.push_front(payload.to_vec());
        } else {
            slot.items.push_back(payload.to_vec());
        }
        slot.notify.notify_one();
    }

    fn pop_front(&self, full_key: &str) -> Option<Vec<u8>> {
        let mut lists = self.inner.lists.lock().unwrap();
        lists.get_mut(full_key)?.items.pop_front()
    }

    /// Pop the head element or hand back the slot's wakeup handle, atomically
    /// with respect to concurrent pushers.
    fn pop_front_or_notify(&self, full_key: &str) -> std::result::Result<Vec<u8>, Arc<Notify>> {
        let mut lists = self.inner.lists.lock().unwrap();
        let slot = lists.entry(full_key.to_string()).or_default();
        match slot.items.pop_front() {
            Some(item) => Ok(item),
            None => Err(Arc::clone(&slot.notify)),
        }
    }

    fn len(&self, full_key: &str) -> u64 {
        let lists = self.inner.lists.lock().unwrap();
        lists.get(full_key).map_or(0, |slot| slot.items.len() as u64)
    }
}

/// In-memory queue backend implementation.
pub struct InMemoryQueue {
    store: MemoryStore,
    namespace: String,
}

impl InMemoryQueue {
    /// Create a queue with its own private store.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_store(MemoryStore::new(), namespace)
    }

    /// Create a namespaced handle onto a shared store.
    pub fn with_store(store: MemoryStore, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn render(&self, key: &str) -> String {
        format!("{}{}{}", self.namespace, NAMESPACE_DELIMITER, key)
    }

    fn namespace_prefix(&self) -> String {
        format!("{}{}", self.namespace, NAMESPACE_DELIMITER)
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn push_tail(&self, key: &str, payload: &[u8]) -> Result<()> {
        self.store.push(&self.render(key), payload, false);
        Ok(())
    }

    async fn push_head(&self, key: &str, payload: &[u8]) -> Result<()> {
        self.store.push(&self.render(key), payload, true);
        Ok(())
    }

    async fn pop(
        &self,
        key: &str,
        block: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>> {
        let full_key = self.render(key);

        if !block {
            return Ok(self.store.pop_front(&full_key));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notify = match self.store.pop_front_or_notify(&full_key) {
                Ok(item) => return Ok(Some(item)),
                Err(notify) => notify,
            };

            // A push between the check above and this await leaves a stored
            // permit in the Notify, so the wakeup cannot be lost. A wakeup
            // is not a claim on an element, though: another popper may get
            // there first, hence the re-check loop.
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notify.notified())
                        .await
                        .is_err()
                    {
                        return Ok(None);
                    }
                }
                None => notify.notified().await,
            }
        }
    }

    async fn len(&self, key: &str) -> Result<u64> {
        Ok(self.store.len(&self.render(key)))
    }

    async fn set_value(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut values = self.store.inner.values.lock().unwrap();
        values.insert(self.render(key), value.to_vec());
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let values = self.store.inner.values.lock().unwrap();
        Ok(values.get(&self.render(key)).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.render(key);
        self.store.inner.lists.lock().unwrap().remove(&full_key);
        self.store.inner.values.lock().unwrap().remove(&full_key);
        Ok(())
    }

    async fn clear_namespace(&self) -> Result<u64> {
        let prefix = self.namespace_prefix();
        let mut removed = 0u64;

        {
            let mut lists = self.store.inner.lists.lock().unwrap();
            let keys: Vec<String> = lists
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in keys {
                lists.remove(&key);
                removed += 1;
            }
        }
        {
            let mut values = self.store.inner.values.lock().unwrap();
            let keys: Vec<String> = values
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in keys {
                values.remove(&key);
                removed += 1;
            }
        }

        Ok(removed)
    }
}
