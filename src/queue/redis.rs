//! Redis queue implementation for qmill.
//!
//! Lists live under `namespace:key`; `push_tail`/`push_head`/`pop` map onto
//! RPUSH/LPUSH/BLPOP, so any Redis client can act as a producer. Multiple
//! processes sharing a server see one queue, and a popped element is removed
//! atomically: Redis guarantees no two BLPOP callers receive the same
//! element.
//!
//! BLPOP parks the server-side connection until an element arrives, so
//! blocking pops never run on the shared multiplexed connection: each one
//! checks a dedicated connection out of a small freelist. Pushes issued
//! while every consumer sits in BLPOP (stop sentinels in particular) go out
//! on the shared connection and are never queued behind a blocked pop.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tokio::time::timeout;
use tracing::debug;

use super::{NAMESPACE_DELIMITER, QueueBackend};
use crate::config::RedisConfig;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redis list queue backend.
pub struct RedisListQueue {
    client: Client,
    /// Shared multiplexed connection for non-blocking commands
    conn: ConnectionManager,
    /// Dedicated connections reserved for blocking pops; grows to the
    /// number of concurrent consumers and stabilizes there
    blocking: Mutex<Vec<ConnectionManager>>,
    namespace: String,
}

impl RedisListQueue {
    /// Connect to Redis and verify the server responds.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = config.url();
        let client = Client::open(url.as_str())
            .map_err(|e| Error::queue(format!("invalid redis url {url}"), e))?;

        let mut conn = timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|e| Error::queue(format!("timed out connecting to {url}"), e))?
            .map_err(|e| Error::queue(format!("cannot connect to {url}"), e))?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(Error::Queue {
                message: format!("unexpected PING reply from {url}: {pong}"),
                source: None,
            });
        }

        debug!(url = %url, namespace = %config.namespace, "connected to redis");
        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
            namespace: config.namespace.clone(),
        })
    }

    fn render(&self, key: &str) -> String {
        format!("{}{}{}", self.namespace, NAMESPACE_DELIMITER, key)
    }

    async fn checkout_blocking(&self) -> Result<ConnectionManager> {
        if let Some(conn) = self.blocking.lock().unwrap().pop() {
            return Ok(conn);
        }
        Ok(self.client.get_connection_manager().await?)
    }

    fn checkin_blocking(&self, conn: ConnectionManager) {
        self.blocking.lock().unwrap().push(conn);
    }
}

#[async_trait]
impl QueueBackend for RedisListQueue {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn push_tail(&self, key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(self.render(key), payload).await?;
        Ok(())
    }

    async fn push_head(&self, key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(self.render(key), payload).await?;
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
            let mut conn = self.conn.clone();
            let reply: Option<Vec<u8>> = conn.lpop(&full_key, None).await?;
            return Ok(reply);
        }

        // BLPOP timeout 0 blocks without bound.
        let secs = timeout.map_or(0.0, |t| t.as_secs_f64());
        let mut conn = self.checkout_blocking().await?;
        match conn
            .blpop::<_, Option<(String, Vec<u8>)>>(&full_key, secs)
            .await
        {
            Ok(reply) => {
                self.checkin_blocking(conn);
                Ok(reply.map(|(_, payload)| payload))
            }
            // The connection state is unknown after a failed blocking call;
            // drop it instead of returning it to the freelist.
            Err(e) => Err(e.into()),
        }
    }

    async fn len(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(self.render(key)).await?;
        Ok(len)
    }

    async fn set_value(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.render(key), value).await?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.render(key)).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.render(key)).await?;
        Ok(())
    }

    async fn clear_namespace(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}{}*", self.namespace, NAMESPACE_DELIMITER);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;

        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }
}
