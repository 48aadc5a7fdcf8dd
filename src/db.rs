//! Bounded backend connection pool.
//!
//! Workers never construct raw database connections; they acquire from a
//! [`BackendPool`] and hold the guard for exactly one task. Release is the
//! guard going out of scope, so a connection returns to the pool on every
//! exit path, panics and processing failures included.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, Postgres};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// A bounded pool of reusable backend connections.
///
/// `acquire` suspends when every connection is checked out, until another
/// holder drops its guard.
#[async_trait]
pub trait BackendPool: Send + Sync + 'static {
    /// Guard type representing one checked-out connection; dropping it
    /// returns the connection to the pool.
    type Connection: Send + 'static;

    /// Check out a connection, waiting for capacity if necessary.
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Close every connection. Called once at process teardown.
    async fn close_all(&self);

    /// Upper bound on concurrently checked-out connections.
    fn capacity(&self) -> u32;

    /// Connections currently sitting idle in the pool. Diagnostics only.
    fn num_idle(&self) -> usize;
}

/// Postgres-backed [`BackendPool`] over `sqlx`.
pub struct PgBackendPool {
    pool: PgPool,
    capacity: u32,
}

impl PgBackendPool {
    /// Build the pool and establish an initial connection, so an unreachable
    /// database is reported at startup rather than at the first task.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.dbname);

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        debug!(
            host = %config.host,
            dbname = %config.dbname,
            max_connections = config.max_connections,
            "connected to database"
        );

        Ok(Self {
            pool,
            capacity: config.max_connections,
        })
    }

    /// The underlying `sqlx` pool.
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BackendPool for PgBackendPool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<Self::Connection> {
        Ok(self.pool.acquire().await?)
    }

    async fn close_all(&self) {
        self.pool.close().await;
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }
}
