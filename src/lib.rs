//! # qmill
//!
//! A fixed-size pool of asynchronous workers draining a shared, namespaced
//! blocking queue, processing each task against a bounded Postgres
//! connection pool, and shutting down via a one-sentinel-per-worker
//! protocol.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use qmill::config::Config;
//! use qmill::core::WorkerPool;
//! use qmill::db::{BackendPool, PgBackendPool};
//! use qmill::processor::EchoProcessor;
//! use qmill::queue::{QueueBackend, RedisListQueue};
//!
//! #[tokio::main]
//! async fn main() -> qmill::Result<()> {
//!     let config = Config::from_path("qmill.yaml")?;
//!
//!     let queue: Arc<dyn QueueBackend> =
//!         Arc::new(RedisListQueue::connect(&config.redis).await?);
//!     let db = Arc::new(PgBackendPool::connect(&config.database).await?);
//!
//!     let pool = WorkerPool::new(
//!         queue,
//!         Arc::clone(&db),
//!         Arc::new(EchoProcessor),
//!         4,
//!         config.workers.clone(),
//!     );
//!     pool.start_pool().await?;
//!
//!     tokio::signal::ctrl_c().await.expect("signal handler");
//!     pool.close_pool().await?;
//!     db.close_all().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod message;
pub mod processor;
pub mod queue;

pub use crate::config::{Config, MAX_WORKERS};
pub use crate::core::{Worker, WorkerId, WorkerPool};
pub use crate::db::{BackendPool, PgBackendPool};
pub use crate::error::{Error, Result};
pub use crate::message::{Message, STOP_SENTINEL, TaskSpec};
pub use crate::processor::{EchoProcessor, TaskProcessor};
pub use crate::queue::{InMemoryQueue, QueueBackend, QueueKey, RedisListQueue};
