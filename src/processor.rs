//! The task-processing seam.
//!
//! What a task *does* is the embedding application's business: it implements
//! [`TaskProcessor`] and hands it to the pool. The core guarantees the
//! contract around the call: one exclusively-owned connection for its
//! duration, release afterward on every exit path, and a failure routed to
//! the log and the dead-letter key instead of crashing the worker.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::Postgres;
use tracing::info;

use crate::error::Result;
use crate::message::TaskSpec;

/// Processes one task against one checked-out backend connection.
#[async_trait]
pub trait TaskProcessor<C: Send>: Send + Sync + 'static {
    /// Process a single task. An `Err` is reported and dead-lettered by the
    /// calling worker; it does not terminate the worker.
    async fn process(&self, task: &TaskSpec, conn: &mut C) -> Result<()>;
}

/// Placeholder processor used by the qmill binary.
///
/// Verifies the checked-out connection with a round-trip and logs the task
/// envelope. Deployments replace this with their own [`TaskProcessor`].
pub struct EchoProcessor;

#[async_trait]
impl TaskProcessor<PoolConnection<Postgres>> for EchoProcessor {
    async fn process(&self, task: &TaskSpec, conn: &mut PoolConnection<Postgres>) -> Result<()> {
        sqlx::query("SELECT 1").execute(&mut **conn).await?;
        info!(task = %task.id, kind = %task.kind, "task acknowledged");
        Ok(())
    }
}
