//! Worker pool supervision.
//!
//! The pool owns the workers and their executions. Shutdown follows the
//! one-sentinel-per-worker protocol: every worker blocks on its own pop,
//! but all workers share one message key, so a sentinel consumed by one
//! worker is never seen by another. `close_pool` therefore enqueues exactly
//! as many sentinels as there are live workers, then joins them all.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::WorkerSettings;
use crate::core::worker::{Worker, WorkerId};
use crate::db::BackendPool;
use crate::error::{Error, Result};
use crate::processor::TaskProcessor;
use crate::queue::QueueBackend;

/// Live workers and their execution handles. Exists only between
/// `start_pool` and the completion of `close_pool`/`halt_pool`.
struct PoolState<P, H> {
    workers: Vec<Arc<Worker<P, H>>>,
    handles: Vec<JoinHandle<Result<()>>>,
}

/// Supervises a fixed-size set of workers draining one shared queue.
pub struct WorkerPool<P, H> {
    queue: Arc<dyn QueueBackend>,
    db: Arc<P>,
    processor: Arc<H>,
    count: usize,
    settings: WorkerSettings,
    state: Mutex<Option<PoolState<P, H>>>,
}

impl<P, H> WorkerPool<P, H>
where
    P: BackendPool,
    H: TaskProcessor<P::Connection>,
{
    /// Create an idle pool of `count` workers.
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        db: Arc<P>,
        processor: Arc<H>,
        count: usize,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            db,
            processor,
            count,
            settings,
            state: Mutex::new(None),
        }
    }

    /// Number of workers this pool runs.
    pub fn worker_count(&self) -> usize {
        self.count
    }

    /// Whether `start_pool` has run and shutdown has not.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Spawn every worker as an independent tokio task.
    ///
    /// Misuse-guarded: a second call on a running pool is
    /// [`Error::AlreadyRunning`]. A worker count of zero or one exceeding
    /// the connection-pool capacity is rejected before any worker starts.
    pub async fn start_pool(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(Error::AlreadyRunning);
        }

        if self.count == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        let capacity = self.db.capacity() as usize;
        if self.count > capacity {
            return Err(Error::TooManyWorkers {
                requested: self.count,
                max: capacity,
            });
        }

        let mut workers = Vec::with_capacity(self.count);
        let mut handles = Vec::with_capacity(self.count);
        for i in 0..self.count {
            let worker = Arc::new(Worker::new(
                WorkerId(i),
                Arc::clone(&self.queue),
                Arc::clone(&self.db),
                Arc::clone(&self.processor),
                self.settings.clone(),
            ));
            let handle = tokio::spawn({
                let worker = Arc::clone(&worker);
                async move { worker.run().await }
            });
            workers.push(worker);
            handles.push(handle);
        }

        *state = Some(PoolState { workers, handles });
        info!(workers = self.count, "worker pool started");
        Ok(())
    }

    /// Stop all workers gracefully: one tail sentinel per worker, so the
    /// queued backlog drains first, then join every execution.
    pub async fn close_pool(&self) -> Result<()> {
        self.shutdown(false).await
    }

    /// Stop all workers forcibly: one head sentinel per worker, preempting
    /// any queued backlog, then join every execution.
    pub async fn halt_pool(&self) -> Result<()> {
        self.shutdown(true).await
    }

    async fn shutdown(&self, force: bool) -> Result<()> {
        let state = self.state.lock().await.take();
        let Some(PoolState { workers, handles }) = state else {
            return Err(Error::NotRunning);
        };

        info!(workers = workers.len(), force, "stopping worker pool");

        // One sentinel per live worker; see the module doc for why a single
        // push is not enough.
        let mut push_failure = None;
        for worker in &workers {
            if let Err(e) = worker.stop(force).await {
                error!(worker = %worker.id(), error = %e, "failed to enqueue stop sentinel");
                push_failure = Some(e);
            }
        }
        if let Some(e) = push_failure {
            // The queue backend is gone; workers blocked on it will error
            // out of pop on their own, and the process is exiting on the
            // fatal path anyway.
            return Err(e);
        }

        for (i, result) in join_all(handles).await.into_iter().enumerate() {
            match result {
                Ok(Ok(())) => debug!(worker = i, "worker joined"),
                Ok(Err(e)) => error!(worker = i, error = %e, "worker exited with error"),
                Err(e) => error!(worker = i, error = %e, "worker task panicked"),
            }
        }

        info!("worker pool stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::db::stub::StubPool;
    use crate::message::{Message, STOP_SENTINEL, TaskSpec};
    use crate::processor::recording::RecordingProcessor;
    use crate::queue::InMemoryQueue;

    const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

    fn settings() -> WorkerSettings {
        WorkerSettings {
            message_key: "message".to_string(),
            dead_letter_key: Some("dead-letter".to_string()),
        }
    }

    fn make_pool(count: usize, capacity: u32) -> WorkerPool<StubPool, RecordingProcessor> {
        WorkerPool::new(
            Arc::new(InMemoryQueue::new("test")),
            Arc::new(StubPool::new(capacity)),
            Arc::new(RecordingProcessor::new()),
            count,
            settings(),
        )
    }

    #[tokio::test]
    async fn close_pool_joins_every_worker_and_leaves_no_sentinels() {
        for count in [1usize, 2, 5] {
            let pool = make_pool(count, 10);
            pool.start_pool().await.unwrap();
            assert!(pool.is_running().await);

            timeout(SHUTDOWN_BUDGET, pool.close_pool())
                .await
                .expect("shutdown did not complete")
                .unwrap();

            assert!(!pool.is_running().await);
            assert_eq!(pool.queue.len("message").await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn backlog_is_drained_before_graceful_shutdown() {
        let pool = make_pool(2, 10);

        let tasks: Vec<TaskSpec> = (0..6).map(|_| TaskSpec::new("fetch", json!({}))).collect();
        for task in &tasks {
            let encoded = Message::Task(task.clone()).encode().unwrap();
            pool.queue.push_tail("message", &encoded).await.unwrap();
        }

        pool.start_pool().await.unwrap();
        timeout(SHUTDOWN_BUDGET, pool.close_pool())
            .await
            .expect("shutdown did not complete")
            .unwrap();

        let mut processed = pool.processor.processed();
        processed.sort();
        let mut expected: Vec<_> = tasks.iter().map(|t| t.id).collect();
        expected.sort();
        assert_eq!(processed, expected);
    }

    #[tokio::test]
    async fn halt_pool_terminates_workers() {
        let pool = make_pool(3, 10);
        pool.start_pool().await.unwrap();

        timeout(SHUTDOWN_BUDGET, pool.halt_pool())
            .await
            .expect("forced shutdown did not complete")
            .unwrap();
        assert!(!pool.is_running().await);
    }

    #[tokio::test]
    async fn one_sentinel_stops_exactly_one_worker() {
        // Regression for the "one stop message stops the whole pool"
        // misreading: three workers share the key, a single sentinel must
        // stop exactly one of them.
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new("test"));
        let db = Arc::new(StubPool::new(10));
        let processor = Arc::new(RecordingProcessor::new());

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let worker = Arc::new(Worker::new(
                    WorkerId(i),
                    Arc::clone(&queue),
                    Arc::clone(&db),
                    Arc::clone(&processor),
                    settings(),
                ));
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        queue.push_tail("message", STOP_SENTINEL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let finished = handles.iter().filter(|h| h.is_finished()).count();
        assert_eq!(finished, 1);

        // The other two are still blocked in pop; release them.
        queue.push_tail("message", STOP_SENTINEL).await.unwrap();
        queue.push_tail("message", STOP_SENTINEL).await.unwrap();
        for handle in handles {
            timeout(SHUTDOWN_BUDGET, handle)
                .await
                .expect("worker did not stop")
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn start_pool_twice_is_a_misuse_error() {
        let pool = make_pool(1, 10);
        pool.start_pool().await.unwrap();

        assert!(matches!(
            pool.start_pool().await.unwrap_err(),
            Error::AlreadyRunning
        ));

        timeout(SHUTDOWN_BUDGET, pool.close_pool())
            .await
            .expect("shutdown did not complete")
            .unwrap();
    }

    #[tokio::test]
    async fn close_pool_without_start_is_a_misuse_error() {
        let pool = make_pool(1, 10);
        assert!(matches!(
            pool.close_pool().await.unwrap_err(),
            Error::NotRunning
        ));
    }

    #[tokio::test]
    async fn worker_count_above_pool_capacity_is_rejected() {
        let pool = make_pool(3, 2);
        match pool.start_pool().await.unwrap_err() {
            Error::TooManyWorkers { requested, max } => {
                assert_eq!(requested, 3);
                assert_eq!(max, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!pool.is_running().await);
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let pool = make_pool(0, 2);
        assert!(matches!(
            pool.start_pool().await.unwrap_err(),
            Error::Config { .. }
        ));
    }
}
