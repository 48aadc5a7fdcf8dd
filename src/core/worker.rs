//! Worker implementation for qmill.
//!
//! A worker blocks on the shared message key, decodes each payload once at
//! the loop edge, and hands real tasks to the processor with a connection
//! checked out for exactly that call. One stop sentinel terminates one
//! worker; everything else keeps the loop alive.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::db::BackendPool;
use crate::error::Result;
use crate::message::{Message, STOP_SENTINEL, TaskSpec};
use crate::processor::TaskProcessor;
use crate::queue::QueueBackend;

/// Stable per-worker index, used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A single queue consumer.
pub struct Worker<P, H> {
    id: WorkerId,
    queue: Arc<dyn QueueBackend>,
    db: Arc<P>,
    processor: Arc<H>,
    settings: WorkerSettings,
}

impl<P, H> Worker<P, H>
where
    P: BackendPool,
    H: TaskProcessor<P::Connection>,
{
    /// Create a worker. It does nothing until [`run`](Self::run) is polled.
    pub fn new(
        id: WorkerId,
        queue: Arc<dyn QueueBackend>,
        db: Arc<P>,
        processor: Arc<H>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            queue,
            db,
            processor,
            settings,
        }
    }

    /// This worker's id.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Run the consume/process loop until a stop sentinel arrives.
    ///
    /// Decode and processing failures are reported and dead-lettered, never
    /// fatal. A queue backend failure is fatal: the loop exits with the
    /// error for the joining supervisor to report.
    pub async fn run(&self) -> Result<()> {
        info!(worker = %self.id, key = %self.settings.message_key, "worker started");

        loop {
            let payload = match self.queue.pop(&self.settings.message_key, true, None).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "queue backend failed, worker exiting");
                    return Err(e);
                }
            };

            match Message::decode(&payload) {
                Ok(Message::Stop) => {
                    info!(worker = %self.id, "stop sentinel received");
                    break;
                }
                Ok(Message::Task(task)) => self.dispatch(&task, &payload).await,
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "discarding undecodable message");
                    self.dead_letter(&payload).await;
                }
            }
        }

        info!(worker = %self.id, "worker stopped");
        Ok(())
    }

    /// Process one task with a connection held for exactly this call.
    async fn dispatch(&self, task: &TaskSpec, raw: &[u8]) {
        let mut conn = match self.db.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(worker = %self.id, task = %task.id, error = %e, "connection acquire failed");
                self.dead_letter(raw).await;
                return;
            }
        };

        match self.processor.process(task, &mut conn).await {
            Ok(()) => debug!(worker = %self.id, task = %task.id, "task processed"),
            Err(e) => {
                error!(worker = %self.id, task = %task.id, error = %e, "task failed");
                self.dead_letter(raw).await;
            }
        }
        // conn drops here; the connection returns to the pool whether the
        // task succeeded or not.
    }

    async fn dead_letter(&self, raw: &[u8]) {
        let Some(key) = self.settings.dead_letter_key.as_deref() else {
            return;
        };
        if let Err(e) = self.queue.push_tail(key, raw).await {
            error!(worker = %self.id, error = %e, "dead-letter push failed, payload lost");
        }
    }

    /// Enqueue exactly one stop sentinel for this worker's message key.
    ///
    /// `force == true` pushes to the head, preempting queued work; `false`
    /// pushes to the tail so the backlog drains first. All workers share
    /// the key, so the sentinel stops whichever worker pops it; the caller
    /// must invoke this once per worker it intends to stop.
    pub async fn stop(&self, force: bool) -> Result<()> {
        if force {
            self.queue
                .push_head(&self.settings.message_key, STOP_SENTINEL)
                .await
        } else {
            self.queue
                .push_tail(&self.settings.message_key, STOP_SENTINEL)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::db::stub::StubPool;
    use crate::message::TaskSpec;
    use crate::processor::recording::RecordingProcessor;
    use crate::queue::InMemoryQueue;

    const JOIN_BUDGET: Duration = Duration::from_secs(5);

    fn settings() -> WorkerSettings {
        WorkerSettings {
            message_key: "message".to_string(),
            dead_letter_key: Some("dead-letter".to_string()),
        }
    }

    fn make_worker(
        queue: Arc<dyn QueueBackend>,
        pool: Arc<StubPool>,
        processor: Arc<RecordingProcessor>,
    ) -> Worker<StubPool, RecordingProcessor> {
        Worker::new(WorkerId(0), queue, pool, processor, settings())
    }

    async fn push_task(queue: &dyn QueueBackend, task: &TaskSpec) {
        let encoded = Message::Task(task.clone()).encode().unwrap();
        queue.push_tail("message", &encoded).await.unwrap();
    }

    #[tokio::test]
    async fn sentinel_terminates_the_loop() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new("test"));
        let worker = Arc::new(make_worker(
            Arc::clone(&queue),
            Arc::new(StubPool::new(1)),
            Arc::new(RecordingProcessor::new()),
        ));

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });

        queue.push_tail("message", STOP_SENTINEL).await.unwrap();
        timeout(JOIN_BUDGET, handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn graceful_stop_drains_backlog_first() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new("test"));
        let processor = Arc::new(RecordingProcessor::new());
        let worker = Arc::new(make_worker(
            Arc::clone(&queue),
            Arc::new(StubPool::new(1)),
            Arc::clone(&processor),
        ));

        let task = TaskSpec::new("fetch", json!({}));
        push_task(queue.as_ref(), &task).await;
        worker.stop(false).await.unwrap();

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });
        timeout(JOIN_BUDGET, handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(processor.processed(), vec![task.id]);
    }

    #[tokio::test]
    async fn forced_stop_preempts_backlog() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new("test"));
        let processor = Arc::new(RecordingProcessor::new());
        let worker = Arc::new(make_worker(
            Arc::clone(&queue),
            Arc::new(StubPool::new(1)),
            Arc::clone(&processor),
        ));

        push_task(queue.as_ref(), &TaskSpec::new("fetch", json!({}))).await;
        worker.stop(true).await.unwrap();

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });
        timeout(JOIN_BUDGET, handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();

        // The sentinel jumped the queue; the task is still pending.
        assert!(processor.processed().is_empty());
        assert_eq!(queue.len("message").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn decode_failure_does_not_stop_the_loop() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new("test"));
        let processor = Arc::new(RecordingProcessor::new());
        let worker = Arc::new(make_worker(
            Arc::clone(&queue),
            Arc::new(StubPool::new(1)),
            Arc::clone(&processor),
        ));

        queue.push_tail("message", b"not a message").await.unwrap();
        let task = TaskSpec::new("fetch", json!({}));
        push_task(queue.as_ref(), &task).await;
        worker.stop(false).await.unwrap();

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });
        timeout(JOIN_BUDGET, handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();

        // The malformed payload was skipped, dead-lettered, and the next
        // pop still succeeded.
        assert_eq!(processor.processed(), vec![task.id]);
        assert_eq!(
            queue.pop("dead-letter", false, None).await.unwrap(),
            Some(b"not a message".to_vec())
        );
    }

    #[tokio::test]
    async fn processing_failure_releases_the_connection() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new("test"));
        let pool = Arc::new(StubPool::new(1));
        let processor = Arc::new(RecordingProcessor::failing_on("bad"));
        let worker = Arc::new(make_worker(
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&processor),
        ));

        let bad = TaskSpec::new("bad", json!({}));
        let good = TaskSpec::new("good", json!({}));
        push_task(queue.as_ref(), &bad).await;
        push_task(queue.as_ref(), &good).await;
        worker.stop(false).await.unwrap();

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });
        timeout(JOIN_BUDGET, handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();

        // The failure released its connection (the good task needed it on a
        // capacity-1 pool) and the payload landed on the dead-letter key.
        assert_eq!(pool.num_idle(), 1);
        assert_eq!(processor.processed(), vec![good.id]);
        let dead = queue.pop("dead-letter", false, None).await.unwrap().unwrap();
        assert_eq!(dead, Message::Task(bad).encode().unwrap());
    }

    #[tokio::test]
    async fn without_dead_letter_key_failures_are_dropped() {
        let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new("test"));
        let processor = Arc::new(RecordingProcessor::new());
        let worker = Arc::new(Worker::new(
            WorkerId(0),
            Arc::clone(&queue),
            Arc::new(StubPool::new(1)),
            Arc::clone(&processor),
            WorkerSettings {
                message_key: "message".to_string(),
                dead_letter_key: None,
            },
        ));

        queue.push_tail("message", b"garbage").await.unwrap();
        worker.stop(false).await.unwrap();

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });
        timeout(JOIN_BUDGET, handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(queue.len("dead-letter").await.unwrap(), 0);
    }
}
