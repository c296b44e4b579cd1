//! Task Queue Adapter: `EnqueueScan(task, opts) -> (accepted, err)` behind
//! a trait, with a remote (HTTP, idempotent, deduped) and an in-memory
//! (bounded channel + worker pool) implementation.

use async_trait::async_trait;
use scanforge_protocol::{task_id, Namespace};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::warn;

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const DEDUP_WINDOW: Duration = Duration::from_secs(9 * 60);
const IN_MEMORY_TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("enqueue request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// One unit of work handed to a queue.
#[derive(Debug, Clone)]
pub struct ScanTask {
    pub name: String,
    pub params: String,
}

#[derive(Debug, Clone)]
pub struct EnqueueOpts {
    pub namespace: Namespace,
    pub disable_proxy_fetch: bool,
    /// Appended verbatim (not sanitized) to the computed task id, to force
    /// re-processing of what would otherwise be a duplicate task.
    pub task_name_suffix: String,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Returns `Ok(true)` if the task was accepted, `Ok(false)` if it was
    /// rejected as a duplicate within the dedup window — not an error.
    async fn enqueue_scan(&self, task: ScanTask, opts: EnqueueOpts) -> Result<bool, QueueError>;
}

/// Backed by an HTTP endpoint (e.g. a managed task queue). Task ids are
/// content-derived so duplicate submissions within the dedup window are
/// recognized without a side table keyed by anything the caller invents.
pub struct RemoteQueue {
    client: reqwest::Client,
    endpoint: String,
    seen: Mutex<HashMap<String, Instant>>,
}

impl RemoteQueue {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn is_duplicate(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().expect("dedup map lock poisoned");
        let now = Instant::now();
        seen.retain(|_, at| now.duration_since(*at) < DEDUP_WINDOW);
        seen.contains_key(id)
    }

    fn mark_seen(&self, id: &str) {
        let mut seen = self.seen.lock().expect("dedup map lock poisoned");
        seen.insert(id.to_string(), Instant::now());
    }

    fn unmark(&self, id: &str) {
        let mut seen = self.seen.lock().expect("dedup map lock poisoned");
        seen.remove(id);
    }
}

#[async_trait]
impl TaskQueue for RemoteQueue {
    async fn enqueue_scan(&self, task: ScanTask, opts: EnqueueOpts) -> Result<bool, QueueError> {
        let mut id = task_id(&task.name, &task.params, &opts.namespace.0);
        id.push_str(&opts.task_name_suffix);

        if self.is_duplicate(&id) {
            return Ok(false);
        }
        // Mark seen before the POST so a concurrent enqueue of the same id
        // can't race in between the check and the request; rolled back
        // below if the POST doesn't actually succeed.
        self.mark_seen(&id);

        let request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "taskId": id,
                "name": task.name,
                "params": task.params,
                "namespace": opts.namespace.0,
                "disableProxyFetch": opts.disable_proxy_fetch,
            }))
            .send();

        match tokio::time::timeout(ENQUEUE_TIMEOUT, request).await {
            Ok(Ok(response)) => match response.error_for_status() {
                Ok(_) => Ok(true),
                Err(err) => {
                    self.unmark(&id);
                    Err(err.into())
                }
            },
            Ok(Err(err)) => {
                self.unmark(&id);
                Err(err.into())
            }
            Err(_) => {
                self.unmark(&id);
                Err(QueueError::Timeout(ENQUEUE_TIMEOUT))
            }
        }
    }
}

type TaskHandler = Arc<dyn Fn(ScanTask) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Backed by a bounded channel and a fixed pool of worker tasks; no
/// retries. Each task gets a hard 5-minute timeout so a stuck analyzer
/// can't wedge a worker forever.
pub struct InMemoryQueue {
    sender: mpsc::Sender<ScanTask>,
    inflight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl InMemoryQueue {
    pub fn new(capacity: usize, workers: usize, handler: TaskHandler) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let inflight = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        for _ in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let inflight = Arc::clone(&inflight);
            let idle = Arc::clone(&idle);
            tokio::spawn(async move {
                loop {
                    let task = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    let Some(task) = task else { break };
                    inflight.fetch_add(1, Ordering::SeqCst);
                    if tokio::time::timeout(IN_MEMORY_TASK_TIMEOUT, handler(task))
                        .await
                        .is_err()
                    {
                        warn!("in-memory queue task exceeded its timeout");
                    }
                    if inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
                        idle.notify_waiters();
                    }
                }
            });
        }

        Self { sender, inflight, idle }
    }

    /// Drain primitive for tests: wait until no task is queued or running.
    pub async fn wait_for_testing(&self) {
        loop {
            if self.sender.capacity() == self.sender.max_capacity()
                && self.inflight.load(Ordering::SeqCst) == 0
            {
                return;
            }
            self.idle.notified().await;
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue_scan(&self, task: ScanTask, _opts: EnqueueOpts) -> Result<bool, QueueError> {
        match self.sender.try_send(task) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn opts() -> EnqueueOpts {
        EnqueueOpts {
            namespace: Namespace("analysis".to_string()),
            disable_proxy_fetch: false,
            task_name_suffix: String::new(),
        }
    }

    #[tokio::test]
    async fn in_memory_queue_runs_enqueued_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let handler_counter = Arc::clone(&counter);
        let handler: TaskHandler = Arc::new(move |_task| {
            let counter = Arc::clone(&handler_counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        let queue = InMemoryQueue::new(8, 2, handler);

        for i in 0..5 {
            queue
                .enqueue_scan(
                    ScanTask {
                        name: format!("task-{i}"),
                        params: String::new(),
                    },
                    opts(),
                )
                .await
                .unwrap();
        }
        queue.wait_for_testing().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn remote_queue_dedup_marks_and_detects_duplicates() {
        let queue = RemoteQueue::new(reqwest::Client::new(), "http://example.invalid/enqueue");
        assert!(!queue.is_duplicate("task-1"));
        queue.mark_seen("task-1");
        assert!(queue.is_duplicate("task-1"));
    }

    #[test]
    fn remote_queue_unmark_clears_a_failed_enqueue() {
        let queue = RemoteQueue::new(reqwest::Client::new(), "http://example.invalid/enqueue");
        queue.mark_seen("task-1");
        assert!(queue.is_duplicate("task-1"));
        queue.unmark("task-1");
        assert!(!queue.is_duplicate("task-1"));
    }
}
