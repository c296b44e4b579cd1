//! Coordinator: enqueue planning, the task queue adapter, the in-memory
//! skip-decision layer, the per-request scan executor, and the plain
//! handler functions an HTTP transport layer calls into.

pub mod executor;
pub mod handlers;
pub mod planner;
pub mod queue;
pub mod workcache;

pub use executor::{DbResultSink, ExecutionOutcome, ExecutorError, LoggingResultSink, ResultSink, ScanExecutor};
pub use handlers::{status_code_for, CoreError};
pub use planner::{enqueue_corpus, parse_corpus, CorpusEntry, EnqueueSummary, PlannerError};
pub use queue::{EnqueueOpts, InMemoryQueue, QueueError, RemoteQueue, ScanTask, TaskQueue};
pub use workcache::SkipCache;
