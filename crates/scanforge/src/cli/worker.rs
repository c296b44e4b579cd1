//! `worker serve` - run an in-memory task queue against the local executor
//!
//! This is the standalone worker path: no remote queue endpoint, tasks are
//! accepted over a bounded channel and executed by a fixed pool of
//! in-process workers until the process is interrupted.

use clap::Args;
use scanforge_coordinator::{InMemoryQueue, ScanExecutor, TaskQueue};
use scanforge_ids::{ModulePath, ModuleVersion};
use scanforge_protocol::{Namespace, ScanRequest};
use scanforge_worker::CancellationToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long a graceful shutdown waits for in-flight scans to drain before
/// exiting anyway.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Channel capacity before enqueue_scan starts rejecting tasks
    #[arg(long, default_value_t = 64)]
    pub capacity: usize,
    /// Number of concurrent in-process worker tasks
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
    /// Namespace new tasks are recorded under
    #[arg(long, default_value = "default")]
    pub namespace: String,
}

/// Install SIGINT/SIGTERM (Ctrl+C on Windows) handlers that flip an atomic
/// flag rather than terminating the process directly, so the caller can
/// drain in-flight scans first.
fn install_shutdown_signal() -> anyhow::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let flag = Arc::clone(&shutdown);
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!(signal = sig, "received shutdown signal");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    #[cfg(windows)]
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("received ctrl-c");
            flag.store(true, Ordering::SeqCst);
        })?;
    }

    Ok(shutdown)
}

/// Start the in-memory queue and block until a shutdown signal, then drain
/// in-flight scans (bounded by [`SHUTDOWN_DRAIN_TIMEOUT`]) before returning.
pub async fn run(executor: Arc<ScanExecutor>, args: WorkerArgs) -> anyhow::Result<()> {
    let namespace = Namespace(args.namespace.clone());
    let handler_executor = Arc::clone(&executor);
    let handler_namespace = namespace.clone();

    let queue = InMemoryQueue::new(
        args.capacity,
        args.workers,
        Arc::new(move |task| {
            let executor = Arc::clone(&handler_executor);
            let namespace = handler_namespace.clone();
            Box::pin(async move {
                let module = match ModulePath::new(task.name.clone()) {
                    Ok(m) => m,
                    Err(err) => {
                        error!(error = %err, task = %task.name, "rejecting malformed task");
                        return;
                    }
                };
                let version = match ModuleVersion::new(task.params.clone()) {
                    Ok(v) => v,
                    Err(err) => {
                        error!(error = %err, task = %task.name, "rejecting malformed task");
                        return;
                    }
                };
                let request = ScanRequest {
                    module,
                    version,
                    suffix: None,
                    namespace,
                    binary_version: None,
                    extra_args: Vec::new(),
                    insecure: false,
                    init: false,
                    serve: false,
                    job_id: None,
                    disable_proxy_fetch: false,
                };
                let cancel = CancellationToken::new();
                match executor.execute(&request, &cancel).await {
                    Ok(scanforge_coordinator::ExecutionOutcome::Skipped) => {
                        info!(module = %task.name, skipped = true, "task finished")
                    }
                    Ok(scanforge_coordinator::ExecutionOutcome::Completed(findings)) => {
                        info!(module = %task.name, skipped = false, findings = findings.len(), "task finished")
                    }
                    Err(err) => error!(error = %err, module = %task.name, "task failed"),
                }
            })
        }),
    );

    info!(capacity = args.capacity, workers = args.workers, "worker listening on in-memory queue");

    // `queue` owns the channel sender; its worker tasks keep running as
    // long as it's alive, so just hold it until the operator interrupts us.
    let _queue: Arc<dyn TaskQueue> = Arc::new(queue);
    let shutdown = install_shutdown_signal()?;
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("shutdown signal received, draining in-flight scans");
    let drain_start = tokio::time::Instant::now();
    while executor.janitor.active_scans() > 0 {
        if drain_start.elapsed() >= SHUTDOWN_DRAIN_TIMEOUT {
            warn!(
                active = executor.janitor.active_scans(),
                "drain timeout elapsed, shutting down with scans still in flight"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("worker shutting down");
    Ok(())
}
