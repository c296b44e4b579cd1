//! `scan run` / `scan enqueue` / `scan corpus` - drive a single scan
//! synchronously, or fan work out through a task queue.

use crate::cli::error::HelpfulError;
use clap::Args;
use scanforge_coordinator::handlers;
use scanforge_coordinator::{RemoteQueue, TaskQueue};
use scanforge_coordinator::ScanExecutor;
use scanforge_ids::{JobId, ModulePath, ModuleVersion};
use scanforge_protocol::{Namespace, ScanRequest};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct ScanRunArgs {
    /// Module import path, e.g. golang.org/x/net
    pub module: String,
    /// Module version, or "latest"
    #[arg(long, default_value = "latest")]
    pub version: String,
    /// Namespace to record results under
    #[arg(long)]
    pub namespace: Option<String>,
    /// Skip the sandboxed runtime and run the analyzer in-process
    #[arg(long)]
    pub insecure: bool,
    /// Attribute this scan's terminal counter to an existing job
    #[arg(long)]
    pub job: Option<String>,
    /// Output the execution outcome as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ScanEnqueueArgs {
    /// Module import path, e.g. golang.org/x/net
    pub module: String,
    /// Module version, or "latest"
    #[arg(long, default_value = "latest")]
    pub version: String,
    /// Namespace to enqueue under
    #[arg(long)]
    pub namespace: Option<String>,
    /// Remote queue endpoint to POST the task to
    #[arg(long)]
    pub queue_url: String,
}

#[derive(Debug, Args)]
pub struct ScanCorpusArgs {
    /// Path to a corpus listing file ('<module> [<version>] <count>' per line)
    pub corpus_file: PathBuf,
    /// Minimum popularity count a line must meet to be enqueued
    #[arg(long, default_value_t = 0)]
    pub min: u64,
    /// Maximum popularity count a line may have to be enqueued
    #[arg(long, default_value_t = u64::MAX)]
    pub max: u64,
    /// Namespace to enqueue under
    #[arg(long)]
    pub namespace: Option<String>,
    /// Remote queue endpoint to POST tasks to
    #[arg(long)]
    pub queue_url: String,
}

fn resolve_namespace(namespace: Option<String>) -> anyhow::Result<Namespace> {
    let name = match namespace {
        Some(n) => n,
        None => crate::cli::context::get_default_namespace()?.unwrap_or_else(|| "default".to_string()),
    };
    Ok(Namespace(name))
}

pub async fn run(executor: Arc<ScanExecutor>, args: ScanRunArgs) -> anyhow::Result<()> {
    let module = ModulePath::new(&args.module)
        .map_err(|e| HelpfulError::invalid_module(&args.module, &e.to_string()))?;
    let version = ModuleVersion::new(&args.version)
        .map_err(|e| HelpfulError::invalid_module(&args.version, &e.to_string()))?;
    let namespace = resolve_namespace(args.namespace)?;
    let job_id = args.job.as_deref().map(JobId::parse).transpose()?;

    let request = ScanRequest {
        module,
        version,
        suffix: None,
        namespace,
        binary_version: None,
        extra_args: Vec::new(),
        insecure: args.insecure,
        init: false,
        serve: true,
        job_id,
        disable_proxy_fetch: false,
    };

    let result = handlers::run_scan_now(&executor, &request).await;

    let (skipped, findings, error_category) = match result {
        Ok(scanforge_coordinator::ExecutionOutcome::Skipped) => (true, 0, None),
        Ok(scanforge_coordinator::ExecutionOutcome::Completed(findings)) => (false, findings.len(), None),
        Err(scanforge_coordinator::CoreError::BadModule(msg)) => (false, 0, Some(msg)),
        Err(other) => return Err(other.into()),
    };

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "skipped": skipped,
                "findings": findings,
                "errorCategory": error_category,
            })
        );
    } else if skipped {
        println!("{}@{}: skipped (cached work-version, no retryable error)", args.module, args.version);
    } else if let Some(category) = error_category {
        println!("{}@{}: {}", args.module, args.version, category);
    } else {
        println!("{}@{}: succeeded ({} findings)", args.module, args.version, findings);
    }

    Ok(())
}

pub async fn run_enqueue(args: ScanEnqueueArgs) -> anyhow::Result<()> {
    let namespace = resolve_namespace(args.namespace)?;
    let queue: Arc<dyn TaskQueue> = Arc::new(RemoteQueue::new(reqwest::Client::new(), args.queue_url.clone()));

    let accepted = handlers::enqueue_scan(&queue, &format!("{}@{}", args.module, args.version), namespace, None, None)
        .await
        .map_err(|e| match e {
            scanforge_coordinator::CoreError::Internal(err) => {
                HelpfulError::queue_unreachable(&args.queue_url, &err.to_string()).into()
            }
            other => anyhow::Error::from(other),
        })?;

    if accepted {
        println!("Enqueued {}@{}", args.module, args.version);
    } else {
        println!("{}@{} was a duplicate within the dedup window; skipped", args.module, args.version);
    }
    Ok(())
}

pub async fn run_corpus(args: ScanCorpusArgs) -> anyhow::Result<()> {
    let namespace = resolve_namespace(args.namespace)?;
    let corpus = std::fs::read_to_string(&args.corpus_file)
        .map_err(|e| HelpfulError::new(format!("cannot read corpus file: {}", e)))?;
    let queue: Arc<dyn TaskQueue> = Arc::new(RemoteQueue::new(reqwest::Client::new(), args.queue_url.clone()));

    let summary = handlers::enqueue_corpus_listing(queue, &corpus, args.min, args.max, namespace)
        .await
        .map_err(|e| match e {
            scanforge_coordinator::CoreError::InvalidArgument(msg) => HelpfulError::corpus_parse_error(&msg).into(),
            other => anyhow::Error::from(other),
        })?;

    println!(
        "enqueued={} skipped={} errored={}",
        summary.enqueued, summary.skipped, summary.errored
    );
    Ok(())
}
