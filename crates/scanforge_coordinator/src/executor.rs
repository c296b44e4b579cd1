//! Scan Executor: the per-request pipeline tying together cancellation,
//! the Job Aggregator's counters, the binary hash gate, the skip cache,
//! and the worker crate's sandboxed invocation primitives.
//!
//! `execute` runs seven named steps in order; the last always runs, even
//! when an earlier step fails the scan body itself (not the executor),
//! so counters, the workspace, and the active-scan count never leak.

use crate::workcache::SkipCache;
use async_trait::async_trait;
use chrono::Utc;
use scanforge_db::{jobs, DbError, DbPool, JobCounter};
use scanforge_ids::JobId;
use scanforge_protocol::{ErrorCategory, Finding, ResultRow, ScanRequest, WorkVersion};
use scanforge_security::{verify_binary, HashMismatch};
use scanforge_worker::sandbox::{EnvMode, InProcessRuntime};
use scanforge_worker::{invoker, workspace, CancellationToken, ResourceJanitor, SandboxRuntime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// The fixed module name the workspace's init step uses when a request has
/// no real `go.mod` to build against. Mirrors the literal baked into
/// `scanforge_worker::workspace::materialize`.
const SYNTHETIC_MODULE_NAME: &str = "scanforge/synthetic";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("job {0} was canceled")]
    Canceled(JobId),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Hash(#[from] HashMismatch),
    #[error(transparent)]
    Fetch(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sink(#[from] anyhow::Error),
    #[error("scan failed: {category}: {message}")]
    ScanFailed { category: ErrorCategory, message: String },
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(Vec<Finding>),
    Skipped,
}

/// Sink for a finished scan's result row. Kept as a trait so the
/// coordinator's storage choice (a findings table, a pub/sub topic, plain
/// logging) doesn't leak into the executor itself.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, row: ResultRow) -> anyhow::Result<()>;
}

/// Structured-logs the row in addition to whatever durable sink is in use;
/// cheap to construct, useful in tests and as a debugging overlay.
pub struct LoggingResultSink;

#[async_trait]
impl ResultSink for LoggingResultSink {
    async fn store(&self, row: ResultRow) -> anyhow::Result<()> {
        tracing::info!(
            module = %row.module,
            version = %row.version,
            namespace = %row.namespace,
            findings = row.findings.len(),
            error_category = row.error_category.map(|c| c.as_str()),
            "scan result"
        );
        Ok(())
    }
}

/// Durable sink backing the `/jobs/results` read path: every row lands in
/// the `results` table, findings serialized as JSON.
pub struct DbResultSink {
    pool: DbPool,
}

impl DbResultSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultSink for DbResultSink {
    async fn store(&self, row: ResultRow) -> anyhow::Result<()> {
        scanforge_db::results::insert(&self.pool, &row).await?;
        Ok(())
    }
}

pub struct ScanExecutor {
    pub pool: DbPool,
    pub skip_cache: Arc<SkipCache>,
    pub http: reqwest::Client,
    pub sandboxed_runtime: Arc<dyn SandboxRuntime>,
    pub in_process_runtime: InProcessRuntime,
    pub janitor: Arc<ResourceJanitor>,
    pub result_sink: Arc<dyn ResultSink>,
    pub proxy_base_url: String,
    pub binary_proxy_url: String,
    pub workspace_root: PathBuf,
    pub binary_cache_dir: PathBuf,
    pub default_analyzer_binary: PathBuf,
    pub analyzer_version: String,
    /// Bumped whenever the stored result-row/finding shape changes
    /// incompatibly; part of the work-version fingerprint so a schema
    /// migration invalidates every prior skip-cache entry.
    pub schema_version: String,
}

impl ScanExecutor {
    pub async fn execute(
        self: &Arc<Self>,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        self.check_job_active(request, cancel).await?;
        self.record_start(request).await?;

        let binary_path = self.fetch_and_verify_binary(request).await?;
        let work_version = WorkVersion {
            binary_args: request.extra_args.clone(),
            analyzer_version: self.analyzer_version.clone(),
            schema_version: self.schema_version.clone(),
            binary_hash: request.binary_version.clone(),
            vuln_db_last_modified: None,
            go_version: None,
        };
        let binary_key = work_version
            .binary_hash
            .as_ref()
            .map(|h| h.as_str().to_string())
            .unwrap_or_default();

        if self
            .skip_if_cached(request, &work_version, &binary_key)
            .await
        {
            self.finalize(request, &work_version, &binary_key, None, None).await?;
            return Ok(ExecutionOutcome::Skipped);
        }

        self.janitor.enter_scan();
        let body_result = self.run_scan_body_guarded(request.clone(), binary_path).await;
        let finish_result = match &body_result {
            Ok(findings) => self.write_result(request, findings.clone(), None, None).await,
            Err((category, message)) => {
                self.write_result(request, Vec::new(), Some(*category), Some(message.clone())).await
            }
        };
        let category = body_result.as_ref().err().map(|(c, _)| *c);
        let message = body_result.as_ref().err().map(|(_, m)| m.clone());
        self.finalize(request, &work_version, &binary_key, category, message).await?;
        finish_result?;

        match body_result {
            Ok(findings) => Ok(ExecutionOutcome::Completed(findings)),
            Err((category, message)) => Err(ExecutorError::ScanFailed { category, message }),
        }
    }

    /// Step 1: refuse to run a scan belonging to an already-canceled job,
    /// or one whose in-process cancellation token has latched.
    async fn check_job_active(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        if cancel.is_canceled() {
            if let Some(id) = &request.job_id {
                return Err(ExecutorError::Canceled(id.clone()));
            }
        }
        if let Some(id) = &request.job_id {
            let job = jobs::get_job(&self.pool, id).await?;
            if job.canceled {
                return Err(ExecutorError::Canceled(id.clone()));
            }
        }
        Ok(())
    }

    /// Step 2: bump the job's started counter. `jobs::increment` already
    /// retries on transient lock contention.
    async fn record_start(&self, request: &ScanRequest) -> Result<(), ExecutorError> {
        if let Some(id) = &request.job_id {
            jobs::increment(&self.pool, id, JobCounter::NumStarted, 1).await?;
        }
        Ok(())
    }

    /// Step 3: when the request names an analyzer binary by hash, fetch it
    /// and refuse to proceed if the bytes on disk don't match.
    async fn fetch_and_verify_binary(&self, request: &ScanRequest) -> Result<Option<PathBuf>, ExecutorError> {
        let Some(requested_hash) = &request.binary_version else {
            return Ok(None);
        };

        let cached_path = self.binary_cache_dir.join(requested_hash.as_str());
        if cached_path.exists() {
            return Ok(Some(cached_path));
        }

        let url = format!("{}/{}", self.binary_proxy_url.trim_end_matches('/'), requested_hash.as_str());
        let bytes = self.http.get(&url).send().await?.error_for_status()?.bytes().await?;
        verify_binary(&bytes, requested_hash)?;

        std::fs::create_dir_all(&self.binary_cache_dir)?;
        std::fs::write(&cached_path, &bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&cached_path)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&cached_path, perms)?;
        }

        Ok(Some(cached_path))
    }

    /// Step 4: consult the skip cache for a prior, still-valid outcome.
    async fn skip_if_cached(&self, request: &ScanRequest, work_version: &WorkVersion, binary_key: &str) -> bool {
        self.skip_cache
            .should_skip(&request.module, &request.version, binary_key, work_version)
            .await
    }

    /// Spawns step 5 on its own task so a panic deep in the analyzer
    /// invocation (malformed output parsing, a sandbox runtime bug) can't
    /// take the whole executor down with it.
    async fn run_scan_body_guarded(
        self: &Arc<Self>,
        request: ScanRequest,
        binary_path: Option<PathBuf>,
    ) -> Result<Vec<Finding>, (ErrorCategory, String)> {
        let executor = Arc::clone(self);
        let join = tokio::spawn(async move { executor.run_scan_body(&request, binary_path.as_deref()).await });
        match join.await {
            Ok(result) => result,
            Err(join_err) => Err((
                ErrorCategory::ScanPanic,
                format!("analyzer invocation panicked: {join_err}"),
            )),
        }
    }

    /// Step 5: materialize the module workspace, invoke the analyzer under
    /// the appropriate sandbox runtime, and classify any failure.
    async fn run_scan_body(&self, request: &ScanRequest, binary_path: Option<&Path>) -> Result<Vec<Finding>, (ErrorCategory, String)> {
        let work_dir = self.workspace_root.join(scanforge_protocol::task_id(
            request.module.as_str(),
            request.version.as_str(),
            &request.namespace.0,
        ));
        let proxy_env = vec![("GOPROXY".to_string(), self.proxy_base_url.clone())];

        if let Err(err) = workspace::materialize(
            &self.http,
            &self.proxy_base_url,
            &request.module,
            &request.version,
            &work_dir,
            request.init,
            &proxy_env,
            None,
        )
        .await
        {
            let category = classify_workspace_error(&err);
            return Err((category, err.to_string()));
        }

        let runtime: &dyn SandboxRuntime = if request.insecure {
            &self.in_process_runtime
        } else {
            self.sandboxed_runtime.as_ref()
        };

        let args = invoker::build_argv(&request.extra_args.join(" "), binary_path);
        let synthetic_module = request.init.then_some(SYNTHETIC_MODULE_NAME);

        let invocation = invoker::Invocation {
            runtime,
            binary: self.default_analyzer_binary.clone(),
            args,
            working_dir: work_dir,
            env: HashMap::new(),
            env_mode: EnvMode::Append,
            stdin_command: None,
        };

        match invoker::invoke(invocation).await {
            Ok(findings) => Ok(findings),
            Err(err) => {
                let category = classify_invoker_error(&err, synthetic_module);
                Err((category, err.to_string()))
            }
        }
    }

    /// Step 6: persist the outcome through the result sink, unless the
    /// caller asked to be served synchronously (`serve=true`) — that
    /// caller already gets the findings back from `execute`'s return
    /// value, so there's nothing durable to write.
    async fn write_result(
        &self,
        request: &ScanRequest,
        findings: Vec<Finding>,
        category: Option<ErrorCategory>,
        message: Option<String>,
    ) -> Result<(), ExecutorError> {
        if request.serve {
            return Ok(());
        }
        let row = ResultRow {
            module: request.module.clone(),
            version: request.version.clone(),
            namespace: request.namespace.clone(),
            job_id: request.job_id.clone(),
            findings,
            error_category: category,
            error_message: message,
            recorded_at: Utc::now(),
        };
        self.result_sink.store(row).await?;
        Ok(())
    }

    /// Step 7: always runs. Updates the job's terminal counter, deletes
    /// the scratch workspace, writes the skip-cache entry, and releases
    /// the active-scan slot.
    async fn finalize(
        &self,
        request: &ScanRequest,
        work_version: &WorkVersion,
        binary_key: &str,
        category: Option<ErrorCategory>,
        _message: Option<String>,
    ) -> Result<(), ExecutorError> {
        let work_dir = self.workspace_root.join(scanforge_protocol::task_id(
            request.module.as_str(),
            request.version.as_str(),
            &request.namespace.0,
        ));
        let _ = std::fs::remove_dir_all(&work_dir);

        self.skip_cache
            .record(
                &request.module,
                &request.version,
                binary_key,
                scanforge_protocol::WorkState {
                    work_version: work_version.clone(),
                    error_category: category,
                },
            )
            .await?;

        if let Some(id) = &request.job_id {
            let counter = match category {
                None => JobCounter::NumSucceeded,
                Some(cat) if cat.is_unrecoverable() => JobCounter::NumFailed,
                Some(_) => JobCounter::NumErrored,
            };
            jobs::increment(&self.pool, id, counter, 1).await?;
        }

        self.janitor.leave_scan().await;
        Ok(())
    }
}

fn classify_workspace_error(err: &workspace::WorkspaceError) -> ErrorCategory {
    use workspace::WorkspaceError;
    match err {
        WorkspaceError::Fetch(_) => ErrorCategory::ProxyError,
        WorkspaceError::Zip(_) | WorkspaceError::PathEscape(_) => ErrorCategory::BadModule,
        WorkspaceError::BadModule { stderr, .. } => scanforge_worker::classify(stderr, None, None),
        WorkspaceError::Io(_) => ErrorCategory::ScanOsError,
        WorkspaceError::Join(_) => ErrorCategory::ScanPanic,
    }
}

fn classify_invoker_error(err: &invoker::InvokerError, synthetic_module: Option<&str>) -> ErrorCategory {
    use invoker::InvokerError;
    use scanforge_worker::sandbox::SandboxError;
    match err {
        InvokerError::Sandbox(SandboxError::NonZeroExit { stderr, .. }) => {
            scanforge_worker::classify(stderr, None, synthetic_module)
        }
        InvokerError::Sandbox(SandboxError::Spawn(io_err)) => {
            scanforge_worker::classify(&io_err.to_string(), Some(ErrorCategory::ScanOsError), synthetic_module)
        }
        InvokerError::InvalidJson(_) => ErrorCategory::Misc,
        InvokerError::AnalyzerError(message) => scanforge_worker::classify(message, None, synthetic_module),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanforge_db::pool::{create_pool, DbConfig};
    use scanforge_ids::{ModulePath, ModuleVersion};
    use scanforge_protocol::Namespace;
    use scanforge_worker::sandbox::{InvocationOutput, SandboxError};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubRuntime {
        output: Vec<u8>,
    }

    #[async_trait]
    impl SandboxRuntime for StubRuntime {
        async fn invoke(
            &self,
            _request: scanforge_worker::sandbox::InvocationRequest,
        ) -> Result<InvocationOutput, SandboxError> {
            Ok(InvocationOutput {
                stdout: self.output.clone(),
                stderr: Vec::new(),
            })
        }
    }

    struct RecordingSink {
        called: AtomicBool,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn store(&self, _row: ResultRow) -> anyhow::Result<()> {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn fresh_executor(output: &'static str) -> (Arc<ScanExecutor>, tempfile::TempDir) {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        scanforge_db::run_migrations(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let executor = Arc::new(ScanExecutor {
            skip_cache: Arc::new(SkipCache::new(pool.clone())),
            pool,
            http: reqwest::Client::new(),
            sandboxed_runtime: Arc::new(StubRuntime { output: output.as_bytes().to_vec() }),
            in_process_runtime: InProcessRuntime,
            janitor: Arc::new(ResourceJanitor::new(None)),
            result_sink: Arc::new(RecordingSink { called: AtomicBool::new(false) }),
            proxy_base_url: "https://proxy.invalid".to_string(),
            binary_proxy_url: "https://bin.invalid".to_string(),
            workspace_root: dir.path().to_path_buf(),
            binary_cache_dir: dir.path().join("bin-cache"),
            default_analyzer_binary: PathBuf::from("/bin/true"),
            analyzer_version: "v1".to_string(),
            schema_version: "s1".to_string(),
        });
        (executor, dir)
    }

    fn sample_request() -> ScanRequest {
        ScanRequest {
            module: ModulePath::new("github.com/foo/bar").unwrap(),
            version: ModuleVersion::new("v1.0.0").unwrap(),
            suffix: None,
            namespace: Namespace("analysis".to_string()),
            binary_version: None,
            extra_args: vec![],
            insecure: true,
            init: false,
            serve: false,
            job_id: None,
            disable_proxy_fetch: false,
        }
    }

    #[tokio::test]
    async fn second_identical_request_is_skipped() {
        let (executor, _dir) = fresh_executor(r#"{"pkg":{"vet":{"diagnostics":[]}}}"#).await;
        let cancel = CancellationToken::new();
        let request = sample_request();

        let work_version = WorkVersion {
            binary_args: vec![],
            analyzer_version: executor.analyzer_version.clone(),
            schema_version: executor.schema_version.clone(),
            binary_hash: None,
            vuln_db_last_modified: None,
            go_version: None,
        };
        executor
            .skip_cache
            .record(
                &request.module,
                &request.version,
                "",
                scanforge_protocol::WorkState {
                    work_version,
                    error_category: None,
                },
            )
            .await
            .unwrap();

        let outcome = executor.execute(&request, &cancel).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Skipped));
    }

    #[tokio::test]
    async fn canceled_token_short_circuits_before_any_work() {
        let (executor, _dir) = fresh_executor("{}").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut request = sample_request();
        request.job_id = Some(JobId::new("alice", "240102-153045").unwrap());

        let err = executor.execute(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Canceled(_)));
    }

    #[tokio::test]
    async fn serve_true_bypasses_the_result_sink() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        scanforge_db::run_migrations(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink { called: AtomicBool::new(false) });

        let executor = Arc::new(ScanExecutor {
            skip_cache: Arc::new(SkipCache::new(pool.clone())),
            pool,
            http: reqwest::Client::new(),
            sandboxed_runtime: Arc::new(StubRuntime {
                output: br#"{"pkg":{"vet":{"diagnostics":[]}}}"#.to_vec(),
            }),
            in_process_runtime: InProcessRuntime,
            janitor: Arc::new(ResourceJanitor::new(None)),
            result_sink: sink.clone(),
            proxy_base_url: "https://proxy.invalid".to_string(),
            binary_proxy_url: "https://bin.invalid".to_string(),
            workspace_root: dir.path().to_path_buf(),
            binary_cache_dir: dir.path().join("bin-cache"),
            default_analyzer_binary: PathBuf::from("/bin/true"),
            analyzer_version: "v1".to_string(),
            schema_version: "s1".to_string(),
        });

        let mut request = sample_request();
        request.serve = true;
        let cancel = CancellationToken::new();
        executor.execute(&request, &cancel).await.unwrap();

        assert!(!sink.called.load(Ordering::SeqCst));
    }
}
