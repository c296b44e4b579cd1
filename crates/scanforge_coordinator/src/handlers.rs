//! HTTP-surface operations. Each function takes already-decoded inputs
//! (whatever request path/query/body parsing the router in front of this
//! crate produces) and returns a [`CoreError`] a transport layer maps to a
//! status code with [`status_code_for`]. No transport framework lives
//! here; these are plain async functions a handler shim calls into.

use crate::executor::{ExecutionOutcome, ExecutorError, ScanExecutor};
use crate::planner::{enqueue_corpus, parse_corpus, EnqueueSummary, PlannerError};
use crate::queue::{EnqueueOpts, QueueError, ScanTask, TaskQueue};
use chrono::Utc;
use regex::Regex;
use scanforge_db::{jobs, DbError, DbPool, JobCounter};
use scanforge_ids::{BinaryHash, IdParseError, JobId, ModulePath, ModuleVersion};
use scanforge_protocol::{parse_module_path, Job, Namespace, RequestParseError, ScanRequest};
use scanforge_worker::CancellationToken;
use std::sync::Arc;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad module: {0}")]
    BadModule(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<RequestParseError> for CoreError {
    fn from(err: RequestParseError) -> Self {
        CoreError::InvalidArgument(err.to_string())
    }
}

impl From<IdParseError> for CoreError {
    fn from(err: IdParseError) -> Self {
        CoreError::InvalidArgument(err.to_string())
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => CoreError::NotFound(msg),
            other => CoreError::Internal(other.into()),
        }
    }
}

impl From<PlannerError> for CoreError {
    fn from(err: PlannerError) -> Self {
        CoreError::InvalidArgument(err.to_string())
    }
}

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        CoreError::Internal(err.into())
    }
}

impl From<ExecutorError> for CoreError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::ScanFailed { category, message } if category.as_str() == "BAD_MODULE" => {
                CoreError::BadModule(message)
            }
            other => CoreError::Internal(other.into()),
        }
    }
}

/// Maps a core error to the HTTP status code a transport layer should
/// return. Anything not named here is a 500: the core never decides to
/// return a 5xx for something that should be a client error.
pub fn status_code_for(err: &CoreError) -> u16 {
    match err {
        CoreError::InvalidArgument(_) => 400,
        CoreError::NotFound(_) => 404,
        CoreError::BadModule(_) => 406,
        CoreError::Internal(_) => 500,
    }
}

fn password_redactor() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)password=[^&\s]+").expect("static pattern is valid"))
}

/// Strip connection-string passwords out of text before it's logged.
pub fn redact_connection_string(text: &str) -> String {
    password_redactor().replace_all(text, "password=REDACTED").to_string()
}

/// 1. Parse a scan request path/query and enqueue it onto the task queue.
/// When `job_id` is set and `pool` is given, a successful (non-duplicate)
/// enqueue bumps that job's `NumEnqueued` counter.
pub async fn enqueue_scan(
    queue: &Arc<dyn TaskQueue>,
    path: &str,
    namespace: Namespace,
    job_id: Option<JobId>,
    pool: Option<&DbPool>,
) -> Result<bool, CoreError> {
    let parsed = parse_module_path(path)?;
    let module = ModulePath::new(parsed.module)?;
    let version = ModuleVersion::new(parsed.version)?;

    let task = ScanTask {
        name: module.as_str().to_string(),
        params: version.as_str().to_string(),
    };
    let opts = EnqueueOpts {
        namespace,
        disable_proxy_fetch: false,
        task_name_suffix: job_id.as_ref().map(|id| format!("-{id}")).unwrap_or_default(),
    };
    let accepted = queue.enqueue_scan(task, opts).await?;

    if accepted {
        if let (Some(id), Some(pool)) = (&job_id, pool) {
            jobs::increment(pool, id, JobCounter::NumEnqueued, 1).await?;
        }
    }
    Ok(accepted)
}

/// 2. Run a scan synchronously (the `serve=true` path: caller waits on the
/// result instead of polling a job).
pub async fn run_scan_now(
    executor: &Arc<ScanExecutor>,
    request: &ScanRequest,
) -> Result<ExecutionOutcome, CoreError> {
    let cancel = CancellationToken::new();
    Ok(executor.execute(request, &cancel).await?)
}

/// Caller-supplied details for a new batch job beyond the mandatory
/// `user`. All fields default to empty when the job isn't tied to a fixed
/// analyzer binary/url (e.g. a single ad hoc scan).
#[derive(Debug, Clone, Default)]
pub struct NewJobParams {
    pub url: String,
    pub binary: String,
    pub binary_version: Option<BinaryHash>,
    pub binary_args: Vec<String>,
}

/// 3. Create a new job for `user`, returning its id.
pub async fn create_job(pool: &DbPool, user: &str, params: NewJobParams) -> Result<Job, CoreError> {
    if user.is_empty() {
        return Err(CoreError::InvalidArgument("user must not be empty".to_string()));
    }
    let now = Utc::now();
    let id = JobId::new(user, &now.format("%y%m%d-%H%M%S").to_string())?;
    let mut job = Job::new(id, user, now);
    job.url = params.url;
    job.binary = params.binary;
    job.binary_version = params.binary_version;
    job.binary_args = params.binary_args;
    jobs::create_job(pool, &job).await?;
    Ok(job)
}

/// 4. Fetch a job's current counters.
pub async fn get_job(pool: &DbPool, id: &JobId) -> Result<Job, CoreError> {
    Ok(jobs::get_job(pool, id).await?)
}

/// 5. List every known job, newest first.
pub async fn list_jobs(pool: &DbPool) -> Result<Vec<Job>, CoreError> {
    let mut out = Vec::new();
    jobs::list_jobs(pool, |job| {
        out.push(job.clone());
        Ok(())
    })
    .await?;
    Ok(out)
}

/// 6. Cancel a job; in-flight scans observe this on their next
/// cancellation check, they are not interrupted mid-invocation.
pub async fn cancel_job(pool: &DbPool, id: &JobId) -> Result<(), CoreError> {
    jobs::cancel_job(pool, id).await?;
    Ok(())
}

/// 7. Delete a job record. Idempotent.
pub async fn delete_job(pool: &DbPool, id: &JobId) -> Result<(), CoreError> {
    jobs::delete_job(pool, id).await?;
    Ok(())
}

/// 8. Parse a corpus listing and fan it out through the queue, returning
/// aggregate counts for logging. A parse failure is the caller's fault
/// (400); individual enqueue failures are aggregated, not raised.
pub async fn enqueue_corpus_listing(
    queue: Arc<dyn TaskQueue>,
    corpus: &str,
    min: u64,
    max: u64,
    namespace: Namespace,
) -> Result<EnqueueSummary, CoreError> {
    let entries = parse_corpus(corpus, min, max)?;
    Ok(enqueue_corpus(queue, entries, namespace).await)
}

/// 9. Liveness/readiness probe: confirms the database is reachable.
pub async fn healthcheck(pool: &DbPool) -> Result<(), CoreError> {
    scanforge_db::ping(pool).await?;
    Ok(())
}

/// 10. Fetch every result recorded for a job, newest first. `errors_only`
/// restricts the output to rows carrying an error category, dropping
/// clean scans.
pub async fn get_job_results(
    pool: &DbPool,
    job_id: &JobId,
    errors_only: bool,
) -> Result<Vec<scanforge_protocol::ResultRow>, CoreError> {
    Ok(scanforge_db::results::list_for_job(pool, job_id, errors_only).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(status_code_for(&CoreError::InvalidArgument("x".into())), 400);
        assert_eq!(status_code_for(&CoreError::NotFound("x".into())), 404);
        assert_eq!(status_code_for(&CoreError::BadModule("x".into())), 406);
        assert_eq!(status_code_for(&CoreError::Internal(anyhow::anyhow!("x"))), 500);
    }

    #[test]
    fn redacts_password_in_connection_string() {
        let dsn = "postgres://user:pw@host/db?password=supersecret&sslmode=require";
        let redacted = redact_connection_string(dsn);
        assert!(redacted.contains("password=REDACTED"));
        assert!(!redacted.contains("supersecret"));
    }

    struct AlwaysAcceptQueue;

    #[async_trait::async_trait]
    impl TaskQueue for AlwaysAcceptQueue {
        async fn enqueue_scan(&self, _task: ScanTask, _opts: EnqueueOpts) -> Result<bool, QueueError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn enqueue_scan_bumps_job_num_enqueued() {
        let pool = scanforge_db::create_pool(scanforge_db::DbConfig::sqlite_memory()).await.unwrap();
        scanforge_db::run_migrations(&pool).await.unwrap();

        let job = create_job(&pool, "alice", NewJobParams::default()).await.unwrap();
        let queue: Arc<dyn TaskQueue> = Arc::new(AlwaysAcceptQueue);

        let accepted = enqueue_scan(
            &queue,
            "golang.org/x/net@v0.1.0",
            Namespace("analysis".to_string()),
            Some(job.id.clone()),
            Some(&pool),
        )
        .await
        .unwrap();

        assert!(accepted);
        let reloaded = get_job(&pool, &job.id).await.unwrap();
        assert_eq!(reloaded.num_enqueued, 1);
    }

    #[test]
    fn redact_is_a_no_op_without_a_password_param() {
        let dsn = "sqlite:local.db";
        assert_eq!(redact_connection_string(dsn), dsn);
    }

    #[tokio::test]
    async fn get_job_results_filters_errors_only_and_orders_newest_first() {
        use crate::executor::{DbResultSink, ResultSink};
        use scanforge_ids::ModulePath as IdsModulePath;
        use scanforge_ids::ModuleVersion as IdsModuleVersion;
        use scanforge_protocol::ResultRow;

        let pool = scanforge_db::create_pool(scanforge_db::DbConfig::sqlite_memory()).await.unwrap();
        scanforge_db::run_migrations(&pool).await.unwrap();

        let job = create_job(&pool, "alice", NewJobParams::default()).await.unwrap();
        let sink = DbResultSink::new(pool.clone());

        let clean = ResultRow {
            module: IdsModulePath::new("golang.org/x/net".to_string()).unwrap(),
            version: IdsModuleVersion::new("v0.1.0".to_string()).unwrap(),
            namespace: Namespace("analysis".to_string()),
            job_id: Some(job.id.clone()),
            findings: Vec::new(),
            error_category: None,
            error_message: None,
            recorded_at: Utc::now(),
        };
        let failed = ResultRow {
            module: IdsModulePath::new("golang.org/x/text".to_string()).unwrap(),
            version: IdsModuleVersion::new("v0.2.0".to_string()).unwrap(),
            namespace: Namespace("analysis".to_string()),
            job_id: Some(job.id.clone()),
            findings: Vec::new(),
            error_category: Some(scanforge_protocol::ErrorCategory::BadModule),
            error_message: Some("go.mod missing".to_string()),
            recorded_at: Utc::now(),
        };
        sink.store(clean).await.unwrap();
        sink.store(failed.clone()).await.unwrap();

        let all = get_job_results(&pool, &job.id, false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].module.as_str(), "golang.org/x/text");

        let errors_only = get_job_results(&pool, &job.id, true).await.unwrap();
        assert_eq!(errors_only.len(), 1);
        assert_eq!(errors_only[0].error_message.as_deref(), Some("go.mod missing"));
    }
}
