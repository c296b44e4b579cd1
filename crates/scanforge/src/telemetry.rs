//! Process-wide wiring shared by every subcommand: the database pool and
//! the executor the `scan` and `worker` subcommands drive. Built once in
//! `main` and threaded down into whichever subcommand runs.

use anyhow::{Context, Result};
use scanforge_coordinator::{DbResultSink, ScanExecutor};
use scanforge_db::{create_pool, run_migrations, DbConfig, DbPool};
use scanforge_logging::scanforge_home;
use scanforge_worker::sandbox::{InProcessRuntime, SandboxedRuntime};
use scanforge_worker::{ResourceJanitor, SandboxRuntime};
use std::path::PathBuf;
use std::sync::Arc;

/// Resolve the sqlite database path under the orchestrator's home
/// directory, creating the directory if needed.
pub fn default_db_path() -> PathBuf {
    let home = scanforge_home();
    let _ = std::fs::create_dir_all(&home);
    home.join("scanforge.sqlite3")
}

pub async fn connect(db_path: Option<PathBuf>) -> Result<DbPool> {
    let path = db_path.unwrap_or_else(default_db_path);
    let config = DbConfig::sqlite(path.to_string_lossy());
    let pool = create_pool(config).await.context("connecting to the scan database")?;
    run_migrations(&pool).await.context("running database migrations")?;
    Ok(pool)
}

/// Build the per-process `ScanExecutor` shared by the `scan` and `worker`
/// subcommands. `launcher`/`bundle_root` name the sandbox bundle launcher;
/// when absent the executor falls back to the in-process runtime for
/// everything, so only `--insecure` requests are meaningfully sandboxed.
/// Bumped whenever the `results`/`work_states` row shape changes
/// incompatibly. Part of every work-version fingerprint, so a build with a
/// new schema never skips a scan on the strength of a prior build's entry.
pub const SCHEMA_VERSION: &str = "1";

pub fn build_executor(
    pool: DbPool,
    analyzer_binary: PathBuf,
    analyzer_version: String,
    launcher: Option<PathBuf>,
    bundle_root: Option<PathBuf>,
) -> Arc<ScanExecutor> {
    let home = scanforge_home();
    let sandboxed_runtime: Arc<dyn SandboxRuntime> = match (launcher, bundle_root) {
        (Some(launcher), Some(bundle_root)) => Arc::new(SandboxedRuntime { launcher, bundle_root }),
        _ => Arc::new(InProcessRuntime),
    };

    Arc::new(ScanExecutor {
        skip_cache: Arc::new(scanforge_coordinator::SkipCache::new(pool.clone())),
        result_sink: Arc::new(DbResultSink::new(pool.clone())),
        pool,
        http: reqwest::Client::new(),
        sandboxed_runtime,
        in_process_runtime: InProcessRuntime,
        janitor: Arc::new(ResourceJanitor::new(Some(home.join("sandbox-cache")))),
        proxy_base_url: std::env::var("SCANFORGE_PROXY_URL")
            .unwrap_or_else(|_| "https://proxy.golang.org".to_string()),
        binary_proxy_url: std::env::var("SCANFORGE_BINARY_PROXY_URL")
            .unwrap_or_else(|_| "https://proxy.golang.org/binaries".to_string()),
        workspace_root: home.join("workspaces"),
        binary_cache_dir: home.join("bin-cache"),
        default_analyzer_binary: analyzer_binary,
        analyzer_version,
        schema_version: SCHEMA_VERSION.to_string(),
    })
}

