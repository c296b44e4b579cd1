//! Resource Janitor: tracks in-flight scans, runs a cache-clean pass when
//! the worker goes idle, and restarts the process after a fixed number of
//! requests to work around a leak in the sandbox runtime.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{info, warn};

/// After this many executed scan requests the worker exits the process
/// (status 0, not an error) so its supervisor restarts it fresh. This is
/// a documented workaround for a resource leak in the sandbox runtime,
/// not a bug — removing it requires fixing that leak first.
const SELF_EXIT_THRESHOLD: u64 = 250;

pub struct ResourceJanitor {
    active_scans: AtomicI64,
    executed_count: AtomicI64,
    sandbox_cache_dir: Option<PathBuf>,
}

impl ResourceJanitor {
    pub fn new(sandbox_cache_dir: Option<PathBuf>) -> Self {
        Self {
            active_scans: AtomicI64::new(0),
            executed_count: AtomicI64::new(0),
            sandbox_cache_dir,
        }
    }

    pub fn enter_scan(&self) {
        self.active_scans.fetch_add(1, Ordering::SeqCst);
        log_cgroup_memory("scan-enter");
    }

    /// Current number of in-flight scans; used by a graceful shutdown to
    /// wait for the active count to drain before exiting.
    pub fn active_scans(&self) -> i64 {
        self.active_scans.load(Ordering::SeqCst)
    }

    /// Decrement the active-scan counter. If it reaches zero, clean caches.
    /// Then bump the executed-request counter; at the threshold, exit the
    /// process entirely.
    pub async fn leave_scan(&self) {
        let remaining = self.active_scans.fetch_sub(1, Ordering::SeqCst) - 1;
        log_cgroup_memory("scan-leave");
        if remaining == 0 {
            self.clean_caches().await;
        }

        let executed = self.executed_count.fetch_add(1, Ordering::SeqCst) + 1;
        if executed as u64 >= SELF_EXIT_THRESHOLD {
            info!(executed, "self-exit threshold reached, restarting worker process");
            std::process::exit(0);
        }
    }

    /// Runs `go clean` on the blocking pool: `Command::output` blocks the
    /// calling thread until the subprocess exits, which would otherwise
    /// stall a tokio worker thread for however long the cache clean takes.
    async fn clean_caches(&self) {
        let sandbox_cache_dir = self.sandbox_cache_dir.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut command = Command::new("go");
            command.args(["clean", "-cache", "-modcache"]);
            if let Some(cache_dir) = &sandbox_cache_dir {
                command.env_clear();
                command.env("GOMODCACHE", cache_dir);
                command.env("GOCACHE", cache_dir.join("build"));
            }
            command.stdout(Stdio::null()).stderr(Stdio::piped());
            command.output()
        })
        .await;

        match result {
            Ok(Ok(output)) if !output.status.success() => {
                warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "cache-clean subprocess failed"
                );
            }
            Ok(Err(err)) => warn!(error = %err, "failed to spawn cache-clean subprocess"),
            Err(err) => warn!(error = %err, "cache-clean task panicked"),
            Ok(Ok(_)) => {}
        }
    }
}

/// Best-effort cgroup v2 (falling back to v1) memory usage read, logged at
/// each phase boundary. Absence of cgroup files (non-Linux, unconfined) is
/// not an error — just nothing gets logged.
fn log_cgroup_memory(phase: &str) {
    if let Some(bytes) = read_cgroup_memory_current() {
        info!(phase, memory_bytes = bytes, "cgroup memory usage");
    }
}

fn read_cgroup_memory_current() -> Option<u64> {
    if let Ok(v2) = std::fs::read_to_string("/sys/fs/cgroup/memory.current") {
        return v2.trim().parse().ok();
    }
    if let Ok(v1) = std::fs::read_to_string("/sys/fs/cgroup/memory/memory.usage_in_bytes") {
        return v1.trim().parse().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leave_scan_triggers_clean_at_zero_without_panicking() {
        let janitor = ResourceJanitor::new(None);
        janitor.enter_scan();
        janitor.leave_scan().await;
        assert_eq!(janitor.active_scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn active_scans_tracks_concurrent_enter_leave() {
        let janitor = ResourceJanitor::new(None);
        janitor.enter_scan();
        janitor.enter_scan();
        assert_eq!(janitor.active_scans.load(Ordering::SeqCst), 2);
        janitor.leave_scan().await;
        assert_eq!(janitor.active_scans.load(Ordering::SeqCst), 1);
    }
}
