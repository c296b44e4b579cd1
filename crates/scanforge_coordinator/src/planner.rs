//! Enqueue Planner: turns a corpus listing into scan specs and fans them
//! out through a [`TaskQueue`] under a bounded concurrency cap.

use crate::queue::{EnqueueOpts, ScanTask, TaskQueue};
use scanforge_ids::{ModulePath, ModuleVersion};
use scanforge_protocol::Namespace;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

const MAX_IN_FLIGHT_ENQUEUES: usize = 16;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("corpus line {line}: expected 'module [version] count', got {text:?}")]
    MalformedLine { line: usize, text: String },
    #[error("corpus line {line}: invalid module {module:?}")]
    InvalidModule { line: usize, module: String },
    #[error("corpus line {line}: count {text:?} is not a non-negative integer")]
    InvalidCount { line: usize, text: String },
}

/// One module/version pulled from the corpus, having cleared the
/// popularity-count threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub module: ModulePath,
    pub version: ModuleVersion,
}

/// Parse a corpus listing: one `<module> [<version>] <count>` line per
/// module, blank lines and `#`-prefixed comment lines ignored. A line with
/// two fields omits the version, which then defaults to the `latest`
/// sentinel. Only lines whose count falls within `[min, max]` are kept.
pub fn parse_corpus(corpus: &str, min: u64, max: u64) -> Result<Vec<CorpusEntry>, PlannerError> {
    let mut entries = Vec::new();

    for (idx, raw_line) in corpus.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();

        let (module_str, version_str, count_str) = match fields.as_slice() {
            [module, version, count] => (*module, *version, *count),
            [module, count] => (*module, "latest", *count),
            _ => {
                return Err(PlannerError::MalformedLine {
                    line: line_no,
                    text: line.to_string(),
                })
            }
        };

        let count: u64 = count_str.parse().map_err(|_| PlannerError::InvalidCount {
            line: line_no,
            text: count_str.to_string(),
        })?;
        if count < min || count > max {
            continue;
        }

        let module = ModulePath::new(module_str).map_err(|_| PlannerError::InvalidModule {
            line: line_no,
            module: module_str.to_string(),
        })?;
        let version = if version_str == "latest" {
            ModuleVersion::latest()
        } else {
            ModuleVersion::new(version_str).map_err(|_| PlannerError::InvalidModule {
                line: line_no,
                module: version_str.to_string(),
            })?
        };

        entries.push(CorpusEntry { module, version });
    }

    Ok(entries)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EnqueueSummary {
    pub enqueued: u64,
    pub skipped: u64,
    pub errored: u64,
}

/// Enqueue every corpus entry, skipping the standard-library sentinel
/// module and capping concurrent in-flight enqueue calls at
/// [`MAX_IN_FLIGHT_ENQUEUES`]. Per-entry failures are logged and counted,
/// never aborting the rest of the batch.
pub async fn enqueue_corpus(
    queue: Arc<dyn TaskQueue>,
    entries: Vec<CorpusEntry>,
    namespace: Namespace,
) -> EnqueueSummary {
    let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT_ENQUEUES));
    let mut handles = Vec::with_capacity(entries.len());

    for entry in entries {
        if entry.module.is_std() {
            continue;
        }
        let semaphore = Arc::clone(&semaphore);
        let queue = Arc::clone(&queue);
        let namespace = namespace.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let task = ScanTask {
                name: entry.module.as_str().to_string(),
                params: entry.version.as_str().to_string(),
            };
            let opts = EnqueueOpts {
                namespace,
                disable_proxy_fetch: false,
                task_name_suffix: String::new(),
            };
            queue.enqueue_scan(task, opts).await
        }));
    }

    let mut summary = EnqueueSummary::default();
    for handle in handles {
        match handle.await {
            Ok(Ok(true)) => summary.enqueued += 1,
            Ok(Ok(false)) => summary.skipped += 1,
            Ok(Err(err)) => {
                warn!(error = %err, "enqueue failed");
                summary.errored += 1;
            }
            Err(err) => {
                warn!(error = %err, "enqueue task panicked");
                summary.errored += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_two_and_three_field_lines() {
        let corpus = "m1 v1.0.0 18\nm2 v2.3.4 5\nm3 1\n";
        let entries = parse_corpus(corpus, 1, u64::MAX).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].module.as_str(), "m1");
        assert_eq!(entries[0].version.as_str(), "v1.0.0");
        assert_eq!(entries[2].module.as_str(), "m3");
        assert!(entries[2].version.is_latest());
    }

    #[test]
    fn min_threshold_filters_low_count_entries() {
        let corpus = "m1 v1.0.0 18\nm2 v2.3.4 5\nm3 1\n";
        let entries = parse_corpus(corpus, 6, u64::MAX).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].module.as_str(), "m1");
    }

    #[test]
    fn max_threshold_filters_high_count_entries() {
        let corpus = "m1 v1.0.0 18\nm2 v2.3.4 5\nm3 1\n";
        let entries = parse_corpus(corpus, 0, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].module.as_str(), "m2");
        assert_eq!(entries[1].module.as_str(), "m3");
    }

    #[test]
    fn blank_lines_are_ignored() {
        let corpus = "m1 v1.0.0 18\n\n\nm2 v2.3.4 5\n";
        let entries = parse_corpus(corpus, 1, u64::MAX).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn comment_lines_are_ignored() {
        let corpus = "# top-1000 corpus\nm1 v1.0.0 18\n# trailing note\nm2 v2.3.4 5\n";
        let entries = parse_corpus(corpus, 1, u64::MAX).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].module.as_str(), "m1");
        assert_eq!(entries[1].module.as_str(), "m2");
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = parse_corpus("m1 v1.0.0 18 extra\n", 1, u64::MAX).unwrap_err();
        assert!(matches!(err, PlannerError::MalformedLine { line: 1, .. }));
    }

    #[test]
    fn non_numeric_count_is_rejected() {
        let err = parse_corpus("m1 v1.0.0 many\n", 1, u64::MAX).unwrap_err();
        assert!(matches!(err, PlannerError::InvalidCount { line: 1, .. }));
    }
}
