//! Wire/storage types shared between the worker and the coordinator.

use chrono::{DateTime, Utc};
use scanforge_ids::{BinaryHash, JobId, ModulePath, ModuleVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of error categories a scan can be classified into.
///
/// Names are stable and appear verbatim in stored rows; do not rename a
/// variant without a migration of historical data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    InvalidArgument,
    NotFound,
    BadModule,
    ProxyError,
    ProxyTimeout,
    LoadPackages,
    LoadNoGoMod,
    LoadNoGoSum,
    LoadNoRequiredModule,
    LoadMissingGoSumEntry,
    LoadImportedLocal,
    LoadVendor,
    ScanOsError,
    ScanTooManyFiles,
    ScanSandboxError,
    ScanPanic,
    ScanSynthetic,
    BigQueryError,
    Misc,
}

impl ErrorCategory {
    pub const ALL: &'static [ErrorCategory] = &[
        ErrorCategory::InvalidArgument,
        ErrorCategory::NotFound,
        ErrorCategory::BadModule,
        ErrorCategory::ProxyError,
        ErrorCategory::ProxyTimeout,
        ErrorCategory::LoadPackages,
        ErrorCategory::LoadNoGoMod,
        ErrorCategory::LoadNoGoSum,
        ErrorCategory::LoadNoRequiredModule,
        ErrorCategory::LoadMissingGoSumEntry,
        ErrorCategory::LoadImportedLocal,
        ErrorCategory::LoadVendor,
        ErrorCategory::ScanOsError,
        ErrorCategory::ScanTooManyFiles,
        ErrorCategory::ScanSandboxError,
        ErrorCategory::ScanPanic,
        ErrorCategory::ScanSynthetic,
        ErrorCategory::BigQueryError,
        ErrorCategory::Misc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::BadModule => "BAD_MODULE",
            ErrorCategory::ProxyError => "PROXY_ERROR",
            ErrorCategory::ProxyTimeout => "PROXY_TIMEOUT",
            ErrorCategory::LoadPackages => "LOAD_PACKAGES",
            ErrorCategory::LoadNoGoMod => "LOAD_NO_GOMOD",
            ErrorCategory::LoadNoGoSum => "LOAD_NO_GOSUM",
            ErrorCategory::LoadNoRequiredModule => "LOAD_NO_REQUIRED_MODULE",
            ErrorCategory::LoadMissingGoSumEntry => "LOAD_MISSING_GOSUM_ENTRY",
            ErrorCategory::LoadImportedLocal => "LOAD_IMPORTED_LOCAL",
            ErrorCategory::LoadVendor => "LOAD_VENDOR",
            ErrorCategory::ScanOsError => "SCAN_OS_ERROR",
            ErrorCategory::ScanTooManyFiles => "SCAN_TOO_MANY_FILES",
            ErrorCategory::ScanSandboxError => "SCAN_SANDBOX_ERROR",
            ErrorCategory::ScanPanic => "SCAN_PANIC",
            ErrorCategory::ScanSynthetic => "SCAN_SYNTHETIC",
            ErrorCategory::BigQueryError => "BIGQUERY_ERROR",
            ErrorCategory::Misc => "MISC",
        }
    }

    /// LOAD categories are deterministic build failures: retrying without a
    /// work-version change would just reproduce the same failure, so the
    /// skip cache treats them as terminal. Everything else (timeouts,
    /// quota, flaky sandbox exits) is considered worth retrying.
    pub fn is_unrecoverable(&self) -> bool {
        unrecoverable(self.as_str())
    }
}

/// Family-prefix test used by the skip cache. Operates on the raw category
/// name rather than the enum so it also applies to category families that
/// aren't themselves valid `ErrorCategory` values (see the worked example
/// in the classifier's tests).
pub fn unrecoverable(category: &str) -> bool {
    category.starts_with("LOAD")
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseErrorCategoryError(pub String);

impl fmt::Display for ParseErrorCategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error category: {}", self.0)
    }
}

impl std::error::Error for ParseErrorCategoryError {}

impl FromStr for ErrorCategory {
    type Err = ParseErrorCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseErrorCategoryError(s.to_string()))
    }
}

/// The analyzer configuration fingerprint that determines whether a prior
/// scan's output is still valid. Equality is a value-level compare over
/// every field, not identity — two requests with identical settings
/// produce equal work-versions regardless of when they were constructed.
/// Fields present in a prior entry but absent (`None`) in the current one
/// are treated as unset on both sides, not as a mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkVersion {
    pub binary_args: Vec<String>,
    pub analyzer_version: String,
    /// Bumped whenever the stored result-row/finding shape changes
    /// incompatibly; a schema bump invalidates every prior work-version.
    pub schema_version: String,
    pub binary_hash: Option<BinaryHash>,
    /// Timestamp of the vulnerability database snapshot the scan ran
    /// against, when the analyzer is a vulnerability scanner.
    pub vuln_db_last_modified: Option<DateTime<Utc>>,
    /// Go toolchain version the module was built with, when relevant.
    pub go_version: Option<String>,
}

/// A stored pair of (work version, error category) used by the skip cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkState {
    pub work_version: WorkVersion,
    pub error_category: Option<ErrorCategory>,
}

impl WorkState {
    /// Should a scan matching `current` be skipped given this prior state?
    ///
    /// True iff the work-version is unchanged and either the prior attempt
    /// had no error, or its error was unrecoverable (deterministic).
    pub fn should_skip(&self, current: &WorkVersion) -> bool {
        if &self.work_version != current {
            return false;
        }
        match &self.error_category {
            None => true,
            Some(cat) => cat.is_unrecoverable(),
        }
    }
}

/// A logical partition of queue tasks and stored results, e.g. "analysis"
/// vs. "vulncheck".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One scan request as built by the Enqueue Planner / Request Parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub module: ModulePath,
    pub version: ModuleVersion,
    pub suffix: Option<String>,
    pub namespace: Namespace,
    pub binary_version: Option<BinaryHash>,
    pub extra_args: Vec<String>,
    pub insecure: bool,
    pub init: bool,
    pub serve: bool,
    pub job_id: Option<JobId>,
    pub disable_proxy_fetch: bool,
}

/// An opaque-to-the-core diagnostic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub package: String,
    pub analyzer: String,
    pub message: String,
    pub position: Option<String>,
    /// Source lines surrounding `position`, when it could be read off disk.
    pub source_snippet: Option<String>,
}

/// A persisted outcome of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub module: ModulePath,
    pub version: ModuleVersion,
    pub namespace: Namespace,
    pub job_id: Option<JobId>,
    pub findings: Vec<Finding>,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A user-initiated batch of scans, identified by a deterministic id.
///
/// Counters only ever increase; `canceled` only ever transitions
/// false→true — both are enforced by the Job Aggregator's update API, not
/// by this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// The user the job was started on behalf of; also the id's prefix.
    pub user: String,
    pub started_at: DateTime<Utc>,
    /// The corpus/enqueue URL or description the job was submitted with.
    pub url: String,
    pub canceled: bool,
    /// Analyzer binary name the job's scans were run with, if fixed for
    /// the whole batch.
    pub binary: String,
    pub binary_version: Option<BinaryHash>,
    pub binary_args: Vec<String>,
    pub num_enqueued: i64,
    pub num_started: i64,
    pub num_succeeded: i64,
    pub num_errored: i64,
    pub num_failed: i64,
    pub num_skipped: i64,
}

impl Job {
    pub fn new(id: JobId, user: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user: user.into(),
            started_at,
            url: String::new(),
            canceled: false,
            binary: String::new(),
            binary_version: None,
            binary_args: Vec::new(),
            num_enqueued: 0,
            num_started: 0,
            num_succeeded: 0,
            num_errored: 0,
            num_failed: 0,
            num_skipped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_pinning() {
        assert!(unrecoverable("LOAD"));
        assert!(!unrecoverable("MISC"));
        assert!(!unrecoverable("BIGQUERY"));
    }

    #[test]
    fn load_subcategories_are_unrecoverable() {
        assert!(ErrorCategory::LoadNoGoMod.is_unrecoverable());
        assert!(ErrorCategory::LoadVendor.is_unrecoverable());
        assert!(!ErrorCategory::ProxyError.is_unrecoverable());
        assert!(!ErrorCategory::ScanPanic.is_unrecoverable());
    }

    #[test]
    fn work_state_skip_rule() {
        let wv = WorkVersion {
            binary_args: vec![],
            analyzer_version: "v1".into(),
            schema_version: "s1".into(),
            binary_hash: None,
            vuln_db_last_modified: None,
            go_version: None,
        };
        let other_wv = WorkVersion {
            analyzer_version: "v2".into(),
            ..wv.clone()
        };

        let load_state = WorkState {
            work_version: wv.clone(),
            error_category: Some(ErrorCategory::LoadPackages),
        };
        assert!(load_state.should_skip(&wv));
        assert!(!load_state.should_skip(&other_wv));

        let proxy_state = WorkState {
            work_version: wv.clone(),
            error_category: Some(ErrorCategory::ProxyError),
        };
        assert!(!proxy_state.should_skip(&wv));

        let ok_state = WorkState {
            work_version: wv.clone(),
            error_category: None,
        };
        assert!(ok_state.should_skip(&wv));

        let schema_bumped = WorkVersion {
            schema_version: "s2".into(),
            ..wv.clone()
        };
        assert!(!ok_state.should_skip(&schema_bumped));

        let go_bumped = WorkVersion {
            go_version: Some("1.22".into()),
            ..wv.clone()
        };
        assert!(!ok_state.should_skip(&go_bumped));
    }

    #[test]
    fn error_category_round_trips_through_str() {
        for cat in ErrorCategory::ALL {
            let parsed: ErrorCategory = cat.as_str().parse().unwrap();
            assert_eq!(parsed, *cat);
        }
    }
}
