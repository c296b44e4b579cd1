//! Append-only results store: one row per finished scan, findings
//! serialized as JSON. This is the durable side of step 6 of the executor
//! pipeline; requests with `serve=true` bypass it entirely and stream
//! their findings straight back to the caller instead.

use crate::error::Result;
use crate::pool::DbPool;
use chrono::{DateTime, Utc};
use scanforge_ids::{JobId, ModulePath, ModuleVersion};
use scanforge_protocol::{ErrorCategory, Finding, Namespace, ResultRow};

pub const CREATE_RESULTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module TEXT NOT NULL,
    version TEXT NOT NULL,
    namespace TEXT NOT NULL,
    job_id TEXT,
    findings_json TEXT NOT NULL,
    error_category TEXT,
    error_message TEXT,
    recorded_at TEXT NOT NULL
)";

pub async fn insert(pool: &DbPool, row: &ResultRow) -> Result<()> {
    let findings_json = serde_json::to_string(&row.findings)?;
    let error_category = row.error_category.map(|c| c.as_str().to_string());

    sqlx::query(
        "INSERT INTO results (module, version, namespace, job_id, findings_json, error_category, error_message, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(row.module.as_str())
    .bind(row.version.as_str())
    .bind(&row.namespace.0)
    .bind(row.job_id.as_ref().map(|id| id.as_str().to_string()))
    .bind(findings_json)
    .bind(error_category)
    .bind(&row.error_message)
    .bind(row.recorded_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Every result recorded for `job_id`, newest first. When `errors_only` is
/// set, rows with no error category (clean scans) are excluded.
pub async fn list_for_job(pool: &DbPool, job_id: &JobId, errors_only: bool) -> Result<Vec<ResultRow>> {
    let query = if errors_only {
        "SELECT module, version, namespace, job_id, findings_json, error_category, error_message, recorded_at
         FROM results WHERE job_id = ? AND error_category IS NOT NULL ORDER BY id DESC"
    } else {
        "SELECT module, version, namespace, job_id, findings_json, error_category, error_message, recorded_at
         FROM results WHERE job_id = ? ORDER BY id DESC"
    };

    let rows = sqlx::query_as::<_, ResultRowSql>(query)
        .bind(job_id.as_str())
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRowSql {
    module: String,
    version: String,
    namespace: String,
    job_id: Option<String>,
    findings_json: String,
    error_category: Option<String>,
    error_message: Option<String>,
    recorded_at: String,
}

impl TryFrom<ResultRowSql> for ResultRow {
    type Error = crate::error::DbError;

    fn try_from(row: ResultRowSql) -> Result<Self> {
        let findings: Vec<Finding> = serde_json::from_str(&row.findings_json)?;
        let error_category = row
            .error_category
            .map(|s| s.parse::<ErrorCategory>())
            .transpose()
            .map_err(|e| crate::error::DbError::invalid_state(e.to_string()))?;
        let recorded_at: DateTime<Utc> = row
            .recorded_at
            .parse()
            .map_err(|e: chrono::ParseError| crate::error::DbError::invalid_state(e.to_string()))?;
        let job_id = row
            .job_id
            .map(JobId::parse)
            .transpose()
            .map_err(|e| crate::error::DbError::invalid_state(e.to_string()))?;

        Ok(ResultRow {
            module: ModulePath::new(row.module).map_err(|e| crate::error::DbError::invalid_state(e.to_string()))?,
            version: ModuleVersion::new(row.version)
                .map_err(|e| crate::error::DbError::invalid_state(e.to_string()))?,
            namespace: Namespace(row.namespace),
            job_id,
            findings,
            error_category,
            error_message: row.error_message,
            recorded_at,
        })
    }
}
