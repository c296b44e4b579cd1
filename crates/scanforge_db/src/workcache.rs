//! Persisted backing store for the Work-Version Cache, keyed by
//! `(module, version[, binary])`. The in-memory skip-decision layer in the
//! coordinator loads from and writes through this store; this module
//! itself knows nothing about the skip rule, only storage.

use crate::error::Result;
use crate::pool::DbPool;
use scanforge_ids::{ModulePath, ModuleVersion};
use scanforge_protocol::{ErrorCategory, WorkState, WorkVersion};

pub const CREATE_WORK_STATES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS work_states (
    module TEXT NOT NULL,
    version TEXT NOT NULL,
    binary TEXT NOT NULL DEFAULT '',
    work_version_json TEXT NOT NULL,
    error_category TEXT,
    PRIMARY KEY (module, version, binary)
)";

fn binary_key(work_version: &WorkVersion) -> String {
    work_version
        .binary_hash
        .as_ref()
        .map(|h| h.as_str().to_string())
        .unwrap_or_default()
}

pub async fn get(
    pool: &DbPool,
    module: &ModulePath,
    version: &ModuleVersion,
    binary: &str,
) -> Result<Option<WorkState>> {
    let row = sqlx::query_as::<_, WorkStateRow>(
        "SELECT work_version_json, error_category FROM work_states WHERE module = ? AND version = ? AND binary = ?",
    )
    .bind(module.as_str())
    .bind(version.as_str())
    .bind(binary)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

pub async fn set(
    pool: &DbPool,
    module: &ModulePath,
    version: &ModuleVersion,
    state: &WorkState,
) -> Result<()> {
    let binary = binary_key(&state.work_version);
    let work_version_json = serde_json::to_string(&state.work_version)?;
    let error_category = state.error_category.map(|c| c.as_str().to_string());

    sqlx::query(
        "INSERT INTO work_states (module, version, binary, work_version_json, error_category)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (module, version, binary) DO UPDATE SET
           work_version_json = excluded.work_version_json,
           error_category = excluded.error_category",
    )
    .bind(module.as_str())
    .bind(version.as_str())
    .bind(binary)
    .bind(work_version_json)
    .bind(error_category)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct WorkStateRow {
    work_version_json: String,
    error_category: Option<String>,
}

impl TryFrom<WorkStateRow> for WorkState {
    type Error = crate::error::DbError;

    fn try_from(row: WorkStateRow) -> Result<Self> {
        let work_version: WorkVersion = serde_json::from_str(&row.work_version_json)?;
        let error_category = row
            .error_category
            .map(|s| s.parse::<ErrorCategory>())
            .transpose()
            .map_err(|e| crate::error::DbError::invalid_state(e.to_string()))?;
        Ok(WorkState {
            work_version,
            error_category,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};

    async fn fresh_pool() -> DbPool {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        sqlx::query(CREATE_WORK_STATES_TABLE).execute(&pool).await.unwrap();
        pool
    }

    fn sample_work_version() -> WorkVersion {
        WorkVersion {
            binary_args: vec![],
            analyzer_version: "v1".to_string(),
            schema_version: "s1".to_string(),
            binary_hash: None,
            vuln_db_last_modified: None,
            go_version: None,
        }
    }

    #[tokio::test]
    async fn round_trips_through_storage() {
        let pool = fresh_pool().await;
        let module = ModulePath::new("github.com/foo/bar").unwrap();
        let version = ModuleVersion::new("v1.0.0").unwrap();
        let state = WorkState {
            work_version: sample_work_version(),
            error_category: Some(ErrorCategory::LoadNoGoMod),
        };
        set(&pool, &module, &version, &state).await.unwrap();

        let fetched = get(&pool, &module, &version, "").await.unwrap().unwrap();
        assert_eq!(fetched, state);
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let pool = fresh_pool().await;
        let module = ModulePath::new("github.com/missing").unwrap();
        let version = ModuleVersion::new("v1.0.0").unwrap();
        assert!(get(&pool, &module, &version, "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_existing_entry() {
        let pool = fresh_pool().await;
        let module = ModulePath::new("github.com/foo/bar").unwrap();
        let version = ModuleVersion::new("v1.0.0").unwrap();
        let first = WorkState {
            work_version: sample_work_version(),
            error_category: Some(ErrorCategory::ProxyError),
        };
        set(&pool, &module, &version, &first).await.unwrap();

        let second = WorkState {
            work_version: sample_work_version(),
            error_category: None,
        };
        set(&pool, &module, &version, &second).await.unwrap();

        let fetched = get(&pool, &module, &version, "").await.unwrap().unwrap();
        assert_eq!(fetched, second);
    }
}
