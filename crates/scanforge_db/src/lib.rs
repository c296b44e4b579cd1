//! Storage layer backing the Job Aggregator and the Work-Version Cache.
//!
//! Backed by `sqlx`: sqlite by default, postgres behind a feature flag.
//! Each document (job, work-state) is updated through a single-document
//! transaction rather than long-lived cross-table joins.

pub mod error;
pub mod jobs;
pub mod pool;
pub mod results;
pub mod workcache;

pub use error::{DbError, Result};
pub use jobs::{cancel_job, create_job, delete_job, get_job, increment, list_jobs, update_job, JobCounter};
pub use pool::{create_pool, DbConfig, DbPool, DbRow, PoolError};

/// Database backend selected at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum DatabaseType {
    Sqlite,
    Postgres,
}

impl DatabaseType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("sqlite:") {
            return Some(Self::Sqlite);
        }
        if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            return Some(Self::Postgres);
        }
        None
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Run every `CREATE TABLE IF NOT EXISTS` this crate owns. Called once at
/// startup by both the coordinator and any standalone tooling.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::query(jobs::CREATE_JOBS_TABLE).execute(pool).await?;
    sqlx::query(workcache::CREATE_WORK_STATES_TABLE).execute(pool).await?;
    sqlx::query(results::CREATE_RESULTS_TABLE).execute(pool).await?;
    Ok(())
}

/// Round-trip a trivial query to confirm the pool can still reach the
/// database. Used by the coordinator's health endpoint.
pub async fn ping(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_type_detected_from_url() {
        assert_eq!(DatabaseType::from_url("sqlite:foo.db"), Some(DatabaseType::Sqlite));
        assert_eq!(DatabaseType::from_url("postgres://localhost/db"), Some(DatabaseType::Postgres));
        assert_eq!(DatabaseType::from_url("mysql://localhost/db"), None);
    }
}
