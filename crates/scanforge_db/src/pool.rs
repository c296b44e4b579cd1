//! Database pool creation.
//!
//! Compile-time database selection via feature flags: `sqlite` (default)
//! or `postgres`. Concrete pool types are used (not `sqlx::AnyPool`) so
//! `#[derive(FromRow)]` works with enums and `DateTime` columns. If both
//! features are enabled, `postgres` takes priority.

use thiserror::Error;
use tracing::info;

use crate::DatabaseType;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid database url: {0}")]
    InvalidUrl(String),

    #[error("database type {0} not compiled in; rebuild with the '{1}' feature")]
    NotCompiled(String, String),
}

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPool = sqlx::PgPool;

#[cfg(feature = "sqlite")]
pub type DbPool = sqlx::SqlitePool;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbRow = sqlx::postgres::PgRow;

#[cfg(feature = "sqlite")]
pub type DbRow = sqlx::sqlite::SqliteRow;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub db_type: DatabaseType,
    pub max_connections: u32,
}

impl DbConfig {
    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref()),
            db_type: DatabaseType::Sqlite,
            max_connections: 5,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            db_type: DatabaseType::Sqlite,
            max_connections: 1,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db_type: DatabaseType::Postgres,
            max_connections: 10,
        }
    }

    pub fn from_url(url: impl Into<String>) -> Result<Self, PoolError> {
        let url = url.into();
        let db_type = DatabaseType::from_url(&url).ok_or_else(|| PoolError::InvalidUrl(url.clone()))?;
        let max_connections = match db_type {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => 5,
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => 10,
            #[allow(unreachable_patterns)]
            _ => return Err(PoolError::NotCompiled(db_type.to_string(), "sqlite or postgres".to_string())),
        };
        Ok(Self {
            url,
            db_type,
            max_connections,
        })
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

pub async fn create_pool(config: DbConfig) -> Result<DbPool, PoolError> {
    #[cfg(feature = "sqlite")]
    {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        apply_sqlite_optimizations(&pool).await?;
        info!(db_type = %config.db_type, "connected to database");
        return Ok(pool);
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!(db_type = %config.db_type, "connected to database");
        return Ok(pool);
    }

    #[allow(unreachable_code)]
    Err(PoolError::NotCompiled(
        "unknown".to_string(),
        "sqlite or postgres".to_string(),
    ))
}

#[cfg(feature = "sqlite")]
async fn apply_sqlite_optimizations(pool: &DbPool) -> Result<(), PoolError> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn sqlite_memory_pool_connects() {
        let pool = create_pool(DbConfig::sqlite_memory()).await;
        assert!(pool.is_ok());
    }
}
