//! Job Aggregator: the transactional store of record for job counters.
//!
//! Counters only ever increase and `canceled` only ever transitions
//! false→true; callers update through the methods here rather than
//! writing raw SQL so that invariant stays centralized.

use crate::error::{DbError, Result};
use crate::pool::DbPool;
use chrono::{DateTime, Utc};
use scanforge_ids::JobId;
use scanforge_protocol::Job;
use std::time::Duration;

/// One of the four monotonic counters on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCounter {
    NumEnqueued,
    NumStarted,
    NumSucceeded,
    NumErrored,
    NumFailed,
    NumSkipped,
}

impl JobCounter {
    fn column(self) -> &'static str {
        match self {
            JobCounter::NumEnqueued => "num_enqueued",
            JobCounter::NumStarted => "num_started",
            JobCounter::NumSucceeded => "num_succeeded",
            JobCounter::NumErrored => "num_errored",
            JobCounter::NumFailed => "num_failed",
            JobCounter::NumSkipped => "num_skipped",
        }
    }
}

const MAX_RETRY_ATTEMPTS: u32 = 5;

pub async fn create_job(pool: &DbPool, job: &Job) -> Result<()> {
    let binary_args_json = serde_json::to_string(&job.binary_args)?;
    let result = sqlx::query(
        "INSERT INTO jobs (id, user, started_at, url, canceled, binary, binary_version, binary_args_json,
                           num_enqueued, num_started, num_succeeded, num_errored, num_failed, num_skipped)
         VALUES (?, ?, ?, ?, 0, ?, ?, ?, 0, 0, 0, 0, 0, 0)",
    )
    .bind(job.id.as_str())
    .bind(&job.user)
    .bind(job.started_at.to_rfc3339())
    .bind(&job.url)
    .bind(&job.binary)
    .bind(job.binary_version.as_ref().map(|h| h.as_str().to_string()))
    .bind(binary_args_json)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(DbError::constraint(format!("job {} already exists", job.id)))
        }
        Err(e) => Err(DbError::Sqlx(e)),
    }
}

pub async fn get_job(pool: &DbPool, id: &JobId) -> Result<Job> {
    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(Job::from).ok_or_else(|| DbError::not_found(format!("job {id}")))
}

/// Field-targeted atomic add. A single `UPDATE ... SET col = col + n`
/// needs no application-level retry for correctness, but sqlite can
/// transiently report the database as locked under write contention, so
/// a short bounded retry smooths that over.
pub async fn increment(pool: &DbPool, id: &JobId, counter: JobCounter, n: i64) -> Result<()> {
    let sql = format!("UPDATE jobs SET {} = {} + ? WHERE id = ?", counter.column(), counter.column());
    for attempt in 0..=MAX_RETRY_ATTEMPTS {
        match sqlx::query(&sql).bind(n).bind(id.as_str()).execute(pool).await {
            Ok(_) => return Ok(()),
            Err(sqlx::Error::Database(e)) if is_locked(&*e) && attempt < MAX_RETRY_ATTEMPTS => {
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(e) => return Err(DbError::Sqlx(e)),
        }
    }
    unreachable!("loop always returns before exhausting retries")
}

pub async fn cancel_job(pool: &DbPool, id: &JobId) -> Result<()> {
    sqlx::query("UPDATE jobs SET canceled = 1 WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Transactionally read a job, apply `f`, and write it back. `f` returning
/// an error aborts the write. Retries up to [`MAX_RETRY_ATTEMPTS`] times on
/// transient transaction aborts (sqlite "database is locked").
pub async fn update_job<F>(pool: &DbPool, id: &JobId, mut f: F) -> Result<Job>
where
    F: FnMut(&mut Job) -> Result<()>,
{
    for attempt in 0..=MAX_RETRY_ATTEMPTS {
        let mut tx = pool.begin().await?;
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(DbError::not_found(format!("job {id}")));
        };
        let mut job = Job::from(row);
        if let Err(err) = f(&mut job) {
            tx.rollback().await?;
            return Err(err);
        }

        let write_result = sqlx::query(
            "UPDATE jobs SET canceled = ?, num_enqueued = ?, num_started = ?, num_succeeded = ?, num_errored = ?, num_failed = ?, num_skipped = ? WHERE id = ?",
        )
        .bind(job.canceled)
        .bind(job.num_enqueued)
        .bind(job.num_started)
        .bind(job.num_succeeded)
        .bind(job.num_errored)
        .bind(job.num_failed)
        .bind(job.num_skipped)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await;

        match write_result {
            Ok(_) => {
                tx.commit().await?;
                return Ok(job);
            }
            Err(sqlx::Error::Database(e)) if is_locked(&*e) && attempt < MAX_RETRY_ATTEMPTS => {
                tx.rollback().await.ok();
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(e) => return Err(DbError::Sqlx(e)),
        }
    }
    unreachable!("loop always returns before exhausting retries")
}

/// Iterate jobs newest-first by `started_at`, stopping at the first
/// callback error.
pub async fn list_jobs<F>(pool: &DbPool, mut cb: F) -> Result<()>
where
    F: FnMut(&Job) -> Result<()>,
{
    let rows = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY started_at DESC")
        .fetch_all(pool)
        .await?;
    for row in rows {
        cb(&Job::from(row))?;
    }
    Ok(())
}

/// Idempotent: deleting an absent job is not an error.
pub async fn delete_job(pool: &DbPool, id: &JobId) -> Result<()> {
    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

fn is_locked(e: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    e.message().contains("database is locked")
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(20u64.saturating_mul(1 << attempt.min(6)))
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    user: String,
    started_at: String,
    url: String,
    canceled: bool,
    binary: String,
    binary_version: Option<String>,
    binary_args_json: String,
    num_enqueued: i64,
    num_started: i64,
    num_succeeded: i64,
    num_errored: i64,
    num_failed: i64,
    num_skipped: i64,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let started_at = DateTime::parse_from_rfc3339(&row.started_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let binary_version = row
            .binary_version
            .and_then(|h| scanforge_ids::BinaryHash::parse(h).ok());
        let binary_args = serde_json::from_str(&row.binary_args_json).unwrap_or_default();
        Job {
            id: JobId::parse(row.id).expect("stored job id is always non-empty"),
            user: row.user,
            started_at,
            url: row.url,
            canceled: row.canceled,
            binary: row.binary,
            binary_version,
            binary_args,
            num_enqueued: row.num_enqueued,
            num_started: row.num_started,
            num_succeeded: row.num_succeeded,
            num_errored: row.num_errored,
            num_failed: row.num_failed,
            num_skipped: row.num_skipped,
        }
    }
}

pub const CREATE_JOBS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    user TEXT NOT NULL DEFAULT '',
    started_at TEXT NOT NULL,
    url TEXT NOT NULL DEFAULT '',
    canceled INTEGER NOT NULL DEFAULT 0,
    binary TEXT NOT NULL DEFAULT '',
    binary_version TEXT,
    binary_args_json TEXT NOT NULL DEFAULT '[]',
    num_enqueued INTEGER NOT NULL DEFAULT 0,
    num_started INTEGER NOT NULL DEFAULT 0,
    num_succeeded INTEGER NOT NULL DEFAULT 0,
    num_errored INTEGER NOT NULL DEFAULT 0,
    num_failed INTEGER NOT NULL DEFAULT 0,
    num_skipped INTEGER NOT NULL DEFAULT 0
)";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use std::sync::Arc;

    async fn fresh_pool() -> DbPool {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        sqlx::query(CREATE_JOBS_TABLE).execute(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let pool = fresh_pool().await;
        let id = JobId::new("alice", "240102-153045").unwrap();
        create_job(&pool, &Job::new(id.clone(), "alice", Utc::now())).await.unwrap();
        let job = get_job(&pool, &id).await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.user, "alice");
        assert_eq!(job.num_started, 0);
        assert_eq!(job.num_enqueued, 0);
        assert!(job.binary_args.is_empty());
    }

    #[tokio::test]
    async fn create_round_trips_binary_fields() {
        let pool = fresh_pool().await;
        let id = JobId::new("bob", "240102-153046").unwrap();
        let mut job = Job::new(id.clone(), "bob", Utc::now());
        job.url = "https://corpus.invalid/top-1000".to_string();
        job.binary = "govulncheck".to_string();
        job.binary_args = vec!["-scan".to_string(), "symbol".to_string()];
        create_job(&pool, &job).await.unwrap();

        let fetched = get_job(&pool, &id).await.unwrap();
        assert_eq!(fetched.url, job.url);
        assert_eq!(fetched.binary, job.binary);
        assert_eq!(fetched.binary_args, job.binary_args);
    }

    #[tokio::test]
    async fn num_enqueued_increments_independently_of_other_counters() {
        let pool = fresh_pool().await;
        let id = JobId::new("carol", "240102-153047").unwrap();
        create_job(&pool, &Job::new(id.clone(), "carol", Utc::now())).await.unwrap();
        increment(&pool, &id, JobCounter::NumEnqueued, 3).await.unwrap();
        let job = get_job(&pool, &id).await.unwrap();
        assert_eq!(job.num_enqueued, 3);
        assert_eq!(job.num_started, 0);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let pool = fresh_pool().await;
        let id = JobId::new("alice", "240102-153045").unwrap();
        create_job(&pool, &Job::new(id.clone(), "alice", Utc::now())).await.unwrap();
        let err = create_job(&pool, &Job::new(id, "alice", Utc::now())).await.unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let pool = fresh_pool().await;
        let id = JobId::new("bob", "240102-153045").unwrap();
        assert!(matches!(get_job(&pool, &id).await, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_missing_job_is_not_an_error() {
        let pool = fresh_pool().await;
        let id = JobId::new("nobody", "240102-153045").unwrap();
        delete_job(&pool, &id).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_increments_converge_exactly() {
        let pool = Arc::new(fresh_pool().await);
        let id = JobId::new("carol", "240102-153045").unwrap();
        create_job(&pool, &Job::new(id.clone(), "alice", Utc::now())).await.unwrap();

        let k = 20;
        let mut handles = Vec::new();
        for _ in 0..k {
            let pool = Arc::clone(&pool);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                increment(&pool, &id, JobCounter::NumSucceeded, 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let job = get_job(&pool, &id).await.unwrap();
        assert_eq!(job.num_succeeded, k as i64);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_one_directional() {
        let pool = fresh_pool().await;
        let id = JobId::new("dave", "240102-153045").unwrap();
        create_job(&pool, &Job::new(id.clone(), "alice", Utc::now())).await.unwrap();
        cancel_job(&pool, &id).await.unwrap();
        cancel_job(&pool, &id).await.unwrap();
        assert!(get_job(&pool, &id).await.unwrap().canceled);
    }
}
