//! `job get` / `job cancel` / `job delete` - operate on a single job
//!
//! Cancellation is cooperative: in-flight scans observe it on their next
//! check, they are not interrupted mid-invocation.

use crate::cli::error::HelpfulError;
use clap::Subcommand;
use scanforge_coordinator::handlers;
use scanforge_db::DbPool;
use scanforge_ids::JobId;

#[derive(Subcommand, Debug, Clone)]
pub enum JobAction {
    /// Show a job's current counters
    Get {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Mark a job canceled; does not interrupt in-flight scans
    Cancel { id: String },
    /// Delete a job record
    Delete { id: String },
    /// List recorded results for a job, newest first
    Results {
        id: String,
        /// Only show results that carry an error category
        #[arg(long)]
        errors: bool,
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(pool: &DbPool, action: JobAction) -> anyhow::Result<()> {
    match action {
        JobAction::Get { id, json } => run_get(pool, &id, json).await,
        JobAction::Cancel { id } => run_cancel(pool, &id).await,
        JobAction::Delete { id } => run_delete(pool, &id).await,
        JobAction::Results { id, errors, json } => run_results(pool, &id, errors, json).await,
    }
}

async fn run_get(pool: &DbPool, id: &str, json: bool) -> anyhow::Result<()> {
    let job_id = JobId::parse(id)?;
    let job = match handlers::get_job(pool, &job_id).await {
        Ok(job) => job,
        Err(scanforge_coordinator::CoreError::NotFound(_)) => {
            return Err(HelpfulError::job_not_found(id).into());
        }
        Err(err) => return Err(err.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        println!("JOB {}", job.id);
        println!("user:       {}", job.user);
        println!("started at: {}", job.started_at.to_rfc3339());
        println!("canceled:   {}", job.canceled);
        if !job.binary.is_empty() {
            println!("binary:     {}", job.binary);
        }
        println!("enqueued:   {}", job.num_enqueued);
        println!("started:    {}", job.num_started);
        println!("succeeded:  {}", job.num_succeeded);
        println!("failed:     {}", job.num_failed);
        println!("errored:    {}", job.num_errored);
        println!("skipped:    {}", job.num_skipped);
    }
    Ok(())
}

async fn run_cancel(pool: &DbPool, id: &str) -> anyhow::Result<()> {
    let job_id = JobId::parse(id)?;
    handlers::cancel_job(pool, &job_id).await?;
    println!("Job {} marked canceled", job_id);
    Ok(())
}

async fn run_delete(pool: &DbPool, id: &str) -> anyhow::Result<()> {
    let job_id = JobId::parse(id)?;
    handlers::delete_job(pool, &job_id).await?;
    println!("Job {} deleted", job_id);
    Ok(())
}

async fn run_results(pool: &DbPool, id: &str, errors_only: bool, json: bool) -> anyhow::Result<()> {
    let job_id = JobId::parse(id)?;
    let rows = handlers::get_job_results(pool, &job_id, errors_only).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No results recorded for {}", job_id);
        return Ok(());
    }

    for row in &rows {
        let status = match &row.error_category {
            Some(category) => format!("{category} ({})", row.error_message.as_deref().unwrap_or("")),
            None => format!("{} findings", row.findings.len()),
        };
        println!("{}@{}  {}  {}", row.module.as_str(), row.version.as_str(), row.recorded_at.to_rfc3339(), status);
    }
    Ok(())
}
