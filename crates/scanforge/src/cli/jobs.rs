//! `job list` / `job create` - enumerate and start jobs
//!
//! Jobs are the aggregation unit for a batch of scans: a `job create`
//! gives scans a `JobId` to report their terminal counters against, and
//! `job list` shows every job's running tally.

use crate::cli::output::{color_for_job_state, print_table_colored};
use clap::Args;
use comfy_table::Color;
use scanforge_coordinator::handlers::{self, NewJobParams};
use scanforge_db::DbPool;
use scanforge_ids::BinaryHash;
use scanforge_protocol::Job;

#[derive(Debug, Args)]
pub struct JobCreateArgs {
    /// The user the job is started on behalf of, used as the id prefix
    pub user: String,
    /// The corpus/enqueue URL or description this job was submitted with
    #[arg(long, default_value = "")]
    pub url: String,
    /// Analyzer binary name the job's scans will run, if fixed
    #[arg(long, default_value = "")]
    pub binary: String,
    /// Expected sha256 hex digest of the analyzer binary
    #[arg(long)]
    pub binary_version: Option<String>,
    /// Extra analyzer arguments, space-separated
    #[arg(long, default_value = "")]
    pub binary_args: String,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct JobListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run_create(pool: &DbPool, args: JobCreateArgs) -> anyhow::Result<()> {
    let binary_version = args
        .binary_version
        .map(BinaryHash::parse)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let params = NewJobParams {
        url: args.url,
        binary: args.binary,
        binary_version,
        binary_args: args.binary_args.split_whitespace().map(str::to_string).collect(),
    };
    let job = handlers::create_job(pool, &args.user, params).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        println!("Created job {}", job.id);
    }
    Ok(())
}

pub async fn run_list(pool: &DbPool, args: JobListArgs) -> anyhow::Result<()> {
    let jobs = handlers::list_jobs(pool).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs recorded yet.");
        println!();
        println!("TRY: scanforge job create <user>");
        return Ok(());
    }

    let headers = &["ID", "STATE", "ENQUEUED", "STARTED", "SUCCEEDED", "FAILED", "ERRORED", "SKIPPED"];
    let rows: Vec<Vec<(String, Option<Color>)>> = jobs
        .iter()
        .map(|job| {
            let state = job_state(job);
            vec![
                (job.id.to_string(), None),
                (state.to_string(), Some(color_for_job_state(state))),
                (job.num_enqueued.to_string(), None),
                (job.num_started.to_string(), None),
                (job.num_succeeded.to_string(), None),
                (job.num_failed.to_string(), None),
                (job.num_errored.to_string(), None),
                (job.num_skipped.to_string(), None),
            ]
        })
        .collect();

    print_table_colored(headers, rows);
    Ok(())
}

fn job_state(job: &Job) -> &'static str {
    if job.canceled {
        return "canceled";
    }
    let finished = job.num_succeeded + job.num_failed + job.num_errored + job.num_skipped;
    if finished >= job.num_started && job.num_started > 0 {
        "completed"
    } else {
        "running"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scanforge_ids::JobId;

    #[test]
    fn job_state_reports_running_until_every_start_is_accounted_for() {
        let id = JobId::new("alice", "240102-153045").unwrap();
        let mut job = Job::new(id, "alice", Utc::now());
        job.num_started = 3;
        job.num_succeeded = 1;
        assert_eq!(job_state(&job), "running");

        job.num_succeeded = 3;
        assert_eq!(job_state(&job), "completed");
    }

    #[test]
    fn canceled_job_reports_canceled_regardless_of_counters() {
        let id = JobId::new("alice", "240102-153045").unwrap();
        let mut job = Job::new(id, "alice", Utc::now());
        job.canceled = true;
        assert_eq!(job_state(&job), "canceled");
    }
}
