//! `scanforge` - CLI front end for the scan orchestrator.

use clap::{Parser, Subcommand};
use scanforge::cli::{config, context, error::print_json_error, job, jobs, scan, worker};
use scanforge::telemetry;
use scanforge_logging::{init_logging, LogConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scanforge", version, about = "Distributed scan orchestrator for a package ecosystem")]
struct Cli {
    /// Emit structured JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
    /// Verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Path to the sqlite database; defaults under the orchestrator's home directory
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Analyzer binary to invoke when none is fetched from the proxy
    #[arg(long, global = true, default_value = "analyzer")]
    analyzer_binary: PathBuf,
    /// Analyzer version recorded in the work-version fingerprint
    #[arg(long, global = true, default_value = "dev")]
    analyzer_version: String,
    /// Path to the sandbox bundle launcher; omit to run in-process
    #[arg(long, global = true)]
    sandbox_launcher: Option<PathBuf>,
    /// Sandbox bundle root the launcher unpacks into
    #[arg(long, global = true)]
    sandbox_bundle_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single scan synchronously and print its outcome
    Scan(scan::ScanRunArgs),
    /// Submit a single scan to a remote task queue
    Enqueue(scan::ScanEnqueueArgs),
    /// Parse a corpus listing and fan it out through a remote task queue
    Corpus(scan::ScanCorpusArgs),
    /// Run the in-memory task queue against the local executor
    Worker(worker::WorkerArgs),
    /// Manage jobs
    Job {
        #[command(subcommand)]
        action: JobCommand,
    },
    /// Show resolved on-disk configuration
    Config(config::ConfigArgs),
    /// Get, set, or clear the persisted default namespace
    Context {
        #[command(subcommand)]
        action: ContextCommand,
    },
    /// Check that the database is reachable and the home directory is writable
    Doctor,
}

#[derive(Subcommand, Debug)]
enum JobCommand {
    /// Start a new job
    Create(jobs::JobCreateArgs),
    /// List every known job
    List(jobs::JobListArgs),
    /// Show a single job's counters
    Get {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Mark a job canceled
    Cancel { id: String },
    /// Delete a job record
    Delete { id: String },
    /// List recorded results for a job
    Results {
        id: String,
        #[arg(long)]
        errors: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ContextCommand {
    /// Show the persisted default namespace, if any
    Show,
    /// Persist a default namespace
    Set { namespace: String },
    /// Clear the persisted default namespace
    Clear,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let json_errors = cli.json;

    let _log_guard = init_logging(LogConfig {
        app_name: "scanforge",
        verbose: cli.verbose,
        json: if cli.json { Some(true) } else { None },
    })?;

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(cli));

    if let Err(err) = result {
        if json_errors {
            print_json_error(&err);
        } else {
            eprintln!("{err:?}");
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Scan(args) => {
            let pool = telemetry::connect(cli.db).await?;
            let executor = telemetry::build_executor(
                pool,
                cli.analyzer_binary,
                cli.analyzer_version,
                cli.sandbox_launcher,
                cli.sandbox_bundle_root,
            );
            scan::run(executor, args).await
        }
        Commands::Enqueue(args) => scan::run_enqueue(args).await,
        Commands::Corpus(args) => scan::run_corpus(args).await,
        Commands::Worker(args) => {
            let pool = telemetry::connect(cli.db).await?;
            let executor = telemetry::build_executor(
                pool,
                cli.analyzer_binary,
                cli.analyzer_version,
                cli.sandbox_launcher,
                cli.sandbox_bundle_root,
            );
            worker::run(executor, args).await
        }
        Commands::Job { action } => {
            let pool = telemetry::connect(cli.db).await?;
            match action {
                JobCommand::Create(args) => jobs::run_create(&pool, args).await,
                JobCommand::List(args) => jobs::run_list(&pool, args).await,
                JobCommand::Get { id, json } => job::run(&pool, job::JobAction::Get { id, json }).await,
                JobCommand::Cancel { id } => job::run(&pool, job::JobAction::Cancel { id }).await,
                JobCommand::Delete { id } => job::run(&pool, job::JobAction::Delete { id }).await,
                JobCommand::Results { id, errors, json } => {
                    job::run(&pool, job::JobAction::Results { id, errors, json }).await
                }
            }
        }
        Commands::Config(args) => config::run(args),
        Commands::Context { action } => match action {
            ContextCommand::Show => {
                match context::get_default_namespace()? {
                    Some(ns) => println!("{ns}"),
                    None => println!("(none set)"),
                }
                Ok(())
            }
            ContextCommand::Set { namespace } => {
                context::set_default_namespace(&namespace)?;
                println!("Default namespace set to {namespace}");
                Ok(())
            }
            ContextCommand::Clear => {
                context::clear_default_namespace()?;
                println!("Default namespace cleared");
                Ok(())
            }
        },
        Commands::Doctor => run_doctor(cli.db).await,
    }
}

async fn run_doctor(db: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = config::output_paths();
    println!("Home:      {}", paths.home.display());

    match telemetry::connect(db).await {
        Ok(pool) => match scanforge_coordinator::handlers::healthcheck(&pool).await {
            Ok(()) => println!("Database:  ok ({})", paths.database.display()),
            Err(err) => println!("Database:  UNREACHABLE ({err})"),
        },
        Err(err) => println!("Database:  UNREACHABLE ({err})"),
    }

    for (label, dir) in [
        ("Workspaces", &paths.workspaces),
        ("Bin cache", &paths.bin_cache),
        ("Sandbox cache", &paths.sandbox_cache),
        ("Logs", &paths.logs),
    ] {
        match std::fs::create_dir_all(dir) {
            Ok(()) => println!("{label:<14} ok ({})", dir.display()),
            Err(err) => println!("{label:<14} UNWRITABLE ({err})"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_scan_subcommand() {
        let cli = Cli::parse_from(["scanforge", "scan", "golang.org/x/net", "--version", "v0.1.0"]);
        match cli.command {
            Commands::Scan(args) => {
                assert_eq!(args.module, "golang.org/x/net");
                assert_eq!(args.version, "v0.1.0");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_job_create_subcommand() {
        let cli = Cli::parse_from(["scanforge", "job", "create", "alice"]);
        match cli.command {
            Commands::Job { action: JobCommand::Create(args) } => assert_eq!(args.user, "alice"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
