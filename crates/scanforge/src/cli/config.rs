//! Resolved on-disk layout for the orchestrator's CLI: home directory,
//! database path, workspace/bin-cache roots. Mirrors what
//! `scanforge_logging`/`telemetry::connect` resolve internally so `config`
//! can show the operator what a scan will actually use.

use scanforge_logging::scanforge_home;
use std::path::PathBuf;

pub fn output_paths() -> ConfigPaths {
    let home = scanforge_home();
    ConfigPaths {
        home: home.clone(),
        database: crate::telemetry::default_db_path(),
        workspaces: home.join("workspaces"),
        bin_cache: home.join("bin-cache"),
        sandbox_cache: home.join("sandbox-cache"),
        logs: scanforge_logging::logs_dir(),
    }
}

#[derive(Debug)]
pub struct ConfigPaths {
    pub home: PathBuf,
    pub database: PathBuf,
    pub workspaces: PathBuf,
    pub bin_cache: PathBuf,
    pub sandbox_cache: PathBuf,
    pub logs: PathBuf,
}

/// Arguments for the `config` command.
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Show resolved paths in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run the `config` command: show resolved paths.
pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let paths = output_paths();

    if args.json {
        let config = serde_json::json!({
            "home": paths.home.to_string_lossy(),
            "database": {
                "path": paths.database.to_string_lossy(),
                "exists": paths.database.exists(),
            },
            "workspaces": paths.workspaces.to_string_lossy(),
            "bin_cache": paths.bin_cache.to_string_lossy(),
            "sandbox_cache": paths.sandbox_cache.to_string_lossy(),
            "logs": paths.logs.to_string_lossy(),
        });
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("SCANFORGE CONFIGURATION");
        println!("========================");
        println!();
        println!("Home:      {}", paths.home.display());
        println!(
            "Database:  {} ({})",
            paths.database.display(),
            if paths.database.exists() { "exists" } else { "not found" }
        );
        println!("Workspaces:{}", paths.workspaces.display());
        println!("Bin cache: {}", paths.bin_cache.display());
        println!("Sandbox:   {}", paths.sandbox_cache.display());
        println!("Logs:      {}", paths.logs.display());
    }

    Ok(())
}
