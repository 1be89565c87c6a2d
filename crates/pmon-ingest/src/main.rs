//! PMon Ingest - Main entry point

use clap::Parser;
use pmon_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use pmon_ingest::{commands, Cli, Commands};
use std::process;
use tracing::error;

fn main() {
    // .env before clap so env-backed arguments see it
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Console)
        .log_file_prefix("pmon-ingest")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring logging environment: {}", e);
            log_config
        },
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    if let Err(e) = execute_command(&cli) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        drop(guard);
        process::exit(1);
    }
}

fn execute_command(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Run(args) => {
            let report = commands::run(args)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", commands::render_summary(&report));
            }
        },
        Commands::Schema { manifest } => {
            print!("{}", commands::schema(manifest)?);
        },
    }
    Ok(())
}
