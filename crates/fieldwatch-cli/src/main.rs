//! Fieldwatch CLI - drive the offline sync core from a terminal
//!
//! Records written here land in the same local store the field app uses;
//! `fieldwatch sync` pushes them to the backend.

mod cli;
mod commands;
mod config_file;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::Context;
use crate::commands::config::run_config;
use crate::commands::queue::run_queue;
use crate::commands::recognition::run_recognition;
use crate::commands::record::run_record;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fieldwatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context::resolve(cli.db_path, cli.config)?;

    match cli.command {
        Commands::Record { command } => run_record(command, &context).await?,
        Commands::Queue { command } => run_queue(command, &context).await?,
        Commands::Recognition { command } => run_recognition(command, &context).await?,
        Commands::Sync { command } => run_sync(command, &context).await?,
        Commands::Config { command } => run_config(command, &context)?,
    }

    Ok(())
}
