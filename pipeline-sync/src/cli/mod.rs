//! Command-line interface

pub mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use commands::history::HistoryCommands;
use commands::source::SourceCommands;
use commands::sync::SyncCommands;

#[derive(Debug, Parser)]
#[command(
    name = "pipeline-sync",
    version,
    about = "Keep the sales-pipeline database in step with the tracking spreadsheets"
)]
pub struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (default: <config dir>/pipeline-sync/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Register and manage spreadsheet sources
    #[command(subcommand)]
    Source(SourceCommands),
    /// Reconcile sources against the database
    #[command(subcommand)]
    Sync(SyncCommands),
    /// Inspect past runs and archived records
    #[command(subcommand)]
    History(HistoryCommands),
}

impl Cli {
    /// Log filter implied by the -v count
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Source(args) => commands::source::handle_source_command(args, &config).await,
        Commands::Sync(args) => commands::sync::handle_sync_command(args, &config).await,
        Commands::History(args) => commands::history::handle_history_command(args, &config).await,
    }
}
