mod handler;

pub use handler::handle_history_command;

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum HistoryCommands {
    /// Recent sync runs, newest first
    Runs {
        /// Limit to one source
        source_id: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Records removed from a source's sheet
    Archive {
        source_id: i64,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Write the snapshots to a CSV file instead of the terminal
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}
