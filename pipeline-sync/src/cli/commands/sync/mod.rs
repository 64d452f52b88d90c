mod handler;

pub use handler::handle_sync_command;

use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum SyncCommands {
    /// Sync one source, in full or for specific rows
    Run {
        source_id: i64,
        /// Only these spreadsheet rows (comma separated)
        #[arg(long, value_delimiter = ',')]
        rows: Option<Vec<u32>>,
    },
    /// Sync every active source one after another
    All {
        /// Pause between sources (default from config)
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}
