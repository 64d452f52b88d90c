mod handler;

pub use handler::handle_source_command;

use clap::{Subcommand, ValueEnum};

use crate::sync::models::SourceKind;

#[derive(Debug, Subcommand)]
pub enum SourceCommands {
    /// Register a spreadsheet tab for syncing
    Add {
        /// Google spreadsheet id, or the path of an .xlsx workbook
        #[arg(long)]
        spreadsheet: String,
        /// Tab name
        #[arg(long)]
        sheet: String,
        /// Organizational group, selects the column layout
        #[arg(long)]
        group: String,
        #[arg(long)]
        fiscal_year: i32,
        /// Fiscal period label, e.g. FY2026-Q3
        #[arg(long)]
        period: String,
        #[arg(long, value_enum, default_value_t = KindArg::Google)]
        kind: KindArg,
    },
    /// List registered sources
    List,
    /// Stop syncing a source
    Pause { source_id: i64 },
    /// Resume syncing a paused source
    Resume { source_id: i64 },
    /// Retire a source for good; its records stay in place
    Archive { source_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Google,
    Workbook,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Google => SourceKind::GoogleSheets,
            KindArg::Workbook => SourceKind::Workbook,
        }
    }
}
