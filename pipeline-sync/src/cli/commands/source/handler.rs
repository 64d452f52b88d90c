//! Source registry commands

use anyhow::{Result, bail};
use colored::*;

use super::SourceCommands;
use crate::cli::commands::open_store;
use crate::config::Config;
use crate::config::repository::sources;
use crate::sync::models::{NewSource, RunOutcome, SourceDescriptor, SyncStatus};

pub async fn handle_source_command(args: SourceCommands, config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let pool = store.pool();

    match args {
        SourceCommands::Add {
            spreadsheet,
            sheet,
            group,
            fiscal_year,
            period,
            kind,
        } => {
            let registry = config.schema_registry();
            if registry.get(&group).is_none() {
                bail!(
                    "Unknown group '{}'. Known groups: {}",
                    group,
                    registry.group_names().join(", ")
                );
            }

            let source = NewSource {
                kind: kind.into(),
                spreadsheet_id: spreadsheet,
                sheet_name: sheet,
                group_name: group.trim().to_lowercase(),
                fiscal_year,
                period,
            };
            let id = sources::add_source(pool, &source).await?;
            println!(
                "{} source {} ({} / '{}', group {}, {})",
                "Registered".bright_green(),
                id.to_string().bold(),
                source.spreadsheet_id,
                source.sheet_name,
                source.group_name,
                source.period
            );
        }
        SourceCommands::List => {
            let all = sources::list_sources(pool).await?;
            if all.is_empty() {
                println!("No sources registered. Use 'pipeline-sync source add' to add one.");
                return Ok(());
            }
            for source in &all {
                print_source(source);
            }
        }
        SourceCommands::Pause { source_id } => {
            set_status(pool, source_id, SyncStatus::Paused).await?
        }
        SourceCommands::Resume { source_id } => {
            set_status(pool, source_id, SyncStatus::Active).await?
        }
        SourceCommands::Archive { source_id } => {
            set_status(pool, source_id, SyncStatus::Archived).await?
        }
    }

    Ok(())
}

async fn set_status(pool: &sqlx::SqlitePool, source_id: i64, status: SyncStatus) -> Result<()> {
    if !sources::set_sync_status(pool, source_id, status).await? {
        bail!("Source {} not found", source_id);
    }
    println!("Source {} is now {}", source_id, status.to_string().bold());
    Ok(())
}

fn print_source(source: &SourceDescriptor) {
    let status = match source.sync_status {
        SyncStatus::Active => source.sync_status.to_string().bright_green(),
        SyncStatus::Paused => source.sync_status.to_string().yellow(),
        SyncStatus::Archived => source.sync_status.to_string().dimmed(),
    };

    let last = match (&source.last_synced_at, source.last_sync_outcome) {
        (Some(at), Some(outcome)) => {
            let label = match outcome {
                RunOutcome::Success => outcome.to_string().green(),
                RunOutcome::Partial => outcome.to_string().yellow(),
                RunOutcome::Failed => outcome.to_string().red(),
            };
            format!("{} at {}", label, at.format("%Y-%m-%d %H:%M"))
        }
        _ => "never synced".dimmed().to_string(),
    };

    println!(
        "{:>4}  {:<8}  {:<12}  {} / '{}'  [{}, {}]  {}",
        source.id.to_string().bold(),
        status,
        source.group_name,
        source.spreadsheet_id,
        source.sheet_name,
        source.kind,
        source.period,
        last
    );
    if let Some(error) = &source.last_sync_error {
        println!("      {}", error.red());
    }
}
