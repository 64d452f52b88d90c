//! Sync commands

use anyhow::{Result, bail};
use colored::*;
use std::sync::Arc;
use std::time::Duration;

use super::SyncCommands;
use crate::cli::commands::open_store;
use crate::config::Config;
use crate::config::repository::{SqliteStore, sources};
use crate::sheets::{GoogleSheetsReader, SheetRouter, WorkbookReader};
use crate::sync::models::RunOutcome;
use crate::sync::{SyncEngine, SyncRequest, SyncSummary};

pub async fn handle_sync_command(args: SyncCommands, config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let engine = build_engine(config, store.clone())?;

    match args {
        SyncCommands::Run { source_id, rows } => {
            let request = match rows {
                Some(rows) => SyncRequest::rows(source_id, rows),
                None => SyncRequest::full(source_id),
            };
            let summary = engine.run(request).await?;
            print_summary(&summary);
        }
        SyncCommands::All { delay_ms } => {
            let ids = sources::list_active_source_ids(store.pool()).await?;
            if ids.is_empty() {
                println!("No active sources.");
                return Ok(());
            }

            let delay = delay_ms
                .map(Duration::from_millis)
                .unwrap_or(engine.settings().source_delay);
            println!("Syncing {} sources", ids.len().to_string().bold());

            let results = engine.run_all(&ids, delay).await;
            let mut failed = 0;
            for (source_id, result) in &results {
                match result {
                    Ok(summary) => print_summary(summary),
                    Err(e) if e.is_precondition() => {
                        println!("{} source {}: {}", "Skipped".dimmed(), source_id, e)
                    }
                    Err(e) => {
                        failed += 1;
                        println!("{} source {}: {}", "Failed".red().bold(), source_id, e);
                    }
                }
            }

            if failed > 0 {
                bail!("{} of {} sources failed", failed, results.len());
            }
        }
    }

    Ok(())
}

fn build_engine(config: &Config, store: SqliteStore) -> Result<SyncEngine> {
    let google = GoogleSheetsReader::new(&config.sheets)?;
    let router = SheetRouter::new(Arc::new(google), Arc::new(WorkbookReader::new()));

    Ok(SyncEngine::new(
        Arc::new(router),
        Arc::new(store),
        config.schema_registry(),
        config.sync_settings(),
    ))
}

fn print_summary(summary: &SyncSummary) {
    let outcome = match summary.outcome {
        RunOutcome::Success => summary.outcome.to_string().bright_green(),
        RunOutcome::Partial => summary.outcome.to_string().yellow(),
        RunOutcome::Failed => summary.outcome.to_string().red(),
    };

    println!(
        "Source {} {} sync {}: {} rows, {} created, {} updated, {} deleted, {} skipped ({}ms)",
        summary.source_id.to_string().bold(),
        summary.mode.as_str(),
        outcome,
        summary.total,
        summary.created.to_string().green(),
        summary.updated.to_string().cyan(),
        summary.deleted.to_string().red(),
        summary.skipped,
        summary.duration_ms
    );
    println!("  run {}", summary.run_id.dimmed());

    for error in &summary.errors {
        println!("  {} {}", "error:".yellow().bold(), error.yellow());
    }
    for warning in &summary.warnings {
        println!("  {} {}", "warning:".dimmed(), warning);
    }
}
