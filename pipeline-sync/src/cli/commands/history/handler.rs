//! Run history and archive inspection

use anyhow::{Context, Result};
use colored::*;
use csv::Writer;
use std::path::Path;

use super::HistoryCommands;
use crate::cli::commands::open_store;
use crate::config::Config;
use crate::config::repository::{archive, runs};
use crate::sync::models::{ArchivedRecord, RunOutcome, SyncRunRecord};

pub async fn handle_history_command(args: HistoryCommands, config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let pool = store.pool();

    match args {
        HistoryCommands::Runs { source_id, limit } => {
            let history = runs::list_runs(pool, source_id, limit).await?;
            if history.is_empty() {
                println!("No sync runs recorded.");
            }
            for run in &history {
                print_run(run);
            }
        }
        HistoryCommands::Archive {
            source_id,
            limit,
            csv,
        } => {
            let archives = archive::list_archives(pool, source_id, limit).await?;
            match csv {
                Some(path) => {
                    export_archives_csv(&archives, &path)?;
                    println!(
                        "Exported {} archived records to {}",
                        archives.len(),
                        path.display().to_string().bright_green()
                    );
                }
                None if archives.is_empty() => {
                    println!("No archived records for source {}.", source_id)
                }
                None => {
                    for archived in &archives {
                        println!(
                            "{}  {:<12} {:<24} {:>12}  {}",
                            archived.archived_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                            archived.natural_key.bold(),
                            archived.column_text("advertiser").unwrap_or_default(),
                            archived
                                .column_f64("forecast_revenue")
                                .map(|v| format!("{:.2}", v))
                                .unwrap_or_default(),
                            archived.reason
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_run(run: &SyncRunRecord) {
    let outcome = match run.outcome {
        RunOutcome::Success => run.outcome.to_string().bright_green(),
        RunOutcome::Partial => run.outcome.to_string().yellow(),
        RunOutcome::Failed => run.outcome.to_string().red(),
    };

    println!(
        "{}  source {:<4} {:<11} {:<8} +{} ~{} -{} skipped {} ({}ms)",
        run.finished_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        run.source_id,
        run.mode.as_str(),
        outcome,
        run.created,
        run.updated,
        run.deleted,
        run.skipped,
        run.duration_ms
    );
    if let Some(kind) = &run.error_kind {
        println!("      {} {}", "kind:".red(), kind);
    }
    for error in &run.errors {
        println!("      {}", error.yellow());
    }
}

/// One line per snapshot; monthly forecasts are summed into a single column
pub fn export_archives_csv(archives: &[ArchivedRecord], path: &Path) -> Result<()> {
    let mut wtr = Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    wtr.write_record([
        "archived_at",
        "original_id",
        "natural_key",
        "row_number",
        "status",
        "owner",
        "advertiser",
        "forecast_revenue",
        "monthly_total",
        "reason",
        "run_id",
    ])
    .context("Failed to write CSV header")?;

    for archived in archives {
        let monthly: f64 = archived.children.iter().map(|c| c.amount).sum();
        wtr.write_record([
            archived.archived_at.to_rfc3339(),
            archived.original_id.to_string(),
            archived.natural_key.clone(),
            archived.column_text("row_number").unwrap_or_default(),
            archived.column_text("status").unwrap_or_default(),
            archived.column_text("owner").unwrap_or_default(),
            archived.column_text("advertiser").unwrap_or_default(),
            archived
                .column_f64("forecast_revenue")
                .map(|v| v.to_string())
                .unwrap_or_default(),
            monthly.to_string(),
            archived.reason.clone(),
            archived.run_id.clone(),
        ])
        .with_context(|| format!("Failed to write archived record {}", archived.natural_key))?;
    }

    wtr.flush().context("Failed to flush CSV writer")?;
    log::info!("Archived records exported to {}", path.display());
    Ok(())
}
