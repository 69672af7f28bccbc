//! Status command: inspect stored checkpoint records.

use super::CliError;
use crate::checkpoint::CheckpointStore;
use clap::{Args, ValueEnum};
use serde_json::json;
use std::path::PathBuf;

/// Output format for the status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Human,
    /// JSON output
    Json,
}

/// Status subcommand.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Directory holding checkpoint records
    #[arg(long, default_value = "./checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    pub format: OutputFormat,
}

impl StatusCommand {
    /// Print a summary of every stored checkpoint record.
    pub fn execute(&self) -> Result<(), CliError> {
        let store = CheckpointStore::new(&self.checkpoint_dir);
        let ids = store.list_person_ids()?;

        if ids.is_empty() {
            match self.format {
                OutputFormat::Human => {
                    println!(
                        "no checkpoint records in {}",
                        self.checkpoint_dir.display()
                    );
                }
                OutputFormat::Json => println!("[]"),
            }
            return Ok(());
        }

        let mut rows = Vec::new();
        for person_id in ids {
            if let Some(record) = store.inspect(person_id)? {
                rows.push(record);
            }
        }

        match self.format {
            OutputFormat::Human => {
                println!(
                    "{:>9}  {:>14}  {:>12}  {:>8}  updated",
                    "person", "last_index", "completed", "matches"
                );
                for record in &rows {
                    let last = record
                        .last_completed_index()
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:>9}  {:>14}  {:>12}  {:>8}  {}",
                        record.person_id(),
                        last,
                        record.queries_completed(),
                        record.matches().len(),
                        format_timestamp(record.updated_at()),
                    );
                }
            }
            OutputFormat::Json => {
                let out: Vec<_> = rows
                    .iter()
                    .map(|record| {
                        json!({
                            "person_id": record.person_id(),
                            "config_hash": record.config_hash(),
                            "last_completed_index": record.last_completed_index(),
                            "queries_completed": record.queries_completed(),
                            "matches": record.matches().len(),
                            "updated_at": record.updated_at(),
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&out)
                        .map_err(|e| CliError::ConfigurationError(e.to_string()))?
                );
            }
        }
        Ok(())
    }
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}
