//! `bedrock-console backups`: the managed backup store.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use bedrock_backup::{prune, BackupStore};

use super::load_settings;

#[derive(Subcommand, Debug)]
pub enum BackupsCommand {
    /// List stored archives, newest first.
    List(ListArgs),
    /// Apply the retention limits from settings.yaml now.
    Prune,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: BackupsCommand) -> Result<()> {
    let (_, settings) = load_settings()?;
    let folder = settings
        .backup
        .folder
        .clone()
        .context("no backup folder configured; set backup.folder in settings.yaml")?;
    let store = BackupStore::new(folder);

    match command {
        BackupsCommand::List(args) => list(&store, args.json),
        BackupsCommand::Prune => {
            let policy = settings.backup.retention.policy();
            if policy.is_unlimited() {
                println!("No retention limits are enabled.");
                return Ok(());
            }
            let report = prune(&store, &policy, Utc::now()).context("failed to prune backups")?;
            if !report.changed() {
                println!("Nothing to prune.");
            }
            for path in &report.deleted {
                println!("{} {}", "deleted".red(), path.display());
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct BackupJson {
    path: String,
    created_at: String,
    size: u64,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "archive")]
    archive: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "size")]
    size: String,
}

fn list(store: &BackupStore, json: bool) -> Result<()> {
    let backups = store.list().context("failed to list backups")?;

    if json {
        let payload: Vec<BackupJson> = backups
            .iter()
            .map(|backup| BackupJson {
                path: backup.path.display().to_string(),
                created_at: backup.created_at.to_rfc3339(),
                size: backup.size,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize backups")?
        );
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups in {}.", store.dir().display());
        return Ok(());
    }

    let total: u64 = backups.iter().map(|backup| backup.size).sum();
    let rows: Vec<BackupRow> = backups
        .iter()
        .map(|backup| BackupRow {
            archive: backup
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            created: backup
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            size: human_size(backup.size),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{} backup(s), {} in {}",
        backups.len(),
        human_size(total),
        store.dir().display()
    );
    Ok(())
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::human_size;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MiB");
    }
}
