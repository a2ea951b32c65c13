//! `bedrock-console settings`: the console's own settings.yaml.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use bedrock_daemon::paths::settings_path;
use bedrock_daemon::settings::save_at;

use super::{home_dir, load_settings};

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print the effective settings (defaults filled in) as YAML.
    Show,
    /// Print the settings file location.
    Path,
    /// Write settings.yaml, keeping existing values not given here.
    Init(InitArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Server install directory.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Managed folder for scheduled backups.
    #[arg(long, value_name = "DIR")]
    pub backup_folder: Option<PathBuf>,

    /// Enable timed backups every N hours.
    #[arg(long, value_name = "HOURS")]
    pub every: Option<u64>,
}

pub fn run(command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            let (_, settings) = load_settings()?;
            let yaml = serde_yaml::to_string(&settings).context("failed to serialize settings")?;
            print!("{yaml}");
        }
        SettingsCommand::Path => {
            let home = home_dir()?;
            println!("{}", settings_path(&home).display());
        }
        SettingsCommand::Init(args) => {
            let (home, mut settings) = load_settings()?;
            if let Some(root) = args.root {
                settings.server.root = Some(root);
            }
            if let Some(folder) = args.backup_folder {
                settings.backup.folder = Some(folder);
            }
            if let Some(hours) = args.every {
                settings.backup.timed_backups = true;
                settings.backup.frequency_hours = hours;
            }
            save_at(&home, &settings).context("failed to write settings")?;
            println!(
                "{} Wrote {}",
                "✓".green(),
                settings_path(&home).display()
            );
        }
    }
    Ok(())
}
