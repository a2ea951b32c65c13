//! `bedrock-console permission`: offline edits of permissions.json.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use bedrock_core::{permissions, PermissionLevel, Xuid};

use super::{load_settings, RootArg};

#[derive(Subcommand, Debug)]
pub enum PermissionCommand {
    /// Show the entries in permissions.json.
    List(RootArg),
    /// Set a player's level, adding them if they are not listed.
    Set(SetArgs),
}

#[derive(Args, Debug)]
pub struct SetArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Player xuid.
    pub xuid: String,

    /// member | operator | visitor
    pub level: PermissionLevel,
}

#[derive(Tabled)]
struct PermissionRow {
    #[tabled(rename = "xuid")]
    xuid: String,
    #[tabled(rename = "permission")]
    permission: String,
}

pub fn run(command: PermissionCommand) -> Result<()> {
    let (_, settings) = load_settings()?;
    match command {
        PermissionCommand::List(root) => {
            let root = root.resolve(&settings)?;
            let entries =
                permissions::read_permissions(&root).context("failed to read permissions.json")?;
            if entries.is_empty() {
                println!("No entries in permissions.json.");
                return Ok(());
            }
            let rows: Vec<PermissionRow> = entries
                .into_iter()
                .map(|(xuid, permission)| PermissionRow {
                    xuid: xuid.to_string(),
                    permission,
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        PermissionCommand::Set(args) => {
            let root = args.root.resolve(&settings)?;
            let xuid = Xuid::from(args.xuid);
            let changed = permissions::set_permission_level(&root, &xuid, args.level)
                .context("failed to update permissions.json")?;
            if changed {
                println!("{} {} is now {}", "✓".green(), xuid, args.level);
                println!("A running server applies this after `permission reload`.");
            } else {
                println!("{} is already {}", xuid, args.level);
            }
        }
    }
    Ok(())
}
