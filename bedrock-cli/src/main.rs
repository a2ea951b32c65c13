//! bedrock-console: supervise a Bedrock dedicated server from the terminal.
//!
//! # Usage
//!
//! ```text
//! bedrock-console run [--root <dir>] [--no-start]
//! bedrock-console properties list|get|set|diff [--root <dir>]
//! bedrock-console backups list|prune [--json]
//! bedrock-console permission list|set <xuid> <level> [--root <dir>]
//! bedrock-console settings show|path|init
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    backups::BackupsCommand, permission::PermissionCommand, properties::PropertiesCommand,
    run::RunArgs, settings::SettingsCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "bedrock-console",
    version,
    about = "Run, back up and configure a Minecraft Bedrock dedicated server",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Supervise the server in the foreground; stdin goes to the server console.
    Run(RunArgs),

    /// Inspect and edit server.properties.
    Properties {
        #[command(subcommand)]
        command: PropertiesCommand,
    },

    /// List and prune archives in the managed backup folder.
    Backups {
        #[command(subcommand)]
        command: BackupsCommand,
    },

    /// Edit the server's permissions.json.
    Permission {
        #[command(subcommand)]
        command: PermissionCommand,
    },

    /// Show or create the console settings file.
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Properties { command } => commands::properties::run(command),
        Commands::Backups { command } => commands::backups::run(command),
        Commands::Permission { command } => commands::permission::run(command),
        Commands::Settings { command } => commands::settings::run(command),
    }
}
