pub mod backups;
pub mod permission;
pub mod properties;
pub mod run;
pub mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use bedrock_daemon::{DaemonError, Settings};

/// Override for the server install directory from settings.yaml.
#[derive(Args, Debug, Clone, Default)]
pub struct RootArg {
    /// Server install directory (defaults to `server.root` in settings.yaml).
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

impl RootArg {
    /// Resolve the install directory, preferring the flag over settings.
    pub fn resolve(&self, settings: &Settings) -> Result<PathBuf> {
        let root = self
            .root
            .clone()
            .or_else(|| settings.server.root.clone())
            .context("no server root configured; pass --root or run `bedrock-console settings init --root <dir>`")?;
        if !root.is_dir() {
            return Err(DaemonError::InvalidInstallLocation { path: root }.into());
        }
        Ok(root)
    }
}

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_settings() -> Result<(PathBuf, Settings)> {
    let home = home_dir()?;
    let settings =
        bedrock_daemon::settings::load_at(&home).context("failed to load console settings")?;
    Ok((home, settings))
}
