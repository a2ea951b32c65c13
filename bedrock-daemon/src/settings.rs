//! Console settings stored at `<home>/.bedrock-console/settings.yaml`.
//!
//! Every field has a default, so a missing file, or a file that only sets a
//! few keys, loads cleanly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bedrock_backup::handshake::MIN_COOLDOWN;
use bedrock_backup::{PackagerConfig, RetentionPolicy};

use crate::error::{io_err, DaemonError};
use crate::paths::{console_root, settings_path};

/// Shortest interval between timed backups.
pub const MIN_BACKUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub backup: BackupSettings,
    pub roster: RosterSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server install directory.
    pub root: Option<PathBuf>,
    pub executable: String,
    pub restart_on_exit: bool,
    pub restart_delay_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            root: None,
            executable: default_executable().to_string(),
            restart_on_exit: true,
            restart_delay_secs: 2,
        }
    }
}

fn default_executable() -> &'static str {
    if cfg!(windows) {
        "bedrock_server.exe"
    } else {
        "bedrock_server"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Managed store for scheduled backups.
    pub folder: Option<PathBuf>,
    pub cooldown_minutes: u64,
    pub frequency_hours: u64,
    pub timed_backups: bool,
    /// Timer-driven backups are not reset by other backups.
    pub always_backup_on_time: bool,
    pub backup_on_join: bool,
    pub backup_on_leave: bool,
    pub packager: PackagerConfig,
    pub retention: RetentionSettings,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            folder: None,
            cooldown_minutes: 30,
            frequency_hours: 3,
            timed_backups: false,
            always_backup_on_time: false,
            backup_on_join: false,
            backup_on_leave: false,
            packager: PackagerConfig::default(),
            retention: RetentionSettings::default(),
        }
    }
}

impl BackupSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes.saturating_mul(60)).max(MIN_COOLDOWN)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.frequency_hours.saturating_mul(3600)).max(MIN_BACKUP_INTERVAL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub limit_age: bool,
    pub max_age_days: i64,
    pub limit_count: bool,
    pub max_count: usize,
    pub limit_size: bool,
    pub max_size_mib: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            limit_age: false,
            max_age_days: 28,
            limit_count: false,
            max_count: 100,
            limit_size: false,
            max_size_mib: 2048,
        }
    }
}

impl RetentionSettings {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            // An age beyond chrono's range never expires anything.
            max_age: self
                .limit_age
                .then(|| chrono::Duration::try_days(self.max_age_days))
                .flatten(),
            max_count: self.limit_count.then_some(self.max_count),
            max_total_bytes: self
                .limit_size
                .then(|| self.max_size_mib.saturating_mul(1024 * 1024)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterSettings {
    /// Gamertags not seen for this many days are forgotten on load.
    pub retention_days: i64,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            retention_days: bedrock_core::roster::DEFAULT_RETENTION_DAYS,
        }
    }
}

impl RosterSettings {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.retention_days).unwrap_or(chrono::Duration::MAX)
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.bedrock-console/settings.yaml`, or defaults if
/// the file does not exist.
pub fn load_at(home: &Path) -> Result<Settings, DaemonError> {
    let path = settings_path(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| DaemonError::SettingsParse { path, source: e })
}

/// Write settings atomically (`.tmp` + rename).
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), DaemonError> {
    let dir = console_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let path = settings_path(home);
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
