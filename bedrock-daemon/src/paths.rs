use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONSOLE_DIR: &str = ".bedrock-console";
pub const SETTINGS_FILE: &str = "settings.yaml";
pub const ROSTER_FILE: &str = "roster.json";

/// Grace period for `stop` before the runtime kills the server on exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub fn console_root(home: &Path) -> PathBuf {
    home.join(CONSOLE_DIR)
}

pub fn settings_path(home: &Path) -> PathBuf {
    console_root(home).join(SETTINGS_FILE)
}

pub fn roster_path(home: &Path) -> PathBuf {
    console_root(home).join(ROSTER_FILE)
}
