//! Domain types shared by every bedrock crate.
//!
//! All types that cross a persistence boundary are serde-serializable.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable per-player identifier reported by the server, independent of the
/// display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Xuid(pub String);

impl fmt::Display for Xuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Xuid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Xuid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of the supervised server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    #[default]
    NotRunning,
    Loading,
    Startup,
    Running,
    Shutdown,
    Stopped,
    Restarting,
}

impl ServerState {
    /// `true` when no server process is expected to exist.
    pub fn is_down(self) -> bool {
        matches!(self, ServerState::NotRunning | ServerState::Stopped)
    }

    /// One-line operator summary, used by the status line.
    pub fn summary(self) -> &'static str {
        match self {
            ServerState::NotRunning | ServerState::Stopped => "Server is not running",
            ServerState::Loading | ServerState::Startup | ServerState::Restarting => {
                "Server is starting up"
            }
            ServerState::Shutdown => "Server is shutting down",
            ServerState::Running => "Server is running normally",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::NotRunning => "Not running",
            ServerState::Loading => "Loading",
            ServerState::Startup => "Starting",
            ServerState::Running => "Running",
            ServerState::Shutdown => "Shutdown",
            ServerState::Stopped => "Stopped",
            ServerState::Restarting => "Restarting",
        };
        f.write_str(name)
    }
}

/// Render the status line shown under the console, e.g.
/// `Server is running normally, there are 2 player(s) online.`
pub fn status_line(state: ServerState, online_players: usize) -> String {
    if state == ServerState::Running {
        format!(
            "{}, there are {online_players} player(s) online.",
            state.summary()
        )
    } else {
        state.summary().to_string()
    }
}

// ---------------------------------------------------------------------------
// Operator-facing messages
// ---------------------------------------------------------------------------

/// Classification of a console message for the exterior to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Raw output forwarded from the server process.
    Server,
    Info,
    Warning,
    Error,
    /// Lifecycle transitions.
    Status,
}

/// A human-readable message produced by the console itself or by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub severity: Severity,
    pub text: String,
}

impl ConsoleMessage {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::new(Severity::Status, text)
    }

    pub fn server(text: impl Into<String>) -> Self {
        Self::new(Severity::Server, text)
    }
}

// ---------------------------------------------------------------------------
// Game settings
// ---------------------------------------------------------------------------

/// World difficulty as understood by the `difficulty N` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Peaceful,
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Difficulty::Peaceful),
            1 => Some(Difficulty::Easy),
            2 => Some(Difficulty::Normal),
            3 => Some(Difficulty::Hard),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Difficulty::Peaceful => 0,
            Difficulty::Easy => 1,
            Difficulty::Normal => 2,
            Difficulty::Hard => 3,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Peaceful => write!(f, "peaceful"),
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Normal => write!(f, "normal"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// Permission level stored in the server's `permissions.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Member,
    Operator,
    Visitor,
}

impl PermissionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Member => "member",
            PermissionLevel::Operator => "operator",
            PermissionLevel::Visitor => "visitor",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(PermissionLevel::Member),
            "operator" | "op" => Ok(PermissionLevel::Operator),
            "visitor" => Ok(PermissionLevel::Visitor),
            other => Err(format!(
                "unknown permission level '{other}'; expected: member, operator, visitor"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_reports_player_count_only_when_running() {
        assert_eq!(
            status_line(ServerState::Running, 2),
            "Server is running normally, there are 2 player(s) online."
        );
        assert_eq!(
            status_line(ServerState::Restarting, 2),
            "Server is starting up"
        );
    }

    #[test]
    fn difficulty_levels_roundtrip_through_numbers() {
        for level in 0..=3 {
            let difficulty = Difficulty::from_level(level).expect("valid level");
            assert_eq!(difficulty.level(), level);
        }
        assert!(Difficulty::from_level(4).is_none());
    }

    #[test]
    fn permission_level_parses_case_insensitively() {
        assert_eq!("Visitor".parse::<PermissionLevel>(), Ok(PermissionLevel::Visitor));
        assert_eq!("op".parse::<PermissionLevel>(), Ok(PermissionLevel::Operator));
        assert!("admin".parse::<PermissionLevel>().is_err());
    }
}
