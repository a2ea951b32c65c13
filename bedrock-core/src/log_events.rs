//! Events recognised inside ordinary server log lines.

use crate::types::{Difficulty, Xuid};

const CONNECTED: &str = "Player connected: ";
const DISCONNECTED: &str = "Player disconnected: ";
const OPPED: &str = "Opped:";
const DEOPPED: &str = "De-opped:";
const SERVER_STARTED: &str = "Server started.";
const DIFFICULTY: &str = "Difficulty: ";

/// Something the console reacts to in a plain log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    PlayerConnected { name: String, xuid: Xuid },
    PlayerDisconnected { name: String, xuid: Xuid },
    /// Someone was opped or de-opped; the permission list is stale.
    OperatorsChanged,
    ServerStarted,
    /// Start-up banner line announcing the world difficulty.
    Difficulty(Difficulty),
}

/// Parse a prefix-stripped log line.
pub fn parse_log_event(line: &str) -> Option<LogEvent> {
    if let Some(rest) = line.strip_prefix(CONNECTED) {
        let (name, xuid) = parse_player(rest)?;
        return Some(LogEvent::PlayerConnected { name, xuid });
    }
    if let Some(rest) = line.strip_prefix(DISCONNECTED) {
        let (name, xuid) = parse_player(rest)?;
        return Some(LogEvent::PlayerDisconnected { name, xuid });
    }
    if line.starts_with(OPPED) || line.starts_with(DEOPPED) {
        return Some(LogEvent::OperatorsChanged);
    }
    if line.contains(SERVER_STARTED) {
        return Some(LogEvent::ServerStarted);
    }
    if let Some(idx) = line.find(DIFFICULTY) {
        let level = line[idx + DIFFICULTY.len()..]
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))?;
        return Difficulty::from_level(level as u8).map(LogEvent::Difficulty);
    }
    None
}

/// Split `NAME, xuid: XUID`. The name may itself contain commas.
fn parse_player(rest: &str) -> Option<(String, Xuid)> {
    let (name, xuid) = rest.rsplit_once(", xuid: ")?;
    let xuid = xuid.split(',').next().unwrap_or(xuid).trim();
    Some((name.trim().to_string(), Xuid::from(xuid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_and_disconnect() {
        assert_eq!(
            parse_log_event("Player connected: Steve, xuid: 2535400000000001"),
            Some(LogEvent::PlayerConnected {
                name: "Steve".into(),
                xuid: Xuid::from("2535400000000001"),
            })
        );
        assert_eq!(
            parse_log_event("Player disconnected: Alex, xuid: 42"),
            Some(LogEvent::PlayerDisconnected {
                name: "Alex".into(),
                xuid: Xuid::from("42"),
            })
        );
    }

    #[test]
    fn newer_servers_append_fields_after_xuid() {
        assert_eq!(
            parse_log_event("Player disconnected: Alex, xuid: 42, pfid: abc"),
            Some(LogEvent::PlayerDisconnected {
                name: "Alex".into(),
                xuid: Xuid::from("42"),
            })
        );
    }

    #[test]
    fn op_changes_and_startup_markers() {
        assert_eq!(parse_log_event("Opped: Steve"), Some(LogEvent::OperatorsChanged));
        assert_eq!(parse_log_event("De-opped: Steve"), Some(LogEvent::OperatorsChanged));
        assert_eq!(parse_log_event("Server started."), Some(LogEvent::ServerStarted));
        assert_eq!(
            parse_log_event("Difficulty: 2 NORMAL"),
            Some(LogEvent::Difficulty(Difficulty::Normal))
        );
    }

    #[test]
    fn ordinary_lines_are_not_events() {
        assert_eq!(parse_log_event("Level Name: Bedrock level"), None);
        assert_eq!(parse_log_event("Player connected: malformed"), None);
        assert_eq!(parse_log_event("Difficulty: x"), None);
    }
}
