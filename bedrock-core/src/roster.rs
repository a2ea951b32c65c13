//! Who is online, who holds which permission, and what they are called.
//!
//! The server reports players by xuid; display names are only visible in the
//! connect/disconnect lines, so the tracker keeps a gamertag cache that
//! survives restarts.
//!
//! # Storage
//!
//! The cache is a JSON document written with the same `.tmp` + rename pattern
//! as the other console state files. Entries whose last sighting is older than
//! the retention window are dropped when the cache is loaded, never while the
//! console is running.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::protocol::PermissionEntry;
use crate::types::{PermissionLevel, Xuid};

/// Default retention for cached gamertags (roughly six months).
pub const DEFAULT_RETENTION_DAYS: i64 = 183;

/// A cached xuid → gamertag mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub xuid: Xuid,
    pub gamertag: String,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RosterFile {
    entries: Vec<RosterEntry>,
}

/// Online set, permission sets and the gamertag cache.
#[derive(Debug, Default)]
pub struct RosterTracker {
    online: Vec<Xuid>,
    operators: Vec<Xuid>,
    members: Vec<Xuid>,
    visitors: Vec<Xuid>,
    gamertags: BTreeMap<Xuid, RosterEntry>,
}

impl RosterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the gamertag cache, dropping entries not seen within `retention`.
    ///
    /// A missing file yields an empty roster.
    pub fn load_at(path: &Path, now: DateTime<Utc>, retention: Duration) -> Result<Self, CoreError> {
        let mut roster = Self::new();
        if !path.exists() {
            return Ok(roster);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let file: RosterFile = serde_json::from_str(&contents).map_err(|e| CoreError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        let total = file.entries.len();
        for entry in file.entries {
            let expired = entry
                .last_seen_at
                .checked_add_signed(retention)
                .is_some_and(|expires| expires < now);
            if !expired {
                roster.gamertags.insert(entry.xuid.clone(), entry);
            }
        }
        tracing::debug!(
            kept = roster.gamertags.len(),
            expired = total - roster.gamertags.len(),
            "loaded gamertag cache"
        );
        Ok(roster)
    }

    /// Persist the gamertag cache. Players online right now are recorded as
    /// last seen at `now`.
    pub fn save_at(&self, path: &Path, now: DateTime<Utc>) -> Result<(), CoreError> {
        let entries = self
            .gamertags
            .values()
            .map(|entry| {
                let mut entry = entry.clone();
                if self.is_online(&entry.xuid) {
                    entry.last_seen_at = now;
                }
                entry
            })
            .collect();
        let json = serde_json::to_string_pretty(&RosterFile { entries })?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Record a connect. Returns `true` if the player was not already online.
    pub fn player_connected(&mut self, name: &str, xuid: &Xuid, now: DateTime<Utc>) -> bool {
        self.gamertags
            .entry(xuid.clone())
            .or_insert_with(|| RosterEntry {
                xuid: xuid.clone(),
                gamertag: name.to_string(),
                last_seen_at: now,
            });
        if self.online.contains(xuid) {
            return false;
        }
        self.online.push(xuid.clone());
        true
    }

    /// Record a disconnect. The last-seen time is stored even for players the
    /// tracker never saw connect. Returns `true` if the player was online.
    pub fn player_disconnected(&mut self, name: &str, xuid: &Xuid, now: DateTime<Utc>) -> bool {
        self.gamertags.insert(
            xuid.clone(),
            RosterEntry {
                xuid: xuid.clone(),
                gamertag: name.to_string(),
                last_seen_at: now,
            },
        );
        let before = self.online.len();
        self.online.retain(|x| x != xuid);
        self.online.len() != before
    }

    /// Forget who is online. Returns `true` if anyone was.
    pub fn clear_online(&mut self) -> bool {
        let had_players = !self.online.is_empty();
        self.online.clear();
        had_players
    }

    /// Replace the permission sets with the list the server just reported.
    ///
    /// Sets stay disjoint: a xuid listed twice keeps its first level.
    /// Unknown permission strings are ignored.
    pub fn apply_permissions(&mut self, entries: &[PermissionEntry]) {
        self.operators.clear();
        self.members.clear();
        self.visitors.clear();

        for entry in entries {
            if self.permission_level(&entry.xuid).is_some() {
                continue;
            }
            match entry.permission.parse::<PermissionLevel>() {
                Ok(PermissionLevel::Operator) => self.operators.push(entry.xuid.clone()),
                Ok(PermissionLevel::Member) => self.members.push(entry.xuid.clone()),
                Ok(PermissionLevel::Visitor) => self.visitors.push(entry.xuid.clone()),
                Err(_) => {
                    tracing::debug!(xuid = %entry.xuid, permission = %entry.permission, "ignoring unknown permission");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Online players in connection order.
    pub fn online(&self) -> &[Xuid] {
        &self.online
    }

    pub fn operators(&self) -> &[Xuid] {
        &self.operators
    }

    pub fn members(&self) -> &[Xuid] {
        &self.members
    }

    pub fn visitors(&self) -> &[Xuid] {
        &self.visitors
    }

    pub fn is_online(&self, xuid: &Xuid) -> bool {
        self.online.contains(xuid)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    pub fn online_operator_count(&self) -> usize {
        self.online
            .iter()
            .filter(|xuid| self.operators.contains(xuid))
            .count()
    }

    pub fn permission_level(&self, xuid: &Xuid) -> Option<PermissionLevel> {
        if self.members.contains(xuid) {
            Some(PermissionLevel::Member)
        } else if self.operators.contains(xuid) {
            Some(PermissionLevel::Operator)
        } else if self.visitors.contains(xuid) {
            Some(PermissionLevel::Visitor)
        } else {
            None
        }
    }

    pub fn entry(&self, xuid: &Xuid) -> Option<&RosterEntry> {
        self.gamertags.get(xuid)
    }

    /// Gamertag for `xuid`, or the xuid itself when unknown.
    pub fn name_for<'a>(&'a self, xuid: &'a Xuid) -> &'a str {
        self.gamertags
            .get(xuid)
            .map(|entry| entry.gamertag.as_str())
            .unwrap_or(xuid.0.as_str())
    }

    /// `name [xuid]` when the name is known, otherwise just the xuid.
    pub fn display_name(&self, xuid: &Xuid) -> String {
        match self.gamertags.get(xuid) {
            Some(entry) => format!("{} [{}]", entry.gamertag, xuid),
            None => xuid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    fn perm(xuid: &str, permission: &str) -> PermissionEntry {
        PermissionEntry {
            xuid: Xuid::from(xuid),
            permission: permission.to_string(),
        }
    }

    #[test]
    fn connect_is_idempotent_and_keeps_insertion_order() {
        let mut roster = RosterTracker::new();
        assert!(roster.player_connected("Steve", &Xuid::from("1"), at(1)));
        assert!(roster.player_connected("Alex", &Xuid::from("2"), at(1)));
        assert!(!roster.player_connected("Steve", &Xuid::from("1"), at(2)));
        assert_eq!(roster.online(), &[Xuid::from("1"), Xuid::from("2")]);
    }

    #[test]
    fn disconnect_records_unknown_players() {
        let mut roster = RosterTracker::new();
        let xuid = Xuid::from("9");
        assert!(!roster.player_disconnected("Ghost", &xuid, at(3)));
        let entry = roster.entry(&xuid).expect("cached");
        assert_eq!(entry.gamertag, "Ghost");
        assert_eq!(entry.last_seen_at, at(3));
        assert_eq!(roster.name_for(&xuid), "Ghost");
    }

    #[test]
    fn clear_online_reports_whether_anything_changed() {
        let mut roster = RosterTracker::new();
        assert!(!roster.clear_online());
        roster.player_connected("Steve", &Xuid::from("1"), at(1));
        assert!(roster.clear_online());
        assert_eq!(roster.online_count(), 0);
        assert_eq!(roster.name_for(&Xuid::from("1")), "Steve");
    }

    #[test]
    fn permissions_are_replaced_and_kept_disjoint() {
        let mut roster = RosterTracker::new();
        roster.apply_permissions(&[
            perm("1", "operator"),
            perm("2", "member"),
            perm("3", "Visitor"),
            perm("1", "member"),
            perm("4", "custom"),
        ]);
        assert_eq!(roster.operators(), &[Xuid::from("1")]);
        assert_eq!(roster.members(), &[Xuid::from("2")]);
        assert_eq!(roster.visitors(), &[Xuid::from("3")]);
        assert_eq!(roster.permission_level(&Xuid::from("4")), None);

        roster.apply_permissions(&[perm("2", "operator")]);
        assert_eq!(roster.operators(), &[Xuid::from("2")]);
        assert!(roster.members().is_empty());
    }

    #[test]
    fn online_operator_count_uses_permission_sets() {
        let mut roster = RosterTracker::new();
        roster.apply_permissions(&[perm("1", "operator"), perm("2", "member")]);
        roster.player_connected("Steve", &Xuid::from("1"), at(1));
        roster.player_connected("Alex", &Xuid::from("2"), at(1));
        assert_eq!(roster.online_operator_count(), 1);
    }

    #[test]
    fn display_name_falls_back_to_xuid() {
        let mut roster = RosterTracker::new();
        roster.player_connected("Steve", &Xuid::from("1"), at(1));
        assert_eq!(roster.display_name(&Xuid::from("1")), "Steve [1]");
        assert_eq!(roster.display_name(&Xuid::from("2")), "2");
    }

    #[test]
    fn save_then_load_drops_expired_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roster.json");

        let mut roster = RosterTracker::new();
        roster.player_disconnected("Old", &Xuid::from("1"), at(1));
        roster.player_disconnected("Recent", &Xuid::from("2"), at(20));
        roster.player_connected("Online", &Xuid::from("3"), at(1));
        roster.save_at(&path, at(25)).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RosterTracker::load_at(&path, at(30), Duration::days(15)).unwrap();
        assert!(loaded.entry(&Xuid::from("1")).is_none(), "expired entry kept");
        assert_eq!(loaded.name_for(&Xuid::from("2")), "Recent");
        let online = loaded.entry(&Xuid::from("3")).expect("online player saved");
        assert_eq!(online.last_seen_at, at(25));
        assert_eq!(loaded.online_count(), 0);
    }

    #[test]
    fn unbounded_retention_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roster.json");

        let mut roster = RosterTracker::new();
        roster.player_disconnected("Old", &Xuid::from("1"), at(1));
        roster.save_at(&path, at(2)).unwrap();

        let loaded = RosterTracker::load_at(&path, at(30), Duration::MAX).unwrap();
        assert_eq!(loaded.name_for(&Xuid::from("1")), "Old");
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let roster =
            RosterTracker::load_at(&dir.path().join("none.json"), at(1), Duration::days(1))
                .unwrap();
        assert_eq!(roster.online_count(), 0);
        assert!(roster.entry(&Xuid::from("1")).is_none());
    }

    #[test]
    fn load_corrupt_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = RosterTracker::load_at(&path, at(1), Duration::days(1)).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("roster.json"));
    }
}
