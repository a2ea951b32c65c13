//! Notifications published by the console runtime.
//!
//! Every subscriber gets its own [`broadcast::Receiver`]; events from the
//! single event loop arrive in the order they were produced.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use bedrock_backup::BackupEvent;
use bedrock_core::{ConsoleMessage, Difficulty, ServerState, Xuid};

/// Capacity of the event channel; slow subscribers lag rather than block.
pub const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    StateChanged {
        from: ServerState,
        to: ServerState,
    },
    /// Something for the operator to read.
    Message(ConsoleMessage),
    StatusLine(String),
    PlayerConnected {
        name: String,
        xuid: Xuid,
    },
    PlayerDisconnected {
        name: String,
        xuid: Xuid,
    },
    /// The server reported a fresh permission list.
    PermissionsChanged,
    Whitelist(Vec<String>),
    DifficultyChanged(Difficulty),
    Backup(BackupEvent),
    BackupDeleted(PathBuf),
    /// The backup store's contents changed; usage figures are stale.
    StorageChanged,
    BackupTimerChanged {
        active: bool,
        next: Option<DateTime<Utc>>,
    },
    /// `server.properties` was rewritten; a running server needs a restart.
    ConfigUpdated {
        changed: Vec<String>,
    },
    RestartScheduled {
        in_secs: u64,
    },
    RestartAborted,
}

/// Point-in-time view of the console, answered over the command channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: ServerState,
    pub status_line: String,
    /// `name [xuid]` for each online player.
    pub online: Vec<String>,
    /// Seconds until a scheduled restart, or -1 if none is pending.
    pub restart_in_secs: i64,
    pub next_backup: Option<DateTime<Utc>>,
    pub backup_in_flight: bool,
    pub difficulty: Option<Difficulty>,
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: SupervisorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
