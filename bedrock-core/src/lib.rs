//! Bedrock console core library: server-output parsing, roster and the
//! server-side files the console edits.
//!
//! Nothing in this crate touches a process or a timer:
//! - [`line_buffer`] and [`protocol`] turn raw output into classified lines
//! - [`log_events`] recognises player and lifecycle events in log lines
//! - [`roster`] tracks who is online and what they are called
//! - [`properties`] and [`permissions`] edit `server.properties` / `permissions.json`

pub mod error;
pub mod line_buffer;
pub mod log_events;
pub mod permissions;
pub mod properties;
pub mod protocol;
pub mod roster;
pub mod types;

pub use error::CoreError;
pub use line_buffer::{strip_log_prefix, LineBuffer};
pub use log_events::{parse_log_event, LogEvent};
pub use properties::{ConfigEntry, ConfigStore, PropertyType, PropertyValue};
pub use protocol::{classify, LineKind, ReplyBlock, ReplyBlockAccumulator};
pub use roster::{RosterEntry, RosterTracker};
pub use types::{
    status_line, ConsoleMessage, Difficulty, PermissionLevel, ServerState, Severity, Xuid,
};
