//! Line classification for the server's mixed output stream.
//!
//! Ordinary log output, structured command replies and the save handshake all
//! share one unframed text channel. [`classify`] runs a fixed, priority-ordered
//! list of rules over each (prefix-stripped) line: save-protocol literals first,
//! then reply-block delimiters, and anything else is a log line.

use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::types::Xuid;

// ---------------------------------------------------------------------------
// Wire literals
// ---------------------------------------------------------------------------

pub const SAVE_STARTED: &str = "Saving...";
pub const SAVE_NOT_COMPLETED: &str = "A previous save has not been completed.";
pub const SAVE_READY: &str = "Data saved. Files are now ready to be copied.";
pub const SAVE_RESUMED: &str = "Changes to the level are resumed.";

pub const REPLY_OPEN: &str = "###* ";
pub const REPLY_CLOSE: &str = " *###";

/// Most lines a reply block may collect before it is treated as unterminated.
pub const MAX_REPLY_LINES: usize = 4096;

/// Outbound commands the console issues on its own behalf.
pub mod commands {
    pub const SAVE_HOLD: &str = "save hold";
    pub const SAVE_QUERY: &str = "save query";
    pub const SAVE_RESUME: &str = "save resume";
    pub const STOP: &str = "stop";
    pub const PERMISSION_LIST: &str = "permission list";
    pub const PERMISSION_RELOAD: &str = "permission reload";
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What a single line of output means to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `save hold` accepted.
    SaveStarted,
    /// `save query` answered "not yet".
    SaveNotCompleted,
    /// Snapshot is ready. Carries the file list if the server printed it on
    /// the same line, otherwise the list follows on the next line.
    SaveReady { inline_files: Option<&'a str> },
    /// `save resume` acknowledged.
    SaveResumed,
    /// Opens a reply block; carries the first fragment.
    ReplyOpen(&'a str),
    /// Closes the current reply block.
    ReplyClose,
    /// Everything else.
    Log(&'a str),
}

type Rule = for<'a> fn(&'a str) -> Option<LineKind<'a>>;

/// Rules in priority order. The first rule that matches wins.
const RULES: &[Rule] = &[save_protocol, reply_open, reply_close];

/// Classify one line. `line` should already have its log prefix stripped.
pub fn classify(line: &str) -> LineKind<'_> {
    RULES
        .iter()
        .find_map(|rule| rule(line))
        .unwrap_or(LineKind::Log(line))
}

fn save_protocol(line: &str) -> Option<LineKind<'_>> {
    match line {
        SAVE_STARTED => Some(LineKind::SaveStarted),
        SAVE_NOT_COMPLETED => Some(LineKind::SaveNotCompleted),
        SAVE_RESUMED => Some(LineKind::SaveResumed),
        _ => {
            let rest = line.strip_prefix(SAVE_READY)?.trim();
            Some(LineKind::SaveReady {
                inline_files: (!rest.is_empty()).then_some(rest),
            })
        }
    }
}

fn reply_open(line: &str) -> Option<LineKind<'_>> {
    line.strip_prefix(REPLY_OPEN).map(LineKind::ReplyOpen)
}

fn reply_close(line: &str) -> Option<LineKind<'_>> {
    (line == REPLY_CLOSE).then_some(LineKind::ReplyClose)
}

// ---------------------------------------------------------------------------
// Reply blocks
// ---------------------------------------------------------------------------

/// One entry of a `permissions` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PermissionEntry {
    pub xuid: Xuid,
    pub permission: String,
}

/// One entry of a `whitelist` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WhitelistEntry {
    pub name: String,
    #[serde(default, rename = "ignoresPlayerLimit")]
    pub ignores_player_limit: bool,
}

/// A parsed reply block, dispatched on its `command` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBlock {
    Permissions(Vec<PermissionEntry>),
    Whitelist(Vec<WhitelistEntry>),
    Ops(Vec<Xuid>),
    /// A reply for a command the console does not interpret.
    Other { command: String },
}

#[derive(Debug, Deserialize)]
struct RawReply {
    command: String,
    #[serde(default)]
    result: Value,
}

impl ReplyBlock {
    /// Parse the concatenated fragments of one reply block.
    pub fn parse(payload: &str) -> Result<Self, CoreError> {
        let raw: RawReply = serde_json::from_str(payload)?;
        let block = match raw.command.as_str() {
            "permissions" => ReplyBlock::Permissions(result_array(raw.result)?),
            "whitelist" => ReplyBlock::Whitelist(result_array(raw.result)?),
            "ops" => ReplyBlock::Ops(result_array(raw.result)?),
            _ => ReplyBlock::Other {
                command: raw.command,
            },
        };
        Ok(block)
    }
}

fn result_array<T: for<'de> Deserialize<'de>>(result: Value) -> Result<Vec<T>, CoreError> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(result)?)
}

/// Collects the fragments between [`REPLY_OPEN`] and [`REPLY_CLOSE`].
#[derive(Debug, Default)]
pub struct ReplyBlockAccumulator {
    fragments: Option<Vec<String>>,
}

impl ReplyBlockAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.fragments.is_some()
    }

    /// Start a block. A block that was never closed is discarded.
    pub fn open(&mut self, first_fragment: &str) {
        if self.fragments.is_some() {
            tracing::warn!("reply block reopened before close; discarding partial payload");
        }
        self.fragments = Some(vec![first_fragment.to_string()]);
    }

    /// Append a line that arrived while a block is open. Returns `false` and
    /// discards the block when it already holds [`MAX_REPLY_LINES`] lines, or
    /// when no block is open.
    pub fn push(&mut self, fragment: &str) -> bool {
        let Some(fragments) = self.fragments.as_mut() else {
            return false;
        };
        if fragments.len() >= MAX_REPLY_LINES {
            tracing::warn!(lines = fragments.len(), "reply block never closed; discarding it");
            self.fragments = None;
            return false;
        }
        fragments.push(fragment.to_string());
        true
    }

    /// Close the block and parse it. `Ok(None)` if no block was open.
    pub fn close(&mut self) -> Result<Option<ReplyBlock>, CoreError> {
        let Some(fragments) = self.fragments.take() else {
            return Ok(None);
        };
        ReplyBlock::parse(&fragments.concat()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_literals_take_priority() {
        assert_eq!(classify("Saving..."), LineKind::SaveStarted);
        assert_eq!(
            classify("A previous save has not been completed."),
            LineKind::SaveNotCompleted
        );
        assert_eq!(
            classify("Data saved. Files are now ready to be copied."),
            LineKind::SaveReady { inline_files: None }
        );
        assert_eq!(
            classify("Changes to the level are resumed."),
            LineKind::SaveResumed
        );
    }

    #[test]
    fn save_literals_are_case_sensitive_and_exact() {
        assert_eq!(classify("saving..."), LineKind::Log("saving..."));
        assert_eq!(classify("Saving... done"), LineKind::Log("Saving... done"));
    }

    #[test]
    fn ready_line_may_carry_the_file_list() {
        let line = "Data saved. Files are now ready to be copied. level/db/1.ldb:10";
        assert_eq!(
            classify(line),
            LineKind::SaveReady {
                inline_files: Some("level/db/1.ldb:10")
            }
        );
    }

    #[test]
    fn reply_delimiters_are_recognised() {
        assert_eq!(
            classify("###* {\"command\":\"ops\"}"),
            LineKind::ReplyOpen("{\"command\":\"ops\"}")
        );
        assert_eq!(classify(" *###"), LineKind::ReplyClose);
        assert_eq!(classify("*###"), LineKind::Log("*###"));
    }

    #[test]
    fn accumulator_joins_fragments_and_dispatches_permissions() {
        let mut acc = ReplyBlockAccumulator::new();
        acc.open("{\"command\":\"permissions\",");
        acc.push("\"result\":[{\"permission\":\"operator\",\"xuid\":\"111\"},");
        acc.push("{\"permission\":\"member\",\"xuid\":\"222\"}]}");
        assert!(acc.is_open());

        let block = acc.close().expect("parse").expect("block");
        assert!(!acc.is_open());
        assert_eq!(
            block,
            ReplyBlock::Permissions(vec![
                PermissionEntry {
                    xuid: Xuid::from("111"),
                    permission: "operator".into()
                },
                PermissionEntry {
                    xuid: Xuid::from("222"),
                    permission: "member".into()
                },
            ])
        );
    }

    #[test]
    fn whitelist_and_ops_replies_parse() {
        let whitelist = ReplyBlock::parse(
            r#"{"command":"whitelist","result":[{"name":"Steve","ignoresPlayerLimit":true},{"name":"Alex"}]}"#,
        )
        .expect("whitelist");
        assert_eq!(
            whitelist,
            ReplyBlock::Whitelist(vec![
                WhitelistEntry {
                    name: "Steve".into(),
                    ignores_player_limit: true
                },
                WhitelistEntry {
                    name: "Alex".into(),
                    ignores_player_limit: false
                },
            ])
        );

        let ops = ReplyBlock::parse(r#"{"command":"ops","result":["123"]}"#).expect("ops");
        assert_eq!(ops, ReplyBlock::Ops(vec![Xuid::from("123")]));
    }

    #[test]
    fn unknown_command_and_bad_json() {
        let other = ReplyBlock::parse(r#"{"command":"list","result":[]}"#).expect("other");
        assert_eq!(
            other,
            ReplyBlock::Other {
                command: "list".into()
            }
        );
        assert!(ReplyBlock::parse("{not json").is_err());
    }

    #[test]
    fn unterminated_block_is_dropped_at_the_line_cap() {
        let mut acc = ReplyBlockAccumulator::new();
        acc.open("{\"command\":\"permissions\",");
        for _ in 1..MAX_REPLY_LINES {
            assert!(acc.push("x"));
        }
        assert!(!acc.push("Server started."));
        assert!(!acc.is_open());
        assert!(!acc.push("more"));
    }

    #[test]
    fn close_without_open_is_a_no_op() {
        let mut acc = ReplyBlockAccumulator::new();
        assert!(acc.close().expect("no error").is_none());
    }
}
