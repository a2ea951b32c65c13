//! Typed view over the server's `server.properties`.
//!
//! The file is kept as raw lines so a save only touches the lines whose value
//! actually changed; every comment, blank line and line terminator is written
//! back exactly as it was read.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{io_err, CoreError};

pub const PROPERTIES_FILE: &str = "server.properties";

// ---------------------------------------------------------------------------
// Type and legal-value tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Bool,
    Int,
    Float,
    String,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::Bool => "bool",
            PropertyType::Int => "int",
            PropertyType::Float => "float",
            PropertyType::String => "string",
        };
        f.write_str(name)
    }
}

const BOOL_KEYS: &[&str] = &[
    "allow-cheats",
    "allow-list",
    "block-network-ids-are-hashes",
    "client-side-chunk-generation-enabled",
    "content-log-file-enabled",
    "correct-player-movement",
    "disable-custom-skins",
    "disable-persona",
    "disable-player-interaction",
    "emit-server-telemetry",
    "enable-lan-visibility",
    "force-gamemode",
    "online-mode",
    "server-authoritative-block-breaking",
    "texturepack-required",
    "white-list",
];

const INT_KEYS: &[&str] = &[
    "compression-threshold",
    "max-players",
    "max-threads",
    "player-idle-timeout",
    "player-movement-duration-threshold-in-ms",
    "player-movement-score-threshold",
    "server-port",
    "server-portv6",
    "tick-distance",
    "view-distance",
];

const FLOAT_KEYS: &[&str] = &[
    "player-movement-action-direction-threshold",
    "player-movement-distance-threshold",
];

const LEGAL_VALUES: &[(&str, &[&str])] = &[
    ("difficulty", &["peaceful", "easy", "normal", "hard"]),
    ("gamemode", &["survival", "creative", "adventure"]),
    (
        "default-player-permission-level",
        &["visitor", "member", "operator"],
    ),
    ("compression-algorithm", &["zlib", "snappy"]),
    (
        "server-authoritative-movement",
        &["client-auth", "server-auth", "server-auth-with-rewind"],
    ),
    ("chat-restriction", &["None", "Dropped", "Disabled"]),
];

/// Type of a key, from the fixed table. Unknown keys are strings.
pub fn property_type(name: &str) -> PropertyType {
    if BOOL_KEYS.contains(&name) {
        PropertyType::Bool
    } else if INT_KEYS.contains(&name) {
        PropertyType::Int
    } else if FLOAT_KEYS.contains(&name) {
        PropertyType::Float
    } else {
        PropertyType::String
    }
}

/// Enumerated legal values for a key; empty means free-form.
pub fn legal_values(name: &str) -> &'static [&'static str] {
    LEGAL_VALUES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, values)| *values)
        .unwrap_or(&[])
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PropertyValue {
    /// Parse `raw` as `ty`. The error is a short reason for the operator.
    pub fn parse(ty: PropertyType, raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match ty {
            PropertyType::Bool => match raw {
                "true" => Ok(PropertyValue::Bool(true)),
                "false" => Ok(PropertyValue::Bool(false)),
                _ => Err("expected true or false".to_string()),
            },
            PropertyType::Int => raw
                .parse()
                .map(PropertyValue::Int)
                .map_err(|_| "expected an integer".to_string()),
            PropertyType::Float => raw
                .parse()
                .map(PropertyValue::Float)
                .map_err(|_| "expected a number".to_string()),
            PropertyType::String => Ok(PropertyValue::Str(raw.to_string())),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Str(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub name: String,
    pub value: PropertyValue,
    pub pending: Option<PropertyValue>,
    pub legal_values: &'static [&'static str],
    /// Text of the `#` lines directly above the key, joined with newlines.
    pub help: String,
    /// Index into the raw line list.
    line: usize,
    /// Value text exactly as it appears in the file.
    raw_value: String,
    /// Validated text of `pending`, written as given.
    pending_raw: Option<String>,
}

impl ConfigEntry {
    pub fn property_type(&self) -> PropertyType {
        property_type(&self.name)
    }

    /// `true` if a pending value would change the file. Values are compared
    /// parsed, so `0.30` and `0.3` are the same float.
    pub fn is_dirty(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| *pending != self.value)
    }
}

/// A loaded `server.properties` file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    lines: Vec<String>,
    entries: Vec<ConfigEntry>,
}

impl ConfigStore {
    /// Read and parse the file at `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(Self::parse(path, &text))
    }

    /// `server.properties` inside a server install root.
    pub fn load_from_root(root: &Path) -> Result<Self, CoreError> {
        Self::load(&root.join(PROPERTIES_FILE))
    }

    /// Parse file contents. `path` is where [`save`](Self::save) will write.
    pub fn parse(path: &Path, text: &str) -> Self {
        let lines: Vec<String> = text.split_inclusive('\n').map(str::to_string).collect();
        let mut entries = Vec::new();
        let mut help: Vec<&str> = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let content = line.trim_end_matches(['\r', '\n']).trim();
            if let Some(comment) = content.strip_prefix('#') {
                help.push(comment.trim());
                continue;
            }
            let Some((key, raw)) = content.split_once('=') else {
                help.clear();
                continue;
            };
            let name = key.trim().to_string();
            let ty = property_type(&name);
            let value = PropertyValue::parse(ty, raw).unwrap_or_else(|reason| {
                tracing::warn!(property = %name, value = raw, %reason, "keeping value as text");
                PropertyValue::Str(raw.trim().to_string())
            });
            entries.push(ConfigEntry {
                legal_values: legal_values(&name),
                name,
                value,
                pending: None,
                help: help.join("\n"),
                line: idx,
                raw_value: raw.to_string(),
                pending_raw: None,
            });
            help.clear();
        }

        Self {
            path: path.to_path_buf(),
            lines,
            entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Stage a new value for `name`, validated against its type and legal
    /// values. Nothing is written until [`save`](Self::save).
    pub fn set_pending(&mut self, name: &str, value: &str) -> Result<(), CoreError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.name == name)
            .ok_or_else(|| CoreError::UnknownProperty {
                name: name.to_string(),
            })?;

        let invalid = |reason: String| CoreError::InvalidPropertyValue {
            name: name.to_string(),
            value: value.to_string(),
            reason,
        };
        let parsed = PropertyValue::parse(property_type(name), value).map_err(invalid)?;
        if !entry.legal_values.is_empty() && !entry.legal_values.contains(&value.trim()) {
            return Err(invalid(format!(
                "expected one of: {}",
                entry.legal_values.join(", ")
            )));
        }
        entry.pending = Some(parsed);
        entry.pending_raw = Some(value.trim().to_string());
        Ok(())
    }

    pub fn clear_pending(&mut self) {
        for entry in &mut self.entries {
            entry.pending = None;
            entry.pending_raw = None;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.entries.iter().any(ConfigEntry::is_dirty)
    }

    /// The file as it was read.
    pub fn original_text(&self) -> String {
        self.lines.concat()
    }

    /// The file as [`save`](Self::save) would write it.
    pub fn render(&self) -> String {
        let mut lines = self.lines.clone();
        for entry in self.entries.iter().filter(|entry| entry.is_dirty()) {
            if let Some(raw) = &entry.pending_raw {
                lines[entry.line] = rewrite_line(&lines[entry.line], raw);
            }
        }
        lines.concat()
    }

    /// Write pending changes and return the names of keys that changed.
    ///
    /// When nothing changed the file is left untouched.
    pub fn save(&mut self) -> Result<Vec<String>, CoreError> {
        let changed: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_dirty())
            .map(|entry| entry.name.clone())
            .collect();

        if !changed.is_empty() {
            let text = self.render();
            let tmp = self.path.with_extension("properties.tmp");
            std::fs::write(&tmp, &text).map_err(|e| io_err(&tmp, e))?;
            std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        }

        for entry in &mut self.entries {
            let dirty = entry.is_dirty();
            let (Some(pending), Some(raw)) = (entry.pending.take(), entry.pending_raw.take()) else {
                continue;
            };
            if dirty {
                self.lines[entry.line] = rewrite_line(&self.lines[entry.line], &raw);
                entry.raw_value = raw;
                entry.value = pending;
            }
        }

        tracing::info!(path = %self.path.display(), changed = changed.len(), "saved server properties");
        Ok(changed)
    }
}

/// Replace the value part of `line`, keeping the key text and terminator.
fn rewrite_line(line: &str, value: &str) -> String {
    let body = line.trim_end_matches(['\r', '\n']);
    let terminator = &line[body.len()..];
    let key = body.split_once('=').map(|(key, _)| key).unwrap_or(body);
    format!("{key}={value}{terminator}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const SAMPLE: &str = "# Bedrock server\r\n\
                          \r\n\
                          # Used as the server name\r\n\
                          server-name=Dedicated Server\r\n\
                          # Allowed values: survival, creative, adventure\r\n\
                          gamemode=survival\r\n\
                          max-players=10\r\n\
                          allow-cheats=false\r\n\
                          player-movement-distance-threshold=0.3\r\n\
                          level-seed=\r\n";

    fn store() -> ConfigStore {
        ConfigStore::parse(Path::new("server.properties"), SAMPLE)
    }

    #[test]
    fn entries_have_types_and_help() {
        let store = store();
        assert_eq!(store.entries().len(), 6);

        let name = store.get("server-name").expect("server-name");
        assert_eq!(name.value, PropertyValue::Str("Dedicated Server".into()));
        assert_eq!(name.help, "Used as the server name");

        let gamemode = store.get("gamemode").expect("gamemode");
        assert_eq!(gamemode.legal_values, &["survival", "creative", "adventure"]);
        assert_eq!(gamemode.help, "Allowed values: survival, creative, adventure");

        assert_eq!(store.get("max-players").unwrap().value, PropertyValue::Int(10));
        assert_eq!(store.get("max-players").unwrap().help, "");
        assert_eq!(store.get("allow-cheats").unwrap().value, PropertyValue::Bool(false));
        assert_eq!(
            store.get("player-movement-distance-threshold").unwrap().value,
            PropertyValue::Float(0.3)
        );
        assert_eq!(store.get("level-seed").unwrap().value, PropertyValue::Str(String::new()));
    }

    #[test]
    fn blank_line_separates_file_header_from_help() {
        let store = ConfigStore::parse(Path::new("p"), "# header\n\nkey=value\n");
        assert_eq!(store.get("key").unwrap().help, "");
    }

    #[test]
    fn unchanged_render_is_byte_identical() {
        let mut store = store();
        assert_eq!(store.render(), SAMPLE);
        store.set_pending("max-players", "10").unwrap();
        assert!(!store.has_pending());
        assert_eq!(store.render(), SAMPLE);
    }

    #[test]
    fn render_rewrites_only_pending_lines() {
        let mut store = store();
        store.set_pending("gamemode", "creative").unwrap();
        let expected = SAMPLE.replace("gamemode=survival\r\n", "gamemode=creative\r\n");
        assert_eq!(store.render(), expected);
    }

    #[test]
    fn floats_are_written_as_typed_and_compared_by_value() {
        let mut store = store();
        store
            .set_pending("player-movement-distance-threshold", "0.30")
            .unwrap();
        assert!(!store.has_pending());
        assert_eq!(store.render(), SAMPLE);

        store
            .set_pending("player-movement-distance-threshold", "1.0")
            .unwrap();
        assert!(store.has_pending());
        let expected = SAMPLE.replace(
            "player-movement-distance-threshold=0.3\r\n",
            "player-movement-distance-threshold=1.0\r\n",
        );
        assert_eq!(store.render(), expected);
    }

    #[rstest]
    #[case("max-players", "lots")]
    #[case("allow-cheats", "yes")]
    #[case("gamemode", "spectator")]
    #[case("player-movement-distance-threshold", "far")]
    fn invalid_pending_values_are_rejected(#[case] name: &str, #[case] value: &str) {
        let mut store = store();
        let err = store.set_pending(name, value).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPropertyValue { .. }), "got: {err}");
        assert!(!store.has_pending());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = store().set_pending("no-such-key", "1").unwrap_err();
        assert!(matches!(err, CoreError::UnknownProperty { .. }));
    }

    #[test]
    fn save_writes_changes_and_materializes_pending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PROPERTIES_FILE);
        std::fs::write(&path, SAMPLE).unwrap();

        let mut store = ConfigStore::load(&path).unwrap();
        store.set_pending("max-players", "20").unwrap();
        store.set_pending("allow-cheats", "false").unwrap();
        let changed = store.save().unwrap();

        assert_eq!(changed, vec!["max-players".to_string()]);
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, SAMPLE.replace("max-players=10", "max-players=20"));
        assert_eq!(store.get("max-players").unwrap().value, PropertyValue::Int(20));
        assert!(store.get("max-players").unwrap().pending.is_none());
        assert!(!dir.path().join("server.properties.tmp").exists());
    }

    #[test]
    fn save_without_changes_does_not_touch_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PROPERTIES_FILE);
        std::fs::write(&path, SAMPLE).unwrap();
        let mut store = ConfigStore::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(store.save().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn mistyped_value_in_file_is_kept_as_text() {
        let store = ConfigStore::parse(Path::new("p"), "max-players=many\n");
        assert_eq!(
            store.get("max-players").unwrap().value,
            PropertyValue::Str("many".into())
        );
        assert_eq!(store.render(), "max-players=many\n");
    }
}
