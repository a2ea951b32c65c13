//! In-place edits of the server's `permissions.json`.
//!
//! The file is handled as untyped JSON so fields this console does not know
//! about survive a rewrite.

use std::path::Path;

use serde_json::{json, Value};

use crate::error::{io_err, CoreError};
use crate::types::{PermissionLevel, Xuid};

pub const PERMISSIONS_FILE: &str = "permissions.json";

/// Set `xuid` to `level` in `<root>/permissions.json`, adding an entry when the
/// xuid is not listed. A missing file is treated as an empty list.
///
/// Returns `true` if the file content changed. The running server only picks
/// the change up after `permission reload`.
pub fn set_permission_level(root: &Path, xuid: &Xuid, level: PermissionLevel) -> Result<bool, CoreError> {
    let path = root.join(PERMISSIONS_FILE);
    let mut doc = if path.exists() {
        let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        if text.trim().is_empty() {
            Value::Array(Vec::new())
        } else {
            serde_json::from_str(&text).map_err(|e| CoreError::Parse {
                path: path.clone(),
                source: e,
            })?
        }
    } else {
        Value::Array(Vec::new())
    };

    let entries = doc
        .as_array_mut()
        .ok_or_else(|| CoreError::PermissionFileShape { path: path.clone() })?;

    let existing = entries
        .iter_mut()
        .find(|entry| entry.get("xuid").and_then(Value::as_str) == Some(xuid.0.as_str()));
    match existing {
        Some(entry) => {
            if entry.get("permission").and_then(Value::as_str) == Some(level.as_str()) {
                return Ok(false);
            }
            entry["permission"] = Value::String(level.as_str().to_string());
        }
        None => entries.push(json!({ "permission": level.as_str(), "xuid": xuid.0 })),
    }

    let text = serde_json::to_string_pretty(&doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    tracing::info!(%xuid, %level, "updated permissions.json");
    Ok(true)
}

/// Read the `{xuid, permission}` pairs from `<root>/permissions.json`.
pub fn read_permissions(root: &Path) -> Result<Vec<(Xuid, String)>, CoreError> {
    let path = root.join(PERMISSIONS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let doc: Value = serde_json::from_str(&text).map_err(|e| CoreError::Parse {
        path: path.clone(),
        source: e,
    })?;
    let entries = doc
        .as_array()
        .ok_or(CoreError::PermissionFileShape { path })?;
    Ok(entries
        .iter()
        .filter_map(|entry| {
            let xuid = entry.get("xuid")?.as_str()?;
            let permission = entry.get("permission")?.as_str()?;
            Some((Xuid::from(xuid), permission.to_string()))
        })
        .collect())
}
