//! server.properties and permissions.json edits against real files.

use assert_fs::prelude::*;
use bedrock_core::{
    permissions::{read_permissions, set_permission_level},
    properties::PROPERTIES_FILE,
    ConfigStore, CoreError, PermissionLevel, PropertyValue, Xuid,
};
use predicates::prelude::*;
use std::fs;

const PROPERTIES: &str = "server-name=Dedicated Server\n\
# Allowed values: \"peaceful\", \"easy\", \"normal\", or \"hard\"\n\
difficulty=easy\n\
\n\
# Maximum number of players\n\
max-players=10\n";

// ---------------------------------------------------------------------------
// 1. Properties
// ---------------------------------------------------------------------------

#[test]
fn load_missing_properties_reports_path() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let err = ConfigStore::load_from_root(root.path()).unwrap_err();
    assert!(matches!(err, CoreError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains(PROPERTIES_FILE));
}

#[test]
fn load_save_without_changes_is_byte_identical() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let file = root.child(PROPERTIES_FILE);
    file.write_str(PROPERTIES).expect("write");

    let mut store = ConfigStore::load_from_root(root.path()).expect("load");
    assert!(store.save().expect("save").is_empty());
    file.assert(PROPERTIES);
}

#[test]
fn pending_change_rewrites_one_line() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let file = root.child(PROPERTIES_FILE);
    file.write_str(PROPERTIES).expect("write");

    let mut store = ConfigStore::load_from_root(root.path()).expect("load");
    store.set_pending("difficulty", "hard").expect("legal value");
    assert_eq!(store.save().expect("save"), vec!["difficulty".to_string()]);

    file.assert(predicate::str::contains("difficulty=hard\n"));
    file.assert(predicate::str::contains("# Maximum number of players\nmax-players=10\n"));
    root.child("server.properties.tmp").assert(predicate::path::missing());

    let reloaded = ConfigStore::load_from_root(root.path()).expect("reload");
    assert_eq!(
        reloaded.get("difficulty").expect("difficulty").value,
        PropertyValue::Str("hard".into())
    );
    assert_eq!(reloaded.get("max-players").expect("max").help, "Maximum number of players");
}

// ---------------------------------------------------------------------------
// 2. Permissions
// ---------------------------------------------------------------------------

#[test]
fn permission_edit_adds_then_updates() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let xuid = Xuid::from("2535400000000001");

    assert!(set_permission_level(root.path(), &xuid, PermissionLevel::Member).expect("add"));
    assert!(set_permission_level(root.path(), &xuid, PermissionLevel::Operator).expect("update"));

    let entries = read_permissions(root.path()).expect("read");
    assert_eq!(entries, vec![(xuid, "operator".to_string())]);
    root.child("permissions.json.tmp").assert(predicate::path::missing());
}

#[test]
fn corrupt_permissions_file_is_left_alone() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let file = root.child("permissions.json");
    file.write_str("[{broken").expect("write");

    let err = set_permission_level(root.path(), &Xuid::from("1"), PermissionLevel::Visitor)
        .unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert_eq!(fs::read_to_string(file.path()).expect("read"), "[{broken");
}
