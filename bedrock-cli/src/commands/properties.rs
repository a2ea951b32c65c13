//! `bedrock-console properties`: typed access to server.properties.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use similar::TextDiff;
use tabled::{settings::Style, Table, Tabled};

use bedrock_core::{ConfigEntry, ConfigStore};

use super::{load_settings, RootArg};

#[derive(Subcommand, Debug)]
pub enum PropertiesCommand {
    /// List every key with its type and value.
    List(ListArgs),
    /// Print the value of one key.
    Get(KeyArgs),
    /// Validate and write one key. The server needs a restart to apply it.
    Set(SetArgs),
    /// Preview the change `set` would make, as a unified diff.
    Diff(SetArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Property name, e.g. `max-players`.
    pub key: String,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Property name, e.g. `max-players`.
    pub key: String,

    /// New value.
    pub value: String,
}

pub fn run(command: PropertiesCommand) -> Result<()> {
    match command {
        PropertiesCommand::List(args) => list(args),
        PropertiesCommand::Get(args) => get(args),
        PropertiesCommand::Set(args) => set(args),
        PropertiesCommand::Diff(args) => diff(args),
    }
}

fn open(root: &RootArg) -> Result<ConfigStore> {
    let (_, settings) = load_settings()?;
    let root = root.resolve(&settings)?;
    ConfigStore::load_from_root(&root).context("failed to read server.properties")
}

#[derive(Serialize)]
struct PropertyJson<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    ty: String,
    value: String,
    legal_values: &'a [&'static str],
    help: &'a str,
}

#[derive(Tabled)]
struct PropertyRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "type")]
    ty: String,
    #[tabled(rename = "value")]
    value: String,
    #[tabled(rename = "allowed")]
    allowed: String,
}

fn list(args: ListArgs) -> Result<()> {
    let store = open(&args.root)?;

    if args.json {
        let payload: Vec<PropertyJson<'_>> = store
            .entries()
            .iter()
            .map(|entry| PropertyJson {
                name: &entry.name,
                ty: entry.property_type().to_string(),
                value: entry.value.to_string(),
                legal_values: entry.legal_values,
                help: &entry.help,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize properties")?
        );
        return Ok(());
    }

    if store.entries().is_empty() {
        println!("No properties in {}.", store.path().display());
        return Ok(());
    }
    let rows: Vec<PropertyRow> = store.entries().iter().map(row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn row(entry: &ConfigEntry) -> PropertyRow {
    PropertyRow {
        key: entry.name.clone(),
        ty: entry.property_type().to_string(),
        value: entry.value.to_string(),
        allowed: entry.legal_values.join(", "),
    }
}

fn get(args: KeyArgs) -> Result<()> {
    let store = open(&args.root)?;
    let entry = store
        .get(&args.key)
        .with_context(|| format!("'{}' is not set in server.properties", args.key))?;
    println!("{}", entry.value);
    Ok(())
}

fn set(args: SetArgs) -> Result<()> {
    let mut store = open(&args.root)?;
    store
        .set_pending(&args.key, &args.value)
        .with_context(|| format!("cannot set '{}'", args.key))?;
    let changed = store.save().context("failed to write server.properties")?;
    if changed.is_empty() {
        println!("{} is already {}", args.key, args.value);
    } else {
        println!("{} Set {} = {}", "✓".green(), args.key, args.value);
        println!("Restart the server to apply the change.");
    }
    Ok(())
}

fn diff(args: SetArgs) -> Result<()> {
    let mut store = open(&args.root)?;
    store
        .set_pending(&args.key, &args.value)
        .with_context(|| format!("cannot set '{}'", args.key))?;

    let before = store.original_text();
    let after = store.render();
    if before == after {
        println!("No differences for '{}'.", args.key);
        return Ok(());
    }
    let unified = TextDiff::from_lines(&before, &after)
        .unified_diff()
        .header("a/server.properties", "b/server.properties")
        .context_radius(3)
        .to_string();
    print!("{unified}");
    if !unified.ends_with('\n') {
        println!();
    }
    Ok(())
}
