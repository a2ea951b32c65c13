//! `bedrock-console run`: foreground supervision.
//!
//! Lines typed on stdin go to the server's console. Lines starting with `:`
//! are console commands instead; `:help` lists them.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

use bedrock_core::{ConsoleMessage, Severity, Xuid};
use bedrock_daemon::{start_blocking, ConsoleCommand, ConsoleHandle, StatusSnapshot, SupervisorEvent};

use super::{load_settings, RootArg};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub root: RootArg,

    /// Wait for `:start` instead of starting the server right away.
    #[arg(long)]
    pub no_start: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let (home, mut settings) = load_settings()?;
        if let Some(root) = self.root.root {
            settings.server.root = Some(root);
        }
        let autostart = !self.no_start;
        start_blocking(&home, settings, move |handle, events| {
            session(handle, events, autostart)
        })
        .context("console exited with error")
    }
}

const HELP: &str = "\
:start                      start the server
:stop                       stop the server (twice to kill it)
:restart [secs]             restart after a delay, announcing it in game
:abort-restart              cancel a scheduled restart
:backup <path>              back up now to <path>
:schedule-backup            back up into the backup folder (respects the cooldown)
:timer on|off               timed backups
:frequency <hours>          timed backup interval
:cooldown <minutes>         minimum gap between scheduled backups
:prune                      apply retention limits to the backup folder
:difficulty <0-3>           change the world difficulty
:permission <xuid> <level>  member | operator | visitor
:set <key> <value>          change a server.properties key
:status                     show the console status
:quit                       stop the server and exit";

#[derive(Debug)]
enum Line {
    Empty,
    Quit,
    Status,
    Help,
    Command(ConsoleCommand),
}

async fn session(
    handle: ConsoleHandle,
    events: broadcast::Receiver<SupervisorEvent>,
    autostart: bool,
) {
    tokio::spawn(print_events(events));
    if autostart && handle.send(ConsoleCommand::Start).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                eprintln!("{}", format!("could not read stdin: {err}").red());
                break;
            }
        };
        match parse_line(&line) {
            Ok(Line::Empty) => {}
            Ok(Line::Quit) => break,
            Ok(Line::Help) => println!("{HELP}"),
            Ok(Line::Status) => match handle.status().await {
                Ok(status) => print_status(&status),
                Err(_) => break,
            },
            Ok(Line::Command(command)) => {
                if handle.send(command).await.is_err() {
                    break;
                }
            }
            Err(reason) => eprintln!("{}", reason.yellow()),
        }
    }
}

fn parse_line(line: &str) -> Result<Line, String> {
    let line = line.trim_end();
    let Some(rest) = line.strip_prefix(':') else {
        if line.trim().is_empty() {
            return Ok(Line::Empty);
        }
        return Ok(Line::Command(ConsoleCommand::SendText(line.to_string())));
    };

    let words: Vec<&str> = rest.split_whitespace().collect();
    let command = match words.as_slice() {
        ["quit" | "q"] => return Ok(Line::Quit),
        ["status"] => return Ok(Line::Status),
        ["help"] => return Ok(Line::Help),
        ["start"] => ConsoleCommand::Start,
        ["stop"] => ConsoleCommand::Stop,
        ["restart"] => ConsoleCommand::RestartAfter(Duration::ZERO),
        ["restart", secs] => ConsoleCommand::RestartAfter(Duration::from_secs(number(secs)?)),
        ["abort-restart"] => ConsoleCommand::AbortRestart,
        ["backup", path] => ConsoleCommand::InstantBackup(PathBuf::from(*path)),
        ["schedule-backup"] => ConsoleCommand::ScheduleBackup,
        ["timer", "on"] => ConsoleCommand::SetBackupTimer(true),
        ["timer", "off"] => ConsoleCommand::SetBackupTimer(false),
        ["frequency", hours] => ConsoleCommand::SetBackupFrequency(number(hours)?),
        ["cooldown", minutes] => {
            let minutes: u64 = number(minutes)?;
            ConsoleCommand::SetCooldown(Duration::from_secs(minutes.saturating_mul(60)))
        }
        ["prune"] => ConsoleCommand::PruneBackups,
        ["difficulty", level] => ConsoleCommand::SetDifficulty(number(level)?),
        ["permission", xuid, level] => {
            ConsoleCommand::SetPermission(Xuid::from(*xuid), level.parse()?)
        }
        ["set", key, value @ ..] if !value.is_empty() => {
            ConsoleCommand::SetProperty(key.to_string(), value.join(" "))
        }
        _ => return Err(format!("unrecognised console command ':{rest}'; try :help")),
    };
    Ok(Line::Command(command))
}

fn number<T: FromStr>(raw: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("'{raw}' is not a valid number"))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

async fn print_events(mut events: broadcast::Receiver<SupervisorEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                eprintln!("{}", format!("({skipped} console events dropped)").bright_black());
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &SupervisorEvent) {
    match event {
        SupervisorEvent::Message(message) => print_message(message),
        SupervisorEvent::BackupDeleted(path) => {
            println!("{}", format!("Removed old backup {}", path.display()).bright_black());
        }
        SupervisorEvent::BackupTimerChanged {
            active: true,
            next: Some(next),
        } => {
            let local = next.with_timezone(&Local).format("%Y-%m-%d %H:%M");
            println!("{}", format!("Next timed backup at {local}.").bright_black());
        }
        SupervisorEvent::BackupTimerChanged { active: false, .. } => {
            println!("{}", "Timed backups paused.".bright_black());
        }
        _ => {}
    }
}

fn print_message(message: &ConsoleMessage) {
    let text = message.text.as_str();
    match message.severity {
        Severity::Server => println!("{text}"),
        Severity::Info => println!("{}", text.cyan()),
        Severity::Status => println!("{}", text.green()),
        Severity::Warning => println!("{}", text.yellow()),
        Severity::Error => println!("{}", text.red().bold()),
    }
}

fn print_status(status: &StatusSnapshot) {
    println!("{}", status.status_line.bold());
    if !status.online.is_empty() {
        println!("Online: {}", status.online.join(", "));
    }
    if let Some(difficulty) = status.difficulty {
        println!("Difficulty: {difficulty}");
    }
    if status.restart_in_secs >= 0 {
        println!("Restart in {}s", status.restart_in_secs);
    }
    match status.next_backup {
        Some(next) => println!(
            "Next timed backup: {}",
            next.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("Timed backups: off"),
    }
    if status.backup_in_flight {
        println!("A backup is in progress.");
    }
}
