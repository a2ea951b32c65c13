//! The server lifecycle state machine.
//!
//! [`ProcessSupervisor`] owns every piece of console state (server state,
//! line buffers, reply accumulator, roster, backup handshake, timers) but
//! performs no process or timer I/O. Inputs are method calls; outputs are
//! [`Effect`]s collected until the caller drains them with
//! [`ProcessSupervisor::take_effects`] and carries them out in order.
//!
//! ```text
//! NotRunning -start-> Loading -first line-> Startup -"Server started."-> Running
//! Running -stop-> Shutdown -exit-> Stopped
//! Running -exit (restart_on_exit)-> Restarting -delay-> Loading
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use bedrock_backup::handshake::SAVE_QUERY_DELAY;
use bedrock_backup::store::copy_replacing;
use bedrock_backup::{
    prune, BackupAction, BackupError, BackupEvent, BackupOrchestrator, BackupRequest, BackupStore,
    PackageJob,
};
use bedrock_core::protocol::{commands, ReplyBlock};
use bedrock_core::{
    classify, parse_log_event, permissions, status_line, strip_log_prefix, ConfigStore,
    ConsoleMessage, CoreError, Difficulty, LineBuffer, LineKind, LogEvent, PermissionLevel,
    ReplyBlockAccumulator, RosterTracker, ServerState, Xuid,
};

use crate::events::{StatusSnapshot, SupervisorEvent};
use crate::settings::Settings;

/// Timers the runtime keeps on the supervisor's behalf. Arming a kind that is
/// already armed replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Delay before restarting a server that exited while running.
    RestartDelay,
    /// Deadline set by [`ProcessSupervisor::start_server_after`].
    ScheduledRestart,
    /// Next "restarting in N" announcement.
    Countdown,
    SaveQuery,
    BackupCooldown,
    PeriodicBackup,
}

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Work the runtime performs for the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Spawn { program: PathBuf, cwd: PathBuf },
    Kill,
    /// Write `<command>\n` to the server's stdin.
    Send(String),
    Arm(TimerKind, Duration),
    Cancel(TimerKind),
    /// Package off the event loop and report back through
    /// [`ProcessSupervisor::on_packaged`].
    Package(PackageJob),
    Publish(SupervisorEvent),
}

/// Next announcement mark (seconds remaining) after one made at `remaining`.
///
/// Announcements come every 5 minutes while more than 10 minutes remain,
/// then every minute, then at 30s, then every 10s; `None` once less than a
/// second would be left.
pub fn next_announcement(remaining: u64) -> Option<u64> {
    if remaining <= 1 {
        return None;
    }
    let step = match remaining {
        r if r > 600 => 300,
        r if r > 60 => 60,
        r if r > 30 => 30,
        _ => 10,
    };
    let mark = (remaining - 1) / step * step;
    (mark >= 1).then_some(mark)
}

fn restart_notice(secs: u64) -> String {
    if secs >= 60 && secs % 60 == 0 {
        format!("Server will restart in {} minute(s).", secs / 60)
    } else {
        format!("Server will restart in {secs} second(s).")
    }
}

pub struct ProcessSupervisor {
    settings: Settings,
    state: ServerState,
    child_alive: bool,
    stdout: LineBuffer,
    stderr: LineBuffer,
    replies: ReplyBlockAccumulator,
    roster: RosterTracker,
    roster_path: Option<PathBuf>,
    backup: BackupOrchestrator,
    difficulty: Option<Difficulty>,
    restart_deadline: Option<Instant>,
    countdown_mark: Option<u64>,
    start_after_stop: bool,
    backup_timer_active: bool,
    next_backup_at: Option<DateTime<Utc>>,
    out: Vec<Effect>,
}

impl ProcessSupervisor {
    /// `roster_path` is where the gamertag cache is saved; `None` keeps it in
    /// memory only.
    pub fn new(settings: Settings, roster: RosterTracker, roster_path: Option<PathBuf>) -> Self {
        let backup = BackupOrchestrator::new(
            settings.server.root.clone().unwrap_or_default(),
            settings.backup.cooldown(),
        );
        Self {
            settings,
            state: ServerState::NotRunning,
            child_alive: false,
            stdout: LineBuffer::new(),
            stderr: LineBuffer::new(),
            replies: ReplyBlockAccumulator::new(),
            roster,
            roster_path,
            backup,
            difficulty: None,
            restart_deadline: None,
            countdown_mark: None,
            start_after_stop: false,
            backup_timer_active: false,
            next_backup_at: None,
            out: Vec::new(),
        }
    }

    /// Start-up housekeeping: prune the store and arm the periodic timer.
    pub fn initialize(&mut self) {
        match &self.settings.backup.folder {
            Some(folder) if folder.is_dir() => self.prune_backups(),
            _ => self.message(ConsoleMessage::warning(
                "The backup folder is not set correctly. Automatic backups will not work.",
            )),
        }
        let timed = self.settings.backup.timed_backups;
        self.set_backup_timer_active(timed);
    }

    /// Drain the effects produced since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.out)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn roster(&self) -> &RosterTracker {
        &self.roster
    }

    pub fn backup(&self) -> &BackupOrchestrator {
        &self.backup
    }

    pub fn difficulty(&self) -> Option<Difficulty> {
        self.difficulty
    }

    /// Seconds until a scheduled restart, or -1 if none is pending.
    pub fn remaining_restart_secs(&self) -> i64 {
        self.restart_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs() as i64)
            .unwrap_or(-1)
    }

    pub fn next_backup_time(&self) -> Option<DateTime<Utc>> {
        self.next_backup_at
    }

    pub fn status_line(&self) -> String {
        status_line(self.state, self.roster.online_count())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            status_line: self.status_line(),
            online: self
                .roster
                .online()
                .iter()
                .map(|xuid| self.roster.display_name(xuid))
                .collect(),
            restart_in_secs: self.remaining_restart_secs(),
            next_backup: self.next_backup_at,
            backup_in_flight: self.backup.in_flight(),
            difficulty: self.difficulty,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&mut self) {
        if self.child_alive {
            tracing::debug!(state = %self.state, "start ignored; server process exists");
            return;
        }
        let Some(program) = self.executable() else {
            self.message(ConsoleMessage::error(
                "Server root folder is not valid. Server can not start.",
            ));
            self.set_state(ServerState::NotRunning);
            return;
        };
        let cwd = program
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        self.stdout = LineBuffer::new();
        self.stderr = LineBuffer::new();
        self.replies = ReplyBlockAccumulator::new();
        self.child_alive = true;
        tracing::info!(program = %program.display(), "starting server");
        self.emit(Effect::Spawn { program, cwd });
        self.set_state(ServerState::Loading);
    }

    /// The runtime could not spawn the process.
    pub fn spawn_failed(&mut self, reason: &str) {
        self.child_alive = false;
        self.message(ConsoleMessage::error(format!("Could not start the server: {reason}")));
        self.set_state(ServerState::NotRunning);
    }

    /// Ask the server to stop. A second stop while shutting down kills it.
    pub fn stop(&mut self) {
        match self.state {
            ServerState::NotRunning | ServerState::Stopped => {}
            ServerState::Restarting => {
                self.emit(Effect::Cancel(TimerKind::RestartDelay));
                self.set_state(ServerState::Stopped);
            }
            ServerState::Shutdown => {
                if self.child_alive {
                    tracing::warn!("second stop while shutting down; killing server");
                    self.emit(Effect::Kill);
                }
            }
            _ => {
                self.set_state(ServerState::Shutdown);
                self.send(commands::STOP);
            }
        }
    }

    /// Start the server after `delay`, or stop and start it if it is running
    /// then. Announces the restart to players while the server runs.
    pub fn start_server_after(&mut self, delay: Duration) {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            self.message(ConsoleMessage::warning(format!(
                "A restart delay of {} second(s) is too long.",
                delay.as_secs()
            )));
            return;
        };
        self.cancel_restart_timers();
        let secs = delay.as_secs();
        self.restart_deadline = Some(deadline);
        self.emit(Effect::Arm(TimerKind::ScheduledRestart, delay));
        self.publish(SupervisorEvent::RestartScheduled { in_secs: secs });
        self.message(ConsoleMessage::info(format!(
            "Server restart scheduled in {secs} second(s)."
        )));
        if self.state == ServerState::Running && secs >= 1 {
            self.announce(secs);
            self.arm_next_countdown(secs);
        }
    }

    /// Cancel a scheduled restart and its announcements. No-op when nothing
    /// is pending.
    pub fn abort_pending_shutdown(&mut self) {
        if self.restart_deadline.is_none() {
            return;
        }
        self.cancel_restart_timers();
        self.publish(SupervisorEvent::RestartAborted);
        self.message(ConsoleMessage::info("Scheduled restart cancelled."));
        if self.state == ServerState::Running {
            self.send("say Scheduled restart cancelled.");
        }
    }

    fn cancel_restart_timers(&mut self) {
        if self.restart_deadline.take().is_some() {
            self.emit(Effect::Cancel(TimerKind::ScheduledRestart));
        }
        if self.countdown_mark.take().is_some() {
            self.emit(Effect::Cancel(TimerKind::Countdown));
        }
    }

    fn announce(&mut self, secs: u64) {
        self.send(&format!("say {}", restart_notice(secs)));
    }

    fn arm_next_countdown(&mut self, from: u64) {
        self.countdown_mark = next_announcement(from);
        if let Some(mark) = self.countdown_mark {
            self.emit(Effect::Arm(
                TimerKind::Countdown,
                Duration::from_secs(from - mark),
            ));
        }
    }

    /// The child process exited. Partial output still buffered is processed
    /// first.
    pub fn on_exit(&mut self, code: Option<i32>) {
        if !self.child_alive {
            return;
        }
        for stream in [Stream::Stdout, Stream::Stderr] {
            let rest = match stream {
                Stream::Stdout => self.stdout.take_remainder(),
                Stream::Stderr => self.stderr.take_remainder(),
            };
            if let Some(line) = rest {
                self.handle_line(line);
            }
        }
        self.child_alive = false;
        let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        tracing::info!(state = %self.state, %code, "server process exited");

        match self.state {
            ServerState::Shutdown => {
                self.set_state(ServerState::Stopped);
                if std::mem::take(&mut self.start_after_stop) {
                    self.start();
                }
            }
            ServerState::Running if self.settings.server.restart_on_exit => {
                let delay = self.settings.server.restart_delay_secs;
                self.set_state(ServerState::Restarting);
                self.message(ConsoleMessage::error(format!(
                    "Server stopped unexpectedly (exit {code}), will restart in {delay} seconds..."
                )));
                self.emit(Effect::Arm(TimerKind::RestartDelay, Duration::from_secs(delay)));
            }
            ServerState::Loading | ServerState::Startup => {
                self.message(ConsoleMessage::error(format!(
                    "Server exited during start-up (exit {code})."
                )));
                self.set_state(ServerState::Stopped);
            }
            ServerState::Running => {
                self.message(ConsoleMessage::error(format!(
                    "Server stopped unexpectedly (exit {code})."
                )));
                self.set_state(ServerState::Stopped);
            }
            _ => self.set_state(ServerState::Stopped),
        }
    }

    pub fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::RestartDelay => {
                if self.state == ServerState::Restarting {
                    self.start();
                }
            }
            TimerKind::ScheduledRestart => {
                self.restart_deadline = None;
                if self.countdown_mark.take().is_some() {
                    self.emit(Effect::Cancel(TimerKind::Countdown));
                }
                match self.state {
                    ServerState::NotRunning | ServerState::Stopped => self.start(),
                    ServerState::Restarting => {}
                    _ => {
                        self.start_after_stop = true;
                        self.stop();
                    }
                }
            }
            TimerKind::Countdown => {
                if let Some(mark) = self.countdown_mark {
                    if self.state == ServerState::Running {
                        self.announce(mark);
                    }
                    self.arm_next_countdown(mark);
                }
            }
            TimerKind::SaveQuery => {
                let actions = self.backup.query_due();
                self.apply_backup(actions);
            }
            TimerKind::BackupCooldown => {
                let actions = self.backup.cooldown_elapsed();
                self.apply_backup(actions);
            }
            TimerKind::PeriodicBackup => self.periodic_tick(),
        }
    }

    /// Persist roster state before the runtime exits.
    pub fn on_runtime_exit(&mut self) {
        self.save_roster();
    }

    fn set_state(&mut self, new: ServerState) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        tracing::info!(from = %old, to = %new, "server state changed");
        self.message(ConsoleMessage::status(format!(
            "Server status changing: '{old}' -> '{new}'"
        )));
        self.publish(SupervisorEvent::StateChanged { from: old, to: new });

        if new != ServerState::Running {
            let actions = self.backup.cancel_cooldown();
            self.apply_backup(actions);
            if old == ServerState::Running {
                let actions = self
                    .backup
                    .abort("the server is no longer running", Instant::now().into_std());
                self.apply_backup(actions);
                self.save_roster();
                self.roster.clear_online();
            }
        } else {
            self.send(commands::PERMISSION_LIST);
        }
        let line = self.status_line();
        self.publish(SupervisorEvent::StatusLine(line));
    }

    fn executable(&self) -> Option<PathBuf> {
        let root = self.settings.server.root.as_ref()?;
        let program = root.join(&self.settings.server.executable);
        (root.is_dir() && program.is_file()).then_some(program)
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Feed a chunk of child output. Each stream is framed on its own so a
    /// partial stdout line is never spliced with stderr text; complete lines
    /// from both are handled in the order their chunks arrive.
    pub fn on_output(&mut self, stream: Stream, bytes: &[u8]) {
        match stream {
            Stream::Stdout => self.stdout.push(bytes),
            Stream::Stderr => self.stderr.push(bytes),
        }
        loop {
            let line = match stream {
                Stream::Stdout => self.stdout.next_line(),
                Stream::Stderr => self.stderr.next_line(),
            };
            let Some(line) = line else { break };
            self.handle_line(line);
        }
    }

    fn handle_line(&mut self, raw: String) {
        if self.state == ServerState::Loading {
            self.set_state(ServerState::Startup);
        }
        let line = strip_log_prefix(&raw);

        if self.backup.awaiting_file_list() {
            let actions = self.backup.on_file_list(line, Instant::now().into_std());
            self.apply_backup(actions);
            return;
        }

        let kind = classify(line);
        let in_flight = self.backup.in_flight();
        let save_line = in_flight
            && matches!(
                kind,
                LineKind::SaveStarted
                    | LineKind::SaveNotCompleted
                    | LineKind::SaveReady { .. }
                    | LineKind::SaveResumed
            );
        if self.replies.is_open()
            && !save_line
            && !matches!(kind, LineKind::ReplyOpen(_) | LineKind::ReplyClose)
        {
            if self.replies.push(line) {
                return;
            }
            self.message(ConsoleMessage::warning(
                "Discarded an unterminated command reply from the server.",
            ));
        }

        match kind {
            LineKind::SaveStarted if in_flight => {
                self.message(ConsoleMessage::info(
                    "Server is preparing for the world files to be copied.",
                ));
                let actions = self.backup.on_saving();
                self.apply_backup(actions);
            }
            LineKind::SaveNotCompleted if in_flight => {
                self.message(ConsoleMessage::info(
                    "Server is still preparing for the world files to be copied.",
                ));
                let actions = self.backup.on_not_completed();
                self.apply_backup(actions);
            }
            LineKind::SaveReady { inline_files } if in_flight => {
                self.message(ConsoleMessage::info(
                    "Server is ready for the world files to be copied.",
                ));
                let actions = self.backup.on_ready(inline_files, Instant::now().into_std());
                self.apply_backup(actions);
            }
            LineKind::SaveResumed if in_flight => {
                self.message(ConsoleMessage::info(
                    "The server has resumed normal operations.",
                ));
                let actions = self.backup.on_resumed();
                self.apply_backup(actions);
            }
            LineKind::ReplyOpen(fragment) => self.replies.open(fragment),
            LineKind::ReplyClose => {
                let reply = self.replies.close();
                self.handle_reply(reply);
            }
            _ => {
                let event = parse_log_event(line);
                self.message(ConsoleMessage::server(raw.as_str()));
                if let Some(event) = event {
                    self.handle_log_event(event);
                }
            }
        }
    }

    fn handle_log_event(&mut self, event: LogEvent) {
        match event {
            LogEvent::PlayerConnected { name, xuid } => {
                self.roster.player_connected(&name, &xuid, Utc::now());
                self.publish(SupervisorEvent::PlayerConnected { name, xuid });
                let line = self.status_line();
                self.publish(SupervisorEvent::StatusLine(line));
                if self.settings.backup.backup_on_join {
                    self.schedule_backup();
                }
            }
            LogEvent::PlayerDisconnected { name, xuid } => {
                self.roster.player_disconnected(&name, &xuid, Utc::now());
                self.save_roster();
                self.publish(SupervisorEvent::PlayerDisconnected { name, xuid });
                let line = self.status_line();
                self.publish(SupervisorEvent::StatusLine(line));
                if self.settings.backup.backup_on_leave {
                    self.schedule_backup();
                }
            }
            LogEvent::OperatorsChanged => self.send(commands::PERMISSION_LIST),
            LogEvent::ServerStarted => {
                if matches!(self.state, ServerState::Loading | ServerState::Startup) {
                    self.set_state(ServerState::Running);
                }
            }
            LogEvent::Difficulty(difficulty) => {
                if self.state == ServerState::Startup {
                    self.difficulty = Some(difficulty);
                    self.publish(SupervisorEvent::DifficultyChanged(difficulty));
                }
            }
        }
    }

    fn handle_reply(&mut self, reply: Result<Option<ReplyBlock>, CoreError>) {
        match reply {
            Ok(Some(ReplyBlock::Permissions(entries))) => {
                self.roster.apply_permissions(&entries);
                self.publish(SupervisorEvent::PermissionsChanged);
            }
            Ok(Some(ReplyBlock::Whitelist(entries))) => {
                self.message(ConsoleMessage::info("Server whitelist:"));
                for entry in &entries {
                    let marker = if entry.ignores_player_limit {
                        " [Ignores player limit]"
                    } else {
                        ""
                    };
                    self.message(ConsoleMessage::info(format!("{}{marker}", entry.name)));
                }
                let names = entries.into_iter().map(|entry| entry.name).collect();
                self.publish(SupervisorEvent::Whitelist(names));
            }
            Ok(Some(ReplyBlock::Ops(xuids))) => {
                self.message(ConsoleMessage::info("Server operators:"));
                for xuid in &xuids {
                    let name = self.roster.display_name(xuid);
                    self.message(ConsoleMessage::info(name));
                }
            }
            Ok(Some(ReplyBlock::Other { command })) => {
                tracing::debug!(%command, "ignoring reply block");
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "unparsable reply block");
                self.message(ConsoleMessage::warning(format!(
                    "Could not read a reply from the server: {err}"
                )));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Forward operator-typed text to the server.
    pub fn send_command(&mut self, text: &str) {
        if !self.child_alive {
            self.message(ConsoleMessage::warning("The server is not running."));
            return;
        }
        self.send(text);
    }

    /// Set the world difficulty (0-3). Only sent when it changes.
    pub fn set_difficulty(&mut self, level: u8) {
        let Some(difficulty) = Difficulty::from_level(level) else {
            self.message(ConsoleMessage::warning("Difficulty must be between 0 and 3."));
            return;
        };
        if self.difficulty == Some(difficulty) {
            return;
        }
        self.send(&format!("difficulty {level}"));
        self.difficulty = Some(difficulty);
        self.publish(SupervisorEvent::DifficultyChanged(difficulty));
    }

    /// Rewrite `permissions.json` and have the server reload it.
    pub fn set_permission_level(&mut self, xuid: &Xuid, level: PermissionLevel) {
        if self.roster.permission_level(xuid) == Some(level) {
            return;
        }
        let Some(root) = self.settings.server.root.clone() else {
            self.message(ConsoleMessage::error("No server root folder is configured."));
            return;
        };
        match permissions::set_permission_level(&root, xuid, level) {
            Ok(false) => {
                let name = self.roster.display_name(xuid);
                self.message(ConsoleMessage::info(format!("{name} is already {level}.")));
            }
            Ok(true) => {
                let name = self.roster.display_name(xuid);
                self.message(ConsoleMessage::info(format!("Set {name} to {level}.")));
                self.send(commands::PERMISSION_RELOAD);
                self.send(commands::PERMISSION_LIST);
            }
            Err(err) => self.message(ConsoleMessage::error(format!(
                "Could not update permissions: {err}"
            ))),
        }
    }

    /// Change one `server.properties` key.
    pub fn set_property(&mut self, key: &str, value: &str) {
        let Some(root) = self.settings.server.root.clone() else {
            self.message(ConsoleMessage::error("No server root folder is configured."));
            return;
        };
        let result = ConfigStore::load_from_root(&root).and_then(|mut store| {
            store.set_pending(key, value)?;
            store.save()
        });
        match result {
            Ok(changed) if changed.is_empty() => {
                self.message(ConsoleMessage::info(format!("{key} is already {value}.")));
            }
            Ok(changed) => {
                self.message(ConsoleMessage::info(
                    "server.properties updated; restart the server to apply it.",
                ));
                self.publish(SupervisorEvent::ConfigUpdated { changed });
            }
            Err(err) => self.message(ConsoleMessage::error(format!(
                "Could not update server.properties: {err}"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    /// Back up into the managed store, respecting the cooldown.
    pub fn schedule_backup(&mut self) {
        if !self.accepting_backups() {
            return;
        }
        let actions = self
            .backup
            .schedule_backup(BackupRequest::Scheduled, Instant::now().into_std());
        self.apply_backup(actions);
    }

    /// Back up to `destination` now, ignoring the cooldown.
    pub fn start_instant_backup(&mut self, destination: PathBuf) {
        if !self.accepting_backups() {
            return;
        }
        let actions = self
            .backup
            .start_backup(BackupRequest::Instant { destination });
        self.apply_backup(actions);
    }

    pub fn on_packaged(&mut self, result: Result<PathBuf, BackupError>) {
        let actions = self
            .backup
            .packaging_finished(result, Instant::now().into_std());
        self.apply_backup(actions);
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        let actions = self.backup.set_cooldown(cooldown, Instant::now().into_std());
        self.apply_backup(actions);
    }

    /// Turn the periodic backup timer on or off. Only an actual change is
    /// published.
    pub fn set_backup_timer_active(&mut self, active: bool) {
        if active == self.backup_timer_active {
            return;
        }
        self.backup_timer_active = active;
        if active {
            self.arm_periodic();
        } else {
            self.emit(Effect::Cancel(TimerKind::PeriodicBackup));
            self.next_backup_at = None;
        }
        self.publish_timer_changed();
    }

    /// Change the periodic interval; an active timer restarts with it.
    pub fn set_backup_frequency_hours(&mut self, hours: u64) {
        self.settings.backup.frequency_hours = hours;
        if self.backup_timer_active {
            self.arm_periodic();
            self.publish_timer_changed();
        }
    }

    /// Apply the retention limits to the managed store.
    pub fn prune_backups(&mut self) {
        let Some(folder) = self.settings.backup.folder.clone() else {
            return;
        };
        let store = BackupStore::new(folder);
        let policy = self.settings.backup.retention.policy();
        match prune(&store, &policy, Utc::now()) {
            Ok(report) => {
                let changed = report.changed();
                for path in report.deleted {
                    self.publish(SupervisorEvent::BackupDeleted(path));
                }
                if changed {
                    self.publish(SupervisorEvent::StorageChanged);
                }
            }
            Err(err) => self.message(ConsoleMessage::warning(format!(
                "Could not prune backups: {err}"
            ))),
        }
    }

    fn accepting_backups(&mut self) -> bool {
        if self.state == ServerState::Running {
            return true;
        }
        self.message(ConsoleMessage::warning(
            "Backups are only possible while the server is running.",
        ));
        false
    }

    fn periodic_tick(&mut self) {
        if !self.backup_timer_active {
            return;
        }
        self.arm_periodic();
        self.publish_timer_changed();
        if !self.settings.backup.timed_backups || self.state != ServerState::Running {
            return;
        }
        if self.settings.backup.always_backup_on_time {
            let actions = self.backup.start_backup(BackupRequest::Scheduled);
            self.apply_backup(actions);
        } else {
            self.schedule_backup();
        }
    }

    fn arm_periodic(&mut self) {
        let interval = self.settings.backup.interval();
        self.emit(Effect::Arm(TimerKind::PeriodicBackup, interval));
        self.next_backup_at = chrono::Duration::from_std(interval)
            .ok()
            .map(|interval| Utc::now() + interval);
    }

    fn publish_timer_changed(&mut self) {
        self.publish(SupervisorEvent::BackupTimerChanged {
            active: self.backup_timer_active,
            next: self.next_backup_at,
        });
    }

    fn apply_backup(&mut self, actions: Vec<BackupAction>) {
        for action in actions {
            match action {
                BackupAction::Send(command) => self.send(command),
                BackupAction::ScheduleQuery => {
                    self.emit(Effect::Arm(TimerKind::SaveQuery, SAVE_QUERY_DELAY));
                }
                BackupAction::Package(job) => self.emit(Effect::Package(job)),
                BackupAction::ArmCooldown(delay) => {
                    self.emit(Effect::Arm(TimerKind::BackupCooldown, delay));
                }
                BackupAction::CancelCooldown => self.emit(Effect::Cancel(TimerKind::BackupCooldown)),
                BackupAction::Message(message) => self.message(message),
                BackupAction::Event(event) => self.handle_backup_event(event),
            }
        }
    }

    fn handle_backup_event(&mut self, event: BackupEvent) {
        self.publish(SupervisorEvent::Backup(event.clone()));
        let timed = self.settings.backup.timed_backups;
        match event {
            BackupEvent::Starting {
                request: BackupRequest::Scheduled,
            } if !self.settings.backup.always_backup_on_time => {
                self.set_backup_timer_active(false);
            }
            BackupEvent::Finished { request, archive } => {
                self.route_archive(&request, &archive);
                if request == BackupRequest::Scheduled {
                    self.set_backup_timer_active(timed);
                }
                let actions = self.backup.complete_backup(Instant::now().into_std());
                self.apply_backup(actions);
            }
            BackupEvent::Failed {
                request: BackupRequest::Scheduled,
                ..
            } => self.set_backup_timer_active(timed),
            _ => {}
        }
    }

    /// Deliver a finished archive to where its request wanted it.
    fn route_archive(&mut self, request: &BackupRequest, archive: &std::path::Path) {
        let result = match request {
            BackupRequest::Instant { destination } => {
                copy_replacing(archive, destination).map(|()| destination.clone())
            }
            BackupRequest::Scheduled => match self.settings.backup.folder.clone() {
                Some(folder) => BackupStore::new(folder).store_archive(archive, Utc::now()),
                None => Err(BackupError::BackupFolderNotConfigured),
            },
        };
        match result {
            Ok(dest) => {
                self.message(ConsoleMessage::info(format!(
                    "Backup complete, saved to {}.",
                    dest.display()
                )));
                if *request == BackupRequest::Scheduled {
                    self.publish(SupervisorEvent::StorageChanged);
                    self.prune_backups();
                }
            }
            Err(err) => {
                self.message(ConsoleMessage::error(format!(
                    "The backup could not be saved: {err}"
                )));
                self.publish(SupervisorEvent::Backup(BackupEvent::Failed {
                    request: request.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                }));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn save_roster(&self) {
        let Some(path) = &self.roster_path else {
            return;
        };
        if let Err(err) = self.roster.save_at(path, Utc::now()) {
            tracing::warn!(error = %err, "could not save roster cache");
        }
    }

    fn send(&mut self, command: &str) {
        if self.child_alive {
            self.emit(Effect::Send(command.to_string()));
        } else {
            tracing::debug!(command, "dropping command; no server process");
        }
    }

    fn message(&mut self, message: ConsoleMessage) {
        self.publish(SupervisorEvent::Message(message));
    }

    fn publish(&mut self, event: SupervisorEvent) {
        self.emit(Effect::Publish(event));
    }

    fn emit(&mut self, effect: Effect) {
        self.out.push(effect);
    }
}
