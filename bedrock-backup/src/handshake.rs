//! The save hold / query / resume handshake.
//!
//! [`BackupOrchestrator`] does no process or timer I/O of its own. Each input
//! (a protocol line, a timer firing, a packaging result) returns the
//! [`BackupAction`]s the caller must carry out, in order. Snapshot copying is
//! the one exception: it runs inline while the server is holding, because the
//! server must not be resumed before the copy is done.
//!
//! ```text
//! Idle -> HoldRequested -> Holding -> AwaitingFileList -> Packaging -> Finished -> Idle
//!             ("Saving...")  ("Data saved...")  (file list)  (archive)   (complete_backup)
//! ```
//!
//! Every failure after `save hold` sends `save resume` exactly once.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use bedrock_core::protocol::commands;
use bedrock_core::ConsoleMessage;

use crate::error::{BackupError, FailureKind};
use crate::packager::PackageJob;
use crate::snapshot::{copy_snapshot, parse_file_list};

/// Delay between `save query` polls.
pub const SAVE_QUERY_DELAY: Duration = Duration::from_secs(1);

/// Shortest cooldown accepted between two backups.
pub const MIN_COOLDOWN: Duration = Duration::from_secs(60);

/// Where a finished archive should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupRequest {
    /// Deliver the archive to a caller-chosen path.
    Instant { destination: PathBuf },
    /// Put the archive in the managed store under a generated name.
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    HoldRequested,
    Holding,
    AwaitingFileList,
    Packaging,
    /// Archive ready; waiting for [`BackupOrchestrator::complete_backup`].
    Finished,
}

/// Notable handshake transitions, for the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    /// The request could not start yet and is now the pending one.
    Deferred {
        request: BackupRequest,
        /// Time until the cooldown ends, if that is what it waits for.
        retry_in: Option<Duration>,
    },
    /// The server acknowledged `save hold`.
    Starting { request: BackupRequest },
    /// Snapshot copied and the server resumed; packaging is running.
    SavingData,
    Finished {
        request: BackupRequest,
        archive: PathBuf,
    },
    Failed {
        request: BackupRequest,
        kind: FailureKind,
        reason: String,
    },
    /// Scratch released and cooldown armed.
    Complete,
}

/// Something the caller must do on the orchestrator's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupAction {
    /// Write a command to the server's stdin.
    Send(&'static str),
    /// Call [`BackupOrchestrator::query_due`] after [`SAVE_QUERY_DELAY`].
    ScheduleQuery,
    /// Package off the event loop, then call
    /// [`BackupOrchestrator::packaging_finished`].
    Package(PackageJob),
    /// (Re)arm the cooldown timer; call
    /// [`BackupOrchestrator::cooldown_elapsed`] when it fires.
    ArmCooldown(Duration),
    CancelCooldown,
    Event(BackupEvent),
    Message(ConsoleMessage),
}

/// Drives one backup at a time through the save handshake.
#[derive(Debug)]
pub struct BackupOrchestrator {
    root: PathBuf,
    phase: Phase,
    current: Option<BackupRequest>,
    pending: Option<BackupRequest>,
    scratch: Option<TempDir>,
    hold_sent: bool,
    resume_sent: bool,
    queries_sent: u32,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
}

impl BackupOrchestrator {
    /// `root` is the server install directory; `cooldown` is clamped to
    /// [`MIN_COOLDOWN`].
    pub fn new(root: impl Into<PathBuf>, cooldown: Duration) -> Self {
        Self {
            root: root.into(),
            phase: Phase::Idle,
            current: None,
            pending: None,
            scratch: None,
            hold_sent: false,
            resume_sent: false,
            queries_sent: 0,
            cooldown: cooldown.max(MIN_COOLDOWN),
            cooldown_until: None,
        }
    }

    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_flight(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Request that was started and has not completed or failed yet.
    pub fn current(&self) -> Option<&BackupRequest> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> Option<&BackupRequest> {
        self.pending.as_ref()
    }

    pub fn awaiting_file_list(&self) -> bool {
        self.phase == Phase::AwaitingFileList
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_remaining(now).is_some()
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Start `request` now unless a backup is in flight or the cooldown is
    /// running, in which case it becomes the pending request.
    pub fn schedule_backup(&mut self, request: BackupRequest, now: Instant) -> Vec<BackupAction> {
        if self.in_flight() {
            return self.defer(request, None);
        }
        if let Some(remaining) = self.cooldown_remaining(now) {
            return self.defer(request, Some(remaining));
        }
        self.start_backup(request)
    }

    /// Start `request` regardless of the cooldown. If a backup is already in
    /// flight the request is deferred instead.
    pub fn start_backup(&mut self, request: BackupRequest) -> Vec<BackupAction> {
        if self.in_flight() {
            return self.defer(request, None);
        }

        let mut actions = Vec::new();
        if self.cooldown_until.take().is_some() {
            actions.push(BackupAction::CancelCooldown);
        }
        tracing::info!(?request, "requesting save hold");
        self.phase = Phase::HoldRequested;
        self.current = Some(request);
        self.hold_sent = true;
        self.resume_sent = false;
        self.queries_sent = 0;
        actions.push(BackupAction::Message(ConsoleMessage::info(
            "Asking the server to prepare for a backup.",
        )));
        actions.push(BackupAction::Send(commands::SAVE_HOLD));
        actions
    }

    fn defer(&mut self, request: BackupRequest, retry_in: Option<Duration>) -> Vec<BackupAction> {
        if self.pending.is_some() {
            tracing::debug!("replacing pending backup request");
        }
        self.pending = Some(request.clone());
        let text = match retry_in {
            Some(remaining) => format!(
                "Backup scheduled to run after the cooldown ({}s).",
                remaining.as_secs()
            ),
            None => "Backup scheduled to run after the current one.".to_string(),
        };
        vec![
            BackupAction::Message(ConsoleMessage::info(text)),
            BackupAction::Event(BackupEvent::Deferred { request, retry_in }),
        ]
    }

    // -----------------------------------------------------------------------
    // Protocol lines
    // -----------------------------------------------------------------------

    /// `Saving...`
    pub fn on_saving(&mut self) -> Vec<BackupAction> {
        if self.phase != Phase::HoldRequested {
            return Vec::new();
        }
        self.phase = Phase::Holding;
        let request = self.current.clone().unwrap_or(BackupRequest::Scheduled);
        vec![
            BackupAction::Event(BackupEvent::Starting { request }),
            BackupAction::ScheduleQuery,
        ]
    }

    /// `A previous save has not been completed.`
    pub fn on_not_completed(&mut self) -> Vec<BackupAction> {
        if self.phase != Phase::Holding {
            return Vec::new();
        }
        tracing::debug!(queries = self.queries_sent, "save still in progress");
        vec![BackupAction::ScheduleQuery]
    }

    /// The save-query delay elapsed.
    pub fn query_due(&mut self) -> Vec<BackupAction> {
        if self.phase != Phase::Holding {
            return Vec::new();
        }
        self.queries_sent += 1;
        vec![BackupAction::Send(commands::SAVE_QUERY)]
    }

    /// `Data saved. Files are now ready to be copied.` The file list is either
    /// on the same line or the next one.
    pub fn on_ready(&mut self, inline_files: Option<&str>, now: Instant) -> Vec<BackupAction> {
        if self.phase != Phase::Holding {
            return Vec::new();
        }
        self.phase = Phase::AwaitingFileList;
        match inline_files {
            Some(files) => self.on_file_list(files, now),
            None => Vec::new(),
        }
    }

    /// The `path:size, ...` line. Copies the snapshot, resumes the server and
    /// hands the scratch directory to the packager.
    pub fn on_file_list(&mut self, line: &str, now: Instant) -> Vec<BackupAction> {
        if self.phase != Phase::AwaitingFileList {
            return Vec::new();
        }
        match self.copy_files(line) {
            Ok(job) => {
                self.phase = Phase::Packaging;
                let mut actions = vec![BackupAction::Message(ConsoleMessage::info(
                    "Finished copying data from the server.",
                ))];
                actions.extend(self.send_resume());
                actions.push(BackupAction::Event(BackupEvent::SavingData));
                actions.push(BackupAction::Message(ConsoleMessage::info(
                    "Compressing the backup files.",
                )));
                actions.push(BackupAction::Package(job));
                actions
            }
            Err(err) => self.fail(err, now),
        }
    }

    fn copy_files(&mut self, line: &str) -> Result<PackageJob, BackupError> {
        let files = parse_file_list(line)?;
        let scratch = tempfile::Builder::new()
            .prefix("bedrock-backup-")
            .tempdir()
            .map_err(|source| BackupError::ScratchDir { source })?;
        tracing::info!(files = files.len(), scratch = %scratch.path().display(), "copying snapshot");
        let inputs = copy_snapshot(&self.root, &files, scratch.path())?;
        let job = PackageJob::new(scratch.path(), inputs);
        self.scratch = Some(scratch);
        Ok(job)
    }

    /// `Changes to the level are resumed.`
    pub fn on_resumed(&mut self) -> Vec<BackupAction> {
        tracing::debug!(phase = ?self.phase, "server resumed level changes");
        Vec::new()
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Result of the [`BackupAction::Package`] job.
    pub fn packaging_finished(
        &mut self,
        result: Result<PathBuf, BackupError>,
        now: Instant,
    ) -> Vec<BackupAction> {
        if self.phase != Phase::Packaging {
            tracing::debug!("ignoring packaging result for an abandoned backup");
            return Vec::new();
        }
        match result {
            Ok(archive) => {
                self.phase = Phase::Finished;
                let request = self.current.clone().unwrap_or(BackupRequest::Scheduled);
                tracing::info!(archive = %archive.display(), "backup packaged");
                vec![BackupAction::Event(BackupEvent::Finished { request, archive })]
            }
            Err(err) => self.fail(err, now),
        }
    }

    /// Acknowledge a [`BackupEvent::Finished`]: release the scratch directory
    /// and start the cooldown.
    pub fn complete_backup(&mut self, now: Instant) -> Vec<BackupAction> {
        if self.phase != Phase::Finished {
            return Vec::new();
        }
        self.release();
        self.cooldown_until = Some(now + self.cooldown);
        vec![
            BackupAction::ArmCooldown(self.cooldown),
            BackupAction::Event(BackupEvent::Complete),
        ]
    }

    /// Abandon an in-flight backup, e.g. because the server left `Running`.
    /// A backup that already produced its archive is left alone.
    pub fn abort(&mut self, reason: &str, now: Instant) -> Vec<BackupAction> {
        match self.phase {
            Phase::Idle | Phase::Finished => Vec::new(),
            _ => self.fail(
                BackupError::Interrupted {
                    reason: reason.to_string(),
                },
                now,
            ),
        }
    }

    fn fail(&mut self, err: BackupError, now: Instant) -> Vec<BackupAction> {
        tracing::warn!(error = %err, phase = ?self.phase, "backup failed");
        let request = self.current.clone().unwrap_or(BackupRequest::Scheduled);
        let mut actions = vec![BackupAction::Message(ConsoleMessage::error(format!(
            "Backup failed: {err}"
        )))];
        actions.extend(self.send_resume());
        self.release();
        actions.push(BackupAction::Event(BackupEvent::Failed {
            request,
            kind: err.kind(),
            reason: err.to_string(),
        }));
        if self.pending.is_some() {
            actions.push(BackupAction::ArmCooldown(self.cooldown));
            self.cooldown_until = Some(now + self.cooldown);
        }
        actions
    }

    fn send_resume(&mut self) -> Option<BackupAction> {
        if !self.hold_sent || self.resume_sent {
            return None;
        }
        self.resume_sent = true;
        Some(BackupAction::Send(commands::SAVE_RESUME))
    }

    fn release(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(err) = scratch.close() {
                tracing::warn!(path = %path.display(), error = %err, "could not remove scratch directory");
            }
        }
        self.phase = Phase::Idle;
        self.current = None;
        self.hold_sent = false;
    }

    // -----------------------------------------------------------------------
    // Cooldown
    // -----------------------------------------------------------------------

    /// The cooldown timer fired. Starts the pending request, if any.
    pub fn cooldown_elapsed(&mut self) -> Vec<BackupAction> {
        self.cooldown_until = None;
        match self.pending.take() {
            Some(request) => self.start_backup(request),
            None => Vec::new(),
        }
    }

    /// Stop the cooldown and drop any pending request.
    pub fn cancel_cooldown(&mut self) -> Vec<BackupAction> {
        let had_pending = self.pending.take().is_some();
        if self.cooldown_until.take().is_none() && !had_pending {
            return Vec::new();
        }
        vec![BackupAction::CancelCooldown]
    }

    /// Change the cooldown, clamped to [`MIN_COOLDOWN`]. A running cooldown
    /// with more time left than the new value is shortened.
    pub fn set_cooldown(&mut self, cooldown: Duration, now: Instant) -> Vec<BackupAction> {
        self.cooldown = cooldown.max(MIN_COOLDOWN);
        match self.cooldown_remaining(now) {
            Some(remaining) if remaining > self.cooldown => {
                self.cooldown_until = Some(now + self.cooldown);
                vec![BackupAction::ArmCooldown(self.cooldown)]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sends(actions: &[BackupAction]) -> Vec<&'static str> {
        actions
            .iter()
            .filter_map(|action| match action {
                BackupAction::Send(command) => Some(*command),
                _ => None,
            })
            .collect()
    }

    fn events(actions: &[BackupAction]) -> Vec<&BackupEvent> {
        actions
            .iter()
            .filter_map(|action| match action {
                BackupAction::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn orchestrator() -> BackupOrchestrator {
        BackupOrchestrator::new("/nonexistent/server", Duration::from_secs(30 * 60))
    }

    #[test]
    fn cooldown_is_clamped_to_one_minute() {
        let orch = BackupOrchestrator::new("/srv", Duration::from_secs(5));
        assert_eq!(orch.cooldown(), MIN_COOLDOWN);
    }

    #[test]
    fn start_sends_hold_and_saving_schedules_a_query() {
        let mut orch = orchestrator();
        let actions = orch.start_backup(BackupRequest::Scheduled);
        assert_eq!(sends(&actions), vec!["save hold"]);
        assert_eq!(orch.phase(), Phase::HoldRequested);

        let actions = orch.on_saving();
        assert_eq!(orch.phase(), Phase::Holding);
        assert!(actions.contains(&BackupAction::ScheduleQuery));
        assert!(matches!(events(&actions)[0], BackupEvent::Starting { .. }));
        assert_eq!(sends(&orch.query_due()), vec!["save query"]);
    }

    #[test]
    fn save_lines_are_ignored_when_idle() {
        let mut orch = orchestrator();
        assert!(orch.on_saving().is_empty());
        assert!(orch.on_not_completed().is_empty());
        assert!(orch.on_ready(None, Instant::now()).is_empty());
        assert!(orch.on_file_list("a:1", Instant::now()).is_empty());
        assert!(orch.query_due().is_empty());
        assert!(orch.complete_backup(Instant::now()).is_empty());
        assert_eq!(orch.phase(), Phase::Idle);
    }

    #[test]
    fn unparsable_file_list_fails_and_resumes_once() {
        let mut orch = orchestrator();
        orch.start_backup(BackupRequest::Scheduled);
        orch.on_saving();
        orch.on_ready(None, Instant::now());
        assert!(orch.awaiting_file_list());

        let actions = orch.on_file_list("garbage", Instant::now());
        assert_eq!(sends(&actions), vec!["save resume"]);
        assert_eq!(orch.phase(), Phase::Idle);
        let failed = events(&actions);
        assert!(matches!(
            failed[0],
            BackupEvent::Failed { kind: FailureKind::BackupHandshakeIo, .. }
        ));
    }

    #[test]
    fn second_request_while_in_flight_becomes_pending_most_recent_wins() {
        let mut orch = orchestrator();
        let now = Instant::now();
        orch.start_backup(BackupRequest::Scheduled);

        let actions = orch.schedule_backup(BackupRequest::Scheduled, now);
        assert!(sends(&actions).is_empty());
        let instant = BackupRequest::Instant {
            destination: PathBuf::from("/tmp/manual.zip"),
        };
        orch.start_backup(instant.clone());
        assert_eq!(orch.pending(), Some(&instant));
        assert_eq!(orch.current(), Some(&BackupRequest::Scheduled));
    }

    #[test]
    fn schedule_during_cooldown_defers_and_fires_on_expiry() {
        let mut orch = orchestrator();
        let now = Instant::now();
        orch.set_cooldown(Duration::from_secs(60), now);
        orch.cooldown_until = Some(now + Duration::from_secs(45));

        let actions = orch.schedule_backup(BackupRequest::Scheduled, now);
        assert!(sends(&actions).is_empty());
        assert!(matches!(
            events(&actions)[0],
            BackupEvent::Deferred { retry_in: Some(d), .. } if d.as_secs() == 45
        ));

        let actions = orch.cooldown_elapsed();
        assert_eq!(sends(&actions), vec!["save hold"]);
        assert!(orch.pending().is_none());
    }

    #[test]
    fn start_backup_bypasses_and_cancels_cooldown() {
        let mut orch = orchestrator();
        let now = Instant::now();
        orch.cooldown_until = Some(now + Duration::from_secs(600));
        let actions = orch.start_backup(BackupRequest::Scheduled);
        assert_eq!(actions[0], BackupAction::CancelCooldown);
        assert_eq!(sends(&actions), vec!["save hold"]);
        assert!(!orch.is_cooling_down(now));
    }

    #[test]
    fn set_cooldown_shortens_running_cooldown_only() {
        let mut orch = orchestrator();
        let now = Instant::now();
        orch.cooldown_until = Some(now + Duration::from_secs(1800));

        let actions = orch.set_cooldown(Duration::from_secs(300), now);
        assert_eq!(actions, vec![BackupAction::ArmCooldown(Duration::from_secs(300))]);
        assert!(orch.set_cooldown(Duration::from_secs(900), now).is_empty());
    }

    #[test]
    fn cancel_cooldown_drops_pending() {
        let mut orch = orchestrator();
        let now = Instant::now();
        orch.cooldown_until = Some(now + Duration::from_secs(60));
        orch.schedule_backup(BackupRequest::Scheduled, now);
        assert!(orch.pending().is_some());

        assert_eq!(orch.cancel_cooldown(), vec![BackupAction::CancelCooldown]);
        assert!(orch.pending().is_none());
        assert!(orch.cancel_cooldown().is_empty());
    }

    #[test]
    fn abort_resumes_and_fails_in_flight_backup() {
        let mut orch = orchestrator();
        orch.start_backup(BackupRequest::Scheduled);
        orch.on_saving();
        let actions = orch.abort("server stopped", Instant::now());
        assert_eq!(sends(&actions), vec!["save resume"]);
        assert_eq!(orch.phase(), Phase::Idle);
        assert!(orch.abort("again", Instant::now()).is_empty());
    }

    #[test]
    fn failure_with_pending_request_times_cooldown_from_caller_clock() {
        let mut orch = orchestrator();
        let now = Instant::now() + Duration::from_secs(3600);
        orch.start_backup(BackupRequest::Scheduled);
        orch.schedule_backup(BackupRequest::Scheduled, now);
        orch.on_saving();

        let actions = orch.abort("server stopped", now);
        assert!(actions.contains(&BackupAction::ArmCooldown(orch.cooldown())));
        assert_eq!(orch.cooldown_remaining(now), Some(orch.cooldown()));
    }

    #[test]
    fn stale_packaging_result_is_ignored() {
        let mut orch = orchestrator();
        assert!(orch
            .packaging_finished(Ok(PathBuf::from("/tmp/backup.zip")), Instant::now())
            .is_empty());
    }
}
