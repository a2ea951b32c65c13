use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use bedrock_backup::{run_packager, BackupError, PackageJob, Packager};
use bedrock_core::{PermissionLevel, RosterTracker, Xuid};

use crate::error::{io_err, DaemonError};
use crate::events::{EventBus, StatusSnapshot, SupervisorEvent};
use crate::paths::{console_root, roster_path, SHUTDOWN_GRACE};
use crate::settings::Settings;
use crate::supervisor::{Effect, ProcessSupervisor, Stream, TimerKind};

const INPUT_CAPACITY: usize = 256;
const READ_CHUNK: usize = 8 * 1024;

/// Operator requests accepted by the console runtime.
#[derive(Debug)]
pub enum ConsoleCommand {
    Start,
    Stop,
    /// Restart (or start) the server after the delay, announcing it in-game.
    RestartAfter(Duration),
    AbortRestart,
    /// Raw text for the server's console.
    SendText(String),
    ScheduleBackup,
    InstantBackup(PathBuf),
    SetBackupTimer(bool),
    SetBackupFrequency(u64),
    SetCooldown(Duration),
    PruneBackups,
    SetDifficulty(u8),
    SetPermission(Xuid, PermissionLevel),
    SetProperty(String, String),
    Status(oneshot::Sender<StatusSnapshot>),
}

#[derive(Debug)]
enum Input {
    Command(ConsoleCommand),
    Output {
        generation: u64,
        stream: Stream,
        bytes: Vec<u8>,
    },
    Exited {
        generation: u64,
        code: Option<i32>,
    },
    Timer {
        kind: TimerKind,
        generation: u64,
    },
    Packaged(Result<PathBuf, BackupError>),
    Shutdown,
}

/// Cloneable handle for talking to a running console.
#[derive(Debug, Clone)]
pub struct ConsoleHandle {
    inputs: mpsc::Sender<Input>,
    events: EventBus,
}

impl ConsoleHandle {
    pub async fn send(&self, command: ConsoleCommand) -> Result<(), DaemonError> {
        self.inputs
            .send(Input::Command(command))
            .await
            .map_err(|_| DaemonError::ChannelClosed("console commands"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> Result<StatusSnapshot, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.send(ConsoleCommand::Status(tx)).await?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("status reply"))
    }

    /// Stop the server (killing it after a grace period) and end the runtime.
    pub async fn shutdown(&self) {
        let _ = self.inputs.send(Input::Shutdown).await;
    }
}

/// A console event loop running on the current tokio runtime.
pub struct ConsoleRuntime {
    handle: ConsoleHandle,
    task: JoinHandle<Result<(), DaemonError>>,
}

impl ConsoleRuntime {
    /// Spawn the event loop. Subscribe to `events` before calling this to see
    /// start-up messages. Must be called from inside a tokio runtime.
    pub fn spawn(settings: Settings, roster_path: Option<PathBuf>, events: EventBus) -> Self {
        let roster = match &roster_path {
            Some(path) => RosterTracker::load_at(path, Utc::now(), settings.roster.retention())
                .unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "ignoring unreadable roster cache");
                    RosterTracker::new()
                }),
            None => RosterTracker::new(),
        };
        let packager: Arc<dyn Packager> = Arc::from(settings.backup.packager.build());
        let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
        let handle = ConsoleHandle {
            inputs: tx.clone(),
            events: events.clone(),
        };
        let event_loop = EventLoop {
            supervisor: ProcessSupervisor::new(settings, roster, roster_path),
            events,
            packager,
            inputs: tx,
            child: None,
            generation: 0,
            timers: HashMap::new(),
            timer_seq: 0,
            shutting_down: false,
        };
        let task = tokio::spawn(event_loop.run(rx));
        Self { handle, task }
    }

    pub fn handle(&self) -> ConsoleHandle {
        self.handle.clone()
    }

    /// Wait for the event loop to finish.
    pub async fn join(self) -> Result<(), DaemonError> {
        handle_join("console", self.task.await)
    }
}

/// Run the console with its roster cache under `home` and hand it to
/// `session`. Blocks until the session returns or ctrl-c arrives, then shuts
/// the server down.
pub fn start_blocking<F, Fut>(home: &Path, settings: Settings, session: F) -> Result<(), DaemonError>
where
    F: FnOnce(ConsoleHandle, broadcast::Receiver<SupervisorEvent>) -> Fut,
    Fut: Future<Output = ()>,
{
    init_tracing();
    let dir = console_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async move {
        let events = EventBus::new();
        let receiver = events.subscribe();
        let console = ConsoleRuntime::spawn(settings, Some(roster_path(home)), events);
        let handle = console.handle();

        tokio::select! {
            _ = session(handle.clone(), receiver) => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => tracing::info!("received ctrl-c, shutting down"),
                Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
            },
        }
        handle.shutdown().await;
        console.join().await
    })
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct ChildHandle {
    generation: u64,
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
}

struct EventLoop {
    supervisor: ProcessSupervisor,
    events: EventBus,
    packager: Arc<dyn Packager>,
    inputs: mpsc::Sender<Input>,
    child: Option<ChildHandle>,
    generation: u64,
    timers: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    timer_seq: u64,
    shutting_down: bool,
}

impl EventLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<Input>) -> Result<(), DaemonError> {
        self.supervisor.initialize();
        self.drain().await;

        while let Some(input) = rx.recv().await {
            match input {
                Input::Command(command) => self.command(command),
                Input::Output {
                    generation,
                    stream,
                    bytes,
                } => {
                    if self.is_current(generation) {
                        self.supervisor.on_output(stream, &bytes);
                    }
                }
                Input::Exited { generation, code } => {
                    if self.is_current(generation) {
                        self.child = None;
                        self.supervisor.on_exit(code);
                    } else {
                        tracing::debug!(generation, "ignoring exit of a previous server process");
                    }
                }
                Input::Timer { kind, generation } => match self.timers.get(&kind) {
                    Some((armed, _)) if *armed == generation => {
                        self.timers.remove(&kind);
                        self.supervisor.on_timer(kind);
                    }
                    _ => tracing::debug!(?kind, "ignoring stale timer"),
                },
                Input::Packaged(result) => self.supervisor.on_packaged(result),
                Input::Shutdown => self.shutdown(),
            }
            self.drain().await;

            if self.shutting_down && self.child.is_none() && self.supervisor.state().is_down() {
                break;
            }
        }

        self.supervisor.on_runtime_exit();
        for (_, (_, timer)) in self.timers.drain() {
            timer.abort();
        }
        tracing::info!("console runtime stopped");
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.child
            .as_ref()
            .is_some_and(|child| child.generation == generation)
    }

    fn command(&mut self, command: ConsoleCommand) {
        tracing::debug!(?command, "console command");
        let sup = &mut self.supervisor;
        match command {
            ConsoleCommand::Start => sup.start(),
            ConsoleCommand::Stop => sup.stop(),
            ConsoleCommand::RestartAfter(delay) => sup.start_server_after(delay),
            ConsoleCommand::AbortRestart => sup.abort_pending_shutdown(),
            ConsoleCommand::SendText(text) => sup.send_command(&text),
            ConsoleCommand::ScheduleBackup => sup.schedule_backup(),
            ConsoleCommand::InstantBackup(destination) => sup.start_instant_backup(destination),
            ConsoleCommand::SetBackupTimer(active) => sup.set_backup_timer_active(active),
            ConsoleCommand::SetBackupFrequency(hours) => sup.set_backup_frequency_hours(hours),
            ConsoleCommand::SetCooldown(cooldown) => sup.set_cooldown(cooldown),
            ConsoleCommand::PruneBackups => sup.prune_backups(),
            ConsoleCommand::SetDifficulty(level) => sup.set_difficulty(level),
            ConsoleCommand::SetPermission(xuid, level) => sup.set_permission_level(&xuid, level),
            ConsoleCommand::SetProperty(key, value) => sup.set_property(&key, &value),
            ConsoleCommand::Status(reply) => {
                let _ = reply.send(sup.snapshot());
            }
        }
    }

    /// First call asks the server to stop and arms the grace period; the
    /// second (when the grace period runs out) kills it.
    fn shutdown(&mut self) {
        if !self.shutting_down {
            tracing::info!("shutting down console");
            self.shutting_down = true;
            self.supervisor.abort_pending_shutdown();
            let tx = self.inputs.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                let _ = tx.send(Input::Shutdown).await;
            });
        }
        self.supervisor.stop();
    }

    /// Carry out effects until the supervisor stops producing them.
    async fn drain(&mut self) {
        loop {
            let effects = self.supervisor.take_effects();
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                self.apply(effect).await;
            }
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Spawn { program, cwd } => {
                if let Err(err) = self.spawn_child(&program, &cwd) {
                    tracing::error!(program = %program.display(), error = %err, "spawn failed");
                    self.supervisor.spawn_failed(&err.to_string());
                }
            }
            Effect::Kill => {
                if let Some(kill) = self.child.as_mut().and_then(|child| child.kill.take()) {
                    let _ = kill.send(());
                }
            }
            Effect::Send(command) => self.write_stdin(&command).await,
            Effect::Arm(kind, delay) => self.arm(kind, delay),
            Effect::Cancel(kind) => {
                if let Some((_, timer)) = self.timers.remove(&kind) {
                    timer.abort();
                }
            }
            Effect::Package(job) => self.package(job),
            Effect::Publish(event) => self.events.publish(event),
        }
    }

    fn spawn_child(&mut self, program: &Path, cwd: &Path) -> std::io::Result<()> {
        let mut child = Command::new(program)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        self.generation += 1;
        let generation = self.generation;
        tracing::info!(pid = child.id(), generation, "server process spawned");

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(
                stdout,
                Stream::Stdout,
                generation,
                self.inputs.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(
                stderr,
                Stream::Stderr,
                generation,
                self.inputs.clone(),
            )));
        }
        let stdin = child.stdin.take();
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(wait_child(
            child,
            kill_rx,
            readers,
            generation,
            self.inputs.clone(),
        ));

        self.child = Some(ChildHandle {
            generation,
            stdin,
            kill: Some(kill_tx),
        });
        Ok(())
    }

    async fn write_stdin(&mut self, command: &str) {
        let Some(stdin) = self.child.as_mut().and_then(|child| child.stdin.as_mut()) else {
            tracing::debug!(command, "no server stdin; dropping command");
            return;
        };
        let line = format!("{command}\n");
        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        match result {
            Ok(()) => tracing::debug!(command, "sent to server"),
            Err(err) => tracing::warn!(command, error = %err, "could not write to server stdin"),
        }
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        if let Some((_, previous)) = self.timers.remove(&kind) {
            previous.abort();
        }
        self.timer_seq += 1;
        let generation = self.timer_seq;
        let tx = self.inputs.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Input::Timer { kind, generation }).await;
        });
        self.timers.insert(kind, (generation, timer));
    }

    fn package(&self, job: PackageJob) {
        let packager = Arc::clone(&self.packager);
        let tx = self.inputs.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || run_packager(packager.as_ref(), &job))
                .await
                .unwrap_or_else(|err| {
                    Err(BackupError::PackagingFailed {
                        reason: format!("packaging task join failure: {err}"),
                    })
                });
            let _ = tx.send(Input::Packaged(result)).await;
        });
    }
}

/// Forward raw chunks from one pipe until EOF.
async fn pump<R>(mut pipe: R, stream: Stream, generation: u64, tx: mpsc::Sender<Input>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let input = Input::Output {
                    generation,
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(input).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(?stream, error = %err, "server pipe read failed");
                break;
            }
        }
    }
}

/// Wait for the process (or a kill request), let the readers drain, then
/// report the exit.
async fn wait_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    generation: u64,
    tx: mpsc::Sender<Input>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        Ok(()) = kill_rx => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(err) = child.kill().await {
                tracing::warn!(error = %err, "could not kill server process");
            }
            child.wait().await
        }
    };
    for reader in readers {
        let _ = reader.await;
    }
    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            tracing::warn!(error = %err, "could not collect server exit status");
            None
        }
    };
    let _ = tx.send(Input::Exited { generation, code }).await;
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join(format!("{task} task join failure: {err}"))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
