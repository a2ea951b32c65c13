//! Console runtime: supervises one server process and everything layered on
//! top of it (restarts, announcements, backups, roster, settings).
//!
//! [`supervisor`] is the synchronous state machine; `runtime` connects it to a
//! real child process, timers and the blocking packager on tokio.

mod error;
pub mod events;
pub mod paths;
mod runtime;
pub mod settings;
pub mod supervisor;

pub use error::DaemonError;
pub use events::{EventBus, StatusSnapshot, SupervisorEvent};
pub use runtime::{start_blocking, ConsoleCommand, ConsoleHandle, ConsoleRuntime};
pub use settings::Settings;
pub use supervisor::{Effect, ProcessSupervisor, Stream, TimerKind};
