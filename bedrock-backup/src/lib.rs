//! # bedrock-backup
//!
//! Consistent backups of a running bedrock server.
//!
//! [`BackupOrchestrator`] walks the save handshake and copies the held
//! snapshot; a [`Packager`] turns the copy into an archive; [`BackupStore`]
//! and [`retention::prune`] manage the archives that end up on disk.

pub mod error;
pub mod handshake;
pub mod packager;
pub mod retention;
pub mod snapshot;
pub mod store;

pub use error::{BackupError, FailureKind};
pub use handshake::{BackupAction, BackupEvent, BackupOrchestrator, BackupRequest, Phase};
pub use packager::{run_packager, PackageJob, Packager, PackagerConfig};
pub use retention::{prune, PruneReport, RetentionPolicy};
pub use store::{BackupStore, StoredBackup};
