//! Turning a scratch directory into a single archive.
//!
//! A packaging run is judged only by whether the archive exists afterwards;
//! exit codes and tool chatter are logged but do not decide the outcome.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{io_err, BackupError};

/// Name of the archive inside the scratch directory.
pub const ARCHIVE_NAME: &str = "backup.zip";

/// Everything a packager needs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageJob {
    pub scratch: PathBuf,
    /// Relative to `scratch`.
    pub inputs: Vec<PathBuf>,
    pub archive: PathBuf,
}

impl PackageJob {
    pub fn new(scratch: &Path, inputs: Vec<PathBuf>) -> Self {
        Self {
            scratch: scratch.to_path_buf(),
            inputs,
            archive: scratch.join(ARCHIVE_NAME),
        }
    }
}

/// Compresses a [`PackageJob`]'s inputs into its archive path. Runs on a
/// blocking thread.
pub trait Packager: Send + Sync {
    fn package(&self, job: &PackageJob) -> Result<(), BackupError>;
}

/// Run `packager` and report the archive path if one was produced.
pub fn run_packager(packager: &dyn Packager, job: &PackageJob) -> Result<PathBuf, BackupError> {
    let outcome = packager.package(job);
    if job.archive.is_file() {
        if let Err(err) = &outcome {
            tracing::warn!(error = %err, "packager reported an error but produced an archive");
        }
        return Ok(job.archive.clone());
    }
    let reason = match outcome {
        Err(err) => err.to_string(),
        Ok(()) => format!("no archive at {}", job.archive.display()),
    };
    Err(BackupError::PackagingFailed { reason })
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How archives are produced, as stored in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackagerConfig {
    /// In-process zip writer.
    #[default]
    Builtin,
    /// External archiver. `{archive}` in an argument is replaced by the
    /// archive path; an argument that is exactly `{inputs}` expands to one
    /// argument per input.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl PackagerConfig {
    pub fn build(&self) -> Box<dyn Packager> {
        match self {
            PackagerConfig::Builtin => Box::new(ZipPackager),
            PackagerConfig::Command { program, args } => Box::new(CommandPackager {
                program: program.clone(),
                args: args.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in zip
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct ZipPackager;

impl Packager for ZipPackager {
    fn package(&self, job: &PackageJob) -> Result<(), BackupError> {
        let file = File::create(&job.archive).map_err(|e| io_err(&job.archive, e))?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for input in &job.inputs {
            add_path(&mut zip, &job.scratch, &job.scratch.join(input), options)?;
        }
        zip.finish().map_err(zip_failed)?;
        Ok(())
    }
}

fn add_path(
    zip: &mut ZipWriter<File>,
    base: &Path,
    path: &Path,
    options: SimpleFileOptions,
) -> Result<(), BackupError> {
    let name = archive_name(base, path);
    if path.is_dir() {
        zip.add_directory(name, options).map_err(zip_failed)?;
        let mut children: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| io_err(path, e))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        children.sort();
        for child in children {
            add_path(zip, base, &child, options)?;
        }
        return Ok(());
    }

    let mut source = File::open(path).map_err(|e| io_err(path, e))?;
    let size = source.metadata().map_err(|e| io_err(path, e))?.len();
    zip.start_file(name, options.large_file(size > u64::from(u32::MAX)))
        .map_err(zip_failed)?;
    io::copy(&mut source, zip).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Forward-slash path of `path` relative to `base`.
fn archive_name(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn zip_failed(err: zip::result::ZipError) -> BackupError {
    BackupError::PackagingFailed {
        reason: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// External command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandPackager {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandPackager {
    /// Arguments with placeholders substituted.
    pub fn expand_args(&self, job: &PackageJob) -> Vec<String> {
        let archive = job.archive.display().to_string();
        let mut out = Vec::with_capacity(self.args.len() + job.inputs.len());
        for arg in &self.args {
            if arg == "{inputs}" {
                out.extend(job.inputs.iter().map(|input| input.display().to_string()));
            } else {
                out.push(arg.replace("{archive}", &archive));
            }
        }
        out
    }
}

impl Packager for CommandPackager {
    fn package(&self, job: &PackageJob) -> Result<(), BackupError> {
        let args = self.expand_args(job);
        tracing::info!(program = %self.program, ?args, "running packager");
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&job.scratch)
            .output()
            .map_err(|e| io_err(&self.program, e))?;
        if !output.status.success() {
            return Err(BackupError::PackagingFailed {
                reason: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}
