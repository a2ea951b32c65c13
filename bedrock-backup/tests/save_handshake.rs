//! Full handshake runs against a fake server root on disk.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use assert_fs::prelude::*;
use bedrock_backup::{
    run_packager, packager::ZipPackager, BackupAction, BackupEvent, BackupOrchestrator,
    BackupRequest, FailureKind, Phase,
};
use predicates::prelude::*;

fn sends(actions: &[BackupAction]) -> Vec<&'static str> {
    actions
        .iter()
        .filter_map(|action| match action {
            BackupAction::Send(command) => Some(*command),
            _ => None,
        })
        .collect()
}

fn server_root() -> assert_fs::TempDir {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child("worlds/Bedrock level/db/000001.log")
        .write_binary(&[7u8; 8192])
        .expect("log");
    root.child("worlds/Bedrock level/level.dat")
        .write_binary(&[1u8; 256])
        .expect("level.dat");
    root.child("server.properties")
        .write_str("level-name=Bedrock level\n")
        .expect("properties");
    root
}

/// Drive hold -> Saving... -> N x not completed -> Data saved and return every
/// action the orchestrator produced.
fn hold_until_ready(orch: &mut BackupOrchestrator, not_completed: usize) -> Vec<BackupAction> {
    let mut actions = orch.start_backup(BackupRequest::Scheduled);
    actions.extend(orch.on_saving());
    actions.extend(orch.query_due());
    for _ in 0..not_completed {
        actions.extend(orch.on_not_completed());
        actions.extend(orch.query_due());
    }
    actions.extend(orch.on_ready(None, Instant::now()));
    actions
}

#[test]
fn one_query_per_retry_and_one_resume_on_success() {
    let root = server_root();
    let mut orch = BackupOrchestrator::new(root.path(), Duration::from_secs(60));

    let mut actions = hold_until_ready(&mut orch, 3);
    assert_eq!(orch.phase(), Phase::AwaitingFileList);
    actions.extend(orch.on_file_list(
        "Bedrock level/db/000001.log:4096, Bedrock level/level.dat:128",
        Instant::now(),
    ));

    let commands = sends(&actions);
    assert_eq!(commands.iter().filter(|c| **c == "save hold").count(), 1);
    assert_eq!(commands.iter().filter(|c| **c == "save query").count(), 4);
    assert_eq!(commands.iter().filter(|c| **c == "save resume").count(), 1);
    assert_eq!(orch.phase(), Phase::Packaging);

    let job = actions
        .iter()
        .find_map(|action| match action {
            BackupAction::Package(job) => Some(job.clone()),
            _ => None,
        })
        .expect("package job");
    let copied = job.scratch.join("worlds/Bedrock level/db/000001.log");
    assert_eq!(std::fs::metadata(&copied).expect("copied").len(), 4096);
    assert_eq!(
        job.inputs,
        vec![PathBuf::from("worlds"), PathBuf::from("server.properties")]
    );

    let finished = orch.packaging_finished(run_packager(&ZipPackager, &job), Instant::now());
    let archive = match &finished[..] {
        [BackupAction::Event(BackupEvent::Finished { request, archive })] => {
            assert_eq!(request, &BackupRequest::Scheduled);
            archive.clone()
        }
        other => panic!("expected Finished, got {other:?}"),
    };
    assert!(archive.is_file());

    let done = orch.complete_backup(Instant::now());
    assert!(done.contains(&BackupAction::ArmCooldown(Duration::from_secs(60))));
    assert_eq!(orch.phase(), Phase::Idle);
    assert!(!job.scratch.exists(), "scratch directory must be released");
}

#[test]
fn missing_world_file_fails_with_single_resume() {
    let root = server_root();
    std::fs::remove_file(root.path().join("worlds/Bedrock level/level.dat")).expect("rm");
    let mut orch = BackupOrchestrator::new(root.path(), Duration::from_secs(60));

    let mut actions = hold_until_ready(&mut orch, 0);
    actions.extend(orch.on_file_list(
        "Bedrock level/db/000001.log:4096, Bedrock level/level.dat:128",
        Instant::now(),
    ));
    // A stray resume acknowledgement must not trigger anything further.
    actions.extend(orch.on_resumed());

    assert_eq!(sends(&actions).iter().filter(|c| **c == "save resume").count(), 1);
    let failed = actions.iter().find_map(|action| match action {
        BackupAction::Event(BackupEvent::Failed { kind, reason, .. }) => Some((*kind, reason.clone())),
        _ => None,
    });
    let (kind, reason) = failed.expect("failure event");
    assert_eq!(kind, FailureKind::BackupHandshakeIo);
    assert!(reason.contains("level.dat"), "reason: {reason}");
    assert_eq!(orch.phase(), Phase::Idle);
}

#[test]
fn inline_file_list_is_accepted() {
    let root = server_root();
    let mut orch = BackupOrchestrator::new(root.path(), Duration::from_secs(60));
    orch.start_backup(BackupRequest::Instant {
        destination: Path::new("/tmp/out.zip").to_path_buf(),
    });
    orch.on_saving();
    let actions = orch.on_ready(Some("Bedrock level/level.dat:10"), Instant::now());
    assert_eq!(sends(&actions), vec!["save resume"]);
    assert_eq!(orch.phase(), Phase::Packaging);
}

#[test]
fn packaging_without_archive_fails_and_keeps_resume_count() {
    let root = server_root();
    let mut orch = BackupOrchestrator::new(root.path(), Duration::from_secs(60));
    let mut actions = hold_until_ready(&mut orch, 0);
    actions.extend(orch.on_file_list("Bedrock level/level.dat:128", Instant::now()));
    let failed = orch.packaging_finished(
        Err(bedrock_backup::BackupError::PackagingFailed {
            reason: "archiver crashed".into(),
        }),
        Instant::now(),
    );
    actions.extend(failed.clone());

    assert_eq!(sends(&actions).iter().filter(|c| **c == "save resume").count(), 1);
    assert!(failed.iter().any(|action| matches!(
        action,
        BackupAction::Event(BackupEvent::Failed { kind: FailureKind::PackagingFailed, .. })
    )));
    root.child("worlds").assert(predicate::path::is_dir());
}
