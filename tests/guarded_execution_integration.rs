//! Integration tests for the guarded execution journeys.
//!
//! These exercise the full classify → confirm → snapshot → execute →
//! rollback flow through the public API, against a real shell and a real
//! temporary filesystem. They verify the end-to-end paths a caller would
//! hit: a blocked command that never runs, a denied confirmation, an
//! approved destructive command rolled back intact, and the execution
//! limits enforced through the coordinator.
//!
//! Run: `cargo test --test guarded_execution_integration`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use guardrail::coordinator::{ConfirmationDecision, ConfirmationRequest};
use guardrail::executor::KillReason;
use guardrail::snapshot::SnapshotState;
use guardrail::{
    CommandRequest, ConfirmationHandler, CoordinatorConfig, ExecutionLimits, SafetyCoordinator,
    Severity,
};

struct ApproveAll;

#[async_trait]
impl ConfirmationHandler for ApproveAll {
    async fn confirm(&self, _request: &ConfirmationRequest) -> ConfirmationDecision {
        ConfirmationDecision::Approved
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_in(dir: &TempDir) -> CoordinatorConfig {
    init_tracing();
    CoordinatorConfig::default()
        .with_snapshot_dir(dir.path().join("snapshots"))
        .with_violation_log(dir.path().join("violations.jsonl"))
        .with_confirmation_timeout(Duration::from_millis(500))
}

async fn approving_coordinator(dir: &TempDir) -> SafetyCoordinator {
    SafetyCoordinator::with_confirmation(config_in(dir), Arc::new(ApproveAll))
        .await
        .expect("coordinator setup")
}

// ============================================================================
// 1. Blocked Command Journey
// ============================================================================

#[tokio::test]
async fn test_dangerous_command_is_blocked_and_logged() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("marker");
    let coordinator = approving_coordinator(&dir).await;

    // Even with an approve-everything handler, tier-1 commands never run.
    let outcome = coordinator
        .run(CommandRequest::new(
            format!("touch {} && shutdown -r now", marker.display()),
            dir.path(),
        ))
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.killed, KillReason::Blocked);
    assert!(outcome.snapshot.is_none());
    assert!(!marker.exists(), "blocked command must not spawn");

    let violations = coordinator.violations().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_violation_log_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let coordinator = approving_coordinator(&dir).await;
        coordinator
            .run(CommandRequest::new("mkfs.ext4 /dev/sda1", dir.path()))
            .await
            .unwrap();
    }

    let reopened = approving_coordinator(&dir).await;
    let violations = reopened.violations().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].command, "mkfs.ext4 /dev/sda1");
}

// ============================================================================
// 2. Confirmation Journey
// ============================================================================

#[tokio::test]
async fn test_denied_confirmation_stops_without_violation() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("pushed");
    // Default handler denies everything.
    let coordinator = SafetyCoordinator::new(config_in(&dir)).await.unwrap();

    let outcome = coordinator
        .run(CommandRequest::new(
            format!("sudo touch {}", marker.display()),
            dir.path(),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.result.killed, KillReason::Blocked);
    assert!(!marker.exists());
    assert!(coordinator.violations().await.is_empty());
}

// ============================================================================
// 3. Destructive Command Rollback Journey
// ============================================================================

#[tokio::test]
async fn test_recursive_delete_is_fully_restored() {
    let dir = TempDir::new().unwrap();
    let coordinator = approving_coordinator(&dir).await;

    let build = dir.path().join("build");
    std::fs::create_dir_all(build.join("sub")).unwrap();
    std::fs::write(build.join("out.bin"), b"artifact").unwrap();
    std::fs::write(build.join("sub").join("dep.txt"), b"dep").unwrap();

    // `rm -rf <dir>` is confirmation tier; the ApproveAll handler lets
    // it through after the snapshot is captured.
    let outcome = coordinator
        .run(CommandRequest::new("rm -rf ./build", dir.path()))
        .await
        .unwrap();
    assert!(outcome.verdict.requires_confirmation());
    assert!(outcome.result.success);
    assert!(!build.exists());

    let id = outcome.snapshot.expect("snapshot captured before spawn");
    let snap = coordinator.snapshots().get(id).await.unwrap();
    assert!(
        snap.entries.len() >= 4,
        "directory, both files, and subdirectory captured"
    );

    let rollback = coordinator.restore(id).await.unwrap();
    assert!(rollback.success, "errors: {:?}", rollback.errors);
    assert!(rollback.backup.is_some());
    assert_eq!(std::fs::read(build.join("out.bin")).unwrap(), b"artifact");
    assert_eq!(
        std::fs::read(build.join("sub").join("dep.txt")).unwrap(),
        b"dep"
    );

    let snap = coordinator.snapshots().get(id).await.unwrap();
    assert_eq!(snap.state, SnapshotState::RolledBack);
}

#[tokio::test]
async fn test_restore_removes_files_created_after_capture() {
    let dir = TempDir::new().unwrap();
    let coordinator = approving_coordinator(&dir).await;
    let created = dir.path().join("made.txt");

    let outcome = coordinator
        .run(
            CommandRequest::new(format!("touch {}", created.display()), dir.path())
                .with_explicit_paths(vec![created.clone()]),
        )
        .await
        .unwrap();
    assert!(outcome.result.success);
    assert!(created.exists());

    // The file was absent at capture time; restore deletes it.
    let rollback = coordinator.restore(outcome.snapshot.unwrap()).await.unwrap();
    assert!(rollback.success);
    assert!(!created.exists());
}

#[tokio::test]
async fn test_pre_restore_backup_holds_clobbered_state() {
    let dir = TempDir::new().unwrap();
    let coordinator = approving_coordinator(&dir).await;
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, b"original").unwrap();

    let outcome = coordinator
        .run(
            CommandRequest::new("true", dir.path())
                .with_explicit_paths(vec![PathBuf::from("notes.txt")]),
        )
        .await
        .unwrap();

    std::fs::write(&file, b"edited after capture").unwrap();
    let rollback = coordinator.restore(outcome.snapshot.unwrap()).await.unwrap();
    assert!(rollback.success);
    assert_eq!(std::fs::read(&file).unwrap(), b"original");

    // The overwritten edit is recoverable from the pre-restore backup.
    let backup_id = rollback.backup.unwrap();
    let backup = coordinator.snapshots().get(backup_id).await.unwrap();
    let entry = backup
        .entries
        .iter()
        .find(|e| e.path == file)
        .expect("backup covers the restored path");
    assert_eq!(
        entry.kind.decode_contents().unwrap().unwrap(),
        b"edited after capture"
    );
}

// ============================================================================
// 4. Execution Limits Journey
// ============================================================================

#[tokio::test]
async fn test_timeout_enforced_through_coordinator() {
    let dir = TempDir::new().unwrap();
    let coordinator = approving_coordinator(&dir).await;

    let outcome = coordinator
        .run(
            CommandRequest::new("sleep 10", dir.path())
                .with_limits(ExecutionLimits::default().with_timeout(Duration::from_millis(200))),
        )
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.killed, KillReason::Timeout);
    assert!(outcome.snapshot.is_some(), "snapshot precedes execution");
}

#[tokio::test]
async fn test_output_cap_enforced_through_coordinator() {
    let dir = TempDir::new().unwrap();
    let coordinator = approving_coordinator(&dir).await;

    let outcome = coordinator
        .run(
            CommandRequest::new("head -c 100000 /dev/zero", dir.path())
                .with_limits(ExecutionLimits::default().with_max_output_bytes(4096)),
        )
        .await
        .unwrap();

    assert!(outcome.result.stdout_truncated);
    assert!(outcome.result.stdout.len() <= 4096);
    assert_eq!(outcome.result.killed, KillReason::OutputOverflow);
}

#[tokio::test]
async fn test_environment_is_scrubbed_through_coordinator() {
    let dir = TempDir::new().unwrap();
    let coordinator = approving_coordinator(&dir).await;

    let outcome = coordinator
        .run(CommandRequest::new("env", dir.path()))
        .await
        .unwrap();
    assert!(outcome.result.success);
    assert!(
        !outcome.result.stdout.contains("LD_PRELOAD="),
        "linker injection vars never reach the child"
    );
    // cargo test runs with a forest of CARGO_* vars; none may leak.
    assert!(
        !outcome
            .result
            .stdout
            .lines()
            .any(|line| line.starts_with("CARGO")),
        "non-allowlisted vars leaked to child"
    );
}

// ============================================================================
// 5. Retention Journey
// ============================================================================

#[tokio::test]
async fn test_snapshots_pruned_to_retention_cap() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir).with_retention(guardrail::RetentionPolicy {
        max_snapshots: 3,
        max_age: Duration::from_secs(3600),
    });
    let coordinator = SafetyCoordinator::with_confirmation(config, Arc::new(ApproveAll))
        .await
        .unwrap();

    for i in 0..6 {
        coordinator
            .run(CommandRequest::new(format!("echo {i}"), dir.path()))
            .await
            .unwrap();
    }

    assert_eq!(coordinator.snapshots().len().await, 3);
    let listed = coordinator.snapshots().list().await;
    assert_eq!(listed[0].command, "echo 5", "newest retained first");
}
