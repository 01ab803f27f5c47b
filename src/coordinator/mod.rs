//! Orchestration of classify → confirm → snapshot → execute → rollback.
//!
//! The [`SafetyCoordinator`] is the single entry point for running an
//! agent-proposed command. Per submission:
//!
//! 1. Classify. Blocked commands never spawn; a violation is recorded
//!    and a synthetic result returned.
//! 2. If confirmation is required, ask the registered
//!    [`ConfirmationHandler`] and wait, bounded; silence is a deny. A
//!    deny behaves like a block but records no violation; the agent
//!    correctly stopped itself.
//! 3. Capture a snapshot of the plausibly-affected paths. Capture
//!    completing before spawn is a correctness invariant, enforced by
//!    the sequential awaits here.
//! 4. Execute under limits.
//! 5. Return the result paired with the snapshot id. Rollback is always
//!    caller-initiated: a non-zero exit does not necessarily mean the
//!    filesystem state is unwanted.
//!
//! The coordinator is an explicit struct constructed once and passed by
//! handle; there is no global instance, so tests run against fresh ones.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::classifier::{Classifier, INJECTION_RULE, Verdict};
use crate::config::{CoordinatorConfig, ExecutionLimits};
use crate::error::{CoordinatorError, Result};
use crate::executor::{ExecutionResult, SandboxedExecutor};
use crate::snapshot::{RollbackResult, SnapshotId, SnapshotStore};
use crate::violations::{Severity, ViolationLog, ViolationRecord};

/// One command submission. Immutable; created per invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Raw command text.
    pub command: String,
    /// Working directory for execution and relative-path resolution.
    pub working_dir: PathBuf,
    /// Paths the caller already knows will be touched.
    pub explicit_paths: Vec<PathBuf>,
    /// Per-invocation limit overrides; `None` uses coordinator defaults.
    pub limits: Option<ExecutionLimits>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            explicit_paths: Vec::new(),
            limits: None,
        }
    }

    pub fn with_explicit_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.explicit_paths = paths;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// A request for external approval of a confirmation-tier command.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub command: String,
    pub reason: String,
}

/// The external decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Approved,
    Denied,
}

/// Seam to whatever UI surfaces confirmation prompts. The coordinator
/// waits on this, bounded by `confirmation_timeout`; a handler that
/// never answers is treated as a deny.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationDecision;
}

/// Default handler: deny everything. A missing UI must fail closed.
pub struct DenyAll;

#[async_trait]
impl ConfirmationHandler for DenyAll {
    async fn confirm(&self, _request: &ConfirmationRequest) -> ConfirmationDecision {
        ConfirmationDecision::Denied
    }
}

/// Result of one guarded run: the execution outcome, the snapshot to
/// roll back to (absent when nothing ran), and the verdict that shaped
/// the flow.
#[derive(Debug, Clone)]
pub struct GuardedOutcome {
    pub result: ExecutionResult,
    pub snapshot: Option<SnapshotId>,
    pub verdict: Verdict,
}

/// Orchestrates the classifier, snapshot store, and executor.
pub struct SafetyCoordinator {
    classifier: Classifier,
    store: SnapshotStore,
    executor: SandboxedExecutor,
    violations: ViolationLog,
    confirmation: Arc<dyn ConfirmationHandler>,
    config: CoordinatorConfig,
}

impl SafetyCoordinator {
    /// Construct with the fail-closed [`DenyAll`] confirmation handler.
    pub async fn new(config: CoordinatorConfig) -> Result<Self> {
        Self::with_confirmation(config, Arc::new(DenyAll)).await
    }

    /// Construct with an external confirmation handler. Fails fast if
    /// the snapshot directory or violation log cannot be set up: the
    /// safety net must exist before any command runs.
    pub async fn with_confirmation(
        config: CoordinatorConfig,
        confirmation: Arc<dyn ConfirmationHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let store = SnapshotStore::open(&config.snapshot_dir, config.retention.clone()).await?;
        let violations = ViolationLog::open(config.violation_log_path.clone())
            .await
            .map_err(|e| CoordinatorError::ViolationLog {
                reason: e.to_string(),
            })?;
        Ok(Self {
            classifier: Classifier::new(),
            store,
            executor: SandboxedExecutor::new(),
            violations,
            confirmation,
            config,
        })
    }

    /// Run one guarded command. See the module docs for the flow.
    ///
    /// `Err` means infrastructure failure (no snapshot, no shell) and
    /// the command did not run; everything command-level is in the
    /// returned outcome.
    pub async fn run(&self, request: CommandRequest) -> Result<GuardedOutcome> {
        let verdict = self.classifier.classify(&request.command);

        match &verdict {
            Verdict::Blocked { rule, reason } => {
                let severity = if rule == INJECTION_RULE {
                    Severity::Error
                } else {
                    Severity::Critical
                };
                self.violations
                    .record(&request.command, reason, severity)
                    .await;
                return Ok(GuardedOutcome {
                    result: ExecutionResult::blocked(reason),
                    snapshot: None,
                    verdict,
                });
            }
            Verdict::RequiresConfirmation { reason, .. } => {
                let confirm_request = ConfirmationRequest {
                    command: request.command.clone(),
                    reason: reason.clone(),
                };
                let decision = tokio::time::timeout(
                    self.config.confirmation_timeout,
                    self.confirmation.confirm(&confirm_request),
                )
                .await
                .unwrap_or(ConfirmationDecision::Denied);

                if decision == ConfirmationDecision::Denied {
                    tracing::info!(command = %request.command, "confirmation denied");
                    return Ok(GuardedOutcome {
                        result: ExecutionResult::blocked(reason),
                        snapshot: None,
                        verdict,
                    });
                }
            }
            Verdict::Allowed => {}
        }

        let limits = request
            .limits
            .unwrap_or_else(|| self.config.default_limits.clone());
        limits.validate()?;

        // Capture must complete before the command spawns.
        let snapshot = self
            .store
            .capture(
                &request.command,
                &request.working_dir,
                &request.explicit_paths,
            )
            .await?;

        let result = self
            .executor
            .execute(&request.command, &request.working_dir, &limits)
            .await?;

        tracing::info!(
            command = %request.command,
            success = result.success,
            exit_code = ?result.exit_code,
            snapshot = %snapshot,
            "guarded execution finished"
        );

        Ok(GuardedOutcome {
            result,
            snapshot: Some(snapshot),
            verdict,
        })
    }

    /// Roll back a previously captured snapshot.
    pub async fn restore(&self, id: SnapshotId) -> Result<RollbackResult> {
        Ok(self.store.restore(id).await?)
    }

    /// Violation records, oldest first.
    pub async fn violations(&self) -> Vec<ViolationRecord> {
        self.violations.all().await
    }

    /// Kill every active child process (application shutdown).
    pub async fn kill_all(&self) -> usize {
        self.executor.kill_all().await
    }

    /// The snapshot store, for listing and inspection.
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.store
    }

    /// The classifier, for advisory pre-checks without executing.
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}
