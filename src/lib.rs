//! Safety core for agent-initiated shell commands.
//!
//! Every command an agent proposes flows through three cooperating
//! subsystems before it touches the host:
//! - [`classifier`] decides whether the command is blocked outright,
//!   needs a human in the loop, or may proceed
//! - [`snapshot`] captures the plausibly-affected filesystem paths so a
//!   bad outcome can be rolled back
//! - [`executor`] runs the command with a scrubbed environment, a wall
//!   clock timeout, an output cap, and a best-effort memory limit
//!
//! [`coordinator::SafetyCoordinator`] ties them together and is the
//! intended entry point; the subsystems are also usable on their own.
//!
//! # Security
//!
//! The classifier and path heuristics are advisory guardrails against
//! accidental damage, not a sandbox boundary against a hostile command
//! author. Snapshot capture always completes before the command spawns,
//! so a rollback point exists even when execution goes sideways.

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod snapshot;
pub mod violations;

pub use classifier::{Classifier, Verdict};
pub use config::{CoordinatorConfig, ExecutionLimits, NetworkPolicy, RetentionPolicy};
pub use coordinator::{
    CommandRequest, ConfirmationDecision, ConfirmationHandler, ConfirmationRequest, DenyAll,
    GuardedOutcome, SafetyCoordinator,
};
pub use error::{Error, Result};
pub use executor::{ExecutionResult, KillReason, SandboxedExecutor};
pub use snapshot::{RollbackResult, Snapshot, SnapshotId, SnapshotStore};
pub use violations::{Severity, ViolationLog, ViolationRecord};
