//! Transactional filesystem snapshots around command execution.
//!
//! A [`Snapshot`] records the pre-command state of every path a command
//! might plausibly affect, so that any effect can be rolled back even
//! when the command itself has no undo. Capture always completes before
//! the command runs; snapshots persist to disk for crash recovery and
//! are pruned by a retention policy.
//!
//! Path discovery is heuristic and intentionally over-inclusive: a false
//! positive costs a little disk, a false negative costs recoverability.
//! See [`paths`] for the discovery rules.

pub mod paths;
mod store;

pub use store::SnapshotStore;

use std::fmt;
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a snapshot. Doubles as the on-disk file stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The recorded pre-command state of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    /// The path did not exist. Restoring deletes whatever is there now.
    Absent,
    /// The path was a directory with the given permission bits.
    Directory { mode: u32 },
    /// The path was a regular file; contents are base64 so arbitrary
    /// bytes survive the JSON round trip.
    File { mode: u32, contents: String },
}

impl EntryKind {
    /// Build a file entry from raw bytes.
    pub fn file(mode: u32, bytes: &[u8]) -> Self {
        Self::File {
            mode,
            contents: BASE64.encode(bytes),
        }
    }

    /// Decode a file entry's contents.
    pub fn decode_contents(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        match self {
            Self::File { contents, .. } => Some(BASE64.decode(contents)),
            _ => None,
        }
    }
}

/// One affected path's captured state. Entry order within a snapshot is
/// discovery order, with parent directories recorded before children so
/// restore can recreate trees top-down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Lifecycle state of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    /// Captured before execution; eligible for restore.
    Captured,
    /// Explicitly restored at least once.
    RolledBack,
}

/// Captured pre-execution state for one command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    /// The command this snapshot guards, verbatim.
    pub command: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub state: SnapshotState,
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Outcome of restoring a snapshot. Per-entry failures are accumulated,
/// never short-circuited: a partially-failed rollback still restores
/// everything it can and reports exactly what it could not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    /// True only if every entry restored cleanly.
    pub success: bool,
    /// Number of entries actually restored.
    pub restored: usize,
    /// Human-readable per-entry failures.
    pub errors: Vec<String>,
    /// The pre-restore backup snapshot, so a bad restore is itself
    /// undoable.
    pub backup: Option<SnapshotId>,
}
