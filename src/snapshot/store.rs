//! On-disk snapshot store: capture, restore, prune.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::RetentionPolicy;
use crate::error::SnapshotError;

use super::{
    EntryKind, RollbackResult, Snapshot, SnapshotEntry, SnapshotId, SnapshotState, paths,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Permission bits recorded on platforms without unix modes.
#[cfg(not(unix))]
const FALLBACK_MODE: u32 = 0o644;

/// Captures and restores the subset of the filesystem plausibly affected
/// by a command. One JSON file per snapshot under the store directory;
/// the in-memory map is safe for concurrent captures across different
/// ids (single-writer per id is assumed for restore).
pub struct SnapshotStore {
    dir: PathBuf,
    retention: RetentionPolicy,
    snapshots: Mutex<HashMap<SnapshotId, Snapshot>>,
}

impl SnapshotStore {
    /// Open (or create) a store at `dir`, reloading any snapshots left
    /// on disk by a previous process for crash recovery.
    pub async fn open(
        dir: impl Into<PathBuf>,
        retention: RetentionPolicy,
    ) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SnapshotError::StoreUnavailable {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        let mut snapshots = HashMap::new();
        let mut read = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                    Ok(snapshot) => {
                        snapshots.insert(snapshot.id, snapshot);
                    }
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "skipping corrupt snapshot file");
                    }
                },
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable snapshot file");
                }
            }
        }
        if !snapshots.is_empty() {
            tracing::info!(count = snapshots.len(), dir = %dir.display(), "recovered snapshots from disk");
        }

        Ok(Self {
            dir,
            retention,
            snapshots: Mutex::new(snapshots),
        })
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the pre-command state of every path the command might
    /// affect. The snapshot is persisted to disk before this returns;
    /// retention pruning runs afterwards and never touches the snapshot
    /// just captured. A missing path is captured as `Absent`, never an
    /// error.
    pub async fn capture(
        &self,
        command: &str,
        working_dir: &Path,
        explicit_paths: &[PathBuf],
    ) -> Result<SnapshotId, SnapshotError> {
        let affected = paths::affected_paths(
            command,
            working_dir,
            explicit_paths,
            paths::DEFAULT_ENUM_DEPTH,
        );
        let entries = capture_entries(&affected).await?;

        let snapshot = Snapshot {
            id: SnapshotId::new(),
            command: command.to_string(),
            working_dir: working_dir.to_path_buf(),
            created_at: Utc::now(),
            state: SnapshotState::Captured,
            entries,
        };
        let id = snapshot.id;

        self.persist(&snapshot).await?;
        self.snapshots.lock().await.insert(id, snapshot);
        self.prune_except(Some(id)).await?;

        tracing::debug!(snapshot = %id, command, "captured pre-command snapshot");
        Ok(id)
    }

    /// Restore a snapshot over the current filesystem.
    ///
    /// A backup snapshot of the current state of the same paths is taken
    /// first, so the restore is itself reversible. Per-entry failures
    /// are accumulated; everything restorable is restored.
    pub async fn restore(&self, id: SnapshotId) -> Result<RollbackResult, SnapshotError> {
        let snapshot = self
            .snapshots
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(SnapshotError::NotFound { id: id.as_uuid() })?;

        let backup = self.capture_backup(&snapshot).await?;

        let mut restored = 0;
        let mut errors = Vec::new();
        for entry in &snapshot.entries {
            match apply_entry(entry).await {
                Ok(()) => restored += 1,
                Err(e) => errors.push(format!("{}: {}", entry.path.display(), e)),
            }
        }

        let updated = {
            let mut map = self.snapshots.lock().await;
            if let Some(s) = map.get_mut(&id) {
                s.state = SnapshotState::RolledBack;
            }
            map.get(&id).cloned()
        };
        if let Some(s) = updated {
            self.persist(&s).await?;
        }

        let success = errors.is_empty();
        if success {
            tracing::info!(snapshot = %id, restored, "rollback complete");
        } else {
            tracing::warn!(snapshot = %id, restored, failed = errors.len(), "rollback partially failed");
        }

        Ok(RollbackResult {
            success,
            restored,
            errors,
            backup: Some(backup),
        })
    }

    /// Delete snapshots past the retention window or beyond the
    /// max-count cap, oldest first. Returns the number pruned. This is
    /// the only place that deletes a snapshot's backing file.
    pub async fn prune(&self) -> Result<usize, SnapshotError> {
        self.prune_except(None).await
    }

    /// Look up a snapshot by id.
    pub async fn get(&self, id: SnapshotId) -> Option<Snapshot> {
        self.snapshots.lock().await.get(&id).cloned()
    }

    /// All retained snapshots, newest first.
    pub async fn list(&self) -> Vec<Snapshot> {
        let map = self.snapshots.lock().await;
        let mut all: Vec<Snapshot> = map.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.lock().await.is_empty()
    }

    /// Snapshot the current state of the paths a snapshot covers. Used
    /// before restore so that rollback is itself undoable; this is the
    /// one place the system knowingly snapshots a snapshot.
    async fn capture_backup(&self, original: &Snapshot) -> Result<SnapshotId, SnapshotError> {
        let covered: Vec<PathBuf> = original.entries.iter().map(|e| e.path.clone()).collect();
        let entries = capture_entries(&covered).await?;
        let backup = Snapshot {
            id: SnapshotId::new(),
            command: format!("pre-restore backup of {}", original.id),
            working_dir: original.working_dir.clone(),
            created_at: Utc::now(),
            state: SnapshotState::Captured,
            entries,
        };
        let id = backup.id;
        self.persist(&backup).await?;
        self.snapshots.lock().await.insert(id, backup);
        Ok(id)
    }

    fn file_path(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write the snapshot file via temp-then-rename so a crash mid-write
    /// never leaves a truncated snapshot behind.
    async fn persist(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let path = self.file_path(&snapshot.id);
        let tmp = path.with_extension("json.tmp");
        let write = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        write.await.map_err(|e| SnapshotError::Persist {
            id: snapshot.id.as_uuid(),
            reason: e.to_string(),
        })
    }

    async fn prune_except(&self, keep: Option<SnapshotId>) -> Result<usize, SnapshotError> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(self.retention.max_age)
            .unwrap_or(chrono::Duration::MAX);

        let victims: Vec<SnapshotId> = {
            let map = self.snapshots.lock().await;

            let mut expired: Vec<SnapshotId> = map
                .values()
                .filter(|s| Some(s.id) != keep)
                .filter(|s| now.signed_duration_since(s.created_at) > max_age)
                .map(|s| s.id)
                .collect();

            let mut fresh: Vec<(SnapshotId, chrono::DateTime<Utc>)> = map
                .values()
                .filter(|s| !expired.contains(&s.id))
                .map(|s| (s.id, s.created_at))
                .collect();
            fresh.sort_by_key(|(_, at)| *at);

            let excess = fresh.len().saturating_sub(self.retention.max_snapshots);
            expired.extend(
                fresh
                    .iter()
                    .filter(|(id, _)| Some(*id) != keep)
                    .take(excess)
                    .map(|(id, _)| *id),
            );
            expired
        };

        let count = victims.len();
        let mut map = self.snapshots.lock().await;
        for id in victims {
            map.remove(&id);
            let path = self.file_path(&id);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(snapshot = %id, error = %e, "failed to delete pruned snapshot file");
            }
        }
        if count > 0 {
            tracing::debug!(count, "pruned snapshots");
        }
        Ok(count)
    }
}

/// Record the current state of each path, in the given order. Missing
/// paths become `Absent`; non-regular non-directory entries (sockets,
/// symlinks) are skipped.
async fn capture_entries(paths: &[PathBuf]) -> Result<Vec<SnapshotEntry>, SnapshotError> {
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let kind = match tokio::fs::symlink_metadata(path).await {
            // NotADirectory: a parent component is now a regular file,
            // so the path itself does not exist either.
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                EntryKind::Absent
            }
            Err(e) => return Err(SnapshotError::Io(e)),
            Ok(meta) if meta.is_dir() => EntryKind::Directory {
                mode: mode_of(&meta),
            },
            Ok(meta) if meta.is_file() => {
                let bytes = tokio::fs::read(path).await?;
                EntryKind::file(mode_of(&meta), &bytes)
            }
            Ok(_) => {
                tracing::debug!(path = %path.display(), "skipping non-regular path");
                continue;
            }
        };
        entries.push(SnapshotEntry {
            path: path.clone(),
            kind,
        });
    }
    Ok(entries)
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(_meta: &std::fs::Metadata) -> u32 {
    FALLBACK_MODE
}

/// Reapply one recorded entry over the current filesystem.
async fn apply_entry(entry: &SnapshotEntry) -> Result<(), std::io::Error> {
    let path = &entry.path;
    match &entry.kind {
        EntryKind::Absent => match tokio::fs::symlink_metadata(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
        },
        EntryKind::Directory { mode } => {
            // A file may be squatting where the directory belongs.
            if let Ok(meta) = tokio::fs::symlink_metadata(path).await
                && !meta.is_dir()
            {
                tokio::fs::remove_file(path).await?;
            }
            tokio::fs::create_dir_all(path).await?;
            set_mode(path, *mode).await
        }
        EntryKind::File { mode, contents } => {
            use base64::Engine as _;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(contents)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            if let Ok(meta) = tokio::fs::symlink_metadata(path).await
                && meta.is_dir()
            {
                tokio::fs::remove_dir_all(path).await?;
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &bytes).await?;
            set_mode(path, *mode).await
        }
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), std::io::Error> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), std::io::Error> {
    Ok(())
}
