//! Append-only log of commands rejected by the classifier.
//!
//! Every `Blocked` verdict produces exactly one record with severity at
//! least `Error`. The log is capped at the last 1000 entries, oldest
//! dropped first, and optionally mirrored to a JSON-lines file that is
//! rotated whenever the cap trims.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Maximum retained violation records.
pub const MAX_VIOLATIONS: usize = 1000;

/// How bad a rejected command was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One rejected command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    /// The offending command, verbatim.
    pub command: String,
    /// Human-readable reason from the matched rule.
    pub reason: String,
    pub severity: Severity,
}

/// Capped, append-only violation log with optional on-disk mirror.
pub struct ViolationLog {
    entries: Mutex<VecDeque<ViolationRecord>>,
    path: Option<PathBuf>,
}

impl ViolationLog {
    /// Open the log, reloading the tail of an existing file if one is
    /// configured. Unparseable lines are skipped, not fatal.
    pub async fn open(path: Option<PathBuf>) -> std::io::Result<Self> {
        let mut entries = VecDeque::new();
        if let Some(file) = &path {
            if let Some(parent) = file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::read_to_string(file).await {
                Ok(contents) => {
                    for line in contents.lines() {
                        match serde_json::from_str::<ViolationRecord>(line) {
                            Ok(record) => entries.push_back(record),
                            Err(e) => {
                                tracing::warn!(error = %e, "skipping corrupt violation log line");
                            }
                        }
                    }
                    while entries.len() > MAX_VIOLATIONS {
                        entries.pop_front();
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Self {
            entries: Mutex::new(entries),
            path,
        })
    }

    /// Append a record, trimming past the cap. File I/O problems are
    /// logged and swallowed; a full disk must not change a verdict.
    pub async fn record(
        &self,
        command: &str,
        reason: &str,
        severity: Severity,
    ) -> ViolationRecord {
        let record = ViolationRecord {
            id: Uuid::new_v4(),
            at: Utc::now(),
            command: command.to_string(),
            reason: reason.to_string(),
            severity,
        };
        tracing::warn!(command, reason, severity = %severity, "safety violation recorded");

        let trimmed = {
            let mut entries = self.entries.lock().await;
            entries.push_back(record.clone());
            let mut trimmed = false;
            while entries.len() > MAX_VIOLATIONS {
                entries.pop_front();
                trimmed = true;
            }
            trimmed
        };

        if let Some(path) = &self.path {
            let result = if trimmed {
                self.rewrite_file(path).await
            } else {
                append_line(path, &record).await
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to write violation log");
            }
        }

        record
    }

    /// The most recent `limit` records, newest last.
    pub async fn recent(&self, limit: usize) -> Vec<ViolationRecord> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .skip(entries.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    /// All retained records, oldest first.
    pub async fn all(&self) -> Vec<ViolationRecord> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Rewrite the whole file from the retained entries (rotation after
    /// the cap trimmed the front).
    async fn rewrite_file(&self, path: &PathBuf) -> std::io::Result<()> {
        let entries = self.entries.lock().await;
        let mut out = String::new();
        for record in entries.iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        tokio::fs::write(path, out).await
    }
}

async fn append_line(path: &PathBuf, record: &ViolationRecord) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await
}
