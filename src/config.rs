//! Configuration for the command-safety core.
//!
//! All limits have documented defaults and are overridable per call;
//! retention and the snapshot directory are fixed at coordinator
//! construction.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default wall-clock timeout for a command (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default cap on captured stdout/stderr (1 MiB each).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
/// Default best-effort memory ceiling (512 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;
/// Default bounded wait for an external confirmation decision.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variables forwarded to child processes by default.
/// Everything else is scrubbed.
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "TERM", "USER", "TMPDIR"];

/// Network policy for sandboxed execution.
///
/// `Block` is best-effort only: proxy-disabling variables are injected so
/// well-behaved tools fail to reach the network. This is not a network
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    #[default]
    Allow,
    Block,
}

/// Resource and environment envelope applied to a single execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Maximum wall-clock duration before the child is killed.
    pub timeout: Duration,
    /// Maximum captured bytes per stream; exceeding it kills the child.
    pub max_output_bytes: usize,
    /// Best-effort memory ceiling, enforced via `setrlimit` where available.
    pub max_memory_bytes: u64,
    /// Environment variables forwarded from the parent process.
    pub env_allowlist: Vec<String>,
    /// Variables never forwarded, even if allowlisted.
    pub env_denylist: Vec<String>,
    /// Replace PATH with a minimal trusted set.
    pub restricted_path: bool,
    /// Network policy for the child.
    pub network: NetworkPolicy,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            env_allowlist: DEFAULT_ENV_ALLOWLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            env_denylist: Vec::new(),
            restricted_path: false,
            network: NetworkPolicy::Allow,
        }
    }
}

impl ExecutionLimits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_restricted_path(mut self, restricted: bool) -> Self {
        self.restricted_path = restricted;
        self
    }

    pub fn with_network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Add a variable to the forwarding allowlist.
    pub fn allow_env(mut self, name: impl Into<String>) -> Self {
        self.env_allowlist.push(name.into());
        self
    }

    /// Add a variable to the deny list. Deny wins over allow.
    pub fn deny_env(mut self, name: impl Into<String>) -> Self {
        self.env_denylist.push(name.into());
        self
    }

    /// Reject limits that would disable the envelope entirely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "timeout".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_output_bytes".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Snapshot retention policy. Pruning is the only component allowed to
/// delete a snapshot's backing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum number of retained snapshots; oldest are dropped first.
    pub max_snapshots: usize,
    /// Maximum snapshot age.
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_snapshots: 50,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Configuration fixed at coordinator construction.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Directory holding one JSON file per snapshot.
    pub snapshot_dir: PathBuf,
    /// Snapshot retention policy.
    pub retention: RetentionPolicy,
    /// Limits applied when a request does not override them.
    pub default_limits: ExecutionLimits,
    /// How long to wait for an external confirmation decision before
    /// treating the silence as a deny.
    pub confirmation_timeout: Duration,
    /// Optional on-disk violation log (JSON lines, capped and rotated).
    pub violation_log_path: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            snapshot_dir: base.join("guardrail").join("snapshots"),
            retention: RetentionPolicy::default(),
            default_limits: ExecutionLimits::default(),
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            violation_log_path: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_default_limits(mut self, limits: ExecutionLimits) -> Self {
        self.default_limits = limits;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_violation_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.violation_log_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_limits.validate()?;
        if self.retention.max_snapshots == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retention.max_snapshots".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_limits_defaults() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.timeout, Duration::from_secs(30));
        assert_eq!(limits.max_output_bytes, 1024 * 1024);
        assert_eq!(limits.max_memory_bytes, 512 * 1024 * 1024);
        assert!(!limits.restricted_path);
        assert_eq!(limits.network, NetworkPolicy::Allow);
    }

    #[test]
    fn test_default_allowlist_contains_path_and_home() {
        let limits = ExecutionLimits::default();
        assert!(limits.env_allowlist.iter().any(|v| v == "PATH"));
        assert!(limits.env_allowlist.iter().any(|v| v == "HOME"));
    }

    #[test]
    fn test_limits_builder() {
        let limits = ExecutionLimits::default()
            .with_timeout(Duration::from_secs(5))
            .with_max_output_bytes(4096)
            .with_restricted_path(true)
            .with_network(NetworkPolicy::Block)
            .deny_env("HOME");
        assert_eq!(limits.timeout, Duration::from_secs(5));
        assert_eq!(limits.max_output_bytes, 4096);
        assert!(limits.restricted_path);
        assert_eq!(limits.network, NetworkPolicy::Block);
        assert!(limits.env_denylist.iter().any(|v| v == "HOME"));
    }

    #[test]
    fn test_retention_defaults() {
        let retention = RetentionPolicy::default();
        assert_eq!(retention.max_snapshots, 50);
        assert_eq!(retention.max_age, Duration::from_secs(86400));
    }

    #[test]
    fn test_coordinator_config_defaults() {
        let config = CoordinatorConfig::default();
        assert!(config.snapshot_dir.ends_with("snapshots"));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(60));
        assert!(config.violation_log_path.is_none());
    }

    #[test]
    fn test_coordinator_config_builder() {
        let config = CoordinatorConfig::default()
            .with_snapshot_dir("/tmp/snaps")
            .with_confirmation_timeout(Duration::from_secs(5))
            .with_violation_log("/tmp/violations.jsonl");
        assert_eq!(config.snapshot_dir, PathBuf::from("/tmp/snaps"));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(5));
        assert!(config.violation_log_path.is_some());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let limits = ExecutionLimits::default().with_timeout(Duration::ZERO);
        assert!(limits.validate().is_err());
        assert!(ExecutionLimits::default().validate().is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config = CoordinatorConfig::default().with_retention(RetentionPolicy {
            max_snapshots: 0,
            max_age: Duration::from_secs(60),
        });
        assert!(config.validate().is_err());
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_limits_serde_round_trip() {
        let limits = ExecutionLimits::default().with_timeout(Duration::from_secs(7));
        let json = serde_json::to_string(&limits).unwrap();
        let back: ExecutionLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timeout, Duration::from_secs(7));
        assert_eq!(back.max_output_bytes, limits.max_output_bytes);
    }
}
