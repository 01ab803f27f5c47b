//! Sandboxed command execution under an environment/resource envelope.
//!
//! Every command runs through a shell as a child process with:
//! - a scrubbed environment (allowlist rebuild after `env_clear`,
//!   dynamic-linker-injection variables stripped unconditionally)
//! - a wall-clock timeout racing process exit
//! - a cap on captured stdout/stderr; overflow kills the child instead
//!   of buffering unbounded memory
//! - a best-effort memory ceiling via `setrlimit` where the platform
//!   supports it
//!
//! Isolation here is an envelope, not confinement: there are no kernel
//! namespaces and no seccomp. Recoverability comes from the snapshot
//! store, not from this module.
//!
//! Execution never throws: every failure mode past spawn is encoded in
//! the returned [`ExecutionResult`]. No retries happen here; retry
//! policy, if any, belongs to the caller.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::config::{ExecutionLimits, NetworkPolicy};
use crate::error::ExecutorError;

/// Dynamic-linker injection variables, stripped unconditionally. A child
/// inheriting any of these can have arbitrary code loaded into it.
const LINKER_INJECTION_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
];

/// Minimal trusted PATH used when `restricted_path` is set.
const RESTRICTED_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Unroutable proxy injected when network policy is `Block`. Best effort:
/// well-behaved HTTP tools honor it, raw sockets do not.
const PROXY_BLACKHOLE: &str = "http://127.0.0.1:9";

/// Grace period for the pipe readers to reach EOF once the child is
/// gone. An orphaned descendant can inherit the pipes and hold them
/// open indefinitely; the drain deadline keeps `execute` prompt and
/// returns whatever output arrived.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Why a command stopped before (or instead of) natural exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    /// Exited on its own.
    #[default]
    None,
    /// Wall-clock timeout fired.
    Timeout,
    /// Captured output exceeded the cap.
    OutputOverflow,
    /// Terminated by an external signal.
    Signal,
    /// Never spawned: the classifier blocked it.
    Blocked,
}

/// Structured outcome of one execution. Fully populated on every path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True only for a clean zero exit with no kill.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured stdout, truncated at the output cap.
    pub stdout: String,
    /// Captured stderr, truncated at the output cap.
    pub stderr: String,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
    /// What, if anything, killed the command.
    pub killed: KillReason,
    /// Whether the environment/resource envelope was applied.
    pub sandboxed: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ExecutionResult {
    /// Synthetic result for a command that was never spawned because the
    /// classifier blocked it. The reason lands in stderr verbatim so a
    /// human can judge whether the rule was overly conservative.
    pub fn blocked(reason: &str) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: reason.to_string(),
            duration: Duration::ZERO,
            killed: KillReason::Blocked,
            sandboxed: false,
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }
}

/// Spawns commands under limits and tracks active children for a global
/// kill switch. The registry is the executor's only cross-call state.
pub struct SandboxedExecutor {
    active: Arc<Mutex<HashMap<Uuid, u32>>>,
}

impl SandboxedExecutor {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `command` through the shell in `working_dir` under `limits`.
    ///
    /// Returns `Err` only for spawn-level failure (the safety
    /// infrastructure itself broke); once a child exists, every outcome
    /// is data in the returned result.
    pub async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult, ExecutorError> {
        let start = Instant::now();
        let mut cmd = shell_command(command);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.env_clear();
        for (key, value) in scrubbed_env(limits) {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        {
            apply_process_group(&mut cmd);
            apply_memory_limit(&mut cmd, limits.max_memory_bytes);
        }

        let mut child = cmd.spawn().map_err(|e| ExecutorError::SpawnFailed {
            reason: e.to_string(),
        })?;

        let token = Uuid::new_v4();
        if let Some(pid) = child.id() {
            self.active.lock().await.insert(token, pid);
        }

        let cap = limits.max_output_bytes;
        let (overflow_tx, mut overflow_rx) = mpsc::channel::<()>(2);
        let stdout_pipe = child.stdout.take().ok_or_else(|| ExecutorError::SpawnFailed {
            reason: "stdout pipe missing".to_string(),
        })?;
        let stderr_pipe = child.stderr.take().ok_or_else(|| ExecutorError::SpawnFailed {
            reason: "stderr pipe missing".to_string(),
        })?;
        let stdout_sink = Arc::new(Mutex::new(StreamCapture::default()));
        let stderr_sink = Arc::new(Mutex::new(StreamCapture::default()));
        let stdout_task = tokio::spawn(read_capped(
            stdout_pipe,
            cap,
            stdout_sink.clone(),
            overflow_tx.clone(),
        ));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, cap, stderr_sink.clone(), overflow_tx));

        let mut killed = KillReason::None;
        // `Some(_)` matters: both senders dropping at EOF closes the
        // channel, and that closure must not read as an overflow.
        let mut status = tokio::select! {
            status = child.wait() => status.ok(),
            _ = tokio::time::sleep(limits.timeout) => {
                killed = KillReason::Timeout;
                None
            }
            Some(_) = overflow_rx.recv() => {
                killed = KillReason::OutputOverflow;
                None
            }
        };

        if status.is_none() {
            // Unmaskable kill of the whole process group, then reap so no
            // zombie outlives the call.
            if let Some(pid) = child.id() {
                kill_pid(pid);
            }
            let _ = child.start_kill();
            status = child.wait().await.ok();
        }

        self.active.lock().await.remove(&token);

        // Bound the drain: a descendant the shell left behind can hold
        // the pipes open long after the shell itself is gone.
        let stdout_abort = stdout_task.abort_handle();
        let stderr_abort = stderr_task.abort_handle();
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = stdout_task.await;
            let _ = stderr_task.await;
        })
        .await;
        if drained.is_err() {
            stdout_abort.abort();
            stderr_abort.abort();
        }

        let (stdout_bytes, stdout_truncated) = {
            let mut sink = stdout_sink.lock().await;
            (std::mem::take(&mut sink.data), sink.truncated)
        };
        let (stderr_bytes, stderr_truncated) = {
            let mut sink = stderr_sink.lock().await;
            (std::mem::take(&mut sink.data), sink.truncated)
        };

        // A fast child can exit before the overflow note is observed;
        // exceeding the cap is an overflow kill either way.
        if killed == KillReason::None && (stdout_truncated || stderr_truncated) {
            killed = KillReason::OutputOverflow;
        }

        let exit_code = match (killed, status) {
            (KillReason::None, Some(status)) => {
                let code = status.code();
                if code.is_none() {
                    // No code and nothing we did: an external signal.
                    killed = KillReason::Signal;
                }
                code
            }
            _ => None,
        };

        let duration = start.elapsed();
        let success = killed == KillReason::None && exit_code == Some(0);
        if killed != KillReason::None {
            tracing::warn!(
                command,
                reason = ?killed,
                timeout = ?limits.timeout,
                "command killed by limit"
            );
        }

        let mut stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
        if killed == KillReason::Timeout {
            // Surface the configured limit to the human, like blocked
            // results surface the matched rule's reason.
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("killed: exceeded {:?} timeout", limits.timeout));
        }

        Ok(ExecutionResult {
            success,
            exit_code,
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr,
            duration,
            killed,
            sandboxed: true,
            stdout_truncated,
            stderr_truncated,
        })
    }

    /// Kill every active child. Used on application shutdown. Returns
    /// the number of processes signalled.
    pub async fn kill_all(&self) -> usize {
        let mut active = self.active.lock().await;
        let count = active.len();
        for (_, pid) in active.drain() {
            kill_pid(pid);
        }
        if count > 0 {
            tracing::warn!(count, "killed all active sandboxed processes");
        }
        count
    }

    /// Number of currently tracked child processes.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

impl Default for SandboxedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Build the child environment: allowlisted parent variables minus the
/// deny list, linker-injection variables always excluded, PATH replaced
/// in restricted mode, proxy blackhole injected when network is blocked.
fn scrubbed_env(limits: &ExecutionLimits) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for name in &limits.env_allowlist {
        if LINKER_INJECTION_VARS.contains(&name.as_str()) {
            continue;
        }
        if limits.env_denylist.iter().any(|d| d == name) {
            continue;
        }
        if limits.restricted_path && name == "PATH" {
            continue;
        }
        if let Ok(value) = std::env::var(name) {
            env.push((name.clone(), value));
        }
    }
    if limits.restricted_path {
        env.push(("PATH".to_string(), RESTRICTED_PATH.to_string()));
    }
    if limits.network == NetworkPolicy::Block {
        for var in [
            "http_proxy",
            "https_proxy",
            "HTTP_PROXY",
            "HTTPS_PROXY",
            "ALL_PROXY",
        ] {
            env.push((var.to_string(), PROXY_BLACKHOLE.to_string()));
        }
    }
    env
}

/// Detach the child into its own process group so a limit kill reaches
/// every descendant it forked, not just the shell.
#[cfg(unix)]
fn apply_process_group(cmd: &mut tokio::process::Command) {
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }
}

/// Best-effort address-space ceiling applied between fork and exec.
/// Failure to set the limit is ignored rather than failing the spawn.
#[cfg(unix)]
fn apply_memory_limit(cmd: &mut tokio::process::Command, max_bytes: u64) {
    if max_bytes == 0 {
        return;
    }
    let limit = libc::rlimit {
        rlim_cur: max_bytes as libc::rlim_t,
        rlim_max: max_bytes as libc::rlim_t,
    };
    unsafe {
        cmd.pre_exec(move || {
            libc::setrlimit(libc::RLIMIT_AS, &limit);
            Ok(())
        });
    }
}

fn kill_pid(pid: u32) {
    #[cfg(unix)]
    unsafe {
        // The child leads its own group; the negative pid reaches every
        // descendant still sharing the pipes.
        if libc::kill(-(pid as libc::pid_t), libc::SIGKILL) != 0 {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Capture buffer shared between a reader task and `execute`, so output
/// survives even when the reader is aborted at the drain deadline.
#[derive(Default)]
struct StreamCapture {
    data: Vec<u8>,
    truncated: bool,
}

/// Read a pipe to EOF or until `cap` bytes have been collected. On
/// overflow the truncated prefix is kept, a note is sent so the caller
/// can kill the child, and reading stops.
async fn read_capped<R>(
    mut pipe: R,
    cap: usize,
    sink: Arc<Mutex<StreamCapture>>,
    overflow: mpsc::Sender<()>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                let mut sink = sink.lock().await;
                let len = sink.data.len();
                if len + n > cap {
                    let take = cap.saturating_sub(len);
                    sink.data.extend_from_slice(&chunk[..take]);
                    sink.truncated = true;
                    drop(sink);
                    let _ = overflow.send(()).await;
                    return;
                }
                sink.data.extend_from_slice(&chunk[..n]);
            }
        }
    }
}
