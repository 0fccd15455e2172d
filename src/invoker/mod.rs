//! Tool invoker: scoped subprocess execution with structured output
//!
//! Runs an external tool to completion (or timeout), captures stdout and
//! stderr separately, and recovers machine-readable outputs from the
//! marker line protocol. Environment is an explicit per-call map layered
//! over the ambient process environment, so concurrent environments
//! cannot cross-contaminate credentials through process-wide globals.

pub mod markers;

pub use markers::{collect_outputs, encode_marker, parse_line, MARKER_PREFIX};

use crate::error::{DeployError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default per-step timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// Grace period between the termination signal and force-kill
const KILL_GRACE_SECS: u64 = 10;

/// One fully-specified external tool invocation
#[derive(Debug, Clone)]
pub struct InvocationSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Extra environment for this call only
    pub env: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl InvocationSpec {
    pub fn new<P: Into<PathBuf>>(program: &str, args: &[&str], working_dir: P) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Result of one invocation. Ephemeral: persisted only on failure, for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub command_line: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Marker outputs parsed from stdout
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub finished_at: DateTime<Utc>,
}

impl InvocationRecord {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last portion of stderr, for failure diagnostics
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(20);
        lines[start..].join("\n")
    }

    /// Turn a non-zero exit into the error the taxonomy mandates
    pub fn ensure_success(&self) -> Result<&Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(DeployError::ToolFailed {
                exit_code: self.exit_code,
                stderr_tail: self.stderr_tail(),
            })
        }
    }
}

/// Executes external tools as scoped subprocesses
#[derive(Debug, Clone, Default)]
pub struct ToolInvoker;

impl ToolInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Run the tool to completion or timeout.
    ///
    /// On timeout the child's process group receives SIGTERM and, if it
    /// is still alive after the grace period, SIGKILL; a declarative-infra
    /// apply gets the chance to finish its current write. Returns the
    /// record even for non-zero exits; callers decide via `ensure_success`.
    pub async fn invoke(&self, spec: &InvocationSpec) -> Result<InvocationRecord> {
        debug!(command = %spec.command_line(), dir = %spec.working_dir.display(), "invoking tool");
        std::fs::create_dir_all(&spec.working_dir)?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group on Unix, so signals reach everything the
        // tool itself spawned.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| DeployError::ToolFailed {
            exit_code: -1,
            stderr_tail: format!("failed to spawn '{}': {e}", spec.program),
        })?;

        // Drain the pipes off-task; waiting on the child directly keeps
        // its handle available for signalling on timeout.
        let mut stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let timeout = Duration::from_secs(spec.timeout_secs);
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %spec.command_line(), secs = spec.timeout_secs, "tool timed out, terminating");
                Self::terminate(&mut child).await;
                return Err(DeployError::Timeout(spec.timeout_secs));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();
        let exit_code = status.code().unwrap_or(-1);

        // Markers are only trusted data on a clean exit; a failed tool's
        // stdout is diagnostics.
        let outputs = if status.success() {
            markers::collect_outputs(&stdout)?
        } else {
            BTreeMap::new()
        };

        debug!(exit_code, outputs = outputs.len(), "tool finished");

        Ok(InvocationRecord {
            command_line: spec.command_line(),
            stdout,
            stderr,
            exit_code,
            outputs,
            finished_at: Utc::now(),
        })
    }

    /// Terminate the child's process group: SIGTERM first, SIGKILL after
    /// the grace period if it has not exited.
    #[cfg(unix)]
    async fn terminate(child: &mut Child) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // Already reaped
            return;
        };
        let pgid = Pid::from_raw(pid as i32);
        let _ = killpg(pgid, Signal::SIGTERM);

        let grace = Duration::from_secs(KILL_GRACE_SECS);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }

        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = child.wait().await;
    }

    #[cfg(not(unix))]
    async fn terminate(child: &mut Child) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}
