//! Child process spawning and lifecycle.
//!
//! [`ProcessHandle::spawn`] launches the peer with all three stdio streams
//! piped and `kill_on_drop(true)`, then hands the streams to background
//! tasks:
//!
//! - a stdout pump forwarding raw chunks ([`ProcessHandle::next_chunk`]),
//! - a stderr drain logging diagnostic lines,
//! - an exit watcher that owns the [`Child`], reaps it, and publishes the
//!   exit status through a [`watch`] channel ([`ProcessHandle::wait_exit`]).
//!
//! Termination is requested through a [`CancellationToken`] observed by the
//! exit watcher, so [`ProcessHandle::terminate`] is cheap, synchronous, and
//! idempotent.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reader::{drain_stderr, pump_stdout};
use crate::models::session::ExitInfo;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited when [`SpawnSpec::inherit_env`] is off.
///
/// Every other variable is stripped via `env_clear()`; explicit
/// [`SpawnSpec::env`] pairs are applied on top.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Buffered stdout chunks between the pump and the session.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);

// ── Configuration ────────────────────────────────────────────────────────────

/// What to launch and how.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Executable path or name resolved through `PATH`.
    pub program: PathBuf,
    /// Arguments passed after the program.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Working directory; inherits ours when `None`.
    pub working_dir: Option<PathBuf>,
    /// Inherit the full parent environment, or only [`ALLOWED_ENV_VARS`].
    pub inherit_env: bool,
    /// How long to wait after SIGTERM before killing the child.
    pub terminate_grace: Duration,
}

impl SpawnSpec {
    /// Spec for `program` with no arguments and the default policy.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            inherit_env: true,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Choose between full inheritance and the allowlist.
    #[must_use]
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Override the SIGTERM grace period.
    #[must_use]
    pub fn terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if !self.inherit_env {
            cmd.env_clear();
            for &key in ALLOWED_ENV_VARS {
                if let Ok(val) = std::env::var(key) {
                    cmd.env(key, val);
                }
            }
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// Exclusive owner of one spawned child process.
///
/// Dropping the handle requests termination and stops the output pumps.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    chunks: mpsc::Receiver<Bytes>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawn the child described by `spec`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the executable cannot be found or
    /// started, or if a stdio pipe could not be captured.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self> {
        let mut child = spec.command().spawn().map_err(|err| {
            AppError::Spawn(format!("failed to spawn {}: {err}", spec.program.display()))
        })?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stderr".into()))?;

        let (chunk_tx, chunks) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let pumps = vec![
            tokio::spawn(async move {
                pump_stdout(pid, stdout, chunk_tx).await;
            }),
            tokio::spawn(async move {
                drain_stderr(pid, stderr).await;
            }),
        ];

        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        // Detached: the watcher must outlive the handle to reap the child.
        drop(monitor_exit(
            child,
            spec.terminate_grace,
            exit_tx,
            kill.clone(),
        ));

        info!(pid, program = %spec.program.display(), "child process spawned");

        Ok(Self {
            pid,
            stdin: Some(stdin),
            chunks,
            exit_rx,
            kill,
            pumps,
        })
    }

    /// OS process id captured at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write `bytes` to the child's stdin and flush.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Write`] if stdin was closed or the pipe is broken.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Write("child stdin is closed".into()))?;

        stdin.write_all(bytes).await.map_err(|e| {
            warn!(pid = self.pid, error = %e, "write to child stdin failed");
            AppError::Write(format!("write failed: {e}"))
        })?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::Write(format!("flush failed: {e}")))
    }

    /// Close the child's stdin. Later writes fail with [`AppError::Write`].
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Next raw chunk from the child's stdout, or `None` after EOF.
    ///
    /// Cancel-safe.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.chunks.recv().await
    }

    /// Resolve once the child has exited. May be awaited repeatedly.
    ///
    /// Cancel-safe.
    pub async fn wait_exit(&mut self) -> ExitInfo {
        self.exit_watch().wait().await
    }

    /// Independent receiver for the exit notification.
    ///
    /// Lets a caller await exit while also holding `&mut self` for reads.
    #[must_use]
    pub fn exit_watch(&self) -> ExitWatch {
        ExitWatch(self.exit_rx.clone())
    }

    /// Exit status if the child has already been reaped.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Request termination: SIGTERM, then SIGKILL after the grace period.
    ///
    /// Idempotent, and a no-op once the child has exited.
    pub fn terminate(&self) {
        if self.exit_status().is_some() || self.kill.is_cancelled() {
            return;
        }
        debug!(pid = self.pid, "termination requested");
        self.kill.cancel();
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.terminate();
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// One-shot exit notification for a [`ProcessHandle`].
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<ExitInfo>>);

impl ExitWatch {
    /// Resolve once the child has exited.
    ///
    /// Cancel-safe. Resolves with an unknown status if the watcher task was
    /// torn down without reaping the child (runtime shutdown).
    pub async fn wait(&mut self) -> ExitInfo {
        let waited = self.0.wait_for(Option::is_some).await.map(|exit| *exit);
        match waited {
            Ok(exit) => exit.unwrap_or_default(),
            Err(_closed) => self.current().unwrap_or_default(),
        }
    }

    /// Exit status if already known.
    #[must_use]
    pub fn current(&self) -> Option<ExitInfo> {
        *self.0.borrow()
    }
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Own `child` until it exits, escalating to a kill when `kill` fires, and
/// publish the exit status through `exit_tx`.
fn monitor_exit(
    mut child: Child,
    grace: Duration,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    kill: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pid = child.id();
        let status = tokio::select! {
            status = child.wait() => status,
            () = kill.cancelled() => {
                request_stop(&mut child);
                if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                    status
                } else {
                    warn!(pid, ?grace, "child ignored termination request, killing");
                    if let Err(err) = child.start_kill() {
                        warn!(pid, %err, "failed to kill child process");
                    }
                    child.wait().await
                }
            }
        };

        let exit = match status {
            Ok(status) => ExitInfo::from_status(status),
            Err(err) => {
                warn!(pid, %err, "error waiting for child process");
                ExitInfo::default()
            }
        };

        debug!(pid, %exit, "child process reaped");
        exit_tx.send_replace(Some(exit));
    })
}

/// Ask the child to stop gracefully.
#[cfg(unix)]
fn request_stop(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(pid = raw, %err, "SIGTERM delivery failed");
    }
}

/// Ask the child to stop; without signals this is an immediate kill.
#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "failed to kill child process");
    }
}
