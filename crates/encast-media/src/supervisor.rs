//! Encoder process supervision.
//!
//! Spawns the encoder with a scrubbed environment, relays its output
//! according to the configured I/O mode and resolves to a single
//! [`ProcessOutcome`] even when a stop request races natural exit.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// How the encoder's stdio is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// stdout/stderr pass through to the worker's own; progress is read
    /// from the side file by the tail.
    Inherit,
    /// stdout and stderr are piped back line by line; progress is read
    /// from stdout.
    Piped,
}

/// Environment passed to the encoder. Everything else is scrubbed.
#[derive(Debug, Clone)]
pub struct ProcessEnv {
    pub path: String,
    pub library_path: Option<String>,
}

impl ProcessEnv {
    /// Capture the allow-listed variables from the worker's own environment.
    pub fn from_current() -> Self {
        Self {
            path: std::env::var("PATH").unwrap_or_default(),
            library_path: std::env::var("LD_LIBRARY_PATH").ok(),
        }
    }
}

/// How the encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited on its own with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// The platform reported neither.
    Unknown,
}

impl ExitKind {
    pub fn success(&self) -> bool {
        matches!(self, ExitKind::Code(0))
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitKind::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitKind::Signal(signal);
            }
        }
        ExitKind::Unknown
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "code {}", code),
            ExitKind::Signal(signal) => write!(f, "signal {}", signal),
            ExitKind::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Terminal result of a supervised run.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit: ExitKind,
    /// Captured stderr (piped mode only).
    pub stderr: Option<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

/// Idempotent stop control for a supervised process.
///
/// Cloning is cheap; all clones signal the same process. Stopping twice,
/// or stopping after the process already exited, has no further effect.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Request termination.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A running encoder under supervision.
pub struct SupervisedProcess {
    stdout: Option<mpsc::Receiver<String>>,
    stderr: Option<mpsc::Receiver<String>>,
    outcome: oneshot::Receiver<ProcessOutcome>,
}

impl SupervisedProcess {
    /// Take the stdout line stream (piped mode only; at most once).
    pub fn take_stdout(&mut self) -> Option<mpsc::Receiver<String>> {
        self.stdout.take()
    }

    /// Take the stderr line stream (piped mode only; at most once).
    pub fn take_stderr(&mut self) -> Option<mpsc::Receiver<String>> {
        self.stderr.take()
    }

    /// Wait for the process to finish.
    ///
    /// Consumes the handle, so the outcome resolves exactly once.
    pub async fn wait(self) -> MediaResult<ProcessOutcome> {
        self.outcome
            .await
            .map_err(|_| MediaError::internal("supervision task ended without an outcome"))
    }
}

/// Spawn `program` with `args` under supervision.
///
/// The child sees only the allow-listed environment and a null stdin. A
/// stop request delivers one kill; the outcome still resolves through the
/// normal wait path.
pub fn spawn(
    program: &Path,
    args: &[String],
    mode: IoMode,
    env: &ProcessEnv,
    stop: &StopHandle,
) -> MediaResult<SupervisedProcess> {
    let mut command = Command::new(program);
    command
        .args(args)
        .env_clear()
        .env("PATH", &env.path)
        .stdin(Stdio::null());

    if let Some(ref library_path) = env.library_path {
        command.env("LD_LIBRARY_PATH", library_path);
    }

    match mode {
        IoMode::Inherit => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        IoMode::Piped => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    debug!(
        program = %program.display(),
        "Spawning encoder: {}",
        args.join(" ")
    );

    let mut child = command
        .spawn()
        .map_err(|e| MediaError::spawn_failed(format!("{}: {}", program.display(), e)))?;

    let mut stdout_rx = None;
    let mut stderr_rx = None;
    let mut capture_rx = None;

    if mode == IoMode::Piped {
        if let Some(stdout) = child.stdout.take() {
            let (tx, rx) = mpsc::channel(64);
            stdout_rx = Some(rx);
            tokio::spawn(relay_lines(BufReader::new(stdout), tx));
        }
        if let Some(stderr) = child.stderr.take() {
            let (tx, rx) = mpsc::channel(64);
            let (cap_tx, cap_rx) = oneshot::channel();
            stderr_rx = Some(rx);
            capture_rx = Some(cap_rx);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut capture = String::new();
                let mut forwarding = true;
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("encoder: {}", line);
                    capture.push_str(&line);
                    capture.push('\n');
                    if forwarding && tx.send(line).await.is_err() {
                        forwarding = false;
                    }
                }
                let _ = cap_tx.send(capture);
            });
        }
    }

    let (outcome_tx, outcome_rx) = oneshot::channel();
    let mut stop_rx = stop.subscribe();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = stop_signalled(&mut stop_rx) => {
                info!("Stop requested, terminating encoder");
                if let Err(e) = child.start_kill() {
                    warn!("Failed to deliver kill signal: {}", e);
                }
                child.wait().await
            }
        };

        let stderr = match capture_rx {
            Some(rx) => rx.await.ok().filter(|s| !s.is_empty()),
            None => None,
        };

        let outcome = match status {
            Ok(status) => ProcessOutcome {
                exit: ExitKind::from_status(status),
                stderr,
            },
            Err(e) => {
                warn!("Failed waiting on encoder: {}", e);
                ProcessOutcome {
                    exit: ExitKind::Unknown,
                    stderr,
                }
            }
        };

        let _ = outcome_tx.send(outcome);
    });

    Ok(SupervisedProcess {
        stdout: stdout_rx,
        stderr: stderr_rx,
        outcome: outcome_rx,
    })
}

/// Resolves only once a stop is actually requested. A dropped handle parks
/// forever, so a vanished controller never kills the process.
async fn stop_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Forward complete lines to `tx`, draining the pipe to the end even when
/// the receiver has gone away (the child would otherwise block on a full
/// pipe).
async fn relay_lines<R: AsyncBufRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = reader.lines();
    let mut forwarding = true;
    while let Ok(Some(line)) = lines.next_line().await {
        if forwarding && tx.send(line).await.is_err() {
            forwarding = false;
        }
    }
}
