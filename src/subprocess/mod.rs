//! Subprocess runner.
//!
//! Launches one external process at a time, streams its stdout/stderr line by
//! line to a callback, and resolves with how the process ended. The runner
//! knows nothing about jobs or phases.

mod interpreter;

pub use interpreter::{INTERPRETER_ENV, InterpreterResolver};

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use crate::errors::RunnerError;

/// Marker prepended to lines the child wrote to stderr.
pub const STDERR_MARKER: &str = "[ERROR]";

const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What to launch.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Shown to the operator when the program cannot be started.
    pub remediation: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            remediation: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    fn remediation_for(&self, err: &std::io::Error) -> String {
        if let Some(ref hint) = self.remediation {
            return hint.clone();
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => format!(
                "Check that `{}` is installed and on PATH",
                self.program
            ),
            std::io::ErrorKind::PermissionDenied => {
                format!("Check that `{}` is executable", self.program)
            }
            _ => format!("Check the working directory {}", self.working_dir.display()),
        }
    }
}

/// One line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl std::fmt::Display for OutputLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputLine::Stdout(line) => write!(f, "{}", line),
            OutputLine::Stderr(line) => write!(f, "{} {}", STDERR_MARKER, line),
        }
    }
}

/// How a child process ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit code 0.
    Exited,
    /// Killed via [`SubprocessRunner::terminate`] or by a signal.
    Terminated,
    /// Never spawned because the runner had already been terminated.
    NotLaunched,
}

/// Runs at most one child process at a time. Once terminated, the runner
/// refuses every later launch.
#[derive(Debug, Default)]
pub struct SubprocessRunner {
    active: Mutex<Option<Arc<Notify>>>,
    launches: AtomicUsize,
    terminated: AtomicBool,
}

/// Clears the active slot when a run ends, however it ends.
struct ActiveSlot<'a>(&'a Mutex<Option<Arc<Notify>>>);

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl SubprocessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a child is currently running under this runner.
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of children successfully spawned over the runner's lifetime.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Ask the active child to terminate and block later launches. Returns
    /// `false` when nothing is running.
    pub fn terminate(&self) -> bool {
        let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        // Set under the slot lock so a concurrent `run` either sees the flag
        // or has already registered its kill handle.
        self.terminated.store(true, Ordering::SeqCst);
        match slot.as_ref() {
            Some(kill) => {
                kill.notify_one();
                true
            }
            None => false,
        }
    }

    /// Launch `spec`, forwarding every output line to `on_line`, and wait for exit.
    pub async fn run<F>(&self, spec: &CommandSpec, mut on_line: F) -> Result<ProcessOutcome, RunnerError>
    where
        F: FnMut(OutputLine) + Send,
    {
        let kill = Arc::new(Notify::new());
        {
            let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if self.terminated.load(Ordering::SeqCst) {
                debug!(program = %spec.program, "runner terminated, not launching");
                return Ok(ProcessOutcome::NotLaunched);
            }
            if slot.is_some() {
                return Err(RunnerError::AlreadyActive);
            }
            *slot = Some(Arc::clone(&kill));
        }
        let _slot = ActiveSlot(&self.active);

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Launch {
                program: spec.program.clone(),
                remediation: spec.remediation_for(&source),
                source,
            })?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        debug!(program = %spec.program, pid = child.id(), "subprocess spawned");

        let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone(), OutputLine::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone(), OutputLine::Stderr);
        }
        drop(tx);

        let mut terminated = false;
        let status = loop {
            tokio::select! {
                Some(line) = rx.recv() => on_line(line),
                _ = kill.notified(), if !terminated => {
                    terminated = true;
                    if let Err(e) = child.start_kill() {
                        warn!(program = %spec.program, error = %e, "failed to kill subprocess");
                    }
                }
                status = child.wait() => {
                    break status.map_err(|source| RunnerError::Io {
                        program: spec.program.clone(),
                        source,
                    })?;
                }
            }
        };

        // Readers finish once the pipes close. A grandchild that inherited
        // the pipes can keep them open, so the drain is bounded.
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(line) = rx.recv().await {
                on_line(line);
            }
        })
        .await;
        if drained.is_err() {
            debug!(program = %spec.program, "output pipes still open after exit, stopped reading");
        }

        match status.code() {
            Some(0) => Ok(ProcessOutcome::Exited),
            Some(_) if terminated => Ok(ProcessOutcome::Terminated),
            Some(code) => Err(RunnerError::NonZeroExit {
                program: spec.program.clone(),
                code,
            }),
            None => Ok(ProcessOutcome::Terminated),
        }
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<OutputLine>, tag: fn(String) -> OutputLine)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(tag(line)).is_err() {
                break;
            }
        }
    });
}
