//! Interpreter resolution for script-backed phases.
//!
//! Policy: `CODEREF_PYTHON` wins, then the configured interpreter; otherwise
//! probe the platform launchers in priority order and fall back to a default
//! name. Resolution is not cached and the environment is read on every call,
//! so each phase invocation sees the current environment.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Environment variable naming the interpreter to use for scaffold scripts.
pub const INTERPRETER_ENV: &str = "CODEREF_PYTHON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterResolver {
    override_cmd: Option<String>,
    candidates: Vec<String>,
    fallback: String,
}

impl InterpreterResolver {
    pub fn new(candidates: Vec<String>, fallback: impl Into<String>) -> Self {
        Self {
            override_cmd: None,
            candidates,
            fallback: fallback.into(),
        }
    }

    /// Probe order for the current platform.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new(
                vec!["py".into(), "python".into(), "python3".into()],
                "python",
            )
        } else {
            Self::new(vec!["python3".into(), "python".into()], "python3")
        }
    }

    /// Configured interpreter, used without probing when the environment does
    /// not name one. Empty strings are ignored.
    pub fn with_override(mut self, cmd: Option<String>) -> Self {
        self.override_cmd = cmd.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn override_cmd(&self) -> Option<&str> {
        self.override_cmd.as_deref()
    }

    /// Pick the interpreter to launch.
    pub async fn resolve(&self) -> String {
        self.resolve_with(std::env::var(INTERPRETER_ENV).ok()).await
    }

    async fn resolve_with(&self, env_cmd: Option<String>) -> String {
        if let Some(cmd) = env_cmd.filter(|c| !c.trim().is_empty()) {
            debug!(interpreter = %cmd, "interpreter taken from {}", INTERPRETER_ENV);
            return cmd;
        }
        if let Some(ref cmd) = self.override_cmd {
            return cmd.clone();
        }
        for candidate in &self.candidates {
            if probe(candidate).await {
                debug!(interpreter = %candidate, "interpreter probe succeeded");
                return candidate.clone();
            }
        }
        debug!(interpreter = %self.fallback, "no interpreter probe succeeded, using fallback");
        self.fallback.clone()
    }

    /// Operator-facing advice for when the resolved interpreter cannot start.
    pub fn remediation(&self) -> String {
        let mut tried: Vec<&str> = self.candidates.iter().map(String::as_str).collect();
        if let Some(ref cmd) = self.override_cmd {
            tried.insert(0, cmd);
        }
        format!(
            "Install Python 3, or set {} to the interpreter path (tried: {})",
            INTERPRETER_ENV,
            tried.join(", ")
        )
    }
}

async fn probe(cmd: &str) -> bool {
    Command::new(cmd)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
