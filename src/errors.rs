//! Typed error hierarchy for the scan orchestration engine.
//!
//! Three top-level enums cover the three layers:
//! - `RunnerError`: launching and supervising one external process
//! - `PhaseError`: per-project phase failures (never job-fatal)
//! - `JobError`: orchestrator control-flow failures and caller errors

use std::path::PathBuf;

use thiserror::Error;

use crate::orchestrator::JobStatus;

/// Errors from the subprocess runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("A subprocess is already active on this runner")]
    AlreadyActive,

    #[error("Failed to launch `{program}`: {source}. {remediation}")]
    Launch {
        program: String,
        remediation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with non-zero code {code}")]
    NonZeroExit { program: String, code: i32 },

    #[error("I/O error while supervising `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Generate-phase stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateStage {
    Index,
    Derivations,
    Diagrams,
}

impl std::fmt::Display for GenerateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateStage::Index => write!(f, "index"),
            GenerateStage::Derivations => write!(f, "context/dependency graph"),
            GenerateStage::Diagrams => write!(f, "diagrams"),
        }
    }
}

/// Fixed message for a generate request with no cached scan result.
pub const NO_SCAN_DATA: &str = "no scan data found — run scan first";

/// Errors from a single phase execution against one project.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Scaffold failed: {0}")]
    Scaffold(#[from] RunnerError),

    #[error("Scan failed: {0:#}")]
    Scan(#[source] anyhow::Error),

    #[error("{} ({})", NO_SCAN_DATA, project.display())]
    NoScanData { project: PathBuf },

    #[error("Generate failed at {stage} stage: {source:#}")]
    Generate {
        stage: GenerateStage,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors from the job orchestrator.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Cannot {action} a job that is {from}")]
    InvalidTransition {
        from: JobStatus,
        action: &'static str,
    },

    #[error("A job needs at least one project path")]
    EmptyProjectList,

    #[error("Job state lock poisoned")]
    StatePoisoned,

    #[error("Job loop panicked: {0}")]
    Panicked(String),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),
}
