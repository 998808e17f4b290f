//! Job orchestration.
//!
//! A [`ScanOrchestrator`] owns one job: its configuration, its mutable state,
//! its per-job [`ResultCache`] and its progress broadcast. Projects are
//! processed strictly in order; within a project the selected phases run as
//! scaffold, then scan, then generate.

mod cache;
mod job;

pub use cache::ResultCache;
pub use job::{Phases, ScanOrchestrator};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which phases run for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSelection {
    #[serde(default)]
    pub run_scaffold: bool,
    #[serde(default)]
    pub run_scan: bool,
    #[serde(default)]
    pub run_generate: bool,
}

impl PhaseSelection {
    pub const fn scan_only() -> Self {
        Self {
            run_scaffold: false,
            run_scan: true,
            run_generate: false,
        }
    }

    pub const fn all() -> Self {
        Self {
            run_scaffold: true,
            run_scan: true,
            run_generate: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.run_scaffold || self.run_scan || self.run_generate)
    }
}

impl Default for PhaseSelection {
    fn default() -> Self {
        Self::scan_only()
    }
}

/// Immutable description of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    job_id: String,
    projects: Vec<PathBuf>,
    selections: HashMap<PathBuf, PhaseSelection>,
}

impl JobConfig {
    pub fn new(job_id: impl Into<String>, projects: Vec<PathBuf>) -> Result<Self, JobError> {
        if projects.is_empty() {
            return Err(JobError::EmptyProjectList);
        }
        Ok(Self {
            job_id: job_id.into(),
            projects,
            selections: HashMap::new(),
        })
    }

    pub fn with_selection(mut self, project: impl Into<PathBuf>, selection: PhaseSelection) -> Self {
        self.selections.insert(project.into(), selection);
        self
    }

    /// Apply `selection` to every project in the job.
    pub fn with_selection_for_all(mut self, selection: PhaseSelection) -> Self {
        for project in &self.projects {
            self.selections.insert(project.clone(), selection);
        }
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn projects(&self) -> &[PathBuf] {
        &self.projects
    }

    /// Unlisted projects get the scan-only default.
    pub fn selection_for(&self, project: &Path) -> PhaseSelection {
        self.selections.get(project).copied().unwrap_or_default()
    }
}

/// Point-in-time view of a job, sent with progress and completion events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub current_project_index: usize,
    pub total_projects: usize,
    pub current_project_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}
