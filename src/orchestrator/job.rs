use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use super::{JobConfig, JobSnapshot, JobStatus, ResultCache};
use crate::broadcast::{JobEvent, ProgressBroadcast, Subscription};
use crate::errors::JobError;
use crate::phases::{GeneratePhase, ScaffoldPhase, ScanPhase};
use crate::scanner::CodeElement;
use crate::subprocess::{ProcessOutcome, STDERR_MARKER, SubprocessRunner};

/// The three phase executors a job draws on.
#[derive(Clone)]
pub struct Phases {
    pub scaffold: ScaffoldPhase,
    pub scan: ScanPhase,
    pub generate: GeneratePhase,
}

#[derive(Debug, Default)]
struct JobState {
    status: JobStatus,
    current_project_index: usize,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Runs one job. Share it as `Arc<ScanOrchestrator>`.
pub struct ScanOrchestrator {
    config: JobConfig,
    phases: Phases,
    state: Mutex<JobState>,
    cache: Mutex<ResultCache>,
    broadcast: ProgressBroadcast,
    runner: SubprocessRunner,
    status_tx: watch::Sender<JobStatus>,
}

impl ScanOrchestrator {
    pub fn new(config: JobConfig, phases: Phases) -> Self {
        let (status_tx, _) = watch::channel(JobStatus::Idle);
        Self {
            config,
            phases,
            state: Mutex::new(JobState::default()),
            cache: Mutex::new(ResultCache::new()),
            broadcast: ProgressBroadcast::new(),
            runner: SubprocessRunner::new(),
            status_tx,
        }
    }

    pub fn job_id(&self) -> &str {
        self.config.job_id()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, JobState>, JobError> {
        self.state.lock().map_err(|_| JobError::StatePoisoned)
    }

    pub fn status(&self) -> JobStatus {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let projects = self.config.projects();
        JobSnapshot {
            job_id: self.config.job_id().to_string(),
            status: state.status,
            current_project_index: state.current_project_index,
            total_projects: projects.len(),
            current_project_path: state
                .started_at
                .and_then(|_| projects.get(state.current_project_index).cloned()),
            started_at: state.started_at,
            completed_at: state.completed_at,
            error: state.error.clone(),
        }
    }

    /// Every output line produced so far.
    pub fn output(&self) -> Vec<String> {
        self.broadcast.buffered_lines()
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcast.subscribe()
    }

    pub fn broadcast(&self) -> &ProgressBroadcast {
        &self.broadcast
    }

    /// Follows status transitions.
    pub fn status_watch(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    pub fn cached_projects(&self) -> Vec<PathBuf> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .projects()
    }

    pub fn cached(&self, project: &Path) -> Option<Arc<Vec<CodeElement>>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
    }

    /// Idle -> Running, then process the projects on a spawned task.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, JobError> {
        {
            let mut state = self.lock_state()?;
            if state.status != JobStatus::Idle {
                return Err(JobError::InvalidTransition {
                    from: state.status,
                    action: "start",
                });
            }
            state.status = JobStatus::Running;
            state.started_at = Some(Utc::now());
        }
        self.status_tx.send_replace(JobStatus::Running);
        info!(
            job_id = %self.job_id(),
            projects = self.config.projects().len(),
            "job started"
        );
        self.publish_progress();

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.supervise().await }))
    }

    /// Running -> Cancelled. Terminates the active subprocess, if any; the
    /// loop stops at its next checkpoint.
    pub fn cancel(&self) -> Result<JobSnapshot, JobError> {
        {
            let mut state = self.lock_state()?;
            if state.status != JobStatus::Running {
                return Err(JobError::InvalidTransition {
                    from: state.status,
                    action: "cancel",
                });
            }
            state.status = JobStatus::Cancelled;
        }
        self.status_tx.send_replace(JobStatus::Cancelled);
        let terminated = self.runner.terminate();
        info!(job_id = %self.job_id(), terminated, "job cancellation requested");
        if terminated {
            self.emit("Cancellation requested, terminating active subprocess".to_string());
        } else {
            self.emit("Cancellation requested".to_string());
        }
        Ok(self.snapshot())
    }

    async fn supervise(self: Arc<Self>) {
        let worker = Arc::clone(&self);
        let outcome = match tokio::spawn(async move { worker.run_projects().await }).await {
            Ok(result) => result,
            Err(e) => Err(JobError::Panicked(panic_message(e))),
        };
        match outcome {
            Ok(()) => self.finish(),
            Err(e) => self.fail(e),
        }
    }

    fn finish(&self) {
        let status = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.status == JobStatus::Running {
                state.status = JobStatus::Completed;
            }
            state.completed_at = Some(Utc::now());
            state.status
        };
        self.status_tx.send_replace(status);
        info!(job_id = %self.job_id(), %status, "job finished");
        self.emit(format!("Job {}", status));
        self.broadcast.publish(JobEvent::Complete(self.snapshot()));
    }

    fn fail(&self, err: JobError) {
        let message = err.to_string();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.status = JobStatus::Failed;
            state.completed_at = Some(Utc::now());
            state.error = Some(message.clone());
        }
        self.status_tx.send_replace(JobStatus::Failed);
        error!(job_id = %self.job_id(), error = %message, "job failed");
        self.broadcast.publish(JobEvent::Error(message));
    }

    fn emit(&self, line: String) {
        self.broadcast.publish(JobEvent::Output(line));
    }

    fn publish_progress(&self) {
        self.broadcast.publish(JobEvent::Progress(self.snapshot()));
    }

    /// True when the job was cancelled; logs the stop.
    fn checkpoint(&self, project: &Path, phase: &str) -> Result<bool, JobError> {
        if self.lock_state()?.status != JobStatus::Cancelled {
            return Ok(false);
        }
        info!(job_id = %self.job_id(), project = %project.display(), phase, "stopping at cancellation checkpoint");
        self.emit(format!("Cancelled before {} of {}", phase, project.display()));
        Ok(true)
    }

    /// Move to project `index` unless the job was cancelled. The status
    /// check and the index update share one lock, so a cancelled job never
    /// advances. Doubles as the checkpoint before scaffold.
    fn enter_project(&self, index: usize, project: &Path) -> Result<bool, JobError> {
        {
            let mut state = self.lock_state()?;
            if state.status != JobStatus::Cancelled {
                state.current_project_index = index;
                return Ok(true);
            }
        }
        info!(job_id = %self.job_id(), project = %project.display(), phase = "scaffold", "stopping at cancellation checkpoint");
        self.emit(format!("Cancelled before scaffold of {}", project.display()));
        Ok(false)
    }

    async fn run_projects(&self) -> Result<(), JobError> {
        let projects = self.config.projects();
        let total = projects.len();
        let emit = |line: String| self.emit(line);

        for (index, project) in projects.iter().enumerate() {
            if !self.enter_project(index, project)? {
                return Ok(());
            }
            let selection = self.config.selection_for(project);
            self.publish_progress();
            self.emit(format!("[{}/{}] {}", index + 1, total, project.display()));

            if selection.run_scaffold {
                match self.phases.scaffold.run(&self.runner, project, &emit).await {
                    Ok(ProcessOutcome::Exited) => self.emit("Scaffold complete".to_string()),
                    Ok(ProcessOutcome::Terminated | ProcessOutcome::NotLaunched) => {}
                    Err(e) => {
                        warn!(project = %project.display(), error = %e, "scaffold failed, continuing");
                        self.emit(format!("{} {}", STDERR_MARKER, e));
                    }
                }
            }

            if self.checkpoint(project, "scan")? {
                return Ok(());
            }
            if selection.run_scan {
                match self.phases.scan.run(project, &emit).await {
                    Ok(elements) => {
                        self.cache
                            .lock()
                            .map_err(|_| JobError::StatePoisoned)?
                            .insert(project.clone(), elements);
                        self.emit("Scan complete".to_string());
                    }
                    Err(e) => {
                        warn!(project = %project.display(), error = %e, "scan failed, skipping project");
                        self.emit(format!("{} {}", STDERR_MARKER, e));
                        continue;
                    }
                }
            }

            if self.checkpoint(project, "generate")? {
                return Ok(());
            }
            if selection.run_generate {
                let cached = self.cached(project);
                match self
                    .phases
                    .generate
                    .run(project, cached.as_deref().map(Vec::as_slice), &emit)
                    .await
                {
                    Ok(report) => self.emit(format!(
                        "Generate complete ({} analyses succeeded)",
                        report.analyses_succeeded
                    )),
                    Err(e) => {
                        warn!(project = %project.display(), error = %e, "generate failed");
                        self.emit(format!("{} {}", STDERR_MARKER, e));
                    }
                }
            }
        }
        Ok(())
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "job task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
