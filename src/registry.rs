//! Process-wide job table.
//!
//! One [`JobRegistry`] is built at startup and cloned into every consumer
//! (HTTP state, CLI runner). When a registered job reaches a terminal state
//! covered by the [`EvictionPolicy`], a one-shot timer removes it after the
//! retention window.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::errors::JobError;
use crate::orchestrator::{JobStatus, ScanOrchestrator};

/// Default time a finished job stays queryable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub retention: Duration,
    /// Whether a cancelled job is evicted like a completed or failed one.
    pub evict_cancelled: bool,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            evict_cancelled: true,
        }
    }
}

impl EvictionPolicy {
    /// Whether reaching `status` arms the eviction timer.
    pub fn arms_on(&self, status: JobStatus) -> bool {
        match status {
            JobStatus::Completed | JobStatus::Failed => true,
            JobStatus::Cancelled => self.evict_cancelled,
            JobStatus::Idle | JobStatus::Running => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Arc<ScanOrchestrator>>>,
    policy: EvictionPolicy,
}

impl JobRegistry {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Insert `job` under `id`, replacing any earlier entry, and arm its
    /// eviction watcher. Must be called inside a tokio runtime.
    pub fn register(&self, id: impl Into<String>, job: Arc<ScanOrchestrator>) {
        let id = id.into();
        if self.jobs.insert(id.clone(), Arc::clone(&job)).is_some() {
            debug!(job_id = %id, "replaced existing registry entry");
        }
        self.arm_eviction(id, &job);
    }

    /// Like [`register`](Self::register), but refuses to replace a job that
    /// has not finished. The check and the insert happen under the entry
    /// lock, so two callers racing on one id cannot both succeed.
    pub fn register_unless_active(
        &self,
        id: impl Into<String>,
        job: Arc<ScanOrchestrator>,
    ) -> Result<(), JobError> {
        let id = id.into();
        match self.jobs.entry(id.clone()) {
            Entry::Occupied(entry) if !entry.get().status().is_terminal() => {
                return Err(JobError::AlreadyRunning(id));
            }
            Entry::Occupied(mut entry) => {
                debug!(job_id = %id, "replaced finished registry entry");
                entry.insert(Arc::clone(&job));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&job));
            }
        }
        self.arm_eviction(id, &job);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<ScanOrchestrator>> {
        self.jobs.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// The watcher only holds a `Weak` handle: once the job is dropped (for
    /// example after its entry was replaced) the status channel closes and
    /// the watcher exits.
    fn arm_eviction(&self, id: String, job: &Arc<ScanOrchestrator>) {
        let jobs = Arc::clone(&self.jobs);
        let policy = self.policy;
        let mut status = job.status_watch();
        let armed_for = Arc::downgrade(job);
        tokio::spawn(async move {
            let reached = match status.wait_for(|s| policy.arms_on(*s)).await {
                Ok(status) => *status,
                Err(_) => return,
            };
            debug!(job_id = %id, status = %reached, retention = ?policy.retention, "eviction armed");
            drop(status);
            tokio::time::sleep(policy.retention).await;

            // Only evict the orchestrator this timer was armed for.
            let removed = jobs.remove_if(&id, |_, current| {
                std::ptr::eq(Arc::as_ptr(current), armed_for.as_ptr())
            });
            if removed.is_some() {
                info!(job_id = %id, "evicted finished job");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{JobConfig, Phases};
    use crate::phases::testing::{RecordingGenerator, RecordingScanner};
    use crate::phases::{GeneratePhase, ScaffoldPhase, ScanPhase};
    use crate::subprocess::InterpreterResolver;
    use std::path::PathBuf;

    fn job(id: &str) -> Arc<ScanOrchestrator> {
        let config = JobConfig::new(id, vec![PathBuf::from("/work/app")]).unwrap();
        let phases = Phases {
            scaffold: ScaffoldPhase::new("/nonexistent/setup.py", InterpreterResolver::platform_default()),
            scan: ScanPhase::new(Arc::new(RecordingScanner::default())),
            generate: GeneratePhase::new(Arc::new(RecordingGenerator::default())),
        };
        Arc::new(ScanOrchestrator::new(config, phases))
    }

    fn short(evict_cancelled: bool) -> EvictionPolicy {
        EvictionPolicy {
            retention: Duration::from_millis(50),
            evict_cancelled,
        }
    }

    #[test]
    fn test_policy_arms_on_terminal_states() {
        let policy = EvictionPolicy::default();
        assert_eq!(policy.retention, DEFAULT_RETENTION);
        assert!(policy.arms_on(JobStatus::Completed));
        assert!(policy.arms_on(JobStatus::Failed));
        assert!(policy.arms_on(JobStatus::Cancelled));
        assert!(!policy.arms_on(JobStatus::Running));
        assert!(!short(false).arms_on(JobStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_register_then_get() {
        let registry = JobRegistry::new(EvictionPolicy::default());
        let orchestrator = job("X");
        registry.register("X", Arc::clone(&orchestrator));

        let found = registry.get("X").unwrap();
        assert!(Arc::ptr_eq(&found, &orchestrator));
        assert!(registry.get("Y").is_none());
    }

    #[tokio::test]
    async fn test_completed_job_is_evicted_after_retention() {
        let registry = JobRegistry::new(short(true));
        let orchestrator = job("X");
        registry.register("X", Arc::clone(&orchestrator));

        orchestrator.start().unwrap().await.unwrap();
        assert!(registry.get("X").is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.get("X").is_none());
    }

    #[tokio::test]
    async fn test_running_job_is_not_evicted() {
        let registry = JobRegistry::new(short(true));
        registry.register("idle", job("idle"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.get("idle").is_some());
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_evict_replacement() {
        let registry = JobRegistry::new(short(true));
        let first = job("X");
        registry.register("X", Arc::clone(&first));
        first.start().unwrap().await.unwrap();

        let second = job("X");
        registry.register("X", Arc::clone(&second));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let current = registry.get("X").unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let registry = JobRegistry::new(EvictionPolicy::default());
        registry.register("X", job("X"));
        let replacement = job("X");
        registry.register("X", Arc::clone(&replacement));
        assert!(Arc::ptr_eq(&registry.get("X").unwrap(), &replacement));
    }

    #[tokio::test]
    async fn test_clones_share_the_table() {
        let registry = JobRegistry::new(EvictionPolicy::default());
        let other = registry.clone();
        let orchestrator = job("X");
        registry.register("X", Arc::clone(&orchestrator));
        assert!(Arc::ptr_eq(&other.get("X").unwrap(), &orchestrator));
    }

    #[tokio::test]
    async fn test_unfinished_job_cannot_be_replaced() {
        let registry = JobRegistry::new(EvictionPolicy::default());
        let first = job("X");
        registry.register_unless_active("X", Arc::clone(&first)).unwrap();

        // Idle counts as unfinished: the first caller has not started it yet.
        let err = registry.register_unless_active("X", job("X")).unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(ref id) if id == "X"));

        first.start().unwrap();
        let err = registry.register_unless_active("X", job("X")).unwrap_err();
        assert_eq!(err.to_string(), "Job 'X' is already running");
        assert!(Arc::ptr_eq(&registry.get("X").unwrap(), &first));
    }

    #[tokio::test]
    async fn test_finished_job_can_be_replaced() {
        let registry = JobRegistry::new(EvictionPolicy::default());
        let first = job("X");
        registry.register_unless_active("X", Arc::clone(&first)).unwrap();
        first.start().unwrap().await.unwrap();

        let second = job("X");
        registry.register_unless_active("X", Arc::clone(&second)).unwrap();
        assert!(Arc::ptr_eq(&registry.get("X").unwrap(), &second));
    }

    #[tokio::test]
    async fn test_watcher_does_not_keep_replaced_job_alive() {
        let registry = JobRegistry::new(short(false));
        let never_started = job("X");
        registry.register("X", Arc::clone(&never_started));

        let cancelled = job("Y");
        registry.register("Y", Arc::clone(&cancelled));
        cancelled.start().unwrap();
        cancelled.cancel().unwrap();
        tokio::task::yield_now().await;

        registry.register("X", job("X"));
        registry.register("Y", job("Y"));

        assert_eq!(Arc::strong_count(&never_started), 1);
        let weak = Arc::downgrade(&cancelled);
        drop(cancelled);
        tokio::time::timeout(Duration::from_secs(5), async {
            while weak.upgrade().is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cancelled job should be released once its task ends");
    }
}
