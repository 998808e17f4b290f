//! In-process job execution: `coderef-scan run <paths...>`.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use coderef_scan::artifacts::FsArtifactGenerator;
use coderef_scan::config::ScanConfig;
use coderef_scan::orchestrator::{JobConfig, JobStatus, PhaseSelection, ScanOrchestrator};
use coderef_scan::registry::JobRegistry;
use coderef_scan::ui::JobProgressUI;

/// Build the phase selection from the `run` flags. Scan is on unless
/// `--no-scan` is given; `--all` turns every phase on.
pub fn selection_from_flags(scaffold: bool, no_scan: bool, generate: bool, all: bool) -> PhaseSelection {
    if all {
        return PhaseSelection::all();
    }
    PhaseSelection {
        run_scaffold: scaffold,
        run_scan: !no_scan,
        run_generate: generate,
    }
}

pub async fn cmd_run(
    config: ScanConfig,
    paths: Vec<PathBuf>,
    selection: PhaseSelection,
    job_id: Option<String>,
    verbose: bool,
) -> Result<()> {
    if selection.is_empty() {
        anyhow::bail!("No phases selected. Pass --scaffold, --generate or --all, or drop --no-scan.");
    }

    let projects = paths
        .iter()
        .map(|p| {
            std::path::absolute(p)
                .with_context(|| format!("Failed to resolve project path: {}", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let job_config = JobConfig::new(job_id.clone(), projects)?.with_selection_for_all(selection);
    let total = job_config.projects().len() as u64;

    let registry = JobRegistry::new(config.eviction_policy());
    let job = Arc::new(ScanOrchestrator::new(job_config, config.phases()));
    registry.register(job_id.clone(), Arc::clone(&job));

    let ui = JobProgressUI::new(total, verbose);
    let events = job.subscribe().into_stream();
    tokio::pin!(events);
    let handle = job.start()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => ui.on_event(&event),
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                // The job may have finished in the meantime.
                if let Err(e) = job.cancel() {
                    tracing::debug!(error = %e, "cancel after interrupt ignored");
                }
            }
        }
    }

    handle.await.context("Job task failed to join")?;

    let snapshot = job.snapshot();
    match snapshot.status {
        JobStatus::Completed => {
            if selection.run_generate {
                for project in job.cached_projects() {
                    println!(
                        "Artifacts written to {}",
                        FsArtifactGenerator::output_dir(&project).display()
                    );
                }
            }
            Ok(())
        }
        JobStatus::Cancelled => anyhow::bail!("Job {} was cancelled", job_id),
        status => anyhow::bail!(
            "Job {} ended {}: {}",
            job_id,
            status,
            snapshot.error.unwrap_or_else(|| "no error recorded".to_string())
        ),
    }
}
