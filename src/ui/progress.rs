use crate::broadcast::JobEvent;
use crate::orchestrator::{JobSnapshot, JobStatus};
use crate::ui::icons::{BUILD, CHECK, CROSS, DOCS, FOLDER, SCAN, STOP, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal rendering of a single scan job, driven by its [`JobEvent`] stream.
///
/// Two bars are stacked vertically:
/// - Project bar: how many projects the job has moved past
/// - Phase spinner: the phase currently running and its latest line
pub struct JobProgressUI {
    multi: MultiProgress,
    project_bar: ProgressBar,
    phase_bar: ProgressBar,
    verbose: bool,
}

impl JobProgressUI {
    pub fn new(total_projects: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let project_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let project_bar = multi.add(ProgressBar::new(total_projects));
        project_bar.set_style(project_style);
        project_bar.set_prefix("Projects");

        let phase_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let phase_bar = multi.add(ProgressBar::new_spinner());
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("   Phase");
        phase_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            project_bar,
            phase_bar,
            verbose,
        }
    }

    /// Print a line above the bars, falling back to `eprintln!` if the
    /// terminal renderer fails.
    fn print_line(&self, line: &str) {
        if self.multi.println(line).is_err() {
            eprintln!("{}", line);
        }
    }

    pub fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Output(line) => self.on_output(line),
            JobEvent::Progress(snapshot) => self.on_progress(snapshot),
            JobEvent::Complete(snapshot) => self.finish(snapshot),
            JobEvent::Error(message) => self.fail(message),
        }
    }

    fn on_output(&self, line: &str) {
        if let Some(message) = phase_message(line) {
            self.phase_bar.set_message(message);
        }
        if line.starts_with("[ERROR]") {
            self.print_line(&format!("{}{}", WARN, style(line).red()));
        } else if self.verbose || is_milestone(line) {
            self.print_line(&format!("  {}", style(line).dim()));
        }
    }

    fn on_progress(&self, snapshot: &JobSnapshot) {
        self.project_bar.set_position(snapshot.current_project_index as u64);
        if let Some(path) = &snapshot.current_project_path {
            self.project_bar
                .set_message(format!("{}{}", FOLDER, path.display()));
        }
    }

    fn finish(&self, snapshot: &JobSnapshot) {
        self.phase_bar.finish_and_clear();
        self.project_bar.set_position(snapshot.total_projects as u64);
        let icon = match snapshot.status {
            JobStatus::Cancelled => STOP,
            JobStatus::Failed => CROSS,
            _ => CHECK,
        };
        self.project_bar
            .finish_with_message(format!("{}{}", icon, status_line(snapshot)));
    }

    fn fail(&self, message: &str) {
        self.phase_bar.finish_and_clear();
        self.project_bar
            .abandon_with_message(format!("{}{}", CROSS, style(message).red()));
    }
}

/// One-line summary of a finished job.
pub fn status_line(snapshot: &JobSnapshot) -> String {
    let elapsed = match (snapshot.started_at, snapshot.completed_at) {
        (Some(start), Some(end)) => {
            let ms = (end - start).num_milliseconds().max(0);
            format!(" in {:.1}s", ms as f64 / 1000.0)
        }
        _ => String::new(),
    };
    let mut line = format!(
        "Job {} {} ({} project{}){}",
        snapshot.job_id,
        snapshot.status,
        snapshot.total_projects,
        if snapshot.total_projects == 1 { "" } else { "s" },
        elapsed
    );
    if let Some(error) = &snapshot.error {
        line.push_str(": ");
        line.push_str(error);
    }
    line
}

/// Spinner text for lines that mark the start of a phase.
fn phase_message(line: &str) -> Option<String> {
    if line.starts_with("Scaffolding") {
        Some(format!("{}{}", BUILD, line))
    } else if line.starts_with("Scanning") {
        Some(format!("{}{}", SCAN, line))
    } else if line.starts_with("Generating") || line.starts_with("Writing") {
        Some(format!("{}{}", DOCS, line))
    } else {
        None
    }
}

fn is_milestone(line: &str) -> bool {
    line.ends_with("complete") || line.starts_with("Found ") || line.starts_with("Analyses complete")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use std::path::PathBuf;

    fn snapshot(status: JobStatus, total: usize) -> JobSnapshot {
        let started = Utc::now();
        JobSnapshot {
            job_id: "job-7".to_string(),
            status,
            current_project_index: 0,
            total_projects: total,
            current_project_path: Some(PathBuf::from("/work/app")),
            started_at: Some(started),
            completed_at: Some(started + TimeDelta::milliseconds(1500)),
            error: None,
        }
    }

    #[test]
    fn test_status_line_completed() {
        let line = status_line(&snapshot(JobStatus::Completed, 2));
        assert_eq!(line, "Job job-7 completed (2 projects) in 1.5s");
    }

    #[test]
    fn test_status_line_includes_error() {
        let mut snap = snapshot(JobStatus::Failed, 1);
        snap.completed_at = None;
        snap.error = Some("worker panicked".to_string());
        assert_eq!(status_line(&snap), "Job job-7 failed (1 project): worker panicked");
    }

    #[test]
    fn test_phase_message_detection() {
        assert!(phase_message("Scanning /work/app [ts, py]").is_some());
        assert!(phase_message("Scaffolding /work/app (python3)").is_some());
        assert!(phase_message("Found 3 code elements").is_none());
    }

    #[test]
    fn test_milestones() {
        assert!(is_milestone("Scan complete"));
        assert!(is_milestone("Analyses complete: 4/4 succeeded"));
        assert!(!is_milestone("created .coderef/reports"));
    }

    #[test]
    fn test_events_render_without_terminal() {
        let ui = JobProgressUI::new(1, true);
        ui.on_event(&JobEvent::Output("Scanning /work/app [ts]".into()));
        ui.on_event(&JobEvent::Progress(snapshot(JobStatus::Running, 1)));
        ui.on_event(&JobEvent::Output("[ERROR] scan failed".into()));
        ui.on_event(&JobEvent::Complete(snapshot(JobStatus::Completed, 1)));
        assert!(ui.project_bar.is_finished());
    }
}
