use std::path::{Path, PathBuf};

use tracing::info;

use super::Emit;
use crate::errors::PhaseError;
use crate::subprocess::{CommandSpec, InterpreterResolver, ProcessOutcome, SubprocessRunner};

/// Runs the directory-scaffolding script against a project root.
#[derive(Debug, Clone)]
pub struct ScaffoldPhase {
    script: PathBuf,
    resolver: InterpreterResolver,
}

impl ScaffoldPhase {
    /// `script` is made absolute against the current directory because the
    /// child runs with the project as its working directory.
    pub fn new(script: impl Into<PathBuf>, resolver: InterpreterResolver) -> Self {
        let script = script.into();
        let script = std::path::absolute(&script).unwrap_or(script);
        Self { script, resolver }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Build the command for `project`. The interpreter is resolved on every
    /// call.
    pub async fn command(&self, project: &Path) -> CommandSpec {
        let interpreter = self.resolver.resolve().await;
        CommandSpec::new(interpreter, project)
            .arg(self.script.display().to_string())
            .arg(project.display().to_string())
            .remediation(self.resolver.remediation())
    }

    pub async fn run(
        &self,
        runner: &SubprocessRunner,
        project: &Path,
        emit: Emit<'_>,
    ) -> Result<ProcessOutcome, PhaseError> {
        let spec = self.command(project).await;
        info!(project = %project.display(), interpreter = %spec.program, "scaffolding project");
        emit(format!("Scaffolding {} ({})", project.display(), spec.program));

        let outcome = runner.run(&spec, |line| emit(line.to_string())).await?;
        match outcome {
            ProcessOutcome::Terminated => emit("Scaffold terminated".to_string()),
            ProcessOutcome::NotLaunched => emit("Scaffold skipped, job cancelled".to_string()),
            ProcessOutcome::Exited => {}
        }
        Ok(outcome)
    }
}
