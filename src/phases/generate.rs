use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use super::Emit;
use crate::artifacts::{AnalysisKind, ArtifactGenerator};
use crate::errors::{GenerateStage, PhaseError};
use crate::scanner::CodeElement;
use crate::subprocess::STDERR_MARKER;

/// Outcome of a generate run that got past the must-succeed stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateReport {
    pub analyses_succeeded: usize,
    pub analyses_failed: Vec<AnalysisKind>,
}

/// Turns a cached scan result into artifacts.
///
/// Stages run in order: index, then context and dependency graph together,
/// then the four analyses together (failures tolerated), then diagrams.
#[derive(Clone)]
pub struct GeneratePhase {
    generator: Arc<dyn ArtifactGenerator>,
}

impl GeneratePhase {
    pub fn new(generator: Arc<dyn ArtifactGenerator>) -> Self {
        Self { generator }
    }

    /// `cached` is this job's scan result for `project`. Without one the
    /// phase fails immediately.
    pub async fn run(
        &self,
        project: &Path,
        cached: Option<&[CodeElement]>,
        emit: Emit<'_>,
    ) -> Result<GenerateReport, PhaseError> {
        let Some(elements) = cached else {
            return Err(PhaseError::NoScanData {
                project: project.to_path_buf(),
            });
        };
        let generator = &self.generator;
        let stage = |stage: GenerateStage| move |source: anyhow::Error| PhaseError::Generate { stage, source };

        emit(format!("Writing index ({} elements)", elements.len()));
        generator
            .write_index(project, elements)
            .await
            .map_err(stage(GenerateStage::Index))?;

        emit("Writing context and dependency graph".to_string());
        tokio::try_join!(
            generator.write_context(project, elements),
            generator.write_dependency_graph(project, elements),
        )
        .map_err(stage(GenerateStage::Derivations))?;

        let results = join_all(AnalysisKind::ALL.into_iter().map(|kind| async move {
            (kind, generator.analyze(kind, project, elements).await)
        }))
        .await;

        let mut analyses_failed = Vec::new();
        for (kind, result) in results {
            if let Err(e) = result {
                warn!(project = %project.display(), analysis = %kind, error = %e, "analysis failed");
                emit(format!("{} {} analysis failed: {:#}", STDERR_MARKER, kind, e));
                analyses_failed.push(kind);
            }
        }
        let analyses_succeeded = AnalysisKind::ALL.len() - analyses_failed.len();
        emit(format!(
            "Analyses complete: {}/{} succeeded",
            analyses_succeeded,
            AnalysisKind::ALL.len()
        ));

        emit("Writing diagrams".to_string());
        generator
            .write_diagrams(project, elements)
            .await
            .map_err(stage(GenerateStage::Diagrams))?;

        info!(project = %project.display(), analyses_succeeded, "generate finished");
        Ok(GenerateReport {
            analyses_succeeded,
            analyses_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NO_SCAN_DATA;
    use crate::phases::testing::{RecordingGenerator, element};
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_missing_scan_data_fails_fast() {
        let generator = Arc::new(RecordingGenerator::default());
        let phase = GeneratePhase::new(generator.clone());
        let emit = |_line: String| {};

        let err = phase.run(Path::new("/work/app"), None, &emit).await.unwrap_err();

        assert!(matches!(err, PhaseError::NoScanData { .. }));
        assert!(err.to_string().starts_with(NO_SCAN_DATA));
        assert_eq!(NO_SCAN_DATA, "no scan data found — run scan first");
        assert!(generator.steps().is_empty());
    }

    #[tokio::test]
    async fn test_all_stages_run_in_order() {
        let generator = Arc::new(RecordingGenerator::default());
        let phase = GeneratePhase::new(generator.clone());
        let lines = Mutex::new(Vec::new());
        let emit = |line: String| lines.lock().unwrap().push(line);
        let elements = vec![element("a.ts", "a"), element("b.ts", "b")];

        let report = phase
            .run(Path::new("/work/app"), Some(elements.as_slice()), &emit)
            .await
            .unwrap();

        assert_eq!(report.analyses_succeeded, 4);
        assert!(report.analyses_failed.is_empty());
        let steps = generator.steps();
        assert_eq!(steps.first().map(String::as_str), Some("index"));
        assert_eq!(steps.last().map(String::as_str), Some("diagrams"));
        assert_eq!(generator.indexed.lock().unwrap()[0].1, 2);
        assert!(lines
            .into_inner()
            .unwrap()
            .contains(&"Analyses complete: 4/4 succeeded".to_string()));
    }

    #[tokio::test]
    async fn test_one_failed_analysis_is_tolerated() {
        let generator = Arc::new(RecordingGenerator {
            fail_analyses: vec![AnalysisKind::Coverage],
            ..Default::default()
        });
        let phase = GeneratePhase::new(generator.clone());
        let lines = Mutex::new(Vec::new());
        let emit = |line: String| lines.lock().unwrap().push(line);
        let elements = vec![element("a.ts", "a")];

        let report = phase
            .run(Path::new("/work/app"), Some(elements.as_slice()), &emit)
            .await
            .unwrap();

        assert_eq!(report.analyses_succeeded, 3);
        assert_eq!(report.analyses_failed, vec![AnalysisKind::Coverage]);
        assert_eq!(generator.analyses_run.load(Ordering::SeqCst), 4);
        let lines = lines.into_inner().unwrap();
        assert!(lines.contains(&"Analyses complete: 3/4 succeeded".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("[ERROR] coverage analysis failed")));
    }

    #[tokio::test]
    async fn test_index_failure_stops_before_derivations() {
        let generator = Arc::new(RecordingGenerator {
            fail_index: true,
            ..Default::default()
        });
        let phase = GeneratePhase::new(generator.clone());
        let emit = |_line: String| {};
        let elements = vec![element("a.ts", "a")];

        let err = phase
            .run(Path::new("/work/app"), Some(elements.as_slice()), &emit)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PhaseError::Generate {
                stage: GenerateStage::Index,
                ..
            }
        ));
        assert_eq!(generator.steps(), vec!["index".to_string()]);
        assert_eq!(generator.analyses_run.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_derivation_failure_skips_analyses() {
        let generator = Arc::new(RecordingGenerator {
            fail_graph: true,
            ..Default::default()
        });
        let phase = GeneratePhase::new(generator.clone());
        let emit = |_line: String| {};
        let elements = vec![element("a.ts", "a")];

        let err = phase
            .run(Path::new("/work/app"), Some(elements.as_slice()), &emit)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("context/dependency graph"));
        assert_eq!(generator.analyses_run.load(Ordering::SeqCst), 0);
        assert!(!generator.steps().contains(&"diagrams".to_string()));
    }

    #[tokio::test]
    async fn test_diagram_failure_fails_the_phase() {
        let generator = Arc::new(RecordingGenerator {
            fail_diagrams: true,
            ..Default::default()
        });
        let phase = GeneratePhase::new(generator);
        let emit = |_line: String| {};
        let elements = vec![element("a.ts", "a")];

        let err = phase
            .run(Path::new("/work/app"), Some(elements.as_slice()), &emit)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PhaseError::Generate {
                stage: GenerateStage::Diagrams,
                ..
            }
        ));
    }
}
