//! Phase executors.
//!
//! Each phase works on one project path and reports progress as plain text
//! lines through an [`Emit`] sink. Phases return typed [`PhaseError`]s; the
//! orchestrator decides what a failure means for the rest of the job.
//!
//! [`PhaseError`]: crate::errors::PhaseError

mod generate;
mod scaffold;
mod scan;

pub use generate::{GeneratePhase, GenerateReport};
pub use scaffold::ScaffoldPhase;
pub use scan::ScanPhase;

/// Line sink handed to phases by the orchestrator.
pub type Emit<'a> = &'a (dyn Fn(String) + Send + Sync);

#[cfg(test)]
pub(crate) mod testing {
    //! Recording doubles for the scan and artifact collaborators.

    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use crate::artifacts::{AnalysisKind, ArtifactGenerator};
    use crate::scanner::{CodeElement, CodeScanner, ElementKind, ScanOptions};

    pub fn element(file: &str, name: &str) -> CodeElement {
        CodeElement {
            kind: ElementKind::Function,
            name: name.to_string(),
            file: file.to_string(),
            line: 1,
            exported: true,
        }
    }

    /// Scanner that returns one element per call, or fails for listed roots.
    #[derive(Default)]
    pub struct RecordingScanner {
        pub calls: Mutex<Vec<PathBuf>>,
        pub fail_for: Vec<PathBuf>,
    }

    impl RecordingScanner {
        pub fn failing_for(roots: &[&Path]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_for: roots.iter().map(|p| p.to_path_buf()).collect(),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CodeScanner for RecordingScanner {
        async fn scan(
            &self,
            root: &Path,
            _extensions: &[String],
            _options: &ScanOptions,
        ) -> Result<Vec<CodeElement>> {
            self.calls.lock().unwrap().push(root.to_path_buf());
            if self.fail_for.iter().any(|p| p == root) {
                bail!("scanner exploded on {}", root.display());
            }
            Ok(vec![element(&format!("{}.ts", root.display()), "main")])
        }
    }

    /// Generator that records which steps ran, optionally failing some.
    #[derive(Default)]
    pub struct RecordingGenerator {
        pub steps: Mutex<Vec<String>>,
        pub indexed: Mutex<Vec<(PathBuf, usize)>>,
        pub fail_analyses: Vec<AnalysisKind>,
        pub fail_index: bool,
        pub fail_graph: bool,
        pub fail_diagrams: bool,
        pub index_delay: Duration,
        pub analyses_run: AtomicUsize,
    }

    impl RecordingGenerator {
        pub fn steps(&self) -> Vec<String> {
            self.steps.lock().unwrap().clone()
        }

        fn record(&self, step: &str) {
            self.steps.lock().unwrap().push(step.to_string());
        }
    }

    #[async_trait]
    impl ArtifactGenerator for RecordingGenerator {
        async fn write_index(&self, root: &Path, elements: &[CodeElement]) -> Result<()> {
            self.record("index");
            if !self.index_delay.is_zero() {
                tokio::time::sleep(self.index_delay).await;
            }
            self.indexed
                .lock()
                .unwrap()
                .push((root.to_path_buf(), elements.len()));
            if self.fail_index {
                bail!("index write failed");
            }
            Ok(())
        }

        async fn write_context(&self, _root: &Path, _elements: &[CodeElement]) -> Result<()> {
            self.record("context");
            Ok(())
        }

        async fn write_dependency_graph(&self, _root: &Path, _elements: &[CodeElement]) -> Result<()> {
            self.record("graph");
            if self.fail_graph {
                bail!("graph write failed");
            }
            Ok(())
        }

        async fn analyze(&self, kind: AnalysisKind, _root: &Path, _elements: &[CodeElement]) -> Result<()> {
            self.analyses_run.fetch_add(1, Ordering::SeqCst);
            if self.fail_analyses.contains(&kind) {
                bail!("{} analysis failed", kind);
            }
            Ok(())
        }

        async fn write_diagrams(&self, _root: &Path, _elements: &[CodeElement]) -> Result<()> {
            self.record("diagrams");
            if self.fail_diagrams {
                bail!("diagram write failed");
            }
            Ok(())
        }
    }
}
