use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::Emit;
use crate::errors::PhaseError;
use crate::scanner::{CodeElement, CodeScanner, DEFAULT_EXTENSIONS, ScanOptions};

/// Calls the scanning capability in-process.
#[derive(Clone)]
pub struct ScanPhase {
    scanner: Arc<dyn CodeScanner>,
    extensions: Vec<String>,
    options: ScanOptions,
}

impl ScanPhase {
    pub fn new(scanner: Arc<dyn CodeScanner>) -> Self {
        Self {
            scanner,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            options: ScanOptions::default(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run(&self, project: &Path, emit: Emit<'_>) -> Result<Vec<CodeElement>, PhaseError> {
        emit(format!(
            "Scanning {} [{}]",
            project.display(),
            self.extensions.join(", ")
        ));
        let elements = self
            .scanner
            .scan(project, &self.extensions, &self.options)
            .await
            .map_err(PhaseError::Scan)?;
        info!(project = %project.display(), elements = elements.len(), "scan finished");
        emit(format!("Found {} code elements", elements.len()));
        Ok(elements)
    }
}
