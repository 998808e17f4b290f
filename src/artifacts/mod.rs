//! Artifact generation collaborators for the generate phase.
//!
//! ## Output layout (under `<project>/.coderef/`)
//!
//! | File                              | Producer                 |
//! |-----------------------------------|--------------------------|
//! | `index.json`                      | `write_index`            |
//! | `index.previous.json`             | `write_index` (baseline) |
//! | `context.json`, `context.md`      | `write_context`          |
//! | `graph.json`                      | `write_dependency_graph` |
//! | `reports/<analysis>.json`         | `analyze`                |
//! | `diagrams/*.mmd`, `*.dot`         | `write_diagrams`         |
//! | `exports/diagram-wrapped.md`      | `write_diagrams`         |
//! | `exports/graph.json`, `.jsonld`   | `write_diagrams`         |
//! | `reports/complexity/README.md`    | `write_diagrams`         |

mod fs;
pub mod graph;
pub mod reports;

pub use fs::{FsArtifactGenerator, OUTPUT_DIR};

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scanner::CodeElement;

/// Best-effort analyses run in parallel after the derivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Patterns,
    Coverage,
    Validation,
    Drift,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 4] = [
        AnalysisKind::Patterns,
        AnalysisKind::Coverage,
        AnalysisKind::Validation,
        AnalysisKind::Drift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Patterns => "patterns",
            AnalysisKind::Coverage => "coverage",
            AnalysisKind::Validation => "validation",
            AnalysisKind::Drift => "drift",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes the artifacts derived from one project's scan result.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn write_index(&self, root: &Path, elements: &[CodeElement]) -> Result<()>;

    async fn write_context(&self, root: &Path, elements: &[CodeElement]) -> Result<()>;

    async fn write_dependency_graph(&self, root: &Path, elements: &[CodeElement]) -> Result<()>;

    async fn analyze(&self, kind: AnalysisKind, root: &Path, elements: &[CodeElement]) -> Result<()>;

    async fn write_diagrams(&self, root: &Path, elements: &[CodeElement]) -> Result<()>;
}
