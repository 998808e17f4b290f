use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use super::graph::{DependencyGraph, elements_mermaid};
use super::reports;
use super::{AnalysisKind, ArtifactGenerator};
use crate::scanner::{CodeElement, ElementKind};

/// Output directory created under each project root.
pub const OUTPUT_DIR: &str = ".coderef";

const INDEX_FILE: &str = "index.json";
const PREVIOUS_INDEX_FILE: &str = "index.previous.json";

const COMPLEXITY_README: &str = "# Complexity Reports\n\n\
Per-element complexity metrics are generated on-demand.\n\n\
Usage: `coderef complexity <element> -f json > complexity/<element>.json`\n";

/// Full export bundle: the graph plus every element it was built from.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphExport<'a> {
    generated_at: chrono::DateTime<Utc>,
    graph: &'a DependencyGraph,
    elements: &'a [CodeElement],
}

/// Writes artifacts as JSON, Markdown, Mermaid and DOT files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactGenerator;

impl FsArtifactGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn output_dir(root: &Path) -> PathBuf {
        root.join(OUTPUT_DIR)
    }
}

async fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "artifact written");
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize artifact")?;
    write_text(path, &json).await
}

async fn read_previous_index(out: &Path) -> Result<Option<Vec<CodeElement>>> {
    let path = out.join(PREVIOUS_INDEX_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            let elements = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(Some(elements))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn wrap_diagrams(sections: &[(&str, &str)]) -> String {
    let mut out = String::from("# Diagrams\n");
    for (title, body) in sections {
        out.push_str(&format!("\n## {}\n\n```mermaid\n{}```\n", title, body));
    }
    out
}

#[async_trait]
impl ArtifactGenerator for FsArtifactGenerator {
    async fn write_index(&self, root: &Path, elements: &[CodeElement]) -> Result<()> {
        let out = Self::output_dir(root);
        let current = out.join(INDEX_FILE);
        if tokio::fs::try_exists(&current).await.unwrap_or(false) {
            tokio::fs::copy(&current, out.join(PREVIOUS_INDEX_FILE))
                .await
                .context("Failed to preserve previous index")?;
        }
        write_json(&current, &elements).await
    }

    async fn write_context(&self, root: &Path, elements: &[CodeElement]) -> Result<()> {
        let out = Self::output_dir(root);
        let summary = reports::context_summary(elements, Utc::now());
        write_json(&out.join("context.json"), &summary).await?;
        write_text(&out.join("context.md"), &reports::context_markdown(&summary)).await
    }

    async fn write_dependency_graph(&self, root: &Path, elements: &[CodeElement]) -> Result<()> {
        let graph = DependencyGraph::build(elements);
        write_json(&Self::output_dir(root).join("graph.json"), &graph).await
    }

    async fn analyze(&self, kind: AnalysisKind, root: &Path, elements: &[CodeElement]) -> Result<()> {
        let out = Self::output_dir(root);
        let path = out.join("reports").join(format!("{}.json", kind.as_str()));
        match kind {
            AnalysisKind::Patterns => write_json(&path, &reports::patterns(elements)).await,
            AnalysisKind::Coverage => write_json(&path, &reports::coverage(elements)).await,
            AnalysisKind::Validation => {
                let root = root.to_path_buf();
                let report = reports::validate(elements, |file| root.join(file).is_file());
                write_json(&path, &report).await
            }
            AnalysisKind::Drift => {
                let previous = read_previous_index(&out).await?;
                let report = reports::drift(previous.as_deref(), elements);
                write_json(&path, &report).await
            }
        }
    }

    async fn write_diagrams(&self, root: &Path, elements: &[CodeElement]) -> Result<()> {
        let diagrams = Self::output_dir(root).join("diagrams");
        let graph = DependencyGraph::build(elements);

        let dependencies = graph.to_mermaid(false);
        let imports = graph.to_mermaid(true);
        let defined = elements_mermaid(elements);

        write_text(&diagrams.join("dependencies.mmd"), &dependencies).await?;
        write_text(&diagrams.join("dependencies.dot"), &graph.to_dot()).await?;
        write_text(&diagrams.join("imports.mmd"), &imports).await?;
        write_text(&diagrams.join("elements.mmd"), &defined).await?;

        let import_count = elements.iter().filter(|e| e.kind == ElementKind::Import).count();
        debug!(imports = import_count, "diagrams rendered");

        let wrapped = wrap_diagrams(&[
            ("File dependencies", dependencies.as_str()),
            ("Imports", imports.as_str()),
            ("Elements", defined.as_str()),
        ]);
        let out = Self::output_dir(root);
        let exports = out.join("exports");
        write_text(&exports.join("diagram-wrapped.md"), &wrapped).await?;

        let export = GraphExport {
            generated_at: Utc::now(),
            graph: &graph,
            elements,
        };
        write_json(&exports.join("graph.json"), &export).await?;
        write_json(&exports.join("graph.jsonld"), &graph.to_jsonld(elements)).await?;

        // Written only once; existing content is kept.
        let readme = out.join("reports").join("complexity").join("README.md");
        if !tokio::fs::try_exists(&readme).await.unwrap_or(false) {
            write_text(&readme, COMPLEXITY_README).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn elements() -> Vec<CodeElement> {
        vec![
            CodeElement {
                kind: ElementKind::Function,
                name: "main".to_string(),
                file: "src/index.ts".to_string(),
                line: 3,
                exported: true,
            },
            CodeElement {
                kind: ElementKind::Import,
                name: "./util".to_string(),
                file: "src/index.ts".to_string(),
                line: 1,
                exported: false,
            },
            CodeElement {
                kind: ElementKind::Function,
                name: "helper".to_string(),
                file: "src/util.ts".to_string(),
                line: 1,
                exported: true,
            },
        ]
    }

    #[tokio::test]
    async fn test_write_index_preserves_previous() {
        let dir = tempdir().unwrap();
        let generator = FsArtifactGenerator::new();
        let first = elements();
        generator.write_index(dir.path(), &first[..1]).await.unwrap();
        generator.write_index(dir.path(), &first).await.unwrap();

        let out = dir.path().join(OUTPUT_DIR);
        let current: Vec<CodeElement> =
            serde_json::from_str(&std::fs::read_to_string(out.join(INDEX_FILE)).unwrap()).unwrap();
        let previous: Vec<CodeElement> =
            serde_json::from_str(&std::fs::read_to_string(out.join(PREVIOUS_INDEX_FILE)).unwrap())
                .unwrap();
        assert_eq!(current.len(), 3);
        assert_eq!(previous.len(), 1);
    }

    #[tokio::test]
    async fn test_context_and_graph_files() {
        let dir = tempdir().unwrap();
        let generator = FsArtifactGenerator::new();
        generator.write_context(dir.path(), &elements()).await.unwrap();
        generator
            .write_dependency_graph(dir.path(), &elements())
            .await
            .unwrap();

        let out = dir.path().join(OUTPUT_DIR);
        assert!(out.join("context.md").is_file());
        let context: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("context.json")).unwrap())
                .unwrap();
        assert_eq!(context["totalElements"], 3);
        let graph: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("graph.json")).unwrap()).unwrap();
        assert_eq!(graph["edges"][0]["to"], "src/util.ts");
    }

    #[tokio::test]
    async fn test_every_analysis_writes_a_report() {
        let dir = tempdir().unwrap();
        let generator = FsArtifactGenerator::new();
        for kind in AnalysisKind::ALL {
            generator.analyze(kind, dir.path(), &elements()).await.unwrap();
        }
        let reports = dir.path().join(OUTPUT_DIR).join("reports");
        for name in ["patterns", "coverage", "validation", "drift"] {
            assert!(reports.join(format!("{}.json", name)).is_file(), "{} missing", name);
        }
        let drift: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(reports.join("drift.json")).unwrap())
                .unwrap();
        assert_eq!(drift["hasBaseline"], false);
    }

    #[tokio::test]
    async fn test_drift_fails_on_corrupt_baseline() {
        let dir = tempdir().unwrap();
        let out = dir.path().join(OUTPUT_DIR);
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(PREVIOUS_INDEX_FILE), "not json").unwrap();

        let result = FsArtifactGenerator::new()
            .analyze(AnalysisKind::Drift, dir.path(), &elements())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_diagrams() {
        let dir = tempdir().unwrap();
        FsArtifactGenerator::new()
            .write_diagrams(dir.path(), &elements())
            .await
            .unwrap();

        let out = dir.path().join(OUTPUT_DIR);
        for name in ["dependencies.mmd", "dependencies.dot", "imports.mmd", "elements.mmd"] {
            assert!(out.join("diagrams").join(name).is_file(), "{} missing", name);
        }
        let wrapped = std::fs::read_to_string(out.join("exports/diagram-wrapped.md")).unwrap();
        assert!(wrapped.contains("```mermaid"));
        assert!(wrapped.contains("## Imports"));
    }

    #[tokio::test]
    async fn test_write_diagrams_exports_graph_bundle() {
        let dir = tempdir().unwrap();
        let generator = FsArtifactGenerator::new();
        generator.write_diagrams(dir.path(), &elements()).await.unwrap();

        let exports = dir.path().join(OUTPUT_DIR).join("exports");
        let export: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(exports.join("graph.json")).unwrap())
                .unwrap();
        assert_eq!(export["graph"]["edges"][0]["to"], "src/util.ts");
        assert_eq!(export["elements"].as_array().unwrap().len(), 3);
        assert!(export["generatedAt"].is_string());

        let jsonld: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(exports.join("graph.jsonld")).unwrap())
                .unwrap();
        assert!(jsonld["@context"].is_object());
        let nodes = jsonld["@graph"].as_array().unwrap();
        assert!(nodes.iter().any(|n| n["@id"] == "src/index.ts"));

        let readme = dir.path().join(OUTPUT_DIR).join("reports/complexity/README.md");
        let text = std::fs::read_to_string(&readme).unwrap();
        assert!(text.starts_with("# Complexity Reports"));
        assert!(text.contains("coderef complexity <element> -f json"));
    }

    #[tokio::test]
    async fn test_complexity_readme_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let readme = dir.path().join(OUTPUT_DIR).join("reports/complexity/README.md");
        std::fs::create_dir_all(readme.parent().unwrap()).unwrap();
        std::fs::write(&readme, "local notes\n").unwrap();

        FsArtifactGenerator::new()
            .write_diagrams(dir.path(), &elements())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&readme).unwrap(), "local notes\n");
    }
}
