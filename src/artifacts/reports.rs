//! Pure derivations over a scan result: the context summary and the four
//! analysis reports. Nothing here touches the filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::{DependencyGraph, NodeKind};
use crate::scanner::{CodeElement, ElementKind};

const ENTRY_STEMS: &[&str] = &["index", "main", "app", "__main__", "server", "cli"];
const TOP_FILES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file: String,
    pub elements: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub generated_at: DateTime<Utc>,
    pub total_files: usize,
    pub total_elements: usize,
    pub exported: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub entry_points: Vec<String>,
    pub top_files: Vec<FileSummary>,
    pub external_dependencies: Vec<String>,
}

pub fn context_summary(elements: &[CodeElement], generated_at: DateTime<Utc>) -> ContextSummary {
    let mut per_file: BTreeMap<&str, usize> = BTreeMap::new();
    for element in elements {
        *per_file.entry(element.file.as_str()).or_default() += 1;
    }

    let entry_points = per_file
        .keys()
        .filter(|file| ENTRY_STEMS.contains(&file_stem(file)))
        .map(|file| file.to_string())
        .collect();

    let mut top_files: Vec<FileSummary> = per_file
        .iter()
        .map(|(file, count)| FileSummary {
            file: file.to_string(),
            elements: *count,
        })
        .collect();
    top_files.sort_by(|a, b| b.elements.cmp(&a.elements).then_with(|| a.file.cmp(&b.file)));
    top_files.truncate(TOP_FILES);

    let graph = DependencyGraph::build(elements);
    let external_dependencies = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::External)
        .map(|n| n.id.clone())
        .collect();

    ContextSummary {
        generated_at,
        total_files: per_file.len(),
        total_elements: elements.len(),
        exported: elements.iter().filter(|e| e.exported).count(),
        by_kind: count_by_kind(elements),
        entry_points,
        top_files,
        external_dependencies,
    }
}

/// Human-readable rendering of a [`ContextSummary`].
pub fn context_markdown(summary: &ContextSummary) -> String {
    let mut out = String::from("# Project Context\n\n");
    let _ = writeln!(out, "Generated: {}\n", summary.generated_at.to_rfc3339());
    let _ = writeln!(out, "- Files: {}", summary.total_files);
    let _ = writeln!(out, "- Elements: {}", summary.total_elements);
    let _ = writeln!(out, "- Exported: {}\n", summary.exported);

    out.push_str("## Elements by kind\n\n| Kind | Count |\n|------|-------|\n");
    for (kind, count) in &summary.by_kind {
        let _ = writeln!(out, "| {} | {} |", kind, count);
    }

    if !summary.entry_points.is_empty() {
        out.push_str("\n## Entry points\n\n");
        for entry in &summary.entry_points {
            let _ = writeln!(out, "- `{}`", entry);
        }
    }

    out.push_str("\n## Largest files\n\n");
    for file in &summary.top_files {
        let _ = writeln!(out, "- `{}` ({} elements)", file.file, file.elements);
    }

    if !summary.external_dependencies.is_empty() {
        out.push_str("\n## External dependencies\n\n");
        for dep in &summary.external_dependencies {
            let _ = writeln!(out, "- {}", dep);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateName {
    pub name: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternsReport {
    pub by_kind: BTreeMap<String, usize>,
    pub hooks: Vec<String>,
    pub components: Vec<String>,
    pub duplicate_names: Vec<DuplicateName>,
}

pub fn patterns(elements: &[CodeElement]) -> PatternsReport {
    let names_of = |kind: ElementKind| -> Vec<String> {
        elements
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    let mut defined_in: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for element in elements.iter().filter(|e| e.kind != ElementKind::Import) {
        defined_in
            .entry(element.name.as_str())
            .or_default()
            .insert(element.file.as_str());
    }
    let duplicate_names = defined_in
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(name, files)| DuplicateName {
            name: name.to_string(),
            files: files.into_iter().map(str::to_string).collect(),
        })
        .collect();

    PatternsReport {
        by_kind: count_by_kind(elements),
        hooks: names_of(ElementKind::Hook),
        components: names_of(ElementKind::Component),
        duplicate_names,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub test_files: Vec<String>,
    pub source_files: usize,
    pub covered: Vec<String>,
    pub uncovered: Vec<String>,
    pub ratio: f64,
}

/// Files that look like tests by naming convention.
pub fn is_test_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.contains(".test.")
        || name.contains(".spec.")
        || (name.starts_with("test_") && name.ends_with(".py"))
        || name.ends_with("_test.py")
        || path.split('/').any(|segment| segment == "__tests__")
}

/// A source file counts as covered when some test file shares its stem.
pub fn coverage(elements: &[CodeElement]) -> CoverageReport {
    let files: BTreeSet<&str> = elements.iter().map(|e| e.file.as_str()).collect();
    let (tests, sources): (Vec<&str>, Vec<&str>) = files.into_iter().partition(|f| is_test_file(f));

    let tested_stems: BTreeSet<String> = tests.iter().map(|t| tested_stem(t)).collect();
    let (covered, uncovered): (Vec<&str>, Vec<&str>) = sources
        .iter()
        .partition(|s| tested_stems.contains(file_stem(s)));

    let ratio = if sources.is_empty() {
        0.0
    } else {
        covered.len() as f64 / sources.len() as f64
    };

    CoverageReport {
        test_files: tests.iter().map(|s| s.to_string()).collect(),
        source_files: sources.len(),
        covered: covered.iter().map(|s| s.to_string()).collect(),
        uncovered: uncovered.iter().map(|s| s.to_string()).collect(),
        ratio,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

/// Checks the scan result against the tree: indexed files must still exist,
/// relative imports must resolve and exported names should be unique.
pub fn validate(elements: &[CodeElement], exists: impl Fn(&str) -> bool) -> ValidationReport {
    let mut issues = Vec::new();

    let files: BTreeSet<&str> = elements.iter().map(|e| e.file.as_str()).collect();
    for file in files.into_iter().filter(|f| !exists(f)) {
        issues.push(ValidationIssue {
            severity: Severity::Error,
            file: file.to_string(),
            line: None,
            message: "Indexed file no longer exists".to_string(),
        });
    }

    for import in DependencyGraph::build(elements).unresolved {
        issues.push(ValidationIssue {
            severity: Severity::Error,
            file: import.file,
            line: Some(import.line),
            message: format!("Unresolved import '{}'", import.specifier),
        });
    }

    let mut exported: BTreeMap<&str, Vec<&CodeElement>> = BTreeMap::new();
    for element in elements
        .iter()
        .filter(|e| e.exported && e.kind != ElementKind::Import)
    {
        exported.entry(element.name.as_str()).or_default().push(element);
    }
    for (name, defs) in exported.into_iter().filter(|(_, defs)| defs.len() > 1) {
        for def in defs {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                file: def.file.clone(),
                line: Some(def.line),
                message: format!("Exported name '{}' is defined in more than one place", name),
            });
        }
    }

    ValidationReport {
        valid: !issues.iter().any(|i| i.severity == Severity::Error),
        issues,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
    pub kind: ElementKind,
    pub name: String,
    pub file: String,
    pub line: usize,
}

impl From<&CodeElement> for ElementRef {
    fn from(e: &CodeElement) -> Self {
        Self {
            kind: e.kind,
            name: e.name.clone(),
            file: e.file.clone(),
            line: e.line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub has_baseline: bool,
    pub added: Vec<ElementRef>,
    pub removed: Vec<ElementRef>,
    pub moved: Vec<ElementRef>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty()
    }
}

/// Compare the current scan with the previous index. Elements are keyed by
/// file, kind and name; a changed line number counts as moved.
pub fn drift(previous: Option<&[CodeElement]>, current: &[CodeElement]) -> DriftReport {
    let Some(previous) = previous else {
        return DriftReport {
            has_baseline: false,
            added: Vec::new(),
            removed: Vec::new(),
            moved: Vec::new(),
        };
    };

    let before = keyed(previous);
    let after = keyed(current);

    let added = after
        .iter()
        .filter(|(k, _)| !before.contains_key(*k))
        .map(|(_, e)| ElementRef::from(*e))
        .collect();
    let removed = before
        .iter()
        .filter(|(k, _)| !after.contains_key(*k))
        .map(|(_, e)| ElementRef::from(*e))
        .collect();
    let moved = after
        .iter()
        .filter_map(|(k, e)| before.get(k).filter(|old| old.line != e.line).map(|_| ElementRef::from(*e)))
        .collect();

    DriftReport {
        has_baseline: true,
        added,
        removed,
        moved,
    }
}

type ElementKey<'a> = (&'a str, ElementKind, &'a str);

fn keyed(list: &[CodeElement]) -> BTreeMap<ElementKey<'_>, &CodeElement> {
    list.iter()
        .map(|e| ((e.file.as_str(), e.kind, e.name.as_str()), e))
        .collect()
}

fn count_by_kind(elements: &[CodeElement]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for element in elements {
        *counts.entry(element.kind.as_str().to_string()).or_default() += 1;
    }
    counts
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

fn tested_stem(path: &str) -> String {
    let stem = file_stem(path);
    let stem = stem.strip_prefix("test_").unwrap_or(stem);
    stem.strip_suffix("_test").unwrap_or(stem).to_string()
}
