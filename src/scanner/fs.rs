use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::{CodeElement, CodeScanner, ElementKind, ScanOptions};

static JS_IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:import|export)\s+(?:[\w*{}\s,$]+\s+from\s+)?['"]([^'"]+)['"]"#).unwrap()
});
static JS_REQUIRE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static JS_FUNCTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+([A-Za-z_$][\w$]*)")
        .unwrap()
});
static JS_ARROW_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(export\s+)?(?:const|let)\s+([A-Za-z_$][\w$]*)\s*(?::\s*[^=]+)?=\s*(?:async\s*)?(?:\(|function\b|[A-Za-z_$][\w$]*\s*=>)",
    )
    .unwrap()
});
static JS_CLASS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)").unwrap()
});
static TS_INTERFACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(export\s+)?interface\s+([A-Za-z_$][\w$]*)").unwrap());
static TS_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(export\s+)?type\s+([A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*=").unwrap()
});

static PY_DEF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:async\s+)?def\s+(\w+)").unwrap());
static PY_CLASS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)class\s+(\w+)").unwrap());
static PY_FROM_IMPORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+([\w.]+)\s+import\b").unwrap());
static PY_IMPORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+([\w.]+)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Script { jsx: bool },
    Python,
}

impl Language {
    fn detect(path: &Path, extensions: &[String]) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext)) {
            return None;
        }
        match ext.as_str() {
            "py" => Some(Language::Python),
            "ts" | "js" | "mjs" | "cjs" | "mts" | "cts" => Some(Language::Script { jsx: false }),
            "tsx" | "jsx" => Some(Language::Script { jsx: true }),
            _ => None,
        }
    }
}

/// Scans the file system with line-level pattern matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

impl FsScanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CodeScanner for FsScanner {
    async fn scan(
        &self,
        root: &Path,
        extensions: &[String],
        options: &ScanOptions,
    ) -> Result<Vec<CodeElement>> {
        let root = root.to_path_buf();
        let extensions = extensions.to_vec();
        let options = options.clone();
        tokio::task::spawn_blocking(move || scan_tree(&root, &extensions, &options))
            .await
            .context("Scan worker panicked")?
    }
}

fn scan_tree(root: &Path, extensions: &[String], options: &ScanOptions) -> Result<Vec<CodeElement>> {
    if !root.is_dir() {
        anyhow::bail!("Project root {} is not a directory", root.display());
    }

    let excludes = options
        .exclude
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid exclude glob '{}'", p)))
        .collect::<Result<Vec<_>>>()?;

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(root, entry, &excludes));

    let mut elements = Vec::new();
    let mut files = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(language) = Language::detect(entry.path(), extensions) else {
            continue;
        };
        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        files += 1;
        elements.extend(extract_elements(&relative_path(root, entry.path()), &content, language));
    }

    debug!(root = %root.display(), files, elements = elements.len(), "scan finished");
    Ok(elements)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_excluded(root: &Path, entry: &DirEntry, excludes: &[Pattern]) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let rel = relative_path(root, entry.path());
    // Directories are pruned when anything beneath them would be excluded.
    let probe = if entry.file_type().is_dir() {
        format!("{}/_", rel)
    } else {
        rel
    };
    excludes.iter().any(|p| p.matches(&probe))
}

fn extract_elements(file: &str, content: &str, language: Language) -> Vec<CodeElement> {
    match language {
        Language::Script { jsx } => extract_script(file, content, jsx),
        Language::Python => extract_python(file, content),
    }
}

fn element(kind: ElementKind, name: &str, file: &str, line: usize, exported: bool) -> CodeElement {
    CodeElement {
        kind,
        name: name.to_string(),
        file: file.to_string(),
        line,
        exported,
    }
}

fn classify_callable(name: &str, jsx: bool) -> ElementKind {
    let mut chars = name.chars();
    if name.starts_with("use") && chars.nth(3).is_some_and(|c| c.is_ascii_uppercase()) {
        ElementKind::Hook
    } else if jsx && name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        ElementKind::Component
    } else {
        ElementKind::Function
    }
}

fn extract_script(file: &str, content: &str, jsx: bool) -> Vec<CodeElement> {
    let mut out = Vec::new();
    for (idx, text) in content.lines().enumerate() {
        let line = idx + 1;
        if let Some(caps) = JS_IMPORT_REGEX.captures(text) {
            out.push(element(ElementKind::Import, &caps[1], file, line, false));
            continue;
        }
        if let Some(caps) = JS_REQUIRE_REGEX.captures(text) {
            out.push(element(ElementKind::Import, &caps[1], file, line, false));
        }
        if let Some(caps) = JS_FUNCTION_REGEX.captures(text) {
            let name = &caps[2];
            out.push(element(classify_callable(name, jsx), name, file, line, caps.get(1).is_some()));
        } else if let Some(caps) = JS_CLASS_REGEX.captures(text) {
            out.push(element(ElementKind::Class, &caps[2], file, line, caps.get(1).is_some()));
        } else if let Some(caps) = TS_INTERFACE_REGEX.captures(text) {
            out.push(element(ElementKind::Interface, &caps[2], file, line, caps.get(1).is_some()));
        } else if let Some(caps) = TS_TYPE_REGEX.captures(text) {
            out.push(element(ElementKind::TypeAlias, &caps[2], file, line, caps.get(1).is_some()));
        } else if let Some(caps) = JS_ARROW_REGEX.captures(text) {
            let name = &caps[2];
            out.push(element(classify_callable(name, jsx), name, file, line, caps.get(1).is_some()));
        }
    }
    out
}

fn extract_python(file: &str, content: &str) -> Vec<CodeElement> {
    let mut out = Vec::new();
    for (idx, text) in content.lines().enumerate() {
        let line = idx + 1;
        if let Some(caps) = PY_FROM_IMPORT_REGEX.captures(text) {
            out.push(element(ElementKind::Import, &caps[1], file, line, false));
        } else if let Some(caps) = PY_IMPORT_REGEX.captures(text) {
            out.push(element(ElementKind::Import, &caps[1], file, line, false));
        } else if let Some(caps) = PY_CLASS_REGEX.captures(text) {
            let name = &caps[2];
            out.push(element(ElementKind::Class, name, file, line, !name.starts_with('_')));
        } else if let Some(caps) = PY_DEF_REGEX.captures(text) {
            let nested = !caps[1].is_empty();
            let name = &caps[2];
            let kind = if nested {
                ElementKind::Method
            } else {
                ElementKind::Function
            };
            out.push(element(kind, name, file, line, !nested && !name.starts_with('_')));
        }
    }
    out
}
