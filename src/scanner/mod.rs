//! Code-element scanning capability.
//!
//! The orchestrator treats scanning as opaque: given a root, extension filters
//! and exclusion globs it gets back a list of [`CodeElement`]s. [`FsScanner`] is
//! the bundled implementation.

mod fs;

pub use fs::FsScanner;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Source extensions scanned by default.
pub const DEFAULT_EXTENSIONS: &[&str] = &["py", "ts", "tsx", "js", "jsx"];

/// Build and dependency directories skipped by default.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/node_modules/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/coverage/**",
    "**/.git/**",
    "**/target/**",
    "**/__pycache__/**",
    "**/.coderef/**",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Function,
    Method,
    Class,
    Component,
    Hook,
    Interface,
    TypeAlias,
    Import,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Function => "function",
            ElementKind::Method => "method",
            ElementKind::Class => "class",
            ElementKind::Component => "component",
            ElementKind::Hook => "hook",
            ElementKind::Interface => "interface",
            ElementKind::TypeAlias => "type_alias",
            ElementKind::Import => "import",
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered code element. `file` is relative to the scan root and uses
/// `/` separators; for imports `name` is the module specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeElement {
    pub kind: ElementKind,
    pub name: String,
    pub file: String,
    pub line: usize,
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub recursive: bool,
    pub exclude: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Produces code elements for a project root.
#[async_trait]
pub trait CodeScanner: Send + Sync {
    async fn scan(
        &self,
        root: &Path,
        extensions: &[String],
        options: &ScanOptions,
    ) -> Result<Vec<CodeElement>>;
}
