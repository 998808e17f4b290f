//! File-level dependency graph built from import elements.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::scanner::{CodeElement, ElementKind};

/// Vocabulary for the JSON-LD export.
const JSONLD_VOCAB: &str = "urn:coderef:graph#";

const SCRIPT_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// A relative import that matched no scanned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedImport {
    pub file: String,
    pub specifier: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Internal(String),
    External(String),
    Unresolved,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub unresolved: Vec<UnresolvedImport>,
}

impl DependencyGraph {
    pub fn build(elements: &[CodeElement]) -> Self {
        let files: BTreeSet<String> = elements.iter().map(|e| e.file.clone()).collect();
        let mut externals = BTreeSet::new();
        let mut edges = BTreeSet::new();
        let mut unresolved = Vec::new();

        for import in elements.iter().filter(|e| e.kind == ElementKind::Import) {
            match resolve_import(&import.file, &import.name, &files) {
                Resolution::Internal(target) => {
                    if target != import.file {
                        edges.insert(GraphEdge {
                            from: import.file.clone(),
                            to: target,
                        });
                    }
                }
                Resolution::External(module) => {
                    externals.insert(module.clone());
                    edges.insert(GraphEdge {
                        from: import.file.clone(),
                        to: module,
                    });
                }
                Resolution::Unresolved => unresolved.push(UnresolvedImport {
                    file: import.file.clone(),
                    specifier: import.name.clone(),
                    line: import.line,
                }),
            }
        }

        let nodes = files
            .into_iter()
            .map(|id| GraphNode {
                id,
                kind: NodeKind::File,
            })
            .chain(externals.into_iter().map(|id| GraphNode {
                id,
                kind: NodeKind::External,
            }))
            .collect();

        Self {
            nodes,
            edges: edges.into_iter().collect(),
            unresolved,
        }
    }

    fn kind_of(&self, id: &str) -> Option<NodeKind> {
        self.nodes.iter().find(|n| n.id == id).map(|n| n.kind)
    }

    /// Edges between scanned files only.
    pub fn internal_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges
            .iter()
            .filter(|e| self.kind_of(&e.to) == Some(NodeKind::File))
    }

    /// Mermaid flowchart. External modules are drawn as stadium nodes.
    pub fn to_mermaid(&self, include_external: bool) -> String {
        let ids: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut out = String::from("graph TD\n");
        for (i, node) in self.nodes.iter().enumerate() {
            match node.kind {
                NodeKind::File => {
                    let _ = writeln!(out, "    n{}[\"{}\"]", i, escape_label(&node.id));
                }
                NodeKind::External if include_external => {
                    let _ = writeln!(out, "    n{}([\"{}\"])", i, escape_label(&node.id));
                }
                NodeKind::External => {}
            }
        }
        for edge in &self.edges {
            let external = self.kind_of(&edge.to) == Some(NodeKind::External);
            if external && !include_external {
                continue;
            }
            if let (Some(from), Some(to)) = (ids.get(edge.from.as_str()), ids.get(edge.to.as_str())) {
                let _ = writeln!(out, "    n{} --> n{}", from, to);
            }
        }
        out
    }

    /// Graphviz rendering of the file-to-file edges.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph dependencies {\n    rankdir=LR;\n    node [shape=box];\n");
        for node in self.nodes.iter().filter(|n| n.kind == NodeKind::File) {
            let _ = writeln!(out, "    \"{}\";", escape_dot(&node.id));
        }
        for edge in self.internal_edges() {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\";",
                escape_dot(&edge.from),
                escape_dot(&edge.to)
            );
        }
        out.push_str("}\n");
        out
    }

    /// Linked-data view: one node per file or package with its `dependsOn`
    /// targets and the elements the file defines.
    pub fn to_jsonld(&self, elements: &[CodeElement]) -> Value {
        let mut depends: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for edge in &self.edges {
            depends.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        }
        let mut defines: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for element in elements.iter().filter(|e| e.kind != ElementKind::Import) {
            defines.entry(element.file.as_str()).or_default().push(json!({
                "@id": format!("{}#{}", element.file, element.name),
                "@type": element.kind.as_str(),
                "name": element.name,
                "line": element.line,
                "exported": element.exported,
            }));
        }

        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|node| {
                let kind = match node.kind {
                    NodeKind::File => "File",
                    NodeKind::External => "Package",
                };
                json!({
                    "@id": node.id,
                    "@type": kind,
                    "dependsOn": depends.get(node.id.as_str()).cloned().unwrap_or_default(),
                    "defines": defines.remove(node.id.as_str()).unwrap_or_default(),
                })
            })
            .collect();

        json!({
            "@context": {
                "@vocab": JSONLD_VOCAB,
                "dependsOn": { "@type": "@id" },
            },
            "@graph": nodes,
        })
    }
}

/// Mermaid chart of which file defines which elements.
pub fn elements_mermaid(elements: &[CodeElement]) -> String {
    let mut by_file: BTreeMap<&str, Vec<&CodeElement>> = BTreeMap::new();
    for element in elements.iter().filter(|e| e.kind != ElementKind::Import) {
        by_file.entry(element.file.as_str()).or_default().push(element);
    }

    let mut out = String::from("graph LR\n");
    let mut next = 0usize;
    for (f, (file, defined)) in by_file.iter().enumerate() {
        let _ = writeln!(out, "    f{}[\"{}\"]", f, escape_label(file));
        for element in defined {
            let _ = writeln!(
                out,
                "    f{} --- e{}(\"{} {}\")",
                f,
                next,
                element.kind,
                escape_label(&element.name)
            );
            next += 1;
        }
    }
    out
}

/// Resolve `specifier` as imported from `from` against the scanned file set.
pub fn resolve_import(from: &str, specifier: &str, files: &BTreeSet<String>) -> Resolution {
    if from.ends_with(".py") {
        resolve_python(from, specifier, files)
    } else {
        resolve_script(from, specifier, files)
    }
}

fn resolve_script(from: &str, specifier: &str, files: &BTreeSet<String>) -> Resolution {
    let relative = specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../");
    if !relative {
        return Resolution::External(package_name(specifier));
    }

    let joined = normalize(&format!("{}/{}", parent_dir(from), specifier));
    let mut candidates = vec![joined.clone()];
    candidates.extend(SCRIPT_EXTENSIONS.iter().map(|ext| format!("{}{}", joined, ext)));
    candidates.extend(
        SCRIPT_EXTENSIONS
            .iter()
            .map(|ext| normalize(&format!("{}/index{}", joined, ext))),
    );
    first_known(candidates, files)
}

fn resolve_python(from: &str, specifier: &str, files: &BTreeSet<String>) -> Resolution {
    let dots = specifier.chars().take_while(|c| *c == '.').count();
    let module_path = specifier[dots..].replace('.', "/");

    if dots > 0 {
        let mut base = parent_dir(from).to_string();
        for _ in 1..dots {
            base = parent_dir(&base).to_string();
        }
        let stem = normalize(&format!("{}/{}", base, module_path));
        return first_known(python_candidates(&stem), files);
    }

    let mut candidates = python_candidates(&module_path);
    candidates.extend(python_candidates(&normalize(&format!(
        "{}/{}",
        parent_dir(from),
        module_path
    ))));
    match first_known(candidates, files) {
        Resolution::Unresolved => {
            Resolution::External(specifier.split('.').next().unwrap_or(specifier).to_string())
        }
        found => found,
    }
}

fn python_candidates(stem: &str) -> Vec<String> {
    if stem.is_empty() {
        return vec!["__init__.py".to_string()];
    }
    vec![format!("{}.py", stem), normalize(&format!("{}/__init__.py", stem))]
}

fn first_known(candidates: Vec<String>, files: &BTreeSet<String>) -> Resolution {
    candidates
        .into_iter()
        .find(|c| files.contains(c))
        .map(Resolution::Internal)
        .unwrap_or(Resolution::Unresolved)
}

fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match (parts.next(), parts.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') => format!("{}/{}", scope, name),
        (Some(first), _) => first.to_string(),
        _ => specifier.to_string(),
    }
}

fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn escape_label(text: &str) -> String {
    text.replace('"', "#quot;")
}

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
