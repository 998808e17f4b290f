//! Configuration for the scan service.
//!
//! Settings are layered: `coderef-scan.toml` in the working directory, then
//! environment variables, then CLI flags (applied by the commands).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev = false
//!
//! [scaffold]
//! script = "scripts/setup_coderef_dirs.py"
//! interpreter = "python3"
//!
//! [scan]
//! extensions = ["py", "ts", "tsx", "js", "jsx"]
//! exclude = ["**/node_modules/**"]
//! recursive = true
//!
//! [registry]
//! retention_secs = 3600
//! evict_cancelled = true
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::artifacts::FsArtifactGenerator;
use crate::orchestrator::Phases;
use crate::phases::{GeneratePhase, ScaffoldPhase, ScanPhase};
use crate::registry::EvictionPolicy;
use crate::scanner::{DEFAULT_EXCLUDES, DEFAULT_EXTENSIONS, FsScanner, ScanOptions};
use crate::subprocess::InterpreterResolver;

pub const CONFIG_FILE: &str = "coderef-scan.toml";
pub const SCAFFOLD_SCRIPT_ENV: &str = "CODEREF_SCAFFOLD_SCRIPT";
pub const RETENTION_ENV: &str = "CODEREF_RETENTION_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for local front-end development.
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaffoldSection {
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// Interpreter used for the script. Probed when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

fn default_script() -> PathBuf {
    PathBuf::from("scripts/setup_coderef_dirs.py")
}

impl Default for ScaffoldSection {
    fn default() -> Self {
        Self {
            script: default_script(),
            interpreter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSection {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_exclude() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

fn default_recursive() -> bool {
    true
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude: default_exclude(),
            recursive: default_recursive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySection {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_evict_cancelled")]
    pub evict_cancelled: bool,
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_evict_cancelled() -> bool {
    true
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            evict_cancelled: default_evict_cancelled(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub scaffold: ScaffoldSection,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub registry: RegistrySection,
}

impl ScanConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| format!("Failed to parse {}", CONFIG_FILE))
    }

    /// Load `coderef-scan.toml` from `dir`, or defaults when it is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| format!("Failed to serialize {}", CONFIG_FILE))?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Layer the process environment over the file settings.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Layer values from `lookup` over the file settings. Unparseable
    /// numbers are ignored. `CODEREF_PYTHON` is not frozen here: the
    /// interpreter resolver reads it on every scaffold run.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(script) = lookup(SCAFFOLD_SCRIPT_ENV).filter(|v| !v.trim().is_empty()) {
            self.scaffold.script = PathBuf::from(script);
        }
        if let Some(secs) = lookup(RETENTION_ENV).and_then(|v| v.trim().parse().ok()) {
            self.registry.retention_secs = secs;
        }
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn interpreter_resolver(&self) -> InterpreterResolver {
        InterpreterResolver::platform_default().with_override(self.scaffold.interpreter.clone())
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            retention: Duration::from_secs(self.registry.retention_secs),
            evict_cancelled: self.registry.evict_cancelled,
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            recursive: self.scan.recursive,
            exclude: self.scan.exclude.clone(),
        }
    }

    /// Phase executors backed by the bundled scanner and artifact writer.
    pub fn phases(&self) -> Phases {
        Phases {
            scaffold: ScaffoldPhase::new(self.scaffold.script.clone(), self.interpreter_resolver()),
            scan: ScanPhase::new(Arc::new(FsScanner::new()))
                .with_extensions(self.scan.extensions.clone())
                .with_options(self.scan_options()),
            generate: GeneratePhase::new(Arc::new(FsArtifactGenerator::new())),
        }
    }

    /// Problems worth reporting to the operator. Empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.scan.extensions.is_empty() {
            errors.push("scan.extensions must list at least one extension".to_string());
        }
        for pattern in &self.scan.exclude {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(format!("scan.exclude pattern '{}' is invalid: {}", pattern, e));
            }
        }
        if self.registry.retention_secs == 0 {
            errors.push("registry.retention_secs must be greater than zero".to_string());
        }
        errors
    }
}
