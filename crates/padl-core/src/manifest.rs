//! Pattern manifests and directory discovery.
//!
//! Each subdirectory of the patterns directory holding a `pattern.toml`
//! describes one launchable pattern: its executable, default isolation
//! level, and extra environment.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::parse_isolation_or_default;
use crate::error::{Error, Result};
use crate::types::IsolationLevel;

/// Parsed `pattern.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternManifest {
    pub name: String,
    pub version: String,
    /// Executable path, relative to the pattern directory, or a bare name
    /// resolved on `$PATH`.
    pub executable: String,
    /// Default isolation level for this pattern; launch requests may
    /// override it.
    #[serde(default)]
    pub isolation: Option<String>,
    /// Extra environment for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl PatternManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let manifest: PatternManifest = toml::from_str(&raw).map_err(|e| Error::Manifest {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if manifest.name.is_empty() {
            return Err(Error::Manifest {
                name: path.display().to_string(),
                reason: "name must not be empty".into(),
            });
        }
        if manifest.executable.is_empty() {
            return Err(Error::Manifest {
                name: manifest.name,
                reason: "executable must not be empty".into(),
            });
        }
        Ok(manifest)
    }

    /// Default isolation level declared in the manifest, if any.
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation.as_deref().map(parse_isolation_or_default)
    }
}

/// A discovered pattern: its manifest plus the directory it lives in.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub manifest: PatternManifest,
    pub dir: PathBuf,
}

impl PatternEntry {
    /// Resolve the executable: relative to the pattern directory first,
    /// falling back to `$PATH` for bare names.
    pub fn executable_path(&self) -> Result<PathBuf> {
        let candidate = self.dir.join(&self.manifest.executable);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !self.manifest.executable.contains(std::path::MAIN_SEPARATOR) {
            if let Ok(found) = which::which(&self.manifest.executable) {
                return Ok(found);
            }
        }
        Err(Error::BinaryMissing(format!(
            "{} (pattern {})",
            self.manifest.executable, self.manifest.name
        )))
    }
}

/// Registry of discovered patterns, keyed by pattern name.
#[derive(Debug)]
pub struct PatternRegistry {
    directory: PathBuf,
    patterns: RwLock<HashMap<String, PatternEntry>>,
}

impl PatternRegistry {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            patterns: RwLock::new(HashMap::new()),
        }
    }

    /// Scan the patterns directory and load all manifests. Directories
    /// without a `pattern.toml` are skipped; unparseable manifests are
    /// logged and skipped.
    pub fn discover(&self) -> Result<usize> {
        if !self.directory.is_dir() {
            return Err(Error::PatternsDirNotFound(
                self.directory.display().to_string(),
            ));
        }

        let mut discovered = HashMap::new();
        let mut failed = 0usize;

        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }

            let manifest_path = entry.path().join("pattern.toml");
            if !manifest_path.is_file() {
                debug!(dir = %entry.path().display(), "no pattern.toml, skipping");
                continue;
            }

            match PatternManifest::load(&manifest_path) {
                Ok(manifest) => {
                    info!(
                        pattern = %manifest.name,
                        version = %manifest.version,
                        "discovered pattern"
                    );
                    discovered.insert(
                        manifest.name.clone(),
                        PatternEntry {
                            manifest,
                            dir: entry.path(),
                        },
                    );
                }
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "failed to load manifest");
                    failed += 1;
                }
            }
        }

        let count = discovered.len();
        info!(discovered = count, failed = failed, "pattern discovery complete");

        let mut patterns = self.patterns.write().expect("registry lock poisoned");
        *patterns = discovered;
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<PatternEntry> {
        let patterns = self.patterns.read().expect("registry lock poisoned");
        patterns.get(name).cloned()
    }

    pub fn count(&self) -> usize {
        let patterns = self.patterns.read().expect("registry lock poisoned");
        patterns.len()
    }

    pub fn names(&self) -> Vec<String> {
        let patterns = self.patterns.read().expect("registry lock poisoned");
        let mut names: Vec<String> = patterns.keys().cloned().collect();
        names.sort();
        names
    }
}
