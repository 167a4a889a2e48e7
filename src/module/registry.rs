//! Module registry
//!
//! Loaded once at startup and then shared read-only (usually behind an
//! `Arc`) by every agent thread.

use super::{Module, ModuleError};
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to walk module directory: {0}")]
    Walk(#[from] ignore::Error),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to load {}: {source}", .path.display())]
    Module {
        path: PathBuf,
        source: ModuleError,
    },
}

/// All modules known to the process, keyed by root-relative path.
#[derive(Debug, Default)]
pub struct Registry {
    modules: HashMap<String, Module>,
    /// Top-level keys in a stable order.
    top_level: Vec<String>,
}

impl Registry {
    /// Load every `*.json` definition below `root`.
    ///
    /// Files directly in `root` are top-level modules; files in any
    /// subdirectory are submodules. Any unreadable or invalid file fails the
    /// whole load.
    pub fn load_all(root: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(RegistryError::NotADirectory(root.to_path_buf()));
        }

        let mut modules = Vec::new();
        let walker = WalkBuilder::new(root)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            if !is_json || !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = module_key(relative);
            let submodule = relative.components().count() > 1;

            let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let module = Module::from_json(&key, &text, submodule).map_err(|source| {
                RegistryError::Module {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            tracing::debug!(path = %path.display(), key = %key, submodule, "Loaded module");
            modules.push(module);
        }

        let registry = Self::from_modules(modules);
        registry.log_warnings();
        tracing::info!(
            modules = registry.top_level.len(),
            submodules = registry.len() - registry.top_level.len(),
            root = %root.display(),
            "Loaded module registry"
        );
        Ok(registry)
    }

    /// Build a registry from modules constructed elsewhere.
    pub fn from_modules(modules: impl IntoIterator<Item = Module>) -> Self {
        let modules: HashMap<String, Module> = modules
            .into_iter()
            .map(|m| (m.key().to_string(), m))
            .collect();
        let mut top_level: Vec<String> = modules
            .values()
            .filter(|m| !m.is_submodule())
            .map(|m| m.key().to_string())
            .collect();
        top_level.sort();
        Self { modules, top_level }
    }

    pub fn lookup(&self, path: &str) -> Option<&Module> {
        self.modules.get(path)
    }

    /// Non-submodule modules in key order; the same order on every run.
    pub fn top_level_modules(&self) -> impl Iterator<Item = &Module> {
        self.top_level.iter().filter_map(|key| self.modules.get(key))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// `(module, state, target)` for every CallSubmodule whose target is not loaded.
    pub fn unknown_submodules(&self) -> Vec<(&str, &str, &str)> {
        let mut missing: Vec<(&str, &str, &str)> = self
            .modules
            .values()
            .flat_map(|m| {
                m.submodule_calls()
                    .into_iter()
                    .map(move |(state, target)| (m.key(), state, target))
            })
            .filter(|(_, _, target)| !self.modules.contains_key(*target))
            .collect();
        missing.sort_unstable();
        missing
    }

    fn log_warnings(&self) {
        let mut keys: Vec<&String> = self.modules.keys().collect();
        keys.sort();
        for key in keys {
            let module = &self.modules[key];
            let unreachable = module.unreachable_states();
            if !unreachable.is_empty() {
                tracing::warn!(module = %key, states = ?unreachable, "Module has unreachable states");
            }
        }
        for (module, state, target) in self.unknown_submodules() {
            tracing::warn!(module, state, submodule = target, "CallSubmodule targets an unknown module");
        }
    }
}

/// `medications/statin.json` -> `medications/statin`, on every platform.
fn module_key(relative: &Path) -> String {
    let stem = relative.with_extension("");
    stem.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
