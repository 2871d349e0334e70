//! Custom function plugins
//!
//! Plugins are TOML files in the plugins directory whose name ends with
//! `custom_functions.toml`:
//!
//! ```toml
//! [functions.ticket_id]
//! template = "INC-{{ticket.id}}"
//!
//! [functions.notify_owner]
//! command = "/usr/local/orca/plugins/notify.sh"
//! args = ["--quiet"]
//! ```
//!
//! Files load in name order and a name defined by an earlier file wins.

mod function;

pub use function::{PluginFunction, PluginFunctionSpec, PluginKind};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use glob::MatchOptions;
use serde::Deserialize;
use tracing::{debug, info, warn};

const PLUGIN_FILE_PATTERN: &str = "*custom_functions.toml";

#[derive(Debug, Deserialize)]
struct PluginFile {
    #[serde(default)]
    functions: BTreeMap<String, PluginFunctionSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    functions: BTreeMap<String, Arc<PluginFunction>>,
    files: Vec<PathBuf>,
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every plugin file found in `dir`
    ///
    /// A missing directory yields an empty registry. Files that fail to parse
    /// are logged and skipped.
    pub fn discover(dir: &Path) -> Self {
        let mut registry = Self::empty();

        if !dir.is_dir() {
            info!("No plugins directory was found at {}", dir.display());
            return registry;
        }

        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            PLUGIN_FILE_PATTERN
        );
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::default()
        };

        let mut paths: Vec<PathBuf> = match glob::glob_with(&pattern, options) {
            Ok(entries) => entries.filter_map(std::result::Result::ok).collect(),
            Err(e) => {
                warn!("Invalid plugin search pattern {}: {}", pattern, e);
                return registry;
            }
        };
        paths.sort();

        for path in paths {
            if let Err(e) = registry.load_file(&path) {
                warn!("Failed to load plugin {}: {:#}", path.display(), e);
            }
        }

        info!(
            "Imported plugins: {:?} ({} functions)",
            registry.files,
            registry.functions.len()
        );
        registry
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plugin file: {}", path.display()))?;
        let file: PluginFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse plugin file: {}", path.display()))?;

        let mut parsed = Vec::with_capacity(file.functions.len());
        for (name, spec) in file.functions {
            parsed.push(PluginFunction::from_spec(&name, spec, path)?);
        }

        for function in parsed {
            let key = function.name.to_lowercase();
            if let Some(existing) = self.functions.get(&key) {
                debug!(
                    "Function '{}' from {} already defined by {}",
                    function.name,
                    path.display(),
                    existing.source.display()
                );
                continue;
            }
            self.functions.insert(key, Arc::new(function));
        }
        self.files.push(path.to_path_buf());
        Ok(())
    }

    pub fn functions(&self) -> impl Iterator<Item = (&String, &Arc<PluginFunction>)> {
        self.functions.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PluginFunction>> {
        self.functions.get(&name.to_lowercase())
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_is_empty() {
        let registry = PluginRegistry::discover(Path::new("/nonexistent/orca/plugins"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_discover_matches_name_case_insensitively() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("site_Custom_Functions.toml"),
            "[functions.ticket_id]\ntemplate = \"PLUGIN\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("notes.toml"),
            "[functions.ignored]\ntemplate = \"x\"\n",
        )
        .unwrap();

        let registry = PluginRegistry::discover(dir.path());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("TICKET_ID").is_some());
        assert!(registry.get("ignored").is_none());
    }

    #[test]
    fn test_earlier_file_wins_and_bad_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a_custom_functions.toml"),
            "[functions.greet]\ntemplate = \"from a\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b_custom_functions.toml"),
            "[functions.greet]\ntemplate = \"from b\"\n[functions.other]\ntemplate = \"b\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("c_custom_functions.toml"), "not = [valid").unwrap();

        let registry = PluginRegistry::discover(dir.path());
        let greet = registry.get("greet").unwrap();
        assert!(greet.source.ends_with("a_custom_functions.toml"));
        assert!(registry.get("other").is_some());
        assert_eq!(registry.files().len(), 2);
    }

    #[test]
    fn test_plugin_shadows_builtin_placeholder() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("custom_functions.toml"),
            "[functions.ticket_id]\ntemplate = \"PLUGIN\"\n",
        )
        .unwrap();

        let plugins = PluginRegistry::discover(dir.path());
        let registry = FunctionRegistry::placeholders(&plugins);
        assert!(registry.get("ticket_id").unwrap().is_plugin());
        assert!(!registry.get("ticket_subject").unwrap().is_plugin());
    }
}
