//! JSON request/response template loading

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),

    #[error("failed to read JSON template '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load template '{name}' as JSON: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of named JSON templates
pub trait TemplateStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Value, TemplateError>;
}

/// Templates stored as files under a root directory
pub struct DirTemplateStore {
    root: PathBuf,
}

impl DirTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateStore for DirTemplateStore {
    fn load(&self, name: &str) -> Result<Value, TemplateError> {
        debug!("Loading template '{}' from '{}'", name, self.root.display());

        let path = self.root.join(name);
        let content = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TemplateError::NotFound(name.to_string())
            } else {
                TemplateError::Read {
                    name: name.to_string(),
                    source,
                }
            }
        })?;

        parse(name, &content)
    }
}

/// Templates held in memory, keyed by name
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<HashMap<String, String>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, template: &Value) {
        self.insert_raw(name, &template.to_string());
    }

    /// Store unparsed text, which may not be valid JSON
    pub fn insert_raw(&self, name: &str, content: &str) {
        if let Ok(mut templates) = self.templates.lock() {
            templates.insert(name.to_string(), content.to_string());
        }
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load(&self, name: &str) -> Result<Value, TemplateError> {
        let content = self
            .templates
            .lock()
            .ok()
            .and_then(|templates| templates.get(name).cloned())
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        parse(name, &content)
    }
}

fn parse(name: &str, content: &str) -> Result<Value, TemplateError> {
    serde_json::from_str(content).map_err(|source| TemplateError::Parse {
        name: name.to_string(),
        source,
    })
}
