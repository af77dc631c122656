//! Process-wide configuration store.
//!
//! Clients read their settings from the store when they are built; nothing
//! consults it afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ConfigError, ConfigResult, OnecatConfig};

/// Named configuration sections plus a storage root.
pub trait ConfigStore: Send + Sync {
    /// The section stored under `name`.
    fn section(&self, name: &str) -> Option<Value>;

    /// Replaces the section stored under `name`.
    fn set_section(&self, name: &str, value: Value);

    /// Directory for persistent data.
    fn root_dir(&self) -> &Path;
}

/// Decodes the section `name` into `T`; `Ok(None)` when absent.
pub fn section_as<T: DeserializeOwned>(
    store: &dyn ConfigStore,
    name: &str,
) -> ConfigResult<Option<T>> {
    store
        .section(name)
        .map(|value| {
            serde_json::from_value(value)
                .map_err(|e| ConfigError::Parse(format!("section '{name}': {e}")))
        })
        .transpose()
}

/// [`ConfigStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    sections: RwLock<HashMap<String, Value>>,
    root_dir: PathBuf,
}

impl MemoryConfigStore {
    /// An empty store rooted at `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            sections: RwLock::new(HashMap::new()),
            root_dir: root_dir.into(),
        }
    }

    /// A store holding every top-level section of `config`. Extension
    /// sections are stored under their own names.
    pub fn from_config(config: &OnecatConfig) -> Self {
        let store = Self::new(config.storage.resolve_root());

        match serde_json::to_value(config) {
            Ok(Value::Object(map)) => {
                let mut sections = store.sections.write();
                for (name, value) in map {
                    if name != "extensions" {
                        sections.insert(name, value);
                    }
                }
                for (name, value) in &config.extensions {
                    if sections.contains_key(name) {
                        warn!(section = %name, "Extension shadows a built-in section, ignored");
                        continue;
                    }
                    sections.insert(name.clone(), value.clone());
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to snapshot configuration into the store"),
        }

        debug!(
            root = %store.root_dir.display(),
            sections = store.sections.read().len(),
            "Configuration store ready"
        );
        store
    }

    /// Section names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ConfigStore for MemoryConfigStore {
    fn section(&self, name: &str) -> Option<Value> {
        self.sections.read().get(name).cloned()
    }

    fn set_section(&self, name: &str, value: Value) {
        self.sections.write().insert(name.to_string(), value);
    }

    fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}
