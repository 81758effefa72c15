//! JSON application model.
//!
//! ```json
//! {
//!   "name": "lamp",
//!   "externalExports": { "Tomcat.port": "Lamp.port" },
//!   "roots": [ { "name": "vm", "component": { "name": "VM", "installer_name": "logger" } } ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use shared_types::{InstanceSnapshot, InstanceTree, ModelError};

/// One application: its root instances and the variables it exports to
/// other applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationModel {
    pub name: String,
    /// Internal variable name -> external alias.
    #[serde(default)]
    pub external_exports: BTreeMap<String, String>,
    pub roots: Vec<InstanceSnapshot>,
}

impl ApplicationModel {
    pub fn from_json(raw: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(raw).context("Invalid application model")?;
        model.tree().context("Invalid instance hierarchy")?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Build the instance tree of the whole application.
    pub fn tree(&self) -> Result<InstanceTree, ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidName(self.name.clone()));
        }
        let mut tree = InstanceTree::new();
        for root in &self.roots {
            tree.insert_snapshot(None, root)?;
        }
        Ok(tree)
    }

    /// Names of the root instances, i.e. of the machines.
    #[must_use]
    pub fn root_names(&self) -> Vec<String> {
        self.roots.iter().map(|r| r.name.clone()).collect()
    }
}
