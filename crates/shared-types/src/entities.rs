//! # Core Domain Entities
//!
//! Defines the deployment model shared by the DM and the agents.
//!
//! ## Clusters
//!
//! - **Hierarchy**: `Instance`, `InstancePath`, `InstanceStatus`
//! - **Types**: `Component`, `ImportedVariable`
//! - **Dependencies**: `Import`
//! - **Wire form**: `InstanceSnapshot`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::errors::ModelError;

/// Separator between instance names in a path.
pub const PATH_SEPARATOR: char = '/';

/// Key of the IP address in an instance's data bag.
pub const IP_ADDRESS_KEY: &str = "ip.address";

// =============================================================================
// CLUSTER A: THE HIERARCHY
// =============================================================================

/// Deployment status of an instance.
///
/// `Deploying`, `Starting`, `Stopping` and `Undeploying` are transitional:
/// each brackets exactly one plugin invocation. `Problem` is only ever set
/// by an external observer (the DM), never by the agent's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    NotDeployed,
    Deploying,
    DeployedStopped,
    Starting,
    DeployedStarted,
    Stopping,
    Undeploying,
    Problem,
}

impl InstanceStatus {
    /// All statuses, in declaration order.
    pub const ALL: [InstanceStatus; 8] = [
        InstanceStatus::NotDeployed,
        InstanceStatus::Deploying,
        InstanceStatus::DeployedStopped,
        InstanceStatus::Starting,
        InstanceStatus::DeployedStarted,
        InstanceStatus::Stopping,
        InstanceStatus::Undeploying,
        InstanceStatus::Problem,
    ];

    /// Whether this status brackets a plugin invocation.
    #[must_use]
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Deploying | Self::Starting | Self::Stopping | Self::Undeploying
        )
    }

    /// Whether an instance in this status can host deployed children.
    #[must_use]
    pub fn accepts_child_deployment(self) -> bool {
        matches!(self, Self::DeployedStarted | Self::DeployedStopped)
    }

    /// Wire name, e.g. `DEPLOYED_STARTED`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDeployed => "NOT_DEPLOYED",
            Self::Deploying => "DEPLOYING",
            Self::DeployedStopped => "DEPLOYED_STOPPED",
            Self::Starting => "STARTING",
            Self::DeployedStarted => "DEPLOYED_STARTED",
            Self::Stopping => "STOPPING",
            Self::Undeploying => "UNDEPLOYING",
            Self::Problem => "PROBLEM",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absolute path of an instance in its application, e.g. `/vm/tomcat/war`.
///
/// Paths are the arena keys of [`crate::tree::InstanceTree`]: children refer
/// to their parent through its path, never through a second owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstancePath(String);

impl InstancePath {
    /// Path of a root instance.
    pub fn root(name: &str) -> Result<Self, ModelError> {
        validate_name(name)?;
        Ok(Self(format!("{PATH_SEPARATOR}{name}")))
    }

    /// Parse an absolute path such as `/vm/server`.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let Some(rest) = raw.strip_prefix(PATH_SEPARATOR) else {
            return Err(ModelError::InvalidPath(raw.to_string()));
        };
        if rest.is_empty() || rest.split(PATH_SEPARATOR).any(str::is_empty) {
            return Err(ModelError::InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Path of a child of this instance.
    pub fn child(&self, name: &str) -> Result<Self, ModelError> {
        validate_name(name)?;
        Ok(Self(format!("{}{PATH_SEPARATOR}{name}", self.0)))
    }

    /// Path of the parent, `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let idx = self.0.rfind(PATH_SEPARATOR)?;
        (idx > 0).then(|| Self(self.0[..idx].to_string()))
    }

    /// Last segment of the path.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit(PATH_SEPARATOR).next().unwrap_or_default()
    }

    /// First segment of the path (the machine the instance lives on).
    #[must_use]
    pub fn root_name(&self) -> &str {
        self.0[1..].split(PATH_SEPARATOR).next().unwrap_or_default()
    }

    /// Path of the root instance of this path.
    #[must_use]
    pub fn root_path(&self) -> Self {
        Self(format!("{PATH_SEPARATOR}{}", self.root_name()))
    }

    /// Number of segments (a root has depth 1).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches(PATH_SEPARATOR).count()
    }

    /// Whether this path is a root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.depth() == 1
    }

    /// Whether `self` equals `ancestor` or lies beneath it.
    #[must_use]
    pub fn is_within(&self, ancestor: &InstancePath) -> bool {
        self == ancestor
            || (self.0.starts_with(&ancestor.0)
                && self.0[ancestor.0.len()..].starts_with(PATH_SEPARATOR))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstancePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_name(name: &str) -> Result<(), ModelError> {
    if name.is_empty() || name.contains(PATH_SEPARATOR) {
        return Err(ModelError::InvalidName(name.to_string()));
    }
    Ok(())
}

// =============================================================================
// CLUSTER B: COMPONENT TYPES
// =============================================================================

/// A variable a component requires from other instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedVariable {
    /// Fully-qualified name, `prefix.name` (or `prefix.*`).
    pub name: String,
    /// Optional imports do not block the start of the importer.
    #[serde(default)]
    pub optional: bool,
    /// Resolved from another application (inter-application dependency).
    #[serde(default)]
    pub external: bool,
}

impl ImportedVariable {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            external: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
            external: false,
        }
    }

    pub fn external(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            external: true,
        }
    }
}

/// Type descriptor of an instance, as compiled from the application graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Component {
    pub name: String,
    /// Selects the plugin that handles this component on the agent.
    pub installer_name: String,
    /// Exported variables (`prefix.name` -> default value).
    #[serde(default)]
    pub exported_variables: BTreeMap<String, Option<String>>,
    /// Imported variables, keyed by fully-qualified name.
    #[serde(default)]
    pub imported_variables: BTreeMap<String, ImportedVariable>,
    /// Facets this component inherits exports from.
    #[serde(default)]
    pub facets: BTreeSet<String>,
}

impl Component {
    pub fn new(name: impl Into<String>, installer_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            installer_name: installer_name.into(),
            ..Self::default()
        }
    }

    /// Builder: add an exported variable.
    #[must_use]
    pub fn exports(mut self, name: &str, default_value: Option<&str>) -> Self {
        self.exported_variables
            .insert(name.to_string(), default_value.map(str::to_string));
        self
    }

    /// Builder: add an imported variable.
    #[must_use]
    pub fn imports(mut self, variable: ImportedVariable) -> Self {
        self.imported_variables.insert(variable.name.clone(), variable);
        self
    }

    /// Builder: add a facet.
    #[must_use]
    pub fn with_facet(mut self, facet: &str) -> Self {
        self.facets.insert(facet.to_string());
        self
    }
}

// =============================================================================
// CLUSTER C: DEPENDENCIES
// =============================================================================

/// Variables received from an exporting instance.
///
/// Imports are not owned by the importer's dependency graph: they are looked
/// up by prefix each time the dependencies of an instance are evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    /// Path of the exporting instance.
    pub instance_path: String,
    /// Component or facet name the variables were exported under.
    pub component_name: String,
    pub exported_variables: BTreeMap<String, String>,
}

impl Import {
    pub fn new(
        instance_path: impl Into<String>,
        component_name: impl Into<String>,
        exported_variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            instance_path: instance_path.into(),
            component_name: component_name.into(),
            exported_variables,
        }
    }
}

/// One deployable node of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub path: InstancePath,
    pub status: InstanceStatus,
    /// Parent key in the owning tree; `None` for a root.
    pub parent: Option<InstancePath>,
    /// Children keys, in insertion order.
    pub children: Vec<InstancePath>,
    pub component: Component,
    /// Imports, keyed by component or facet prefix.
    pub imports: HashMap<String, Vec<Import>>,
    pub overridden_exports: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    pub channels: BTreeSet<String>,
}

impl Instance {
    pub fn new(path: InstancePath, component: Component) -> Self {
        Self {
            name: path.name().to_string(),
            parent: path.parent(),
            path,
            status: InstanceStatus::NotDeployed,
            children: Vec::new(),
            component,
            imports: HashMap::new(),
            overridden_exports: BTreeMap::new(),
            data: BTreeMap::new(),
            channels: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

// =============================================================================
// CLUSTER D: WIRE FORM
// =============================================================================

/// Serializable, recursive view of an instance subtree.
///
/// Used by model-synchronisation commands and by status queries that must
/// not touch the live tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub name: String,
    pub component: Component,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub overridden_exports: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub channels: BTreeSet<String>,
    #[serde(default)]
    pub children: Vec<InstanceSnapshot>,
}

impl InstanceSnapshot {
    pub fn new(name: impl Into<String>, component: Component) -> Self {
        Self {
            name: name.into(),
            component,
            status: InstanceStatus::NotDeployed,
            overridden_exports: BTreeMap::new(),
            data: BTreeMap::new(),
            channels: BTreeSet::new(),
            children: Vec::new(),
        }
    }

    /// Builder: append a child.
    #[must_use]
    pub fn with_child(mut self, child: InstanceSnapshot) -> Self {
        self.children.push(child);
        self
    }
}
