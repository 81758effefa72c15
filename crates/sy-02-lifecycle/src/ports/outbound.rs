//! Outbound Ports (Driven Ports / SPI)

use async_trait::async_trait;
use std::path::PathBuf;

use shared_types::{Import, Instance, InstancePath, InstanceStatus, ResourceMap};

use crate::domain::errors::{PluginError, ResourceError};

/// Component-specific actions on a machine.
///
/// Every method brackets exactly one transitional status. Failures are
/// values, never panics.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Installer name this plugin handles.
    fn name(&self) -> &str;

    async fn initialize(&self, instance: &Instance) -> Result<(), PluginError>;

    async fn deploy(&self, instance: &Instance) -> Result<(), PluginError>;

    async fn start(&self, instance: &Instance) -> Result<(), PluginError>;

    /// An import of a running instance changed.
    ///
    /// `changed_status` is the status of the exporting instance: started for
    /// a new or updated import, stopped for a removed one.
    async fn update(
        &self,
        instance: &Instance,
        changed_import: Option<&Import>,
        changed_status: InstanceStatus,
    ) -> Result<(), PluginError>;

    async fn stop(&self, instance: &Instance) -> Result<(), PluginError>;

    async fn undeploy(&self, instance: &Instance) -> Result<(), PluginError>;
}

/// On-disk resources shipped with a first deployment.
pub trait ResourceStore: Send + Sync {
    /// Remove everything stored for an instance. Missing data is not an error.
    fn delete(&self, application: &str, instance: &InstancePath) -> Result<(), ResourceError>;

    /// Write the resources of an instance.
    fn store(
        &self,
        application: &str,
        instance: &InstancePath,
        resources: &ResourceMap,
    ) -> Result<(), ResourceError>;

    /// Directory holding an instance's resources.
    fn location(&self, application: &str, instance: &InstancePath) -> PathBuf;
}
