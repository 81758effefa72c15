//! Plugin that only logs what it is asked to do.
//!
//! Handy for components with nothing to install, and for dry runs.

use async_trait::async_trait;
use tracing::info;

use shared_types::{Import, Instance, InstanceStatus};

use crate::domain::errors::PluginError;
use crate::ports::outbound::Plugin;

/// Installer name of the logging plugin.
pub const LOGGING_PLUGIN_NAME: &str = "logger";

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlugin;

impl LoggingPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        LOGGING_PLUGIN_NAME
    }

    async fn initialize(&self, instance: &Instance) -> Result<(), PluginError> {
        info!(instance = %instance.path, "[logger] initialize");
        Ok(())
    }

    async fn deploy(&self, instance: &Instance) -> Result<(), PluginError> {
        info!(instance = %instance.path, "[logger] deploy");
        Ok(())
    }

    async fn start(&self, instance: &Instance) -> Result<(), PluginError> {
        info!(instance = %instance.path, "[logger] start");
        Ok(())
    }

    async fn update(
        &self,
        instance: &Instance,
        changed_import: Option<&Import>,
        changed_status: InstanceStatus,
    ) -> Result<(), PluginError> {
        info!(
            instance = %instance.path,
            exporter = changed_import.map(|i| i.instance_path.as_str()).unwrap_or("-"),
            status = %changed_status,
            "[logger] update"
        );
        Ok(())
    }

    async fn stop(&self, instance: &Instance) -> Result<(), PluginError> {
        info!(instance = %instance.path, "[logger] stop");
        Ok(())
    }

    async fn undeploy(&self, instance: &Instance) -> Result<(), PluginError> {
        info!(instance = %instance.path, "[logger] undeploy");
        Ok(())
    }
}
