//! Plugin decorator counting failures per operation.

use async_trait::async_trait;
use std::sync::Arc;

use shared_types::{Import, Instance, InstanceStatus};
use stackyard_telemetry::record_plugin_failure;
use sy_02_lifecycle::{Plugin, PluginError};

/// Wraps a plugin and records every failure in the node metrics.
pub struct MeteredPlugin {
    inner: Arc<dyn Plugin>,
}

impl MeteredPlugin {
    pub fn new(inner: Arc<dyn Plugin>) -> Self {
        Self { inner }
    }
}

fn observe(operation: &str, result: Result<(), PluginError>) -> Result<(), PluginError> {
    if result.is_err() {
        record_plugin_failure(operation);
    }
    result
}

#[async_trait]
impl Plugin for MeteredPlugin {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn initialize(&self, instance: &Instance) -> Result<(), PluginError> {
        observe("initialize", self.inner.initialize(instance).await)
    }

    async fn deploy(&self, instance: &Instance) -> Result<(), PluginError> {
        observe("deploy", self.inner.deploy(instance).await)
    }

    async fn start(&self, instance: &Instance) -> Result<(), PluginError> {
        observe("start", self.inner.start(instance).await)
    }

    async fn update(
        &self,
        instance: &Instance,
        changed_import: Option<&Import>,
        changed_status: InstanceStatus,
    ) -> Result<(), PluginError> {
        observe(
            "update",
            self.inner
                .update(instance, changed_import, changed_status)
                .await,
        )
    }

    async fn stop(&self, instance: &Instance) -> Result<(), PluginError> {
        observe("stop", self.inner.stop(instance).await)
    }

    async fn undeploy(&self, instance: &Instance) -> Result<(), PluginError> {
        observe("undeploy", self.inner.undeploy(instance).await)
    }
}
