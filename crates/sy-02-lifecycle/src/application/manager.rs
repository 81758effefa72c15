//! Lifecycle Manager
//!
//! Runs the transitions of the instances of one agent.
//!
//! ## Policy
//!
//! - Plugin failures are logged and rolled back; they never escape.
//! - Messaging failures are returned to the caller.
//! - Stop and undeploy walk the subtree leaves first; the plugin is only
//!   called on the top instance.
//! - Every status change is notified to the DM.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use shared_types::variables::{has_all_required_imports, missing_import_prefixes};
use shared_types::{Import, Instance, InstancePath, InstanceStatus, InstanceTree, Message, ResourceMap};
use sy_01_messaging::{AgentMessagingApi, ListenerCommand};

use crate::adapters::plugin_registry::PluginRegistry;
use crate::domain::errors::{LifecycleError, PluginError};
use crate::domain::transitions::{Transition, TransitionTable};
use crate::ports::inbound::LifecycleApi;
use crate::ports::outbound::{Plugin, ResourceStore};

/// Outcome of the plugin part of an operation.
type PluginOutcome = Result<(), PluginError>;

pub struct LifecycleManager {
    messaging: Arc<dyn AgentMessagingApi>,
    plugins: Arc<PluginRegistry>,
    resources: Arc<dyn ResourceStore>,
}

impl LifecycleManager {
    pub fn new(
        messaging: Arc<dyn AgentMessagingApi>,
        plugins: Arc<PluginRegistry>,
        resources: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            messaging,
            plugins,
            resources,
        }
    }

    #[must_use]
    pub fn messaging(&self) -> &Arc<dyn AgentMessagingApi> {
        &self.messaging
    }

    fn plugin_for(&self, instance: &Instance) -> Option<Arc<dyn Plugin>> {
        let plugin = self.plugins.find(&instance.component.installer_name);
        if plugin.is_none() {
            warn!(
                instance = %instance.path,
                installer = %instance.component.installer_name,
                "No plugin for this installer, transition runs without plugin"
            );
        }
        plugin
    }

    async fn set_status_and_notify(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        status: InstanceStatus,
    ) -> Result<(), LifecycleError> {
        tree.set_status(path, status)?;
        debug!(instance = %path, status = %status, "Status changed");
        self.messaging
            .send_message_to_the_dm(Message::NotifInstanceChanged {
                application: self.messaging.application(),
                instance_path: path.clone(),
                status,
            })
            .await?;
        Ok(())
    }

    // =========================================================================
    // DEPLOY
    // =========================================================================

    async fn deploy(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        resources: &ResourceMap,
    ) -> Result<(), LifecycleError> {
        if let Some(parent) = tree.parent_of(path) {
            if !parent.status.accepts_child_deployment() {
                warn!(
                    instance = %path,
                    parent_status = %parent.status,
                    "Deployment requested while the parent is not deployed, request dropped"
                );
                return Ok(());
            }
        }

        self.set_status_and_notify(tree, path, InstanceStatus::Deploying)
            .await?;
        let instance = tree.require(path)?.clone();

        match self.run_deploy(&instance, resources).await {
            Ok(()) => {
                self.set_status_and_notify(tree, path, InstanceStatus::DeployedStopped)
                    .await?;
                let instance = tree.require(path)?.clone();
                self.messaging
                    .listen_to_exports_from_other_agents(ListenerCommand::Start, &instance)
                    .await?;
                info!(instance = %path, "Instance deployed");
            }
            Err(e) => {
                error!(instance = %path, error = %e, "Deployment failed");
                self.set_status_and_notify(tree, path, InstanceStatus::NotDeployed)
                    .await?;
            }
        }
        Ok(())
    }

    async fn run_deploy(&self, instance: &Instance, resources: &ResourceMap) -> PluginOutcome {
        let application = self.messaging.application();
        let plugin_name = instance.component.installer_name.clone();
        self.resources
            .delete(&application, &instance.path)
            .and_then(|()| self.resources.store(&application, &instance.path, resources))
            .map_err(|e| PluginError::failed(plugin_name, "store resources", e.to_string()))?;

        if let Some(plugin) = self.plugin_for(instance) {
            plugin.initialize(instance).await?;
            plugin.deploy(instance).await?;
        }
        Ok(())
    }

    // =========================================================================
    // START
    // =========================================================================

    async fn start(&self, tree: &mut InstanceTree, path: &InstancePath) -> Result<(), LifecycleError> {
        self.set_status_and_notify(tree, path, InstanceStatus::Starting)
            .await?;
        let instance = tree.require(path)?.clone();

        if !has_all_required_imports(&instance) {
            debug!(
                instance = %path,
                missing = ?missing_import_prefixes(&instance),
                "Imports missing, instance waits in STARTING"
            );
            self.messaging
                .request_exports_from_other_agents(&instance)
                .await?;
            return Ok(());
        }

        if let Err(e) = self
            .evaluate_imports(tree, path, None, InstanceStatus::DeployedStarted)
            .await?
        {
            error!(instance = %path, error = %e, "Start failed");
            self.set_status_and_notify(tree, path, InstanceStatus::DeployedStopped)
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // IMPORTS
    // =========================================================================

    /// Evaluate one instance against its imports.
    ///
    /// The inner result is the plugin outcome of a start, for the caller to
    /// roll back. Children left in STARTING resume once their parent runs.
    async fn evaluate_imports(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        changed_import: Option<&Import>,
        changed_status: InstanceStatus,
    ) -> Result<PluginOutcome, LifecycleError> {
        let mut pending = vec![path.clone()];
        let mut first_outcome: PluginOutcome = Ok(());
        let mut first = true;

        while let Some(current) = pending.pop() {
            let import = if first { changed_import } else { None };
            let outcome = self
                .evaluate_one(tree, &current, import, changed_status, &mut pending)
                .await?;
            if first {
                first_outcome = outcome;
                first = false;
            } else if let Err(e) = outcome {
                error!(instance = %current, error = %e, "Resumed start failed");
            }
        }
        Ok(first_outcome)
    }

    async fn evaluate_one(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        changed_import: Option<&Import>,
        changed_status: InstanceStatus,
        resumable: &mut Vec<InstancePath>,
    ) -> Result<PluginOutcome, LifecycleError> {
        let instance = tree.require(path)?.clone();
        let plugin = self.plugin_for(&instance);

        if has_all_required_imports(&instance) {
            match instance.status {
                InstanceStatus::Starting => {
                    if let Some(plugin) = &plugin {
                        if let Err(e) = plugin.start(&instance).await {
                            return Ok(Err(e));
                        }
                    }
                    self.set_status_and_notify(tree, path, InstanceStatus::DeployedStarted)
                        .await?;
                    let instance = tree.require(path)?.clone();
                    self.messaging.publish_exports(&instance).await?;
                    self.messaging
                        .listen_to_requests_from_other_agents(ListenerCommand::Start, &instance)
                        .await?;
                    info!(instance = %path, "Instance started");

                    resumable.extend(
                        instance
                            .children
                            .iter()
                            .filter(|c| tree.status(c) == Some(InstanceStatus::Starting))
                            .cloned(),
                    );
                }
                InstanceStatus::DeployedStarted => {
                    if let Some(plugin) = &plugin {
                        if let Err(e) = plugin.update(&instance, changed_import, changed_status).await {
                            error!(instance = %path, error = %e, "Update failed");
                        }
                    }
                }
                other => {
                    debug!(instance = %path, status = %other, "Imports complete, nothing to do");
                }
            }
        } else if instance.status == InstanceStatus::DeployedStarted {
            info!(
                instance = %path,
                missing = ?missing_import_prefixes(&instance),
                "Required import lost, stopping subtree"
            );
            self.stop(tree, path, true).await?;
        }
        Ok(Ok(()))
    }

    // =========================================================================
    // STOP
    // =========================================================================

    async fn stop(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        import_changed: bool,
    ) -> Result<(), LifecycleError> {
        let mut subtree = tree.hierarchical_list(path)?;
        subtree.reverse();
        let top_was_started = tree.status(path) == Some(InstanceStatus::DeployedStarted);

        for current in &subtree {
            if matches!(
                tree.status(current),
                Some(InstanceStatus::Starting | InstanceStatus::DeployedStarted)
            ) {
                self.set_status_and_notify(tree, current, InstanceStatus::Stopping)
                    .await?;
                let instance = tree.require(current)?.clone();
                self.messaging
                    .listen_to_requests_from_other_agents(ListenerCommand::Stop, &instance)
                    .await?;
                self.messaging.unpublish_exports(&instance).await?;
            }
        }

        if top_was_started {
            let instance = tree.require(path)?.clone();
            if let Some(plugin) = self.plugin_for(&instance) {
                if let Err(e) = plugin.stop(&instance).await {
                    error!(instance = %path, error = %e, "Stop failed, cleaning up anyway");
                }
            }
        }

        let final_status = if import_changed {
            InstanceStatus::Starting
        } else {
            InstanceStatus::DeployedStopped
        };
        for current in &subtree {
            if tree.status(current) == Some(InstanceStatus::Stopping) {
                self.set_status_and_notify(tree, current, final_status)
                    .await?;
            }
        }
        info!(instance = %path, import_changed, "Subtree stopped");
        Ok(())
    }

    // =========================================================================
    // UNDEPLOY
    // =========================================================================

    async fn undeploy(&self, tree: &mut InstanceTree, path: &InstancePath) -> Result<(), LifecycleError> {
        let mut subtree = tree.hierarchical_list(path)?;
        subtree.reverse();
        subtree.retain(|p| tree.status(p) != Some(InstanceStatus::NotDeployed));

        for current in &subtree {
            self.set_status_and_notify(tree, current, InstanceStatus::Undeploying)
                .await?;
            let instance = tree.require(current)?.clone();
            self.messaging.unpublish_exports(&instance).await?;
        }

        let top = tree.require(path)?.clone();
        if let Some(plugin) = self.plugin_for(&top) {
            if let Err(e) = plugin.undeploy(&top).await {
                error!(instance = %path, error = %e, "Undeploy failed, cleaning up anyway");
            }
        }

        let application = self.messaging.application();
        for current in &subtree {
            if let Err(e) = self.resources.delete(&application, current) {
                error!(instance = %current, error = %e, "Could not delete instance resources");
            }
            if let Some(instance) = tree.get_mut(current) {
                instance.imports.clear();
            }
            self.set_status_and_notify(tree, current, InstanceStatus::NotDeployed)
                .await?;
            let instance = tree.require(current)?.clone();
            self.messaging
                .listen_to_requests_from_other_agents(ListenerCommand::Stop, &instance)
                .await?;
            self.messaging
                .listen_to_exports_from_other_agents(ListenerCommand::Stop, &instance)
                .await?;
        }
        info!(instance = %path, "Subtree undeployed");
        Ok(())
    }
}

#[async_trait]
impl LifecycleApi for LifecycleManager {
    async fn change_instance_state(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        requested: InstanceStatus,
        resources: &ResourceMap,
    ) -> Result<(), LifecycleError> {
        let current = tree.require(path)?.status;
        let Some(transition) = TransitionTable::lookup(current, requested) else {
            debug!(instance = %path, current = %current, requested = %requested, "Unreachable status, request ignored");
            return Ok(());
        };

        info!(instance = %path, transition = %transition, "Running transition");
        match transition {
            Transition::Deploy => self.deploy(tree, path, resources).await,
            Transition::Start => self.start(tree, path).await,
            Transition::Stop => self.stop(tree, path, false).await,
            Transition::Undeploy => self.undeploy(tree, path).await,
        }
    }

    async fn update_state_from_imports(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        changed_import: Option<&Import>,
        changed_status: InstanceStatus,
    ) -> Result<(), LifecycleError> {
        if let Err(e) = self
            .evaluate_imports(tree, path, changed_import, changed_status)
            .await?
        {
            error!(instance = %path, error = %e, "Start after import change failed");
        }
        Ok(())
    }

    async fn stop_subtree(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        import_changed: bool,
    ) -> Result<(), LifecycleError> {
        self.stop(tree, path, import_changed).await
    }
}
