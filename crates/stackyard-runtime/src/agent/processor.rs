//! # Agent Message Processor
//!
//! The single consumer of an agent's queue. It owns the agent's instance
//! tree: every DM command and every import message is applied here, in
//! arrival order, so no two transitions ever overlap.
//!
//! ## Local imports
//!
//! The routing layer does not hand an agent its own publications back.
//! Dependencies between instances of the same machine are resolved here,
//! after each message, until nothing changes.

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use shared_bus::DeliveryStats;
use shared_types::variables::{
    add_import, build_tailored_import, exported_prefixes, exported_variables, imported_prefixes,
    imports_with_prefix, remove_import,
};
use shared_types::{
    Envelope, Import, InstancePath, InstanceSnapshot, InstanceStatus, InstanceTree, Message, ResourceMap,
};
use stackyard_telemetry::{record_message_received, record_transition};
use sy_01_messaging::{AgentMessagingApi, ListenerCommand};
use sy_02_lifecycle::{LifecycleApi, TransitionTable};

/// Whether an instance in this status listens to the exports of others.
fn listens_to_exports(status: InstanceStatus) -> bool {
    matches!(
        status,
        InstanceStatus::DeployedStopped
            | InstanceStatus::Starting
            | InstanceStatus::DeployedStarted
            | InstanceStatus::Stopping
    )
}

// =============================================================================
// STATUS VIEW
// =============================================================================

#[derive(Debug, Default)]
struct ViewState {
    statuses: BTreeMap<InstancePath, InstanceStatus>,
    processed: u64,
}

/// Read-only view of an agent's statuses, refreshed after every message.
#[derive(Debug, Clone, Default)]
pub struct AgentView {
    inner: Arc<RwLock<ViewState>>,
}

impl AgentView {
    #[must_use]
    pub fn status(&self, path: &InstancePath) -> Option<InstanceStatus> {
        self.inner.read().statuses.get(path).copied()
    }

    #[must_use]
    pub fn statuses(&self) -> BTreeMap<InstancePath, InstanceStatus> {
        self.inner.read().statuses.clone()
    }

    /// Number of messages processed so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.inner.read().processed
    }

    fn refresh(&self, tree: &InstanceTree) {
        let mut state = self.inner.write();
        state.statuses = tree.statuses().into_iter().collect();
        state.processed += 1;
    }
}

// =============================================================================
// PROCESSOR
// =============================================================================

pub struct AgentProcessor {
    messaging: Arc<dyn AgentMessagingApi>,
    lifecycle: Arc<dyn LifecycleApi>,
    tree: InstanceTree,
    stats: Arc<DeliveryStats>,
    view: AgentView,
    ip_address: Option<String>,
    log_dir: Option<PathBuf>,
}

impl AgentProcessor {
    pub fn new(
        messaging: Arc<dyn AgentMessagingApi>,
        lifecycle: Arc<dyn LifecycleApi>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            messaging,
            lifecycle,
            tree: InstanceTree::new(),
            stats,
            view: AgentView::default(),
            ip_address: None,
            log_dir: None,
        }
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    #[must_use]
    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    #[must_use]
    pub fn view(&self) -> AgentView {
        self.view.clone()
    }

    #[must_use]
    pub fn tree(&self) -> &InstanceTree {
        &self.tree
    }

    /// Drain the queue until it closes or shutdown is signalled.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Envelope>, mut shutdown: watch::Receiver<bool>) {
        let root = self.messaging.root_instance();
        info!(root = %root, "[Agent] Processor started");

        loop {
            tokio::select! {
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => {
                        warn!(root = %root, "[Agent] Queue closed, processor stopping");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(root = %root, "[Agent] Processor stopped");
    }

    /// Process one delivered envelope. Delivery was already counted by the
    /// queue; only processing failures are recorded here.
    pub async fn handle(&mut self, envelope: Envelope) {
        let kind = envelope.message.kind();
        record_message_received(kind);
        debug!(kind, topic = %envelope.topic, sender = %envelope.sender, "[Agent] Message received");

        if let Err(e) = self.process(envelope.message).await {
            self.stats.record_failed_reception();
            error!(kind, error = %format!("{e:#}"), "[Agent] Message processing failed");
        }
        self.view.refresh(&self.tree);
    }

    pub async fn process(&mut self, message: Message) -> Result<()> {
        match message {
            Message::CmdSetScopedInstance { root, external_exports } => {
                self.set_scoped_instance(root, external_exports).await?;
            }
            Message::CmdAddInstance { parent_path, instance } => {
                self.add_instance(&parent_path, &instance).await?;
            }
            Message::CmdRemoveInstance { instance_path } => {
                self.remove_instance(&instance_path).await?;
            }
            Message::CmdChangeInstanceState {
                instance_path,
                new_status,
                resources,
            } => {
                self.change_state(&instance_path, new_status, &resources).await?;
            }
            Message::CmdSendInstances => self.send_all_statuses().await?,
            Message::CmdGatherLogs => self.send_logs().await?,
            Message::CmdAddImport {
                application,
                prefix,
                exporting_path,
                exported_variables,
            } => {
                debug!(from = %application, prefix = %prefix, exporter = %exporting_path, "[Agent] Import added");
                self.import_added(&prefix, &exporting_path, &exported_variables)
                    .await?;
            }
            Message::CmdRemoveImport {
                application,
                prefix,
                exporting_path,
            } => {
                debug!(from = %application, prefix = %prefix, exporter = %exporting_path, "[Agent] Import removed");
                self.import_removed(&prefix, &exporting_path).await?;
            }
            Message::CmdRequestImport { application, prefix } => {
                debug!(from = %application, prefix = %prefix, "[Agent] Exports requested");
                self.exports_requested(&prefix).await?;
            }
            Message::Echo { id, content } => {
                self.messaging
                    .send_message_to_the_dm(Message::Echo { id, content })
                    .await?;
            }
            other => {
                warn!(kind = other.kind(), "[Agent] Unexpected message, dropped");
            }
        }
        Ok(())
    }

    // =========================================================================
    // MODEL
    // =========================================================================

    async fn set_scoped_instance(
        &mut self,
        root: InstanceSnapshot,
        external_exports: BTreeMap<String, String>,
    ) -> Result<()> {
        let expected = self.messaging.root_instance();
        if root.name != expected {
            bail!("model for machine {} sent to machine {}", root.name, expected);
        }

        let mut tree = InstanceTree::new();
        let root_path = tree.insert_snapshot(None, &root)?;
        if let Some(ip) = &self.ip_address {
            tree.set_ip_address(&root_path, ip)?;
        }

        for instance in self.tree.instances() {
            if instance.status != InstanceStatus::NotDeployed {
                self.messaging
                    .listen_to_requests_from_other_agents(ListenerCommand::Stop, instance)
                    .await?;
                self.messaging
                    .listen_to_exports_from_other_agents(ListenerCommand::Stop, instance)
                    .await?;
            }
        }

        self.messaging.set_external_exports(external_exports);
        self.tree = tree;
        info!(root = %root_path, instances = self.tree.len(), "[Agent] Model received");

        for path in self.tree.hierarchical_list(&root_path)? {
            let instance = self.tree.require(&path)?.clone();
            if listens_to_exports(instance.status) {
                self.messaging
                    .listen_to_exports_from_other_agents(ListenerCommand::Start, &instance)
                    .await?;
            }
            if instance.status == InstanceStatus::DeployedStarted {
                self.messaging.publish_exports(&instance).await?;
                self.messaging
                    .listen_to_requests_from_other_agents(ListenerCommand::Start, &instance)
                    .await?;
            }
        }

        self.sync_local_imports().await?;
        self.send_all_statuses().await
    }

    async fn add_instance(&mut self, parent: &InstancePath, snapshot: &InstanceSnapshot) -> Result<()> {
        let path = self
            .tree
            .insert_snapshot(Some(parent), snapshot)
            .with_context(|| format!("cannot add {} under {}", snapshot.name, parent))?;
        info!(instance = %path, "[Agent] Instance added");

        for added in self.tree.hierarchical_list(&path)? {
            let status = self.tree.require(&added)?.status;
            self.notify(&added, status).await?;
        }
        Ok(())
    }

    async fn remove_instance(&mut self, path: &InstancePath) -> Result<()> {
        if path.is_root() {
            warn!(instance = %path, "[Agent] Root instances are never removed by the agent");
            return Ok(());
        }
        let subtree = self.tree.hierarchical_list(path)?;
        if let Some(deployed) = subtree
            .iter()
            .find(|p| self.tree.status(p) != Some(InstanceStatus::NotDeployed))
        {
            warn!(instance = %path, deployed = %deployed, "[Agent] Removal refused, subtree is still deployed");
            return Ok(());
        }

        let application = self.messaging.application();
        for removed in self.tree.remove(path)? {
            self.messaging
                .send_message_to_the_dm(Message::NotifInstanceRemoved {
                    application: application.clone(),
                    instance_path: removed.path,
                })
                .await?;
        }
        info!(instance = %path, "[Agent] Instance removed");
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    async fn change_state(
        &mut self,
        path: &InstancePath,
        requested: InstanceStatus,
        resources: &ResourceMap,
    ) -> Result<()> {
        let before = self.tree.require(path)?.status;
        let transition = TransitionTable::lookup(before, requested);

        self.lifecycle
            .change_instance_state(&mut self.tree, path, requested, resources)
            .await?;

        if let Some(transition) = transition {
            let outcome = if self.tree.status(path) == Some(transition.target()) {
                "reached"
            } else {
                "not_reached"
            };
            record_transition(transition.as_str(), outcome);
        }
        self.sync_local_imports().await
    }

    // =========================================================================
    // IMPORTS
    // =========================================================================

    fn importers_of(&self, prefix: &str) -> Vec<InstancePath> {
        self.tree
            .instances()
            .filter(|i| listens_to_exports(i.status))
            .filter(|i| imported_prefixes(&i.component).contains_key(prefix))
            .map(|i| i.path.clone())
            .collect()
    }

    async fn import_added(
        &mut self,
        prefix: &str,
        exporting_path: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<()> {
        for path in self.importers_of(prefix) {
            let Some(instance) = self.tree.get_mut(&path) else {
                continue;
            };
            let import = build_tailored_import(&instance.component, prefix, exporting_path, variables);
            if import.exported_variables.is_empty() {
                continue;
            }
            if add_import(instance, prefix, import.clone()) {
                self.lifecycle
                    .update_state_from_imports(&mut self.tree, &path, Some(&import), InstanceStatus::DeployedStarted)
                    .await?;
            }
        }
        self.sync_local_imports().await
    }

    async fn import_removed(&mut self, prefix: &str, exporting_path: &str) -> Result<()> {
        for path in self.importers_of(prefix) {
            let removed = self
                .tree
                .get_mut(&path)
                .and_then(|instance| remove_import(instance, prefix, exporting_path));
            if let Some(removed) = removed {
                self.lifecycle
                    .update_state_from_imports(&mut self.tree, &path, Some(&removed), InstanceStatus::DeployedStopped)
                    .await?;
            }
        }
        self.sync_local_imports().await
    }

    async fn exports_requested(&self, prefix: &str) -> Result<()> {
        for instance in self.tree.instances() {
            if instance.status == InstanceStatus::DeployedStarted {
                self.messaging
                    .publish_exports_for_prefix(instance, prefix)
                    .await?;
            }
        }
        Ok(())
    }

    /// Import changes between instances of this machine.
    fn local_import_changes(&self) -> Vec<(InstancePath, String, Import, bool)> {
        let mut changes = Vec::new();
        for importer in self.tree.instances().filter(|i| listens_to_exports(i.status)) {
            for (prefix, external) in imported_prefixes(&importer.component) {
                if external {
                    continue;
                }
                let current = imports_with_prefix(importer, &prefix);

                for exporter in self.tree.instances() {
                    if exporter.path == importer.path
                        || exporter.status != InstanceStatus::DeployedStarted
                        || !exported_prefixes(exporter).contains(&prefix)
                    {
                        continue;
                    }
                    let import = build_tailored_import(
                        &importer.component,
                        &prefix,
                        exporter.path.as_str(),
                        &exported_variables(exporter),
                    );
                    if !import.exported_variables.is_empty() && !current.contains(&import) {
                        changes.push((importer.path.clone(), prefix.clone(), import, true));
                    }
                }

                for existing in current {
                    let stale = InstancePath::parse(&existing.instance_path)
                        .ok()
                        .and_then(|p| self.tree.status(&p))
                        .is_some_and(|status| status != InstanceStatus::DeployedStarted);
                    if stale {
                        changes.push((importer.path.clone(), prefix.clone(), existing.clone(), false));
                    }
                }
            }
        }
        changes
    }

    async fn sync_local_imports(&mut self) -> Result<()> {
        for _ in 0..=self.tree.len() {
            let changes = self.local_import_changes();
            if changes.is_empty() {
                return Ok(());
            }
            for (path, prefix, import, added) in changes {
                let Some(instance) = self.tree.get_mut(&path) else {
                    continue;
                };
                let (changed, status) = if added {
                    (add_import(instance, &prefix, import.clone()), InstanceStatus::DeployedStarted)
                } else {
                    (
                        remove_import(instance, &prefix, &import.instance_path).is_some(),
                        InstanceStatus::DeployedStopped,
                    )
                };
                if changed {
                    debug!(importer = %path, exporter = %import.instance_path, added, "[Agent] Local import changed");
                    self.lifecycle
                        .update_state_from_imports(&mut self.tree, &path, Some(&import), status)
                        .await?;
                }
            }
        }
        warn!("[Agent] Local imports did not settle");
        Ok(())
    }

    // =========================================================================
    // REPORTS
    // =========================================================================

    async fn notify(&self, path: &InstancePath, status: InstanceStatus) -> Result<()> {
        self.messaging
            .send_message_to_the_dm(Message::NotifInstanceChanged {
                application: self.messaging.application(),
                instance_path: path.clone(),
                status,
            })
            .await?;
        Ok(())
    }

    async fn send_all_statuses(&self) -> Result<()> {
        for (path, status) in self.tree.statuses() {
            self.notify(&path, status).await?;
        }
        Ok(())
    }

    async fn send_logs(&self) -> Result<()> {
        let mut logs = ResourceMap::new();
        if let Some(dir) = &self.log_dir {
            let mut entries = tokio::fs::read_dir(dir)
                .await
                .with_context(|| format!("cannot list log directory {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let path = entry.path();
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    let content = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    logs.insert(name.to_string(), content);
                }
            }
        }

        info!(files = logs.len(), "[Agent] Sending logs");
        self.messaging
            .send_message_to_the_dm(Message::NotifLogs {
                application: self.messaging.application(),
                root_instance: self.messaging.root_instance(),
                logs,
            })
            .await?;
        Ok(())
    }
}
