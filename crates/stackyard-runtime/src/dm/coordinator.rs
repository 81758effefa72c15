//! # DM Coordinator
//!
//! The DM's view of every managed application and of the machines hosting
//! them.
//!
//! ## Machines
//!
//! A machine is alive once its agent sent a heartbeat. Until then, messages
//! for it wait in a per-machine queue. On the first heartbeat the agent gets
//! its model, then the waiting messages in order.
//!
//! ## Statuses
//!
//! Statuses are only learnt from agent notifications; requesting a change
//! never touches the DM's copy.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use shared_bus::DeliveryStats;
use shared_types::{
    Envelope, InstancePath, InstanceStatus, InstanceTree, Message, ResourceMap,
};
use stackyard_telemetry::{record_heartbeat, record_message_received, set_awaiting_messages};
use sy_01_messaging::{DmMessagingApi, ListenerCommand};

use crate::container::{ApplicationModel, DmConfig};

/// What the DM knows about one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineState {
    pub alive: bool,
    pub ip_address: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ManagedApplication {
    tree: InstanceTree,
    external_exports: BTreeMap<String, String>,
    machines: HashMap<String, MachineState>,
    awaiting: HashMap<String, VecDeque<Message>>,
    /// Machines that already received their model since they last came up.
    scoped: HashSet<String>,
    logs: HashMap<String, ResourceMap>,
}

impl ManagedApplication {
    fn awaiting_total(&self) -> usize {
        self.awaiting.values().map(VecDeque::len).sum()
    }
}

pub struct DmCoordinator {
    messaging: Arc<dyn DmMessagingApi>,
    stats: Arc<DeliveryStats>,
    config: DmConfig,
    applications: RwLock<HashMap<String, ManagedApplication>>,
}

impl DmCoordinator {
    pub fn new(messaging: Arc<dyn DmMessagingApi>, stats: Arc<DeliveryStats>, config: DmConfig) -> Self {
        Self {
            messaging,
            stats,
            config,
            applications: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // APPLICATIONS
    // =========================================================================

    pub async fn register_application(&self, model: &ApplicationModel) -> Result<()> {
        let tree = model
            .tree()
            .with_context(|| format!("invalid model for application {}", model.name))?;
        if self.applications.read().contains_key(&model.name) {
            return Err(anyhow!("application {} is already managed", model.name));
        }

        self.messaging
            .set_external_exports(&model.name, model.external_exports.clone());
        self.messaging
            .listen_to_agent_messages(&model.name, ListenerCommand::Start)
            .await?;

        let machines = model
            .root_names()
            .into_iter()
            .map(|root| (root, MachineState::default()))
            .collect();
        self.applications.write().insert(
            model.name.clone(),
            ManagedApplication {
                tree,
                external_exports: model.external_exports.clone(),
                machines,
                ..ManagedApplication::default()
            },
        );
        info!(application = %model.name, machines = model.roots.len(), "[DM] Application registered");
        Ok(())
    }

    pub async fn unregister_application(&self, application: &str) -> Result<()> {
        if self.applications.write().remove(application).is_none() {
            warn!(application = %application, "[DM] Unknown application, nothing to unregister");
            return Ok(());
        }
        self.messaging
            .listen_to_agent_messages(application, ListenerCommand::Stop)
            .await?;
        self.messaging
            .delete_messaging_server_artifacts(application)
            .await?;
        self.refresh_awaiting_gauge();
        info!(application = %application, "[DM] Application unregistered");
        Ok(())
    }

    #[must_use]
    pub fn applications(&self) -> Vec<String> {
        let mut names: Vec<_> = self.applications.read().keys().cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Send a message to a machine, or queue it until the machine is alive.
    pub async fn send_to_agent(&self, application: &str, root: &str, message: Message) -> Result<()> {
        {
            let mut apps = self.applications.write();
            let app = apps
                .get_mut(application)
                .ok_or_else(|| anyhow!("unknown application {application}"))?;
            let alive = app.machines.get(root).is_some_and(|m| m.alive);
            if !alive {
                let queue = app.awaiting.entry(root.to_string()).or_default();
                if queue.len() >= self.config.max_awaiting_messages {
                    if let Some(dropped) = queue.pop_front() {
                        warn!(application = %application, root = %root, kind = dropped.kind(), "[DM] Awaiting queue full, oldest message dropped");
                    }
                }
                debug!(application = %application, root = %root, kind = message.kind(), "[DM] Machine not alive, message queued");
                queue.push_back(message);
                drop(apps);
                self.refresh_awaiting_gauge();
                return Ok(());
            }
        }
        self.messaging
            .send_message_to_agent(application, root, message)
            .await?;
        Ok(())
    }

    pub async fn change_instance_state(
        &self,
        application: &str,
        path: &InstancePath,
        status: InstanceStatus,
    ) -> Result<()> {
        self.change_instance_state_with_resources(application, path, status, ResourceMap::new())
            .await
    }

    pub async fn change_instance_state_with_resources(
        &self,
        application: &str,
        path: &InstancePath,
        status: InstanceStatus,
        resources: ResourceMap,
    ) -> Result<()> {
        let message = Message::CmdChangeInstanceState {
            instance_path: path.clone(),
            new_status: status,
            resources,
        };
        self.send_to_agent(application, path.root_name(), message)
            .await
    }

    /// Deploy, then start, every instance of an application, parents first.
    pub async fn deploy_and_start_all(&self, application: &str) -> Result<()> {
        let paths = self.all_paths(application)?;
        for status in [InstanceStatus::DeployedStopped, InstanceStatus::DeployedStarted] {
            for path in &paths {
                self.change_instance_state(application, path, status).await?;
            }
        }
        info!(application = %application, instances = paths.len(), "[DM] Deploy and start requested");
        Ok(())
    }

    /// Undeploy every machine of an application.
    pub async fn undeploy_all(&self, application: &str) -> Result<()> {
        let roots = self.roots(application)?;
        for root in &roots {
            self.change_instance_state(application, root, InstanceStatus::NotDeployed)
                .await?;
        }
        info!(application = %application, machines = roots.len(), "[DM] Undeploy requested");
        Ok(())
    }

    /// Ask every machine for its statuses.
    pub async fn refresh_statuses(&self, application: &str) -> Result<()> {
        for root in self.roots(application)? {
            self.send_to_agent(application, root.root_name(), Message::CmdSendInstances)
                .await?;
        }
        Ok(())
    }

    fn roots(&self, application: &str) -> Result<Vec<InstancePath>> {
        let apps = self.applications.read();
        let app = apps
            .get(application)
            .ok_or_else(|| anyhow!("unknown application {application}"))?;
        Ok(app.tree.roots().to_vec())
    }

    fn all_paths(&self, application: &str) -> Result<Vec<InstancePath>> {
        let apps = self.applications.read();
        let app = apps
            .get(application)
            .ok_or_else(|| anyhow!("unknown application {application}"))?;
        let mut paths = Vec::new();
        for root in app.tree.roots() {
            paths.extend(app.tree.hierarchical_list(root)?);
        }
        Ok(paths)
    }

    // =========================================================================
    // AGENT MESSAGES
    // =========================================================================

    /// Drain the DM queue until it closes or shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Envelope>, mut shutdown: watch::Receiver<bool>) {
        info!("[DM] Coordinator started");
        loop {
            tokio::select! {
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => {
                        warn!("[DM] Queue closed, coordinator stopping");
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
        info!("[DM] Coordinator stopped");
    }

    /// Process one delivered envelope. The queue has already counted it.
    pub async fn handle(&self, envelope: Envelope) {
        let kind = envelope.message.kind();
        record_message_received(kind);
        if let Err(e) = self.process(envelope.message).await {
            self.stats.record_failed_reception();
            error!(kind, sender = %envelope.sender, error = %format!("{e:#}"), "[DM] Message processing failed");
        }
    }

    pub async fn process(&self, message: Message) -> Result<()> {
        match message {
            Message::NotifHeartbeat {
                application,
                root_instance,
                ip_address,
            } => self.heartbeat(&application, &root_instance, ip_address).await,
            Message::NotifInstanceChanged {
                application,
                instance_path,
                status,
            } => {
                self.with_application(&application, |app| {
                    if let Err(e) = app.tree.set_status(&instance_path, status) {
                        warn!(application = %application, error = %e, "[DM] Status of an unknown instance");
                    }
                });
                debug!(application = %application, instance = %instance_path, status = %status, "[DM] Status updated");
                Ok(())
            }
            Message::NotifInstanceRemoved {
                application,
                instance_path,
            } => {
                self.with_application(&application, |app| {
                    if let Err(e) = app.tree.remove(&instance_path) {
                        warn!(application = %application, error = %e, "[DM] Removal of an unknown instance");
                    }
                });
                info!(application = %application, instance = %instance_path, "[DM] Instance removed");
                Ok(())
            }
            Message::NotifMachineDown {
                application,
                root_instance,
            } => self.machine_down(&application, &root_instance).await,
            Message::NotifLogs {
                application,
                root_instance,
                logs,
            } => {
                info!(application = %application, root = %root_instance, files = logs.len(), "[DM] Logs received");
                self.with_application(&application, |app| {
                    app.logs.insert(root_instance, logs);
                });
                Ok(())
            }
            Message::NotifAutonomic {
                application,
                root_instance,
                event_name,
                event_info,
            } => {
                info!(
                    application = %application,
                    root = %root_instance,
                    event = %event_name,
                    info = event_info.as_deref().unwrap_or(""),
                    "[DM] Autonomic event"
                );
                Ok(())
            }
            Message::Echo { id, content } => {
                debug!(%id, content = %content, "[DM] Echo answered");
                Ok(())
            }
            other => {
                warn!(kind = other.kind(), "[DM] Unexpected message, dropped");
                Ok(())
            }
        }
    }

    fn with_application(&self, application: &str, f: impl FnOnce(&mut ManagedApplication)) {
        match self.applications.write().get_mut(application) {
            Some(app) => f(app),
            None => warn!(application = %application, "[DM] Message for an unknown application"),
        }
    }

    async fn heartbeat(&self, application: &str, root: &str, ip_address: Option<String>) -> Result<()> {
        record_heartbeat();
        let model = {
            let mut apps = self.applications.write();
            let Some(app) = apps.get_mut(application) else {
                warn!(application = %application, root = %root, "[DM] Heartbeat from an unknown application");
                return Ok(());
            };
            let root_path = InstancePath::root(root)?;
            if app.tree.get(&root_path).is_none() {
                warn!(application = %application, root = %root, "[DM] Heartbeat from an unknown machine");
                return Ok(());
            }
            if let Some(ip) = &ip_address {
                app.tree.set_ip_address(&root_path, ip)?;
            }

            let machine = app.machines.entry(root.to_string()).or_default();
            machine.last_heartbeat = Some(Utc::now());
            if ip_address.is_some() {
                machine.ip_address.clone_from(&ip_address);
            }
            if machine.alive {
                return Ok(());
            }
            if app.scoped.contains(root) {
                None
            } else {
                Some(Message::CmdSetScopedInstance {
                    root: app.tree.snapshot(&root_path)?,
                    external_exports: app.external_exports.clone(),
                })
            }
        };

        if let Some(model) = model {
            self.messaging
                .send_message_to_agent(application, root, model)
                .await?;
            self.with_application(application, |app| {
                app.scoped.insert(root.to_string());
            });
        }

        // A message leaves the queue only once sent. The machine becomes alive
        // once the queue is empty, so queued commands precede direct ones.
        let mut flushed = 0;
        loop {
            let next = {
                let mut apps = self.applications.write();
                let Some(app) = apps.get_mut(application) else {
                    return Ok(());
                };
                let next = app.awaiting.get(root).and_then(|queue| queue.front().cloned());
                if next.is_none() {
                    app.awaiting.remove(root);
                    if let Some(machine) = app.machines.get_mut(root) {
                        machine.alive = true;
                    }
                }
                next
            };
            let Some(message) = next else {
                break;
            };
            if let Err(e) = self
                .messaging
                .send_message_to_agent(application, root, message)
                .await
            {
                self.refresh_awaiting_gauge();
                warn!(application = %application, root = %root, flushed, error = %e, "[DM] Flush interrupted, remaining messages stay queued");
                return Err(e.into());
            }
            self.with_application(application, |app| {
                if let Some(queue) = app.awaiting.get_mut(root) {
                    queue.pop_front();
                }
            });
            flushed += 1;
        }
        self.refresh_awaiting_gauge();
        info!(application = %application, root = %root, flushed, "[DM] Machine alive");
        Ok(())
    }

    async fn machine_down(&self, application: &str, root: &str) -> Result<()> {
        let root_path = InstancePath::root(root)?;
        let tree = {
            let mut apps = self.applications.write();
            let Some(app) = apps.get_mut(application) else {
                warn!(application = %application, root = %root, "[DM] Machine down in an unknown application");
                return Ok(());
            };
            if let Some(machine) = app.machines.get_mut(root) {
                machine.alive = false;
            }
            app.scoped.remove(root);
            app.tree.clone()
        };

        self.messaging
            .propagate_agent_termination(application, &tree, &root_path)
            .await?;

        self.with_application(application, |app| {
            if let Ok(paths) = app.tree.hierarchical_list(&root_path) {
                for path in paths {
                    if let Err(e) = app.tree.set_status(&path, InstanceStatus::NotDeployed) {
                        warn!(path = %path, error = %e, "[DM] Could not reset instance status");
                    }
                }
            }
        });
        warn!(application = %application, root = %root, "[DM] Machine down, its instances are no longer deployed");
        Ok(())
    }

    fn refresh_awaiting_gauge(&self) {
        let total = self
            .applications
            .read()
            .values()
            .map(ManagedApplication::awaiting_total)
            .sum();
        set_awaiting_messages(total);
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn statuses(&self, application: &str) -> Option<BTreeMap<InstancePath, InstanceStatus>> {
        self.applications
            .read()
            .get(application)
            .map(|app| app.tree.statuses().into_iter().collect())
    }

    #[must_use]
    pub fn status(&self, application: &str, path: &InstancePath) -> Option<InstanceStatus> {
        self.applications
            .read()
            .get(application)
            .and_then(|app| app.tree.status(path))
    }

    #[must_use]
    pub fn machine(&self, application: &str, root: &str) -> Option<MachineState> {
        self.applications
            .read()
            .get(application)
            .and_then(|app| app.machines.get(root).cloned())
    }

    /// Messages waiting for a machine to come alive.
    #[must_use]
    pub fn awaiting_count(&self, application: &str, root: &str) -> usize {
        self.applications
            .read()
            .get(application)
            .and_then(|app| app.awaiting.get(root).map(VecDeque::len))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn logs(&self, application: &str, root: &str) -> Option<ResourceMap> {
        self.applications
            .read()
            .get(application)
            .and_then(|app| app.logs.get(root).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_component, RecordingDm};
    use shared_bus::{InMemoryClient, InMemoryRegistry, MessageQueue, MessagingClient, OwnerProperties};
    use shared_types::{Component, InstanceSnapshot};
    use sy_01_messaging::{AgentClient, AgentMessagingApi, DmClient};

    fn model() -> ApplicationModel {
        ApplicationModel {
            name: "lamp".to_string(),
            external_exports: BTreeMap::new(),
            roots: vec![
                InstanceSnapshot::new("vm", Component::new("VM", "logger"))
                    .with_child(InstanceSnapshot::new("app", app_component())),
                InstanceSnapshot::new("db", Component::new("VM", "logger")),
            ],
        }
    }

    async fn coordinator() -> (DmCoordinator, Arc<RecordingDm>) {
        let dm = Arc::new(RecordingDm::default());
        let coordinator = DmCoordinator::new(dm.clone(), Arc::new(DeliveryStats::new()), DmConfig::default());
        coordinator.register_application(&model()).await.unwrap();
        (coordinator, dm)
    }

    fn heartbeat(root: &str) -> Message {
        Message::NotifHeartbeat {
            application: "lamp".to_string(),
            root_instance: root.to_string(),
            ip_address: Some("10.0.0.7".to_string()),
        }
    }

    #[tokio::test]
    async fn test_messages_wait_for_first_heartbeat() {
        let (coordinator, dm) = coordinator().await;
        coordinator.deploy_and_start_all("lamp").await.unwrap();
        assert!(dm.sent().is_empty());
        assert_eq!(coordinator.awaiting_count("lamp", "vm"), 4);
        assert_eq!(coordinator.awaiting_count("lamp", "db"), 2);

        coordinator.process(heartbeat("vm")).await.unwrap();
        let sent = dm.sent();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0].0, "vm");
        assert!(matches!(sent[0].1, Message::CmdSetScopedInstance { .. }));
        assert!(matches!(
            &sent[1].1,
            Message::CmdChangeInstanceState { instance_path, new_status: InstanceStatus::DeployedStopped, .. }
                if instance_path.as_str() == "/vm"
        ));
        assert_eq!(coordinator.awaiting_count("lamp", "vm"), 0);
        assert_eq!(coordinator.awaiting_count("lamp", "db"), 2);

        coordinator.process(heartbeat("vm")).await.unwrap();
        assert_eq!(dm.sent().len(), 5);
        let machine = coordinator.machine("lamp", "vm").unwrap();
        assert!(machine.alive);
        assert_eq!(machine.ip_address.as_deref(), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_notifications_update_statuses() {
        let (coordinator, _dm) = coordinator().await;
        let path = InstancePath::parse("/vm/app").unwrap();

        coordinator
            .process(Message::NotifInstanceChanged {
                application: "lamp".to_string(),
                instance_path: path.clone(),
                status: InstanceStatus::DeployedStarted,
            })
            .await
            .unwrap();
        assert_eq!(coordinator.status("lamp", &path), Some(InstanceStatus::DeployedStarted));

        coordinator
            .process(Message::NotifInstanceRemoved {
                application: "lamp".to_string(),
                instance_path: path.clone(),
            })
            .await
            .unwrap();
        assert_eq!(coordinator.status("lamp", &path), None);
    }

    #[tokio::test]
    async fn test_machine_down_propagates_termination() {
        let (coordinator, dm) = coordinator().await;
        coordinator.process(heartbeat("vm")).await.unwrap();
        let path = InstancePath::parse("/vm/app").unwrap();
        coordinator
            .process(Message::NotifInstanceChanged {
                application: "lamp".to_string(),
                instance_path: path.clone(),
                status: InstanceStatus::DeployedStarted,
            })
            .await
            .unwrap();

        coordinator
            .process(Message::NotifMachineDown {
                application: "lamp".to_string(),
                root_instance: "vm".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(dm.terminations(), vec![("lamp".to_string(), "/vm".to_string())]);
        assert_eq!(coordinator.status("lamp", &path), Some(InstanceStatus::NotDeployed));
        assert!(!coordinator.machine("lamp", "vm").unwrap().alive);

        coordinator
            .change_instance_state("lamp", &path, InstanceStatus::DeployedStopped)
            .await
            .unwrap();
        assert_eq!(coordinator.awaiting_count("lamp", "vm"), 1);

        coordinator.process(heartbeat("vm")).await.unwrap();
        let models = dm
            .sent()
            .iter()
            .filter(|(_, m)| matches!(m, Message::CmdSetScopedInstance { .. }))
            .count();
        assert_eq!(models, 2);
        assert_eq!(coordinator.awaiting_count("lamp", "vm"), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_unsent_messages() {
        let (coordinator, dm) = coordinator().await;
        for _ in 0..4 {
            coordinator
                .send_to_agent("lamp", "vm", Message::CmdSendInstances)
                .await
                .unwrap();
        }
        assert_eq!(coordinator.awaiting_count("lamp", "vm"), 4);

        // Room for the model and one command only.
        dm.limit_sends(Some(2));
        assert!(coordinator.process(heartbeat("vm")).await.is_err());
        assert_eq!(dm.sent().len(), 2);
        assert_eq!(coordinator.awaiting_count("lamp", "vm"), 3);
        assert!(!coordinator.machine("lamp", "vm").unwrap().alive);

        dm.limit_sends(None);
        coordinator.process(heartbeat("vm")).await.unwrap();
        let sent = dm.sent();
        assert_eq!(sent.len(), 5);
        assert!(matches!(sent[0].1, Message::CmdSetScopedInstance { .. }));
        assert!(sent[1..].iter().all(|(_, m)| matches!(m, Message::CmdSendInstances)));
        assert_eq!(coordinator.awaiting_count("lamp", "vm"), 0);
        assert!(coordinator.machine("lamp", "vm").unwrap().alive);
    }

    #[tokio::test]
    async fn test_delivered_message_is_counted_once() {
        let registry = InMemoryRegistry::new();
        let queue = MessageQueue::with_capacity(8);
        let mut inbox = queue.take_receiver().unwrap();
        let dm_client = Arc::new(InMemoryClient::with_queue(
            registry.clone(),
            OwnerProperties::dm("d"),
            &queue,
            false,
        ));
        dm_client.open_connection().await.unwrap();
        let coordinator = DmCoordinator::new(
            Arc::new(DmClient::new(dm_client, "d")),
            queue.stats(),
            DmConfig::default(),
        );
        coordinator.register_application(&model()).await.unwrap();

        let agent_queue = MessageQueue::with_capacity(8);
        let agent_client = Arc::new(InMemoryClient::with_queue(
            registry,
            OwnerProperties::agent("d", "lamp", "vm"),
            &agent_queue,
            false,
        ));
        agent_client.open_connection().await.unwrap();
        let agent = AgentClient::new(agent_client, "d", "lamp", "vm");
        agent.send_message_to_the_dm(Message::echo("x")).await.unwrap();

        let envelope = inbox.recv().await.unwrap();
        coordinator.handle(envelope).await;

        let received = queue.stats().snapshot();
        assert_eq!(received.received, 1);
        assert_eq!(received.failed_reception, 0);
        assert_eq!(agent_queue.stats().snapshot().sent, 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_applications() {
        let (coordinator, dm) = coordinator().await;
        assert!(coordinator.register_application(&model()).await.is_err());
        assert!(coordinator
            .send_to_agent("other", "vm", Message::CmdSendInstances)
            .await
            .is_err());

        coordinator.unregister_application("lamp").await.unwrap();
        assert!(coordinator.applications().is_empty());
        assert_eq!(dm.deleted(), vec!["lamp".to_string()]);
    }

    #[tokio::test]
    async fn test_logs_are_kept_per_machine() {
        let (coordinator, _dm) = coordinator().await;
        let mut logs = ResourceMap::new();
        logs.insert("agent.log".to_string(), b"ok".to_vec());

        coordinator
            .process(Message::NotifLogs {
                application: "lamp".to_string(),
                root_instance: "db".to_string(),
                logs: logs.clone(),
            })
            .await
            .unwrap();
        assert_eq!(coordinator.logs("lamp", "db"), Some(logs));
        assert_eq!(coordinator.logs("lamp", "vm"), None);
    }
}
