//! # Node Runtime
//!
//! Runs a DM and one agent per machine inside a single process, all sharing
//! one in-memory routing registry.
//!
//! ## Startup Sequence
//!
//! 1. Create the routing registry and the DM queue
//! 2. Connect the DM client and start the coordinator loop
//! 3. For each registered application, register it with the DM
//! 4. Per machine: connect an agent client, wire its lifecycle manager,
//!    start its processor loop and its heartbeat
//!
//! Each agent has its own shutdown signal so a single machine can be
//! stopped while the others keep running.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use shared_bus::{
    DeliveryStats, DeliveryStatsSnapshot, InMemoryClient, InMemoryRegistry, MessageQueue,
    MessagingClient, OwnerProperties,
};
use shared_types::Message;
use sy_01_messaging::{AgentClient, AgentMessagingApi, DmClient, DmMessagingApi, ListenerCommand};
use sy_02_lifecycle::{
    DirectoryResourceStore, LifecycleManager, LoggingPlugin, PluginRegistry, LOGGING_PLUGIN_NAME,
};

use crate::adapters::{MeteredClient, MeteredPlugin};
use crate::agent::{spawn_heartbeat, AgentProcessor, AgentView};
use crate::container::{ApplicationModel, NodeConfig};
use crate::dm::DmCoordinator;

/// A running agent.
struct AgentHandle {
    client: Arc<InMemoryClient>,
    view: AgentView,
    stats: Arc<DeliveryStats>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        if let Err(e) = self.client.close_connection().await {
            warn!(error = %e, "[Agent] Failed to close messaging connection");
        }
    }
}

pub struct NodeRuntime {
    config: NodeConfig,
    registry: InMemoryRegistry,
    dm: Arc<DmCoordinator>,
    dm_client: Arc<InMemoryClient>,
    dm_stats: Arc<DeliveryStats>,
    agents: HashMap<(String, String), AgentHandle>,
    shutdown_tx: watch::Sender<bool>,
    dm_task: Option<JoinHandle<()>>,
}

impl NodeRuntime {
    /// Connect the DM and start its message loop.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        config.validate().context("Invalid node configuration")?;
        let domain = config.messaging.domain.clone();

        info!("===========================================");
        info!("  Stackyard Node Runtime");
        info!("  Domain: {}", domain);
        info!("===========================================");

        let registry = InMemoryRegistry::new();
        let queue = MessageQueue::with_capacity(config.messaging.queue_capacity);
        let inbox = queue
            .take_receiver()
            .ok_or_else(|| anyhow!("DM queue receiver already taken"))?;
        let dm_stats = queue.stats();

        let dm_client = Arc::new(InMemoryClient::with_queue(
            registry.clone(),
            OwnerProperties::dm(domain.clone()),
            &queue,
            false,
        ));
        dm_client.open_connection().await?;
        let messaging: Arc<dyn DmMessagingApi> = Arc::new(DmClient::new(
            Arc::new(MeteredClient::new(dm_client.clone())),
            domain,
        ));

        let dm = Arc::new(DmCoordinator::new(messaging, dm_stats.clone(), config.dm.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dm_task = tokio::spawn(Arc::clone(&dm).run(inbox, shutdown_rx));

        info!("[DM] Ready");
        Ok(Self {
            config,
            registry,
            dm,
            dm_client,
            dm_stats,
            agents: HashMap::new(),
            shutdown_tx,
            dm_task: Some(dm_task),
        })
    }

    /// Register an application with the DM and start an agent per machine.
    pub async fn add_application(&mut self, model: &ApplicationModel) -> Result<()> {
        self.dm
            .register_application(model)
            .await
            .with_context(|| format!("Failed to register application {}", model.name))?;

        for root in model.root_names() {
            let agent = self
                .start_agent(&model.name, &root)
                .await
                .with_context(|| format!("Failed to start agent {}/{}", model.name, root))?;
            self.agents.insert((model.name.clone(), root), agent);
        }
        info!(application = %model.name, machines = model.roots.len(), "Application running");
        Ok(())
    }

    async fn start_agent(&self, application: &str, root: &str) -> Result<AgentHandle> {
        let domain = self.config.messaging.domain.clone();
        let queue = MessageQueue::with_capacity(self.config.messaging.queue_capacity);
        let inbox = queue
            .take_receiver()
            .ok_or_else(|| anyhow!("agent queue receiver already taken"))?;
        let stats = queue.stats();

        let client = Arc::new(InMemoryClient::with_queue(
            self.registry.clone(),
            OwnerProperties::agent(domain.clone(), application, root),
            &queue,
            self.config.messaging.agent_connection_required,
        ));
        client.open_connection().await?;
        let messaging: Arc<dyn AgentMessagingApi> = Arc::new(AgentClient::new(
            Arc::new(MeteredClient::new(client.clone())),
            domain,
            application,
            root,
        ));
        messaging.listen_to_the_dm(ListenerCommand::Start).await?;

        let plugins = Arc::new(PluginRegistry::new());
        plugins.register_as(
            LOGGING_PLUGIN_NAME,
            Arc::new(MeteredPlugin::new(Arc::new(LoggingPlugin::new()))),
        );
        let resources = Arc::new(DirectoryResourceStore::new(
            self.config.agent.resources_dir.join(root),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(messaging.clone(), plugins, resources));

        let processor = AgentProcessor::new(messaging.clone(), lifecycle, stats.clone())
            .with_ip_address(self.config.agent.ip_address.clone())
            .with_log_dir(self.config.agent.log_dir.clone());
        let view = processor.view();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let processor_task = tokio::spawn(processor.run(inbox, shutdown_rx.clone()));
        let heartbeat_task = spawn_heartbeat(
            messaging,
            self.config.agent.heartbeat_period(),
            self.config.agent.ip_address.clone(),
            shutdown_rx,
        );

        info!(application = %application, root = %root, "[Agent] Ready");
        Ok(AgentHandle {
            client,
            view,
            stats,
            shutdown,
            tasks: vec![processor_task, heartbeat_task],
        })
    }

    /// Stop one machine's agent and tell the DM the machine is down.
    pub async fn stop_agent(&mut self, application: &str, root: &str) -> Result<()> {
        let agent = self
            .agents
            .remove(&(application.to_string(), root.to_string()))
            .ok_or_else(|| anyhow!("no agent for {application}/{root}"))?;
        agent.stop().await;

        self.dm
            .process(Message::NotifMachineDown {
                application: application.to_string(),
                root_instance: root.to_string(),
            })
            .await?;
        warn!(application = %application, root = %root, "[Agent] Stopped");
        Ok(())
    }

    /// Stop every agent, then the DM.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down node runtime");
        for ((application, root), agent) in self.agents.drain() {
            agent.stop().await;
            info!(application = %application, root = %root, "[Agent] Stopped");
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.dm_task.take() {
            let _ = task.await;
        }
        self.dm_client.close_connection().await?;
        info!("Node runtime stopped");
        Ok(())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn dm(&self) -> Arc<DmCoordinator> {
        Arc::clone(&self.dm)
    }

    #[must_use]
    pub fn dm_stats(&self) -> DeliveryStatsSnapshot {
        self.dm_stats.snapshot()
    }

    #[must_use]
    pub fn agent_view(&self, application: &str, root: &str) -> Option<AgentView> {
        self.agents
            .get(&(application.to_string(), root.to_string()))
            .map(|a| a.view.clone())
    }

    #[must_use]
    pub fn agent_stats(&self, application: &str, root: &str) -> Option<DeliveryStatsSnapshot> {
        self.agents
            .get(&(application.to_string(), root.to_string()))
            .map(|a| a.stats.snapshot())
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn registry(&self) -> &InMemoryRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
