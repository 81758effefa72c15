//! DM Client
//!
//! Coordinator-side messaging on top of any [`MessagingClient`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use shared_bus::{MessagingClient, MessagingContext, MessagingError, OwnerProperties};
use shared_types::{InstancePath, InstanceTree, Message};

use crate::domain::{remove_import_messages, ListenerCommand};
use crate::ports::inbound::DmMessagingApi;

/// Messaging client of the DM.
pub struct DmClient {
    client: Arc<dyn MessagingClient>,
    domain: String,
    external_exports: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl DmClient {
    pub fn new(client: Arc<dyn MessagingClient>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        client.set_owner_properties(OwnerProperties::dm(domain.clone()));
        Self {
            client,
            domain,
            external_exports: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn MessagingClient> {
        &self.client
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

#[async_trait]
impl DmMessagingApi for DmClient {
    async fn send_message_to_agent(
        &self,
        application: &str,
        root_instance: &str,
        message: Message,
    ) -> Result<(), MessagingError> {
        let ctx = MessagingContext::for_agent(&self.domain, application, root_instance);
        debug!(topic = %ctx.topic(), kind = message.kind(), "Sending message to agent");
        self.client.publish(&ctx, message).await
    }

    async fn listen_to_agent_messages(
        &self,
        application: &str,
        command: ListenerCommand,
    ) -> Result<(), MessagingError> {
        let ctx = MessagingContext::for_dm(&self.domain, Some(application));
        match command {
            ListenerCommand::Start => self.client.subscribe(&ctx).await,
            ListenerCommand::Stop => self.client.unsubscribe(&ctx).await,
        }
    }

    async fn propagate_agent_termination(
        &self,
        application: &str,
        tree: &InstanceTree,
        root: &InstancePath,
    ) -> Result<(), MessagingError> {
        let paths = match tree.hierarchical_list(root) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(application = %application, root = %root, error = %e, "Unknown machine, nothing to propagate");
                return Ok(());
            }
        };

        let messages: Vec<_> = {
            let all_aliases = self.external_exports.read();
            let empty = BTreeMap::new();
            let aliases = all_aliases.get(application).unwrap_or(&empty);
            paths
                .iter()
                .filter_map(|path| tree.get(path))
                .flat_map(|instance| remove_import_messages(&self.domain, application, instance, aliases))
                .collect()
        };

        info!(application = %application, root = %root, withdrawals = messages.len(), "Propagating agent termination");
        for (ctx, message) in messages {
            self.client.publish(&ctx, message).await?;
        }
        Ok(())
    }

    fn set_external_exports(&self, application: &str, aliases: BTreeMap<String, String>) {
        self.external_exports
            .write()
            .insert(application.to_string(), aliases);
    }

    async fn delete_messaging_server_artifacts(&self, application: &str) -> Result<(), MessagingError> {
        self.external_exports.write().remove(application);
        self.client.delete_messaging_server_artifacts(application).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent_client::AgentClient;
    use crate::ports::inbound::AgentMessagingApi;
    use shared_bus::{InMemoryClient, InMemoryRegistry, MessageQueue};
    use shared_types::{Component, ImportedVariable, Instance, InstanceSnapshot};

    fn dm(registry: &InMemoryRegistry, queue: &MessageQueue) -> DmClient {
        let transport = InMemoryClient::with_queue(registry.clone(), OwnerProperties::dm("d"), queue, false);
        DmClient::new(Arc::new(transport), "d")
    }

    fn agent(registry: &InMemoryRegistry, queue: &MessageQueue, root: &str) -> AgentClient {
        let transport = InMemoryClient::with_queue(
            registry.clone(),
            OwnerProperties::agent("d", "lamp", root),
            queue,
            true,
        );
        AgentClient::new(Arc::new(transport), "d", "lamp", root)
    }

    #[tokio::test]
    async fn test_dm_to_agent_and_back() {
        let registry = InMemoryRegistry::new();
        let dm_queue = MessageQueue::with_capacity(8);
        let agent_queue = MessageQueue::with_capacity(8);
        let dm = dm(&registry, &dm_queue);
        let vm = agent(&registry, &agent_queue, "vm");
        dm.transport().open_connection().await.unwrap();
        vm.transport().open_connection().await.unwrap();
        vm.listen_to_the_dm(ListenerCommand::Start).await.unwrap();

        dm.send_message_to_agent("lamp", "vm", Message::CmdSendInstances)
            .await
            .unwrap();
        let mut agent_rx = agent_queue.take_receiver().unwrap();
        assert_eq!(agent_rx.recv().await.unwrap().message, Message::CmdSendInstances);

        vm.send_message_to_the_dm(Message::CmdGatherLogs).await.unwrap();
        let mut dm_rx = dm_queue.take_receiver().unwrap();
        let envelope = dm_rx.recv().await.unwrap();
        assert_eq!(envelope.sender, "agent@d/lamp/vm");
        assert_eq!(envelope.topic, "lamp");
    }

    #[tokio::test]
    async fn test_agent_termination_withdraws_exports() {
        let registry = InMemoryRegistry::new();
        let dm_queue = MessageQueue::with_capacity(8);
        let web_queue = MessageQueue::with_capacity(8);
        let dm = dm(&registry, &dm_queue);
        let web = agent(&registry, &web_queue, "web");
        dm.transport().open_connection().await.unwrap();
        web.transport().open_connection().await.unwrap();

        let importer = Instance::new(
            InstancePath::parse("/web/tomcat").unwrap(),
            Component::new("Tomcat", "bash").imports(ImportedVariable::required("MySQL.ip")),
        );
        web.listen_to_exports_from_other_agents(ListenerCommand::Start, &importer)
            .await
            .unwrap();

        let snapshot = InstanceSnapshot::new("db", Component::new("VM", "target")).with_child(
            InstanceSnapshot::new("mysql", Component::new("MySQL", "bash").exports("MySQL.ip", None)),
        );
        let mut tree = InstanceTree::new();
        let root = tree.insert_snapshot(None, &snapshot).unwrap();

        dm.propagate_agent_termination("lamp", &tree, &root).await.unwrap();

        let mut rx = web_queue.take_receiver().unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(
            envelope.message,
            Message::CmdRemoveImport {
                application: "lamp".into(),
                prefix: "MySQL".into(),
                exporting_path: "/db/mysql".into(),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_machine_is_ignored() {
        let registry = InMemoryRegistry::new();
        let queue = MessageQueue::with_capacity(8);
        let dm = dm(&registry, &queue);
        let tree = InstanceTree::new();
        let root = InstancePath::root("ghost").unwrap();
        dm.propagate_agent_termination("lamp", &tree, &root).await.unwrap();
    }
}
