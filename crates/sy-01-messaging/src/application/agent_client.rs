//! Agent Client
//!
//! Agent-side messaging on top of any [`MessagingClient`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use shared_bus::{MessagingClient, MessagingContext, MessagingError, OwnerProperties, ThoseThat};
use shared_types::{Instance, Message};

use crate::domain::{add_import_messages, remove_import_messages, ListenerCommand};
use crate::ports::inbound::AgentMessagingApi;

/// Messaging client of one agent.
pub struct AgentClient {
    client: Arc<dyn MessagingClient>,
    domain: String,
    application: RwLock<String>,
    root_instance: String,
    external_exports: RwLock<BTreeMap<String, String>>,
}

impl AgentClient {
    /// Wrap `client` and give it the agent's identity.
    pub fn new(
        client: Arc<dyn MessagingClient>,
        domain: impl Into<String>,
        application: impl Into<String>,
        root_instance: impl Into<String>,
    ) -> Self {
        let domain = domain.into();
        let application = application.into();
        let root_instance = root_instance.into();
        client.set_owner_properties(OwnerProperties::agent(
            domain.clone(),
            application.clone(),
            root_instance.clone(),
        ));

        Self {
            client,
            domain,
            application: RwLock::new(application),
            root_instance,
            external_exports: RwLock::new(BTreeMap::new()),
        }
    }

    /// Underlying transport client.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn MessagingClient> {
        &self.client
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    async fn publish_all(&self, messages: Vec<(MessagingContext, Message)>) -> Result<(), MessagingError> {
        for (ctx, message) in messages {
            self.client.publish(&ctx, message).await?;
        }
        Ok(())
    }

    async fn apply(&self, command: ListenerCommand, contexts: Vec<MessagingContext>) -> Result<(), MessagingError> {
        for ctx in contexts {
            match command {
                ListenerCommand::Start => self.client.subscribe(&ctx).await?,
                ListenerCommand::Stop => self.client.unsubscribe(&ctx).await?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AgentMessagingApi for AgentClient {
    fn application(&self) -> String {
        self.application.read().clone()
    }

    fn root_instance(&self) -> String {
        self.root_instance.clone()
    }

    fn set_application(&self, application: &str) {
        *self.application.write() = application.to_string();
        self.client.set_owner_properties(OwnerProperties::agent(
            self.domain.clone(),
            application,
            self.root_instance.clone(),
        ));
    }

    fn set_external_exports(&self, aliases: BTreeMap<String, String>) {
        *self.external_exports.write() = aliases;
    }

    async fn publish_exports(&self, instance: &Instance) -> Result<(), MessagingError> {
        let messages = {
            let aliases = self.external_exports.read();
            add_import_messages(&self.domain, &self.application(), instance, &aliases)
        };
        debug!(instance = %instance.path, prefixes = messages.len(), "Publishing exports");
        self.publish_all(messages).await
    }

    async fn publish_exports_for_prefix(
        &self,
        instance: &Instance,
        prefix: &str,
    ) -> Result<(), MessagingError> {
        let messages: Vec<_> = {
            let aliases = self.external_exports.read();
            add_import_messages(&self.domain, &self.application(), instance, &aliases)
                .into_iter()
                .filter(|(ctx, _)| ctx.component_or_facet_name() == Some(prefix))
                .collect()
        };
        debug!(instance = %instance.path, prefix = %prefix, "Publishing exports for prefix");
        self.publish_all(messages).await
    }

    async fn unpublish_exports(&self, instance: &Instance) -> Result<(), MessagingError> {
        let messages = {
            let aliases = self.external_exports.read();
            remove_import_messages(&self.domain, &self.application(), instance, &aliases)
        };
        debug!(instance = %instance.path, prefixes = messages.len(), "Unpublishing exports");
        self.publish_all(messages).await
    }

    async fn listen_to_requests_from_other_agents(
        &self,
        command: ListenerCommand,
        instance: &Instance,
    ) -> Result<(), MessagingError> {
        let contexts = {
            let aliases = self.external_exports.read();
            MessagingContext::for_exported_variables(
                &self.domain,
                &self.application(),
                instance,
                &aliases,
                ThoseThat::Export,
            )
        };
        self.apply(command, contexts).await
    }

    async fn request_exports_from_other_agents(&self, instance: &Instance) -> Result<(), MessagingError> {
        let application = self.application();
        let contexts =
            MessagingContext::for_imported_variables(&self.domain, &application, instance, ThoseThat::Export);
        for ctx in contexts {
            let Some(prefix) = ctx.component_or_facet_name().map(str::to_string) else {
                continue;
            };
            debug!(instance = %instance.path, prefix = %prefix, "Requesting exports");
            let message = Message::CmdRequestImport {
                application: application.clone(),
                prefix,
            };
            self.client.publish(&ctx, message).await?;
        }
        Ok(())
    }

    async fn listen_to_exports_from_other_agents(
        &self,
        command: ListenerCommand,
        instance: &Instance,
    ) -> Result<(), MessagingError> {
        let contexts = MessagingContext::for_imported_variables(
            &self.domain,
            &self.application(),
            instance,
            ThoseThat::Import,
        );
        self.apply(command, contexts).await
    }

    async fn send_message_to_the_dm(&self, message: Message) -> Result<(), MessagingError> {
        let ctx = MessagingContext::for_dm(&self.domain, Some(&self.application()));
        self.client.publish(&ctx, message).await
    }

    async fn listen_to_the_dm(&self, command: ListenerCommand) -> Result<(), MessagingError> {
        let ctx = MessagingContext::for_agent(&self.domain, &self.application(), &self.root_instance);
        info!(topic = %ctx.topic(), ?command, "Agent listening to the DM");
        self.apply(command, vec![ctx]).await
    }
}
