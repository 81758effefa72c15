//! Inbound Ports (Driving Ports / API)

use async_trait::async_trait;
use std::collections::BTreeMap;

use shared_bus::MessagingError;
use shared_types::{Instance, InstancePath, InstanceTree, Message};

use crate::domain::ListenerCommand;

/// Messaging operations of an agent.
#[async_trait]
pub trait AgentMessagingApi: Send + Sync {
    /// Application the agent works for.
    fn application(&self) -> String;

    /// Root instance the agent manages.
    fn root_instance(&self) -> String;

    /// Change the application (and so the owner identity) of the agent.
    fn set_application(&self, application: &str);

    /// Aliases under which some exports are visible to other applications.
    fn set_external_exports(&self, aliases: BTreeMap<String, String>);

    /// Publish every exported variable of `instance`.
    async fn publish_exports(&self, instance: &Instance) -> Result<(), MessagingError>;

    /// Publish the exported variables of `instance` under one prefix.
    async fn publish_exports_for_prefix(
        &self,
        instance: &Instance,
        prefix: &str,
    ) -> Result<(), MessagingError>;

    /// Tell importers that `instance` no longer exports anything.
    async fn unpublish_exports(&self, instance: &Instance) -> Result<(), MessagingError>;

    /// Start or stop answering export requests for the prefixes `instance` exports.
    async fn listen_to_requests_from_other_agents(
        &self,
        command: ListenerCommand,
        instance: &Instance,
    ) -> Result<(), MessagingError>;

    /// Ask the exporters of every prefix `instance` imports to publish again.
    async fn request_exports_from_other_agents(&self, instance: &Instance) -> Result<(), MessagingError>;

    /// Start or stop receiving the exports `instance` imports.
    async fn listen_to_exports_from_other_agents(
        &self,
        command: ListenerCommand,
        instance: &Instance,
    ) -> Result<(), MessagingError>;

    async fn send_message_to_the_dm(&self, message: Message) -> Result<(), MessagingError>;

    /// Start or stop receiving the DM's commands.
    async fn listen_to_the_dm(&self, command: ListenerCommand) -> Result<(), MessagingError>;
}

/// Messaging operations of the DM.
#[async_trait]
pub trait DmMessagingApi: Send + Sync {
    /// Send a command to the agent of `root_instance`.
    async fn send_message_to_agent(
        &self,
        application: &str,
        root_instance: &str,
        message: Message,
    ) -> Result<(), MessagingError>;

    /// Start or stop receiving the notifications of an application's agents.
    async fn listen_to_agent_messages(
        &self,
        application: &str,
        command: ListenerCommand,
    ) -> Result<(), MessagingError>;

    /// Withdraw every export of a dead machine's instances.
    async fn propagate_agent_termination(
        &self,
        application: &str,
        tree: &InstanceTree,
        root: &InstancePath,
    ) -> Result<(), MessagingError>;

    /// Aliases of an application's external exports.
    fn set_external_exports(&self, application: &str, aliases: BTreeMap<String, String>);

    async fn delete_messaging_server_artifacts(&self, application: &str) -> Result<(), MessagingError>;
}
