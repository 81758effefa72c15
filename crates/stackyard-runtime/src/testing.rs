//! Test doubles and fixtures shared by the runtime's unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use shared_bus::MessagingError;
use shared_types::{Component, ImportedVariable, Instance, InstancePath, InstanceTree, Message};
use sy_01_messaging::{AgentMessagingApi, DmMessagingApi, ListenerCommand};

/// Agent messaging double keeping every message sent to the DM.
pub struct RecordingAgent {
    root: String,
    sent: Mutex<Vec<Message>>,
}

impl RecordingAgent {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn notifications(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|m| matches!(m, Message::NotifInstanceChanged { .. }))
            .collect()
    }
}

#[async_trait]
impl AgentMessagingApi for RecordingAgent {
    fn application(&self) -> String {
        "app".to_string()
    }

    fn root_instance(&self) -> String {
        self.root.clone()
    }

    fn set_application(&self, _application: &str) {}

    fn set_external_exports(&self, _aliases: BTreeMap<String, String>) {}

    async fn publish_exports(&self, _instance: &Instance) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn publish_exports_for_prefix(&self, _instance: &Instance, _prefix: &str) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn unpublish_exports(&self, _instance: &Instance) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn listen_to_requests_from_other_agents(
        &self,
        _command: ListenerCommand,
        _instance: &Instance,
    ) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn request_exports_from_other_agents(&self, _instance: &Instance) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn listen_to_exports_from_other_agents(
        &self,
        _command: ListenerCommand,
        _instance: &Instance,
    ) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn send_message_to_the_dm(&self, message: Message) -> Result<(), MessagingError> {
        self.sent.lock().push(message);
        Ok(())
    }

    async fn listen_to_the_dm(&self, _command: ListenerCommand) -> Result<(), MessagingError> {
        Ok(())
    }
}

/// DM messaging double keeping what the DM asked for.
#[derive(Default)]
pub struct RecordingDm {
    sent: Mutex<Vec<(String, Message)>>,
    terminations: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    send_budget: Mutex<Option<usize>>,
}

impl RecordingDm {
    /// Accept only `budget` more sends, then fail with a full queue.
    /// `None` lifts the limit.
    pub fn limit_sends(&self, budget: Option<usize>) {
        *self.send_budget.lock() = budget;
    }

    /// Messages sent to agents, with the target root.
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().clone()
    }

    pub fn terminations(&self) -> Vec<(String, String)> {
        self.terminations.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl DmMessagingApi for RecordingDm {
    async fn send_message_to_agent(
        &self,
        _application: &str,
        root_instance: &str,
        message: Message,
    ) -> Result<(), MessagingError> {
        if let Some(budget) = self.send_budget.lock().as_mut() {
            if *budget == 0 {
                return Err(MessagingError::QueueFull(format!("agent {root_instance}")));
            }
            *budget -= 1;
        }
        self.sent.lock().push((root_instance.to_string(), message));
        Ok(())
    }

    async fn listen_to_agent_messages(
        &self,
        _application: &str,
        _command: ListenerCommand,
    ) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn propagate_agent_termination(
        &self,
        application: &str,
        _tree: &InstanceTree,
        root: &InstancePath,
    ) -> Result<(), MessagingError> {
        self.terminations
            .lock()
            .push((application.to_string(), root.to_string()));
        Ok(())
    }

    fn set_external_exports(&self, _application: &str, _aliases: BTreeMap<String, String>) {}

    async fn delete_messaging_server_artifacts(&self, application: &str) -> Result<(), MessagingError> {
        self.deleted.lock().push(application.to_string());
        Ok(())
    }
}

pub fn db_component() -> Component {
    Component::new("MySQL", "logger")
        .exports("MySQL.ip", Some("10.0.0.3"))
        .exports("MySQL.port", Some("3306"))
}

pub fn web_component() -> Component {
    Component::new("Tomcat", "logger")
        .exports("Tomcat.port", Some("8080"))
        .imports(ImportedVariable::required("MySQL.ip"))
        .imports(ImportedVariable::required("MySQL.port"))
}

pub fn app_component() -> Component {
    Component::new("App", "logger")
}
