//! # Transport Contract
//!
//! What every messaging client offers to the role clients, whatever carries
//! the messages underneath (a broker, a tunnel or the in-process registry).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use shared_types::Message;

use crate::context::{MessagingContext, RecipientKind};

/// Errors surfaced by messaging operations.
///
/// They are returned to the immediate caller; clients never retry on their
/// own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// The operation needs a live connection.
    #[error("Messaging client is not connected")]
    NotConnected,

    /// The destination's inbound buffer is full.
    #[error("Inbound queue of {0} is full")]
    QueueFull(String),

    /// The destination's consumer is gone.
    #[error("Destination {0} is closed")]
    DestinationClosed(String),

    /// Publishing reached some destinations but not all of them.
    #[error("Delivery failed for {failed} of {attempted} destination(s)")]
    PartialDelivery { attempted: usize, failed: usize },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Identity of the process behind a messaging client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProperties {
    pub kind: RecipientKind,
    pub domain: String,
    pub application: Option<String>,
    /// Root instance name, for agents.
    pub root_instance: Option<String>,
}

impl OwnerProperties {
    pub fn dm(domain: impl Into<String>) -> Self {
        Self {
            kind: RecipientKind::Dm,
            domain: domain.into(),
            application: None,
            root_instance: None,
        }
    }

    pub fn agent(
        domain: impl Into<String>,
        application: impl Into<String>,
        root_instance: impl Into<String>,
    ) -> Self {
        Self {
            kind: RecipientKind::Agents,
            domain: domain.into(),
            application: Some(application.into()),
            root_instance: Some(root_instance.into()),
        }
    }

    /// Routing identity derived from the properties.
    #[must_use]
    pub fn owner_id(&self) -> String {
        match self.kind {
            RecipientKind::Dm => format!("dm@{}", self.domain),
            _ => format!(
                "agent@{}/{}/{}",
                self.domain,
                self.application.as_deref().unwrap_or_default(),
                self.root_instance.as_deref().unwrap_or_default()
            ),
        }
    }
}

impl fmt::Display for OwnerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.owner_id())
    }
}

/// Transport-agnostic messaging client.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Idempotent. Shared transports are reference-counted.
    async fn open_connection(&self) -> Result<(), MessagingError>;

    /// Idempotent. Only the last close tears a shared transport down.
    async fn close_connection(&self) -> Result<(), MessagingError>;

    fn is_connected(&self) -> bool;

    /// Whether operations may go ahead (always true for connectionless roles).
    fn can_proceed(&self) -> bool;

    async fn subscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError>;

    async fn unsubscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError>;

    async fn publish(&self, ctx: &MessagingContext, message: Message) -> Result<(), MessagingError>;

    fn set_owner_properties(&self, properties: OwnerProperties);

    fn owner_properties(&self) -> OwnerProperties;

    /// Description of the transport, for diagnostics.
    fn configuration(&self) -> BTreeMap<String, String>;

    /// Drop every server-side artifact tied to an application.
    async fn delete_messaging_server_artifacts(&self, application: &str) -> Result<(), MessagingError>;
}
