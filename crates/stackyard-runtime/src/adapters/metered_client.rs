//! Messaging client decorator counting publications.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use shared_bus::{MessagingClient, MessagingContext, MessagingError, OwnerProperties};
use shared_types::Message;
use stackyard_telemetry::{record_message_failed, record_message_sent};

/// Wraps a messaging client and records every publication in the node
/// metrics. Publications skipped because the client cannot proceed are
/// not counted.
pub struct MeteredClient {
    inner: Arc<dyn MessagingClient>,
}

impl MeteredClient {
    pub fn new(inner: Arc<dyn MessagingClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MessagingClient for MeteredClient {
    async fn open_connection(&self) -> Result<(), MessagingError> {
        self.inner.open_connection().await
    }

    async fn close_connection(&self) -> Result<(), MessagingError> {
        self.inner.close_connection().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn can_proceed(&self) -> bool {
        self.inner.can_proceed()
    }

    async fn subscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError> {
        self.inner.subscribe(ctx).await
    }

    async fn unsubscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError> {
        self.inner.unsubscribe(ctx).await
    }

    async fn publish(&self, ctx: &MessagingContext, message: Message) -> Result<(), MessagingError> {
        if !self.inner.can_proceed() {
            return self.inner.publish(ctx, message).await;
        }
        let kind = message.kind();
        let result = self.inner.publish(ctx, message).await;
        match &result {
            Ok(()) => record_message_sent(kind),
            Err(_) => record_message_failed(),
        }
        result
    }

    fn set_owner_properties(&self, properties: OwnerProperties) {
        self.inner.set_owner_properties(properties);
    }

    fn owner_properties(&self) -> OwnerProperties {
        self.inner.owner_properties()
    }

    fn configuration(&self) -> BTreeMap<String, String> {
        self.inner.configuration()
    }

    async fn delete_messaging_server_artifacts(&self, application: &str) -> Result<(), MessagingError> {
        self.inner.delete_messaging_server_artifacts(application).await
    }
}
