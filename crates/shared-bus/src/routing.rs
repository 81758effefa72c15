//! # Routing Client
//!
//! Transport-agnostic pub/sub engine shared by every role.
//!
//! ## Pieces
//!
//! - [`RoutingRegistry`]: the explicit shared handle. Holds each owner's
//!   subscriptions and destination, the static routes and the connection
//!   reference count. Cloning it shares the same state.
//! - [`RoutingClient`]: one owner's view of the registry, implementing
//!   [`MessagingClient`].
//! - [`InboxDestination`]: destination handle delivering into an owner's
//!   [`MessageQueue`].
//!
//! ## Resolution
//!
//! `publish` resolves static routes first, then the owners (other than the
//! publisher) subscribed to an equal context. No destination means no
//! subscriber: the message is dropped without error.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use shared_types::{Envelope, Message};

use crate::context::{MessagingContext, RecipientKind};
use crate::queue::{DeliveryStats, MessageQueue};
use crate::transport::{MessagingClient, MessagingError, OwnerProperties};

// =============================================================================
// DESTINATIONS
// =============================================================================

/// Opaque handle a message can be delivered to.
pub trait Destination: Clone + Send + Sync + 'static {
    /// Hand an envelope over. Must preserve per-destination send order.
    fn deliver(&self, envelope: Envelope) -> Result<(), MessagingError>;
}

/// Delivers into an owner's [`MessageQueue`].
#[derive(Clone)]
pub struct InboxDestination {
    owner: String,
    sender: mpsc::Sender<Envelope>,
    stats: Arc<DeliveryStats>,
}

impl InboxDestination {
    pub fn new(owner: impl Into<String>, queue: &MessageQueue) -> Self {
        Self {
            owner: owner.into(),
            sender: queue.sender(),
            stats: queue.stats(),
        }
    }
}

impl Destination for InboxDestination {
    fn deliver(&self, envelope: Envelope) -> Result<(), MessagingError> {
        match self.sender.try_send(envelope) {
            Ok(()) => {
                self.stats.record_received();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_failed_reception();
                Err(MessagingError::QueueFull(self.owner.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.record_failed_reception();
                Err(MessagingError::DestinationClosed(self.owner.clone()))
            }
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

struct RegistryState<D> {
    subscriptions: HashMap<String, HashSet<MessagingContext>>,
    destinations: HashMap<String, D>,
    static_routes: HashMap<String, (String, D)>,
    connections: usize,
}

impl<D> Default for RegistryState<D> {
    fn default() -> Self {
        Self {
            subscriptions: HashMap::new(),
            destinations: HashMap::new(),
            static_routes: HashMap::new(),
            connections: 0,
        }
    }
}

/// Shared routing state of every client on one transport.
pub struct RoutingRegistry<D> {
    state: Arc<RwLock<RegistryState<D>>>,
}

impl<D> Clone for RoutingRegistry<D> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<D: Destination> Default for RoutingRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Destination> RoutingRegistry<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Add a subscription. Returns false if it was already there.
    pub fn subscribe(&self, owner: &str, ctx: &MessagingContext) -> bool {
        self.state
            .write()
            .subscriptions
            .entry(owner.to_string())
            .or_default()
            .insert(ctx.clone())
    }

    /// Remove a subscription. Returns false if it was not there.
    pub fn unsubscribe(&self, owner: &str, ctx: &MessagingContext) -> bool {
        let mut state = self.state.write();
        let Some(set) = state.subscriptions.get_mut(owner) else {
            return false;
        };
        let removed = set.remove(ctx);
        if set.is_empty() {
            state.subscriptions.remove(owner);
        }
        removed
    }

    /// Current subscriptions of an owner.
    #[must_use]
    pub fn subscriptions(&self, owner: &str) -> HashSet<MessagingContext> {
        self.state
            .read()
            .subscriptions
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    pub fn register_destination(&self, owner: &str, destination: D) {
        self.state
            .write()
            .destinations
            .insert(owner.to_string(), destination);
    }

    /// Forget an owner's destination and subscriptions.
    pub fn remove_owner(&self, owner: &str) {
        let mut state = self.state.write();
        state.destinations.remove(owner);
        state.subscriptions.remove(owner);
        state.static_routes.retain(|_, (o, _)| o.as_str() != owner);
    }

    /// Move an owner's destination, subscriptions and static routes to a new id.
    pub fn rename_owner(&self, old: &str, new: &str) {
        let mut state = self.state.write();
        if let Some(destination) = state.destinations.remove(old) {
            state.destinations.insert(new.to_string(), destination);
        }
        if let Some(subs) = state.subscriptions.remove(old) {
            state.subscriptions.insert(new.to_string(), subs);
        }
        for (owner, _) in state.static_routes.values_mut() {
            if owner.as_str() == old {
                *owner = new.to_string();
            }
        }
    }

    /// Route every context with this context's route key to `owner`.
    pub fn add_static_route(&self, ctx: &MessagingContext, owner: &str, destination: D) {
        self.state
            .write()
            .static_routes
            .insert(ctx.route_key(), (owner.to_string(), destination));
    }

    pub fn remove_static_route(&self, ctx: &MessagingContext) {
        self.state.write().static_routes.remove(&ctx.route_key());
    }

    /// Destinations a message published by `sender` on `ctx` goes to.
    #[must_use]
    pub fn resolve(&self, sender: &str, ctx: &MessagingContext) -> Vec<(String, D)> {
        let state = self.state.read();
        if let Some((owner, destination)) = state.static_routes.get(&ctx.route_key()) {
            return vec![(owner.clone(), destination.clone())];
        }

        let mut result: Vec<(String, D)> = state
            .subscriptions
            .iter()
            .filter(|(owner, subs)| owner.as_str() != sender && subs.contains(ctx))
            .filter_map(|(owner, _)| {
                state
                    .destinations
                    .get(owner)
                    .map(|d| (owner.clone(), d.clone()))
            })
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Drop every subscription scoped to `application`. Returns how many.
    pub fn drop_application(&self, application: &str) -> usize {
        let mut state = self.state.write();
        let mut dropped = 0;
        for subs in state.subscriptions.values_mut() {
            let before = subs.len();
            subs.retain(|ctx| {
                ctx.kind() == RecipientKind::InterApp || ctx.application_name() != Some(application)
            });
            dropped += before - subs.len();
        }
        state.subscriptions.retain(|_, subs| !subs.is_empty());
        dropped
    }

    /// Increment the connection count; returns the new count.
    pub fn acquire_connection(&self) -> usize {
        let mut state = self.state.write();
        state.connections += 1;
        state.connections
    }

    /// Decrement the connection count; returns the new count.
    pub fn release_connection(&self) -> usize {
        let mut state = self.state.write();
        state.connections = state.connections.saturating_sub(1);
        state.connections
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections
    }

    /// Number of owners with a registered destination.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.state.read().destinations.len()
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// One owner's messaging client over a [`RoutingRegistry`].
pub struct RoutingClient<D: Destination> {
    registry: RoutingRegistry<D>,
    destination: D,
    stats: Arc<DeliveryStats>,
    owner: RwLock<OwnerProperties>,
    connected: AtomicBool,
    connection_is_required: bool,
}

impl<D: Destination> RoutingClient<D> {
    pub fn new(
        registry: RoutingRegistry<D>,
        owner: OwnerProperties,
        destination: D,
        stats: Arc<DeliveryStats>,
        connection_is_required: bool,
    ) -> Self {
        Self {
            registry,
            destination,
            stats,
            owner: RwLock::new(owner),
            connected: AtomicBool::new(false),
            connection_is_required,
        }
    }

    #[must_use]
    pub fn owner_id(&self) -> String {
        self.owner.read().owner_id()
    }

    #[must_use]
    pub fn registry(&self) -> &RoutingRegistry<D> {
        &self.registry
    }

    /// Current subscriptions of this client.
    #[must_use]
    pub fn subscriptions(&self) -> HashSet<MessagingContext> {
        self.registry.subscriptions(&self.owner_id())
    }

    fn dm_route(&self) -> Option<MessagingContext> {
        let owner = self.owner.read();
        (owner.kind == RecipientKind::Dm).then(|| MessagingContext::for_dm(&owner.domain, None))
    }
}

impl RoutingClient<InboxDestination> {
    /// Client delivering into `queue`.
    pub fn with_queue(
        registry: RoutingRegistry<InboxDestination>,
        owner: OwnerProperties,
        queue: &MessageQueue,
        connection_is_required: bool,
    ) -> Self {
        let destination = InboxDestination::new(owner.owner_id(), queue);
        Self::new(registry, owner, destination, queue.stats(), connection_is_required)
    }
}

#[async_trait]
impl<D: Destination> MessagingClient for RoutingClient<D> {
    async fn open_connection(&self) -> Result<(), MessagingError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let owner = self.owner_id();
        let count = self.registry.acquire_connection();
        self.registry
            .register_destination(&owner, self.destination.clone());
        if let Some(ctx) = self.dm_route() {
            self.registry
                .add_static_route(&ctx, &owner, self.destination.clone());
        }
        info!(owner = %owner, connections = count, "Messaging connection opened");
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), MessagingError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let owner = self.owner_id();
        self.registry.remove_owner(&owner);
        let count = self.registry.release_connection();
        if count == 0 {
            info!(owner = %owner, "Last messaging connection closed, transport released");
        } else {
            info!(owner = %owner, connections = count, "Messaging connection closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn can_proceed(&self) -> bool {
        !self.connection_is_required || self.is_connected()
    }

    async fn subscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError> {
        if !self.can_proceed() {
            debug!(topic = %ctx.topic(), "Not connected, subscription skipped");
            return Ok(());
        }
        let owner = self.owner_id();
        if self.registry.subscribe(&owner, ctx) {
            debug!(owner = %owner, context = %ctx, "Subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError> {
        if !self.can_proceed() {
            debug!(topic = %ctx.topic(), "Not connected, unsubscription skipped");
            return Ok(());
        }
        let owner = self.owner_id();
        if self.registry.unsubscribe(&owner, ctx) {
            debug!(owner = %owner, context = %ctx, "Unsubscribed");
        }
        Ok(())
    }

    async fn publish(&self, ctx: &MessagingContext, message: Message) -> Result<(), MessagingError> {
        if !self.can_proceed() {
            debug!(topic = %ctx.topic(), kind = message.kind(), "Not connected, message not published");
            return Ok(());
        }

        let owner = self.owner_id();
        let targets = self.registry.resolve(&owner, ctx);
        if targets.is_empty() {
            if ctx.kind() == RecipientKind::Dm {
                warn!(kind = message.kind(), context = %ctx, "No DM reachable, message dropped");
            } else {
                debug!(kind = message.kind(), context = %ctx, "No subscriber, message dropped");
            }
            return Ok(());
        }

        let topic = ctx.topic();
        let attempted = targets.len();
        let mut errors = Vec::new();
        for (target, destination) in targets {
            let envelope = Envelope::new(owner.clone(), topic.clone(), message.clone());
            match destination.deliver(envelope) {
                Ok(()) => {
                    self.stats.record_sent();
                    debug!(from = %owner, to = %target, topic = %topic, kind = message.kind(), "Message delivered");
                }
                Err(e) => {
                    self.stats.record_failed_sending();
                    warn!(from = %owner, to = %target, error = %e, "Delivery failed");
                    errors.push(e);
                }
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 if attempted == 1 => Err(errors.remove(0)),
            failed => Err(MessagingError::PartialDelivery { attempted, failed }),
        }
    }

    fn set_owner_properties(&self, properties: OwnerProperties) {
        let old = self.owner_id();
        let new = properties.owner_id();
        *self.owner.write() = properties;
        if old != new && self.is_connected() {
            self.registry.rename_owner(&old, &new);
            debug!(old = %old, new = %new, "Owner identity changed");
        }
    }

    fn owner_properties(&self) -> OwnerProperties {
        self.owner.read().clone()
    }

    fn configuration(&self) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();
        config.insert("transport".to_string(), "in-memory".to_string());
        config.insert("owner".to_string(), self.owner_id());
        config.insert(
            "connection.required".to_string(),
            self.connection_is_required.to_string(),
        );
        config.insert(
            "connections".to_string(),
            self.registry.connection_count().to_string(),
        );
        config
    }

    async fn delete_messaging_server_artifacts(&self, application: &str) -> Result<(), MessagingError> {
        let dropped = self.registry.drop_application(application);
        info!(application = %application, subscriptions = dropped, "Messaging artifacts deleted");
        Ok(())
    }
}
