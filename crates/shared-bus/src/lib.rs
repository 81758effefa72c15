//! # Shared Bus - Messaging Routing Layer
//!
//! Pub/sub addressing and routing between the DM and the agents.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────┐   publish(ctx, msg)   ┌──────────────────┐
//! │ Role client  │ ────────────────────► │  RoutingClient   │
//! │ (agent / DM) │                       │  (one per owner) │
//! └──────────────┘                       └────────┬─────────┘
//!                                                 │ resolve(ctx)
//!                                        ┌────────▼─────────┐
//!                                        │ RoutingRegistry  │  shared handle
//!                                        └────────┬─────────┘
//!                                                 │ deliver(envelope)
//!                                        ┌────────▼─────────┐
//!                                        │  MessageQueue    │  one consumer
//!                                        └──────────────────┘
//! ```
//!
//! ## Rules
//!
//! - A `MessagingContext` decides both the topic and who matches it.
//! - Messaging failures are returned to the caller, never retried here.
//! - Each owner's queue has exactly one consumer.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod context;
pub mod queue;
pub mod routing;
pub mod transport;

pub use context::{MessagingContext, RecipientKind, ThoseThat, MACHINE_TOPIC_PREFIX};
pub use queue::{DeliveryStats, DeliveryStatsSnapshot, MessageQueue};
pub use routing::{Destination, InboxDestination, RoutingClient, RoutingRegistry};
pub use transport::{MessagingClient, MessagingError, OwnerProperties};

/// Default capacity of an owner's inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// In-process client type used by the runtime and the tests.
pub type InMemoryClient = RoutingClient<InboxDestination>;

/// In-process registry type used by the runtime and the tests.
pub type InMemoryRegistry = RoutingRegistry<InboxDestination>;
