//! # SY-01: Messaging Role Clients
//!
//! Agent-side and DM-side messaging operations, built on the transport
//! contract of `shared-bus`.
//!
//! ## Architecture
//!
//! - **Domain**: export publication messages, `ListenerCommand`
//! - **Ports**: Inbound (`AgentMessagingApi`, `DmMessagingApi`); the outbound
//!   port is `shared_bus::MessagingClient`
//! - **Application**: `AgentClient`, `DmClient`
//!
//! ## Topics used
//!
//! | Operation | Context |
//! |---|---|
//! | publish / unpublish exports | `those.that.import.<prefix>` |
//! | listen to export requests | `those.that.export.<prefix>` |
//! | request exports | `those.that.export.<prefix>` |
//! | listen to exports | `those.that.import.<prefix>` |
//! | agent to DM | `<application>` |
//! | DM to agent | `machine.<root>` |

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod application;
pub mod domain;
pub mod ports;

pub use application::{AgentClient, DmClient};
pub use domain::ListenerCommand;
pub use ports::inbound::{AgentMessagingApi, DmMessagingApi};
