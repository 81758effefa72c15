//! Ports module for the role clients
//!
//! Inbound ports are the operations the agent and the DM run on top of a
//! messaging client. The outbound port is `shared_bus::MessagingClient`.

pub mod inbound;

pub use inbound::{AgentMessagingApi, DmMessagingApi};
