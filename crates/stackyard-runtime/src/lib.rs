//! # Stackyard Runtime
//!
//! Runs the deployment manager (DM) and its agents over the in-memory
//! routing registry.
//!
//! ## Modules
//!
//! - `container/` - configuration and application model loading
//! - `adapters/` - plugin decorators
//! - `agent/` - agent message processor and heartbeat
//! - `dm/` - DM coordinator
//! - `node` - wiring of a DM and its agents in one process
//!
//! ## Message Flow
//!
//! ```text
//! DmCoordinator ──Cmd*──→ RoutingRegistry ──→ agent queue ──→ AgentProcessor
//!       ↑                                                          │
//!       └──────────── DM queue ←── Notif* (status, heartbeat) ─────┘
//!
//! AgentProcessor ──exports / requests──→ RoutingRegistry ──→ other agents
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod agent;
pub mod container;
pub mod dm;
pub mod node;

#[cfg(test)]
mod testing;

pub use container::{ApplicationModel, NodeConfig};
pub use dm::DmCoordinator;
pub use node::NodeRuntime;
