//! # Lifecycle Manager (Subsystem 2)
//!
//! State machine driving the instances of one agent through deployment,
//! start, stop and undeployment.
//!
//! ## Architecture
//!
//! - `domain/`: transition table and errors
//! - `ports/`: lifecycle API and the plugin / resource store SPI
//! - `adapters/`: plugin registry, logging plugin, directory resource store
//! - `application/`: the manager
//!
//! ## Rules
//!
//! - A request only runs when the transition table allows it from the
//!   current status.
//! - An instance starts once all its mandatory imports are resolved.
//! - Losing a mandatory import stops the subtree back to STARTING.
//! - Stop and undeploy run leaves first.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod application;
pub mod domain;
pub mod ports;

pub use adapters::{DirectoryResourceStore, LoggingPlugin, PluginRegistry, LOGGING_PLUGIN_NAME};
pub use application::LifecycleManager;
pub use domain::{LifecycleError, PluginError, ResourceError, Transition, TransitionTable};
pub use ports::{LifecycleApi, Plugin, ResourceStore};
