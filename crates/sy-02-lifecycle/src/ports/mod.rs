//! Ports module for the lifecycle manager
//!
//! Defines inbound (API) and outbound (SPI) port traits.

pub mod inbound;
pub mod outbound;

pub use inbound::LifecycleApi;
pub use outbound::{Plugin, ResourceStore};
