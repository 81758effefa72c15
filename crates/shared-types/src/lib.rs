//! # Shared Types Crate
//!
//! Deployment model and message catalog shared by the DM, the agents and
//! every subsystem crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: instances, imports and messages are defined
//!   here and nowhere else.
//! - **Arena Ownership**: an `InstanceTree` owns every instance; parents and
//!   children refer to each other by `InstancePath`.
//! - **Immutable Messages**: a `Message` is moved to its destination on send.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod ipc;
pub mod tree;
pub mod variables;

pub use entities::*;
pub use envelope::{now_millis, Envelope};
pub use errors::*;
pub use ipc::*;
pub use tree::InstanceTree;
