//! Domain module for the role clients
//!
//! Pure computation of what an instance publishes, independent of any
//! client.

pub mod exports;

use serde::{Deserialize, Serialize};

/// Whether to start or stop listening to a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerCommand {
    Start,
    Stop,
}

pub use exports::{add_import_messages, remove_import_messages};
