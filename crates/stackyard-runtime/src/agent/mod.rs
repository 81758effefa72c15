//! Agent side of a node: message processor and heartbeat.

pub mod heartbeat;
pub mod processor;

pub use heartbeat::{heartbeat_message, spawn_heartbeat};
pub use processor::{AgentProcessor, AgentView};
