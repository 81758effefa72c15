//! Application layer: role clients.

pub mod agent_client;
pub mod dm_client;

pub use agent_client::AgentClient;
pub use dm_client::DmClient;
