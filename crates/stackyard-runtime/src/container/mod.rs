//! Configuration and application model loading.

pub mod config;
pub mod model;

pub use config::{AgentConfig, ConfigError, DmConfig, MessagingConfig, NodeConfig};
pub use model::ApplicationModel;
