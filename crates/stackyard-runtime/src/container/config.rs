//! # Node Configuration
//!
//! Unified configuration of the messaging layer, the agents and the DM.
//!
//! All values have defaults; `from_env` overrides them and `validate`
//! rejects the combinations the runtime cannot work with.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Messaging configuration.
    pub messaging: MessagingConfig,
    /// Agent configuration.
    pub agent: AgentConfig,
    /// DM configuration.
    pub dm: DmConfig,
}

impl NodeConfig {
    /// Defaults overridden by environment variables.
    ///
    /// - `SY_DOMAIN`: messaging domain (default: default)
    /// - `SY_QUEUE_CAPACITY`: inbound queue capacity (default: 1024)
    /// - `SY_HEARTBEAT_SECS`: agent heartbeat period (default: 5)
    /// - `SY_RESOURCES_DIR`: directory of deployed resources
    /// - `SY_LOG_DIR`: directory whose files answer log requests
    /// - `SY_IP_ADDRESS`: IP address reported by the agents
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(domain) = env::var("SY_DOMAIN") {
            config.messaging.domain = domain;
        }
        if let Some(capacity) = parse_var::<usize>("SY_QUEUE_CAPACITY")? {
            config.messaging.queue_capacity = capacity;
        }
        if let Some(secs) = parse_var::<u64>("SY_HEARTBEAT_SECS")? {
            config.agent.heartbeat_secs = secs;
        }
        if let Ok(dir) = env::var("SY_RESOURCES_DIR") {
            config.agent.resources_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("SY_LOG_DIR") {
            config.agent.log_dir = Some(PathBuf::from(dir));
        }
        if let Ok(ip) = env::var("SY_IP_ADDRESS") {
            config.agent.ip_address = Some(ip);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.messaging.domain.trim().is_empty() {
            return Err(ConfigError::EmptyDomain);
        }
        if self.messaging.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.agent.heartbeat_secs == 0 {
            return Err(ConfigError::ZeroHeartbeat);
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Messaging domain must not be empty")]
    EmptyDomain,

    #[error("Queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("Heartbeat period must be at least 1 second")]
    ZeroHeartbeat,

    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// Messaging configuration.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// Domain isolating this deployment from others on the same transport.
    pub domain: String,
    /// Capacity of every inbound queue.
    pub queue_capacity: usize,
    /// Whether agents skip messaging operations while disconnected.
    pub agent_connection_required: bool,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            queue_capacity: shared_bus::DEFAULT_QUEUE_CAPACITY,
            agent_connection_required: true,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Heartbeat period in seconds.
    pub heartbeat_secs: u64,
    /// Base directory of deployed resources.
    pub resources_dir: PathBuf,
    /// Directory whose files are sent on log requests.
    pub log_dir: Option<PathBuf>,
    /// IP address reported in heartbeats.
    pub ip_address: Option<String>,
}

impl AgentConfig {
    #[must_use]
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 5,
            resources_dir: env::temp_dir().join("stackyard").join("resources"),
            log_dir: None,
            ip_address: None,
        }
    }
}

/// DM configuration.
#[derive(Debug, Clone)]
pub struct DmConfig {
    /// Messages kept per machine while it is not known alive.
    pub max_awaiting_messages: usize,
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            max_awaiting_messages: 512,
        }
    }
}
