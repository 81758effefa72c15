//! Error types for the lifecycle manager

use thiserror::Error;

use shared_bus::MessagingError;
use shared_types::ModelError;

/// Failure reported by a plugin.
///
/// Always recoverable: the lifecycle manager logs it and rolls the instance
/// status back, it never leaves the manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("Plugin {plugin} failed to {operation}: {reason}")]
    Failed {
        plugin: String,
        operation: &'static str,
        reason: String,
    },

    #[error("Plugin {plugin} does not support {operation}")]
    Unsupported {
        plugin: String,
        operation: &'static str,
    },
}

impl PluginError {
    pub fn failed(plugin: impl Into<String>, operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            plugin: plugin.into(),
            operation,
            reason: reason.into(),
        }
    }
}

/// Failure of the on-disk resource store.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid resource name: {0:?}")]
    InvalidName(String),
}

/// Errors escaping the lifecycle manager.
///
/// Only model and messaging failures get here; plugin failures are handled.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}
