//! Plugin registry
//!
//! Maps installer names to plugins. Plugins are registered at startup and
//! looked up afterwards.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::logging_plugin::LoggingPlugin;
use crate::ports::outbound::Plugin;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in logging plugin.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(LoggingPlugin::new()));
        registry
    }

    /// Register a plugin under its own name. Replaces any previous one.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self
            .plugins
            .write()
            .insert(name.clone(), plugin)
            .is_some()
        {
            warn!(plugin = %name, "[Plugins] Replaced an already registered plugin");
        } else {
            info!(plugin = %name, "[Plugins] Registered plugin");
        }
    }

    /// Register a plugin under an explicit installer name.
    pub fn register_as(&self, installer_name: &str, plugin: Arc<dyn Plugin>) {
        self.plugins
            .write()
            .insert(installer_name.to_string(), plugin);
    }

    #[must_use]
    pub fn find(&self, installer_name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(installer_name).cloned()
    }

    /// Registered installer names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.plugins.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::logging_plugin::LOGGING_PLUGIN_NAME;

    #[test]
    fn test_builtins_and_aliases() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.find(LOGGING_PLUGIN_NAME).is_some());
        assert!(registry.find("bash").is_none());

        registry.register_as("bash", Arc::new(LoggingPlugin::new()));
        assert_eq!(registry.names(), vec!["bash".to_string(), "logger".to_string()]);
    }
}
