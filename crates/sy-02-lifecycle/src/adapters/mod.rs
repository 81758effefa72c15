//! Adapters: built-in plugins, plugin registry and resource store.

pub mod logging_plugin;
pub mod plugin_registry;
pub mod resource_store;

pub use logging_plugin::{LoggingPlugin, LOGGING_PLUGIN_NAME};
pub use plugin_registry::PluginRegistry;
pub use resource_store::DirectoryResourceStore;
