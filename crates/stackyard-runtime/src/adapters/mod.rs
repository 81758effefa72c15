//! Runtime adapters around the subsystem ports.

pub mod metered_client;
pub mod metered_plugin;

pub use metered_client::MeteredClient;
pub use metered_plugin::MeteredPlugin;
