//! Application layer for the lifecycle manager

pub mod manager;

pub use manager::LifecycleManager;
