//! Domain module for the lifecycle manager

pub mod errors;
pub mod transitions;

pub use errors::{LifecycleError, PluginError, ResourceError};
pub use transitions::{Transition, TransitionTable};
