//! # Error Types
//!
//! Errors raised while building or mutating the instance model.

use thiserror::Error;

/// Errors that can occur while manipulating the instance model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Instance names must be non-empty and contain no path separator.
    #[error("Invalid instance name: {0:?}")]
    InvalidName(String),

    /// Paths must be absolute, e.g. `/vm/server`.
    #[error("Invalid instance path: {0:?}")]
    InvalidPath(String),

    /// No instance is registered under this path.
    #[error("Instance not found: {0}")]
    NotFound(String),

    /// Sibling names must be unique.
    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    /// The parent of a new child is not in the tree.
    #[error("Parent instance not found for {0}")]
    ParentNotFound(String),
}
