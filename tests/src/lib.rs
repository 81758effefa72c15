//! # Stackyard Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Application models, node setup, polling helpers
//! └── integration/      # DM + agents end to end over the routing registry
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p sy-tests
//! cargo bench -p sy-tests
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

#[cfg(test)]
pub mod fixtures;
pub mod integration;
