//! Cross-crate flows: a DM and its agents in one process.

pub mod deployment_flows;
pub mod import_flows;
