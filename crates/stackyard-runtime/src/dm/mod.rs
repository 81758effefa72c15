//! DM side of a node: application bookkeeping and agent commands.

pub mod coordinator;

pub use coordinator::{DmCoordinator, MachineState};
