//! Inbound Ports (Driving Ports / API)

use async_trait::async_trait;

use shared_types::{Import, InstancePath, InstanceStatus, InstanceTree, ResourceMap};

use crate::domain::errors::LifecycleError;

/// Lifecycle operations of an agent.
///
/// The caller owns the tree and is the only one mutating it, so two
/// transitions never run concurrently on one instance.
#[async_trait]
pub trait LifecycleApi: Send + Sync {
    /// Bring an instance towards `requested`.
    ///
    /// Requests not reachable in one step from the current status are
    /// ignored. `resources` are only used by a deployment.
    async fn change_instance_state(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        requested: InstanceStatus,
        resources: &ResourceMap,
    ) -> Result<(), LifecycleError>;

    /// Re-evaluate an instance after one of its imports changed.
    async fn update_state_from_imports(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        changed_import: Option<&Import>,
        changed_status: InstanceStatus,
    ) -> Result<(), LifecycleError>;

    /// Stop an instance and its subtree, leaves first.
    ///
    /// With `import_changed`, stopped instances go back to STARTING so they
    /// resume once their imports are back.
    async fn stop_subtree(
        &self,
        tree: &mut InstanceTree,
        path: &InstancePath,
        import_changed: bool,
    ) -> Result<(), LifecycleError>;
}
