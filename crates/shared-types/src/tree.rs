//! # Instance Tree
//!
//! Arena holding one application's (or one agent's) instance hierarchy.
//!
//! Instances are stored by path. A parent owns the ordered list of its
//! children's keys; a child only stores its parent's key. Removing a node
//! removes its whole subtree, so a parent always outlives its children.

use std::collections::HashMap;

use crate::entities::{Instance, InstancePath, InstanceSnapshot, InstanceStatus, IP_ADDRESS_KEY};
use crate::errors::ModelError;

/// Arena of instances keyed by path.
#[derive(Debug, Clone, Default)]
pub struct InstanceTree {
    instances: HashMap<InstancePath, Instance>,
    roots: Vec<InstancePath>,
}

impl InstanceTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a root instance.
    pub fn insert_root(&mut self, instance: Instance) -> Result<InstancePath, ModelError> {
        if !instance.path.is_root() {
            return Err(ModelError::InvalidPath(instance.path.to_string()));
        }
        if self.instances.contains_key(&instance.path) {
            return Err(ModelError::AlreadyExists(instance.path.to_string()));
        }
        let path = instance.path.clone();
        self.roots.push(path.clone());
        self.instances.insert(path.clone(), instance);
        Ok(path)
    }

    /// Insert a child instance under its parent (taken from its path).
    pub fn insert_child(&mut self, instance: Instance) -> Result<InstancePath, ModelError> {
        let Some(parent_path) = instance.path.parent() else {
            return self.insert_root(instance);
        };
        if self.instances.contains_key(&instance.path) {
            return Err(ModelError::AlreadyExists(instance.path.to_string()));
        }
        let Some(parent) = self.instances.get_mut(&parent_path) else {
            return Err(ModelError::ParentNotFound(instance.path.to_string()));
        };

        let path = instance.path.clone();
        parent.children.push(path.clone());
        let mut instance = instance;
        instance.parent = Some(parent_path);
        if let Some(ip) = parent.data.get(IP_ADDRESS_KEY).cloned() {
            instance.data.entry(IP_ADDRESS_KEY.to_string()).or_insert(ip);
        }
        self.instances.insert(path.clone(), instance);
        Ok(path)
    }

    /// Insert a snapshot (and its descendants) under `parent`, or as a root.
    pub fn insert_snapshot(
        &mut self,
        parent: Option<&InstancePath>,
        snapshot: &InstanceSnapshot,
    ) -> Result<InstancePath, ModelError> {
        let path = match parent {
            Some(p) => p.child(&snapshot.name)?,
            None => InstancePath::root(&snapshot.name)?,
        };

        let mut instance = Instance::new(path, snapshot.component.clone());
        instance.status = snapshot.status;
        instance.overridden_exports = snapshot.overridden_exports.clone();
        instance.data = snapshot.data.clone();
        instance.channels = snapshot.channels.clone();

        let path = match parent {
            Some(_) => self.insert_child(instance)?,
            None => self.insert_root(instance)?,
        };
        for child in &snapshot.children {
            self.insert_snapshot(Some(&path), child)?;
        }
        Ok(path)
    }

    /// Remove an instance and its whole subtree.
    pub fn remove(&mut self, path: &InstancePath) -> Result<Vec<Instance>, ModelError> {
        let subtree = self.hierarchical_list(path)?;
        match path.parent() {
            Some(parent_path) => {
                if let Some(parent) = self.instances.get_mut(&parent_path) {
                    parent.children.retain(|c| c != path);
                }
            }
            None => self.roots.retain(|r| r != path),
        }

        Ok(subtree
            .iter()
            .filter_map(|p| self.instances.remove(p))
            .collect())
    }

    #[must_use]
    pub fn get(&self, path: &InstancePath) -> Option<&Instance> {
        self.instances.get(path)
    }

    pub fn get_mut(&mut self, path: &InstancePath) -> Option<&mut Instance> {
        self.instances.get_mut(path)
    }

    /// Look up an instance, failing with `NotFound`.
    pub fn require(&self, path: &InstancePath) -> Result<&Instance, ModelError> {
        self.instances
            .get(path)
            .ok_or_else(|| ModelError::NotFound(path.to_string()))
    }

    /// Status of an instance, if present.
    #[must_use]
    pub fn status(&self, path: &InstancePath) -> Option<InstanceStatus> {
        self.instances.get(path).map(|i| i.status)
    }

    /// Set the status of an instance.
    pub fn set_status(
        &mut self,
        path: &InstancePath,
        status: InstanceStatus,
    ) -> Result<(), ModelError> {
        let instance = self
            .instances
            .get_mut(path)
            .ok_or_else(|| ModelError::NotFound(path.to_string()))?;
        instance.status = status;
        Ok(())
    }

    /// Parent of an instance, if it has one.
    #[must_use]
    pub fn parent_of(&self, path: &InstancePath) -> Option<&Instance> {
        self.instances
            .get(path)
            .and_then(|i| i.parent.as_ref())
            .and_then(|p| self.instances.get(p))
    }

    /// Root instance of the machine `path` lives on.
    #[must_use]
    pub fn root_of(&self, path: &InstancePath) -> Option<&Instance> {
        self.instances.get(&path.root_path())
    }

    /// Subtree of `path` in root-to-leaf (pre-order) order, `path` first.
    pub fn hierarchical_list(&self, path: &InstancePath) -> Result<Vec<InstancePath>, ModelError> {
        if !self.instances.contains_key(path) {
            return Err(ModelError::NotFound(path.to_string()));
        }

        let mut result = Vec::new();
        let mut stack = vec![path.clone()];
        while let Some(current) = stack.pop() {
            if let Some(instance) = self.instances.get(&current) {
                // Reverse push keeps siblings in insertion order.
                stack.extend(instance.children.iter().rev().cloned());
            }
            result.push(current);
        }
        Ok(result)
    }

    /// Root paths, in insertion order.
    #[must_use]
    pub fn roots(&self) -> &[InstancePath] {
        &self.roots
    }

    /// Every instance path of the tree.
    pub fn paths(&self) -> impl Iterator<Item = &InstancePath> {
        self.instances.keys()
    }

    /// Every instance of the tree.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Record the machine IP on a root and on all its descendants.
    pub fn set_ip_address(&mut self, root: &InstancePath, ip: &str) -> Result<(), ModelError> {
        for path in self.hierarchical_list(root)? {
            if let Some(instance) = self.instances.get_mut(&path) {
                instance
                    .data
                    .insert(IP_ADDRESS_KEY.to_string(), ip.to_string());
            }
        }
        Ok(())
    }

    /// Recursive serializable view of a subtree.
    pub fn snapshot(&self, path: &InstancePath) -> Result<InstanceSnapshot, ModelError> {
        let instance = self.require(path)?;
        let children = instance
            .children
            .iter()
            .map(|c| self.snapshot(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(InstanceSnapshot {
            name: instance.name.clone(),
            component: instance.component.clone(),
            status: instance.status,
            overridden_exports: instance.overridden_exports.clone(),
            data: instance.data.clone(),
            channels: instance.channels.clone(),
            children,
        })
    }

    /// Flat `(path, status)` view, sorted by path.
    #[must_use]
    pub fn statuses(&self) -> Vec<(InstancePath, InstanceStatus)> {
        let mut result: Vec<_> = self
            .instances
            .values()
            .map(|i| (i.path.clone(), i.status))
            .collect();
        result.sort();
        result
    }
}
