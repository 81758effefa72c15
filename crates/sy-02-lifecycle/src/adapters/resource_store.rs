//! Directory-backed resource store
//!
//! Resources of an instance live under
//! `<base>/<application>/<instance path>/<resource name>`.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use shared_types::{InstancePath, ResourceMap};

use crate::domain::errors::ResourceError;
use crate::ports::outbound::ResourceStore;

#[derive(Debug, Clone)]
pub struct DirectoryResourceStore {
    base: PathBuf,
}

impl DirectoryResourceStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ResourceError + '_ {
    move |source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Resource names are relative paths that stay below the instance directory.
fn check_name(name: &str) -> Result<(), ResourceError> {
    let path = Path::new(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(ResourceError::InvalidName(name.to_string()))
    }
}

impl ResourceStore for DirectoryResourceStore {
    fn delete(&self, application: &str, instance: &InstancePath) -> Result<(), ResourceError> {
        let dir = self.location(application, instance);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
            debug!(dir = %dir.display(), "Instance resources deleted");
        }
        Ok(())
    }

    fn store(
        &self,
        application: &str,
        instance: &InstancePath,
        resources: &ResourceMap,
    ) -> Result<(), ResourceError> {
        let dir = self.location(application, instance);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        for (name, content) in resources {
            check_name(name)?;
            let file = dir.join(name);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            fs::write(&file, content).map_err(io_error(&file))?;
        }
        debug!(dir = %dir.display(), files = resources.len(), "Instance resources stored");
        Ok(())
    }

    fn location(&self, application: &str, instance: &InstancePath) -> PathBuf {
        instance
            .as_str()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.base.join(application), |dir, segment| dir.join(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> InstancePath {
        InstancePath::parse(raw).unwrap()
    }

    #[test]
    fn test_store_then_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirectoryResourceStore::new(tmp.path());
        let mut resources = ResourceMap::new();
        resources.insert("deploy.sh".to_string(), b"echo deploy".to_vec());
        resources.insert("conf/server.xml".to_string(), b"<server/>".to_vec());

        let instance = path("/vm/tomcat");
        store.store("lamp", &instance, &resources).unwrap();
        let dir = tmp.path().join("lamp").join("vm").join("tomcat");
        assert_eq!(fs::read(dir.join("deploy.sh")).unwrap(), b"echo deploy");
        assert!(dir.join("conf").join("server.xml").exists());

        store.delete("lamp", &instance).unwrap();
        assert!(!dir.exists());
        store.delete("lamp", &instance).unwrap();
    }

    #[test]
    fn test_names_escaping_the_directory_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirectoryResourceStore::new(tmp.path());
        let mut resources = ResourceMap::new();
        resources.insert("../evil.sh".to_string(), Vec::new());

        let err = store.store("lamp", &path("/vm"), &resources).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidName(_)));
    }
}
