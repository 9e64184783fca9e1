//! # Local Resource Storage
//!
//! Two storage shapes live in the read-write area:
//!
//! ```text
//! <read_write>/
//! ├── read_write_manifest.dat
//! ├── ui/main.bundle              (loose resource)
//! ├── ui/main.bundle.download     (in-flight transfer)
//! └── characters.container/       (container "characters")
//!     ├── hero.hd.bundle
//!     └── villain.bundle
//! ```
//!
//! [`LooseFiles`] maps resources to loose paths. [`DirectoryContainers`] is
//! the default [`ContainerPort`]: each container is a directory and each
//! contained resource a file inside it.
//!
//! ## Path Traversal Protection
//!
//! Resource names may contain `/` separators but never `..`, absolute
//! prefixes or empty segments. Invalid names are rejected before any path
//! is constructed.
//!
//! ## Atomic Writes
//!
//! Container writes copy the source into a uniquely named temp file,
//! fsync it, then rename it into place. Once [`ContainerPort::write_file`]
//! returns, the caller may delete the source without risking the only copy.

use crate::constants::{CONTAINER_DIR_SUFFIX, DOWNLOAD_EXTENSION};
use crate::error::{Error, Result};
use crate::identifier::ResourceId;
use crate::ports::{ContainerMode, ContainerPort};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Validates a relative resource path and joins it under `base`.
fn safe_join(base: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let valid = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        return Err(Error::UnknownResource(format!(
            "invalid resource path '{}'",
            name
        )));
    }
    Ok(base.join(relative))
}

/// Removes a file, treating "not found" as success. Returns whether it existed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Returns `<path>.download`.
pub fn download_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(DOWNLOAD_EXTENSION);
    PathBuf::from(name)
}

// =============================================================================
// Loose Files
// =============================================================================

/// Loose (uncontainerized) resources in a storage area.
#[derive(Debug, Clone)]
pub struct LooseFiles {
    root: PathBuf,
}

impl LooseFiles {
    /// Creates the area root if needed.
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| Error::StorageInitFailed {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the loose copy of `id`.
    pub fn resource_path(&self, id: &ResourceId) -> Result<PathBuf> {
        safe_join(&self.root, &id.full_name())
    }

    /// Path of the in-flight transfer for `id`.
    pub fn download_path(&self, id: &ResourceId) -> Result<PathBuf> {
        Ok(download_path_for(&self.resource_path(id)?))
    }

    /// Backing path for the container `name`.
    pub fn container_path(&self, name: &str) -> Result<PathBuf> {
        safe_join(&self.root, &format!("{}.{}", name, CONTAINER_DIR_SUFFIX))
    }

    pub fn read(&self, id: &ResourceId) -> Result<Option<Vec<u8>>> {
        match fs::read(self.resource_path(id)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the loose copy of `id`, creating parent directories.
    pub fn write(&self, id: &ResourceId, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resource_path(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn remove(&self, id: &ResourceId) -> Result<bool> {
        remove_if_exists(&self.resource_path(id)?)
    }
}

// =============================================================================
// Directory Containers
// =============================================================================

/// [`ContainerPort`] storing each container as a directory of files.
#[derive(Debug, Default)]
pub struct DirectoryContainers {
    open: BTreeMap<String, OpenContainer>,
}

#[derive(Debug)]
struct OpenContainer {
    dir: PathBuf,
    writable: bool,
}

impl DirectoryContainers {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, name: &str) -> Result<&OpenContainer> {
        self.open
            .get(name)
            .ok_or_else(|| Error::ContainerNotOpen(name.to_string()))
    }

    /// Walks a directory recursively.
    fn walk_dir(dir: &Path, callback: &mut impl FnMut(&Path)) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::walk_dir(&path, callback)?;
            } else {
                callback(&path);
            }
        }
        Ok(())
    }
}

impl ContainerPort for DirectoryContainers {
    fn open(&mut self, name: &str, path: &Path, mode: ContainerMode) -> Result<()> {
        if !path.is_dir() {
            if mode != ContainerMode::CreateOrReadWrite {
                return Err(Error::ContainerNotOpen(format!(
                    "{} ({} does not exist)",
                    name,
                    path.display()
                )));
            }
            fs::create_dir_all(path).map_err(|e| Error::StorageInitFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            info!("Created container '{}' at {}", name, path.display());
        }
        self.open.insert(
            name.to_string(),
            OpenContainer {
                dir: path.to_path_buf(),
                writable: mode != ContainerMode::Read,
            },
        );
        Ok(())
    }

    fn is_open(&self, name: &str) -> bool {
        self.open.contains_key(name)
    }

    fn read_file(&mut self, container: &str, file: &str) -> Result<Option<Vec<u8>>> {
        let path = safe_join(&self.get(container)?.dir, file)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&mut self, container: &str, file: &str, source: &Path) -> Result<bool> {
        let open = self.get(container)?;
        let fail = |reason: String| Error::ContainerWriteFailed {
            container: container.to_string(),
            resource: file.to_string(),
            reason,
        };
        if !open.writable {
            return Err(fail("container opened read-only".to_string()));
        }

        let path = safe_join(&open.dir, file)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }

        // Unique temp name so an interrupted write never shadows the target.
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        let result = (|| -> std::io::Result<()> {
            fs::copy(source, &temp_path)?;
            fs::File::open(&temp_path)?.sync_all()?;
            fs::rename(&temp_path, &path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            warn!("Container write {}/{} failed: {}", container, file, e);
            return Err(fail(e.to_string()));
        }

        debug!("Stored {} in container '{}'", file, container);
        Ok(true)
    }

    fn delete_file(&mut self, container: &str, file: &str) -> Result<bool> {
        let open = self.get(container)?;
        if !open.writable {
            return Err(Error::ContainerWriteFailed {
                container: container.to_string(),
                resource: file.to_string(),
                reason: "container opened read-only".to_string(),
            });
        }
        remove_if_exists(&safe_join(&open.dir, file)?)
    }

    fn file_count(&self, container: &str) -> Result<usize> {
        let mut count = 0;
        Self::walk_dir(&self.get(container)?.dir, &mut |_| count += 1)?;
        Ok(count)
    }

    fn destroy(&mut self, container: &str) -> Result<()> {
        if let Some(open) = self.open.remove(container) {
            match fs::remove_dir_all(&open.dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            info!("Destroyed container '{}' at {}", container, open.dir.display());
        }
        Ok(())
    }
}
