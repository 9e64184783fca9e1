//! Borrowed view of the shared engine state.
//!
//! Components do not own the registry, the read-write index or the ports;
//! the facade lends them out per call through a [`StoreContext`].

use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::identifier::ResourceId;
use crate::manifest::{ManifestCodec, ReadWriteIndex};
use crate::ports::{ContainerMode, ContainerPort};
use crate::registry::ResourceRegistry;
use crate::storage::{LooseFiles, remove_if_exists};
use std::path::Path;
use tracing::debug;

/// Mutable state shared by the reconciler, verifier and orchestrator.
pub struct StoreContext<'a> {
    pub codec: &'a dyn ManifestCodec,
    pub containers: &'a mut dyn ContainerPort,
    /// Loose files of the read-write area.
    pub loose: &'a LooseFiles,
    pub registry: &'a mut ResourceRegistry,
    pub read_write: &'a mut ReadWriteIndex,
    pub events: &'a mut EventQueue,
}

impl StoreContext<'_> {
    /// Opens a read-write container, creating its backing storage if `create`.
    pub fn open_container(&mut self, name: &str, create: bool) -> Result<()> {
        if self.containers.is_open(name) {
            return Ok(());
        }
        let mode = if create {
            ContainerMode::CreateOrReadWrite
        } else {
            ContainerMode::ReadWrite
        };
        let path = self.loose.container_path(name)?;
        self.containers.open(name, &path, mode)
    }

    /// Persists the read-write index.
    pub fn persist_read_write(&mut self) -> Result<()> {
        self.read_write.persist(self.codec)
    }

    /// Reads the stored bytes of `id` from `container`, or the loose area.
    ///
    /// A container that cannot be opened holds nothing.
    pub fn read_stored(
        &mut self,
        id: &ResourceId,
        container: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        match container {
            Some(name) => {
                if let Err(e) = self.open_container(name, false) {
                    debug!("Container '{}' unavailable: {}", name, e);
                    return Ok(None);
                }
                self.containers.read_file(name, &id.full_name())
            }
            None => self.loose.read(id),
        }
    }

    /// Deletes the stored bytes of `id`. Returns whether anything was removed.
    pub fn delete_stored(&mut self, id: &ResourceId, container: Option<&str>) -> Result<bool> {
        match container {
            Some(name) => {
                if let Err(e) = self.open_container(name, false) {
                    debug!("Container '{}' unavailable: {}", name, e);
                    return Ok(false);
                }
                self.containers.delete_file(name, &id.full_name())
            }
            None => self.loose.remove(id),
        }
    }

    /// Moves the file at `source` into `container` as `id`.
    ///
    /// `source` is deleted only after the container write succeeded.
    pub fn store_in_container(
        &mut self,
        id: &ResourceId,
        container: &str,
        source: &Path,
    ) -> Result<()> {
        self.open_container(container, true)?;
        if !self.containers.write_file(container, &id.full_name(), source)? {
            return Err(Error::ContainerWriteFailed {
                container: container.to_string(),
                resource: id.to_string(),
                reason: "write rejected".to_string(),
            });
        }
        remove_if_exists(source)?;
        Ok(())
    }
}
