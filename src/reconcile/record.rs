//! Per-resource reconciliation records and the classification rule.

use crate::error::{Error, Result, SnapshotSource};
use crate::identifier::{LoadKind, ResourceId};

/// What the target manifest says about a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
    pub compressed_length: u32,
    pub compressed_hash: u32,
    pub container: Option<String>,
}

/// What a local manifest says about a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
    pub container: Option<String>,
}

/// Reconciliation status of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStatus {
    /// Not in the target manifest.
    Disuse,
    /// Belongs to another variant.
    Unavailable,
    /// Served unchanged from the read-only area.
    StorageInReadOnly,
    /// Served from the read-write area, possibly after relocation.
    StorageInReadWrite,
    /// Must be fetched.
    Update,
}

/// Classification result with the side effects it requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: ReconciliationStatus,
    /// Delete the read-write copy.
    pub need_remove: bool,
    /// Move the read-write copy out of its container into a loose file.
    pub need_relocate_out: bool,
    /// Move the loose read-write copy into the target container.
    pub need_relocate_in: bool,
}

impl CheckOutcome {
    fn new(status: ReconciliationStatus, need_remove: bool) -> Self {
        Self {
            status,
            need_remove,
            need_relocate_out: false,
            need_relocate_in: false,
        }
    }

    pub fn needs_relocation(&self) -> bool {
        self.need_relocate_out || self.need_relocate_in
    }
}

/// Up to one snapshot from each of the three manifests.
///
/// Each snapshot may be set once; a second write is a
/// [`Error::DuplicateSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct CheckRecord {
    remote: Option<RemoteSnapshot>,
    read_only: Option<LocalSnapshot>,
    read_write: Option<LocalSnapshot>,
}

impl CheckRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote(&mut self, id: &ResourceId, snapshot: RemoteSnapshot) -> Result<()> {
        set_once(&mut self.remote, snapshot, id, SnapshotSource::Remote)
    }

    pub fn set_read_only(&mut self, id: &ResourceId, snapshot: LocalSnapshot) -> Result<()> {
        set_once(&mut self.read_only, snapshot, id, SnapshotSource::ReadOnly)
    }

    pub fn set_read_write(&mut self, id: &ResourceId, snapshot: LocalSnapshot) -> Result<()> {
        set_once(&mut self.read_write, snapshot, id, SnapshotSource::ReadWrite)
    }

    pub fn remote(&self) -> Option<&RemoteSnapshot> {
        self.remote.as_ref()
    }

    pub fn read_only(&self) -> Option<&LocalSnapshot> {
        self.read_only.as_ref()
    }

    pub fn read_write(&self) -> Option<&LocalSnapshot> {
        self.read_write.as_ref()
    }

    /// Classifies the resource. Pure: depends only on the snapshots and inputs.
    pub fn classify(
        &self,
        id: &ResourceId,
        current_variant: Option<&str>,
        ignore_other_variant: bool,
    ) -> CheckOutcome {
        use ReconciliationStatus::*;

        let has_read_write = self.read_write.is_some();
        let Some(remote) = &self.remote else {
            return CheckOutcome::new(Disuse, has_read_write);
        };

        if !id.matches_variant(current_variant) {
            return CheckOutcome::new(Unavailable, !ignore_other_variant && has_read_write);
        }

        if let Some(read_only) = &self.read_only
            && read_only.container == remote.container
            && same_content(read_only, remote)
        {
            return CheckOutcome::new(StorageInReadOnly, has_read_write);
        }

        if let Some(read_write) = &self.read_write
            && same_content(read_write, remote)
        {
            let need_relocate_out = read_write.container.is_some()
                && read_write.container != remote.container;
            let need_relocate_in =
                remote.container.is_some() && remote.container != read_write.container;
            return CheckOutcome {
                status: StorageInReadWrite,
                need_remove: false,
                need_relocate_out,
                need_relocate_in,
            };
        }

        CheckOutcome::new(Update, has_read_write)
    }
}

fn same_content(local: &LocalSnapshot, remote: &RemoteSnapshot) -> bool {
    local.load_kind == remote.load_kind && local.length == remote.length && local.hash == remote.hash
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    id: &ResourceId,
    origin: SnapshotSource,
) -> Result<()> {
    if slot.is_some() {
        return Err(Error::DuplicateSnapshot {
            resource: id.to_string(),
            origin,
        });
    }
    *slot = Some(value);
    Ok(())
}
