//! # Manifests
//!
//! In-memory shapes of the four manifest kinds:
//!
//! | Kind        | Written by          | Carries                                        |
//! |-------------|---------------------|------------------------------------------------|
//! | Remote      | Build pipeline      | Versions, assets, resources (+compressed), containers, groups |
//! | Read-only   | Installer           | Resources, containers                          |
//! | Read-write  | This engine         | Resources, containers                          |
//! | Pack        | Build pipeline      | Resources (+compressed, +offset), data region bounds |
//!
//! Container and group membership is stored as index lists into the
//! resource table, mirroring the on-disk layout. The binary layout itself is
//! owned by a [`ManifestCodec`].

mod codec;
pub mod pack;
mod read_write;

pub use codec::{BinaryManifestCodec, ManifestCodec};
pub use read_write::{ReadWriteIndex, ReadWriteRecord};

use crate::error::{Error, Result};
use crate::identifier::{LoadKind, ResourceId};
use std::collections::BTreeMap;

// =============================================================================
// Shared
// =============================================================================

/// A named list of resource indices (a container or a group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSet {
    pub name: String,
    pub resource_indices: Vec<u32>,
}

impl IndexSet {
    pub fn new(name: impl Into<String>, resource_indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            resource_indices,
        }
    }
}

/// Maps each resource index to the single container that lists it.
///
/// Fails if an index is out of range or listed by two containers.
fn container_table(containers: &[IndexSet], resource_count: usize) -> Result<Vec<Option<String>>> {
    let mut table = vec![None; resource_count];
    for container in containers {
        for &index in &container.resource_indices {
            let slot = table.get_mut(index as usize).ok_or_else(|| {
                Error::ManifestParse(format!(
                    "container '{}' references resource index {} (of {})",
                    container.name, index, resource_count
                ))
            })?;
            if let Some(previous) = slot.replace(container.name.clone()) {
                return Err(Error::ManifestParse(format!(
                    "resource index {} listed by containers '{}' and '{}'",
                    index, previous, container.name
                )));
            }
        }
    }
    Ok(table)
}

/// Builds index-based container lists from per-resource container names.
fn index_containers<'a>(names: impl Iterator<Item = Option<&'a str>>) -> Vec<IndexSet> {
    let mut by_name: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for (index, name) in names.enumerate() {
        if let Some(name) = name {
            by_name.entry(name).or_default().push(index as u32);
        }
    }
    by_name
        .into_iter()
        .map(|(name, indices)| IndexSet::new(name, indices))
        .collect()
}

// =============================================================================
// Remote Manifest
// =============================================================================

/// Asset entry of the remote manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub name: String,
    pub dependency_indices: Vec<u32>,
}

/// Resource entry of the remote manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub id: ResourceId,
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
    pub compressed_length: u32,
    pub compressed_hash: u32,
    /// Indices into [`RemoteManifest::assets`] of the assets this resource holds.
    pub asset_indices: Vec<u32>,
}

impl RemoteResource {
    /// True when the transferred payload differs from the stored payload.
    pub fn is_compressed(&self) -> bool {
        self.length != self.compressed_length || self.hash != self.compressed_hash
    }
}

/// The target manifest describing what the local store should contain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteManifest {
    pub applicable_version: String,
    pub internal_version: i32,
    pub assets: Vec<AssetEntry>,
    pub resources: Vec<RemoteResource>,
    pub containers: Vec<IndexSet>,
    pub groups: Vec<IndexSet>,
}

impl RemoteManifest {
    /// Container name for each resource, in resource order.
    pub fn container_table(&self) -> Result<Vec<Option<String>>> {
        container_table(&self.containers, self.resources.len())
    }

    /// Checks that every cross-reference index is in range.
    pub fn validate(&self) -> Result<()> {
        self.container_table()?;
        let resource_count = self.resources.len();
        for group in &self.groups {
            if let Some(&bad) = group
                .resource_indices
                .iter()
                .find(|&&i| i as usize >= resource_count)
            {
                return Err(Error::ManifestParse(format!(
                    "group '{}' references resource index {} (of {})",
                    group.name, bad, resource_count
                )));
            }
        }
        let asset_count = self.assets.len();
        let asset_refs = self
            .resources
            .iter()
            .flat_map(|r| r.asset_indices.iter())
            .chain(self.assets.iter().flat_map(|a| a.dependency_indices.iter()));
        for &index in asset_refs {
            if index as usize >= asset_count {
                return Err(Error::ManifestParse(format!(
                    "asset index {} out of range (of {})",
                    index, asset_count
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Local Manifest
// =============================================================================

/// Resource entry of a read-only or read-write manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResource {
    pub id: ResourceId,
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
}

/// Read-only or read-write manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalManifest {
    pub resources: Vec<LocalResource>,
    pub containers: Vec<IndexSet>,
}

impl LocalManifest {
    /// Builds a manifest from resources paired with their container.
    pub fn from_entries(entries: Vec<(LocalResource, Option<String>)>) -> Self {
        let containers = index_containers(entries.iter().map(|(_, c)| c.as_deref()));
        let resources = entries.into_iter().map(|(r, _)| r).collect();
        Self {
            resources,
            containers,
        }
    }

    /// Resources paired with their container, in resource order.
    pub fn entries(&self) -> Result<Vec<(LocalResource, Option<String>)>> {
        let table = container_table(&self.containers, self.resources.len())?;
        Ok(self.resources.iter().cloned().zip(table).collect())
    }
}

// =============================================================================
// Pack Manifest
// =============================================================================

/// Resource entry of a pack archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackResource {
    pub id: ResourceId,
    pub load_kind: LoadKind,
    /// Offset relative to the start of the data region.
    pub offset: u64,
    pub length: u32,
    pub hash: u32,
    pub compressed_length: u32,
    pub compressed_hash: u32,
}

impl PackResource {
    /// True when the packed payload differs from the stored payload.
    pub fn is_compressed(&self) -> bool {
        self.length != self.compressed_length || self.hash != self.compressed_hash
    }
}

/// Index header of a pack archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackManifest {
    /// Absolute file offset of the data region.
    pub offset: u64,
    /// Size of the data region in bytes.
    pub length: u64,
    /// CRC-32 of the whole data region.
    pub hash: u32,
    pub resources: Vec<PackResource>,
}
