//! # Resource Registry
//!
//! The in-memory view of every resource the target manifest declares for the
//! current variant: where it is stored, whether it is ready, which assets it
//! carries, and which groups it belongs to.
//!
//! The registry is rebuilt by each reconciliation pass and updated in place
//! as the orchestrator finishes resources.

use crate::constants::DEFAULT_GROUP_NAME;
use crate::error::{Error, Result};
use crate::identifier::{LoadKind, ResourceId};
use std::collections::{BTreeMap, BTreeSet};

/// Storage area a resource is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    ReadOnly,
    ReadWrite,
}

/// Registry entry for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
    pub compressed_length: u32,
    pub container: Option<String>,
    pub area: StorageArea,
    pub ready: bool,
}

/// Asset entry: which resource holds it and which assets it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub resource: ResourceId,
    pub dependencies: Vec<String>,
}

/// A named set of resources updated together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGroup {
    members: BTreeSet<ResourceId>,
}

impl ResourceGroup {
    pub fn members(&self) -> impl Iterator<Item = &ResourceId> {
        self.members.iter()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Snapshot of a group's readiness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupProgress {
    pub total_count: usize,
    pub ready_count: usize,
    pub total_length: u64,
    pub ready_length: u64,
    pub total_compressed_length: u64,
}

impl GroupProgress {
    /// Ready fraction by length, in `[0, 1]`. An empty group is complete.
    pub fn progress(&self) -> f32 {
        if self.total_length == 0 {
            return if self.ready_count == self.total_count { 1.0 } else { 0.0 };
        }
        self.ready_length as f32 / self.total_length as f32
    }

    pub fn is_ready(&self) -> bool {
        self.ready_count == self.total_count
    }
}

/// Registry of resources, assets and groups.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    applicable_version: Option<String>,
    internal_version: Option<i32>,
    resources: BTreeMap<ResourceId, ResourceInfo>,
    assets: BTreeMap<String, AssetInfo>,
    groups: BTreeMap<String, ResourceGroup>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything; called at the start of each reconciliation pass.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_versions(&mut self, applicable_version: String, internal_version: i32) {
        self.applicable_version = Some(applicable_version);
        self.internal_version = Some(internal_version);
    }

    pub fn applicable_version(&self) -> Option<&str> {
        self.applicable_version.as_deref()
    }

    pub fn internal_version(&self) -> Option<i32> {
        self.internal_version
    }

    // =========================================================================
    // Resources
    // =========================================================================

    pub fn register(&mut self, id: ResourceId, info: ResourceInfo) {
        self.resources.insert(id, info);
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceInfo> {
        self.resources.get(id)
    }

    pub fn is_ready(&self, id: &ResourceId) -> bool {
        self.resources.get(id).is_some_and(|r| r.ready)
    }

    /// Marks a freshly updated resource ready in the read-write area.
    pub fn mark_ready(&mut self, id: &ResourceId) -> Result<()> {
        let info = self
            .resources
            .get_mut(id)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))?;
        info.ready = true;
        info.area = StorageArea::ReadWrite;
        Ok(())
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn ready_count(&self) -> usize {
        self.resources.values().filter(|r| r.ready).count()
    }

    pub fn resources(&self) -> impl Iterator<Item = (&ResourceId, &ResourceInfo)> {
        self.resources.iter()
    }

    // =========================================================================
    // Assets
    // =========================================================================

    pub fn register_asset(&mut self, name: String, info: AssetInfo) {
        self.assets.insert(name, info);
    }

    pub fn asset(&self, name: &str) -> Option<&AssetInfo> {
        self.assets.get(name)
    }

    /// Resource holding `asset`, if the asset is known.
    pub fn resource_for_asset(&self, asset: &str) -> Option<&ResourceId> {
        self.assets.get(asset).map(|a| &a.resource)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Adds `id` to group `name`, creating the group if needed.
    pub fn add_to_group(&mut self, name: &str, id: ResourceId) {
        self.groups
            .entry(name.to_string())
            .or_default()
            .members
            .insert(id);
    }

    /// Ensures a (possibly empty) group exists.
    pub fn declare_group(&mut self, name: &str) {
        self.groups.entry(name.to_string()).or_default();
    }

    pub fn group(&self, name: &str) -> Option<&ResourceGroup> {
        self.groups.get(name)
    }

    pub fn default_group(&self) -> Option<&ResourceGroup> {
        self.groups.get(DEFAULT_GROUP_NAME)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Readiness summary for group `name`.
    pub fn group_progress(&self, name: &str) -> Result<GroupProgress> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| Error::UnknownGroup(name.to_string()))?;

        let mut progress = GroupProgress {
            total_count: group.members.len(),
            ready_count: 0,
            total_length: 0,
            ready_length: 0,
            total_compressed_length: 0,
        };
        for info in group.members.iter().filter_map(|id| self.resources.get(id)) {
            progress.total_length += u64::from(info.length);
            progress.total_compressed_length += u64::from(info.compressed_length);
            if info.ready {
                progress.ready_count += 1;
                progress.ready_length += u64::from(info.length);
            }
        }
        Ok(progress)
    }
}
