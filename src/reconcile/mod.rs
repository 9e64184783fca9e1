//! # Manifest Reconciliation
//!
//! Combines the target manifest with the read-only and read-write local
//! manifests into one [`CheckRecord`] per resource, classifies each record
//! and carries out what the classification requires:
//!
//! | Status               | Registry        | Side effects                          |
//! |----------------------|-----------------|---------------------------------------|
//! | `Disuse`             | -               | remove read-write copy if present     |
//! | `Unavailable`        | -               | remove read-write copy unless ignored |
//! | `StorageInReadOnly`  | ready, RO area  | remove read-write copy if present     |
//! | `StorageInReadWrite` | ready, RW area  | relocate between loose and container  |
//! | `Update`             | not ready       | emit update candidate                 |
//!
//! Relocation always copies before it deletes: a container entry is
//! extracted to a loose file and only then removed from the container, and
//! a loose file is written into its container and only then deleted.
//!
//! If anything moved or was removed, the read-write manifest is rewritten
//! and containers left without recorded resources are destroyed.

mod record;

pub use record::{CheckOutcome, CheckRecord, LocalSnapshot, ReconciliationStatus, RemoteSnapshot};

use crate::constants::DEFAULT_GROUP_NAME;
use crate::context::StoreContext;
use crate::error::{Error, Result, SnapshotSource};
use crate::events::{CheckComplete, Event};
use crate::identifier::ResourceId;
use crate::manifest::{LocalManifest, LocalResource, RemoteManifest};
use crate::ports::ByteLoader;
use crate::registry::{AssetInfo, ResourceInfo, StorageArea};
use crate::update::UpdateCandidate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Summary and candidates of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub summary: CheckComplete,
    pub candidates: Vec<UpdateCandidate>,
}

/// Classifies resources across the three manifests.
#[derive(Debug)]
pub struct ManifestReconciler {
    remote_path: PathBuf,
    read_only_path: PathBuf,
    records: BTreeMap<ResourceId, CheckRecord>,
    remote: Option<RemoteManifest>,
    remote_ready: bool,
    read_only_ready: bool,
    read_write_ready: bool,
}

impl ManifestReconciler {
    /// `read_only_path` is the shipped manifest; the read-write manifest is
    /// the one backing the context's index.
    pub fn new(remote_path: PathBuf, read_only_path: PathBuf) -> Self {
        Self {
            remote_path,
            read_only_path,
            records: BTreeMap::new(),
            remote: None,
            remote_ready: false,
            read_only_ready: false,
            read_write_ready: false,
        }
    }

    /// Loads the three manifests through `loader` and reconciles them.
    ///
    /// A missing target manifest is an error; missing local manifests are
    /// treated as empty.
    pub fn check_resources(
        &mut self,
        ctx: &mut StoreContext<'_>,
        loader: &mut dyn ByteLoader,
        current_variant: Option<&str>,
        ignore_other_variant: bool,
    ) -> Result<CheckReport> {
        self.reset();

        let read_write_path = ctx.read_write.path().to_path_buf();
        let sources = [
            (SnapshotSource::Remote, self.remote_path.clone()),
            (SnapshotSource::ReadOnly, self.read_only_path.clone()),
            (SnapshotSource::ReadWrite, read_write_path),
        ];
        for (source, path) in sources {
            let bytes = loader.load(&path)?;
            self.on_loaded(ctx, source, &path, bytes)?;
        }

        if !(self.remote_ready && self.read_only_ready && self.read_write_ready) {
            return Err(Error::Internal("manifest loads incomplete".to_string()));
        }
        let report = self.reconcile(ctx, current_variant, ignore_other_variant);
        self.reset();
        report
    }

    fn reset(&mut self) {
        self.records.clear();
        self.remote = None;
        self.remote_ready = false;
        self.read_only_ready = false;
        self.read_write_ready = false;
    }

    fn record(&mut self, id: &ResourceId) -> &mut CheckRecord {
        self.records.entry(id.clone()).or_default()
    }

    /// Folds one loaded manifest into the record table.
    fn on_loaded(
        &mut self,
        ctx: &mut StoreContext<'_>,
        source: SnapshotSource,
        path: &Path,
        bytes: Option<Vec<u8>>,
    ) -> Result<()> {
        match source {
            SnapshotSource::Remote => {
                let bytes = bytes.ok_or_else(|| Error::ManifestNotFound(path.to_path_buf()))?;
                let manifest = ctx.codec.decode_remote(&bytes)?;
                let containers = manifest.container_table()?;
                for (resource, container) in manifest.resources.iter().zip(containers) {
                    let snapshot = RemoteSnapshot {
                        load_kind: resource.load_kind,
                        length: resource.length,
                        hash: resource.hash,
                        compressed_length: resource.compressed_length,
                        compressed_hash: resource.compressed_hash,
                        container,
                    };
                    self.record(&resource.id).set_remote(&resource.id, snapshot)?;
                }
                self.remote = Some(manifest);
                self.remote_ready = true;
            }
            SnapshotSource::ReadOnly => {
                let manifest = match bytes {
                    Some(bytes) => ctx.codec.decode_local(&bytes)?,
                    None => LocalManifest::default(),
                };
                for (resource, container) in manifest.entries()? {
                    let snapshot = local_snapshot(&resource, container);
                    self.record(&resource.id).set_read_only(&resource.id, snapshot)?;
                }
                self.read_only_ready = true;
            }
            SnapshotSource::ReadWrite => {
                let manifest = match bytes {
                    Some(bytes) => ctx.codec.decode_local(&bytes)?,
                    None => LocalManifest::default(),
                };
                for (resource, container) in manifest.entries()? {
                    let snapshot = local_snapshot(&resource, container);
                    self.record(&resource.id).set_read_write(&resource.id, snapshot)?;
                }
                ctx.read_write.replace(&manifest)?;
                self.read_write_ready = true;
            }
        }
        debug!("Loaded {} manifest from {}", source, path.display());
        Ok(())
    }

    fn reconcile(
        &mut self,
        ctx: &mut StoreContext<'_>,
        current_variant: Option<&str>,
        ignore_other_variant: bool,
    ) -> Result<CheckReport> {
        let remote = self
            .remote
            .take()
            .ok_or_else(|| Error::Internal("target manifest not loaded".to_string()))?;
        ctx.registry.clear();
        ctx.registry
            .set_versions(remote.applicable_version.clone(), remote.internal_version);

        let mut report = CheckReport::default();
        let mut touched = BTreeSet::new();
        let records = std::mem::take(&mut self.records);

        for (id, record) in &records {
            let outcome = record.classify(id, current_variant, ignore_other_variant);
            let old_container = record.read_write().and_then(|w| w.container.clone());

            match outcome.status {
                ReconciliationStatus::Disuse | ReconciliationStatus::Unavailable => {}
                ReconciliationStatus::StorageInReadOnly => {
                    if let Some(r) = record.remote() {
                        ctx.registry
                            .register(id.clone(), resource_info(r, StorageArea::ReadOnly, true));
                    }
                }
                ReconciliationStatus::StorageInReadWrite => {
                    let Some(r) = record.remote() else { continue };
                    if outcome.needs_relocation() {
                        if relocate(ctx, id, old_container.as_deref(), r.container.as_deref())? {
                            report.summary.moved_count += 1;
                            touched.extend(old_container.clone());
                        } else {
                            // Recorded bytes are gone; fetch again.
                            remove_read_write_copy(ctx, id)?;
                            report.summary.removed_count += 1;
                            touched.extend(old_container.clone());
                            add_update(ctx, &mut report, id, r)?;
                            continue;
                        }
                    }
                    ctx.registry
                        .register(id.clone(), resource_info(r, StorageArea::ReadWrite, true));
                }
                ReconciliationStatus::Update => {
                    if let Some(r) = record.remote() {
                        add_update(ctx, &mut report, id, r)?;
                    }
                }
            }

            if outcome.need_remove {
                remove_read_write_copy(ctx, id)?;
                report.summary.removed_count += 1;
                touched.extend(old_container);
            }
        }

        populate_groups_and_assets(ctx, &remote, current_variant);

        let summary = report.summary;
        if summary.moved_count + summary.removed_count > 0 {
            ctx.persist_read_write()?;
            prune_containers(ctx, &touched)?;
        }

        info!(
            "Reconciled {} resources: {} to update ({} bytes), {} moved, {} removed",
            records.len(),
            summary.update_count,
            summary.update_total_compressed_length,
            summary.moved_count,
            summary.removed_count
        );
        ctx.events.push(Event::CheckComplete(summary));
        Ok(report)
    }
}

/// Registers `id` as not ready and emits its update candidate.
fn add_update(
    ctx: &mut StoreContext<'_>,
    report: &mut CheckReport,
    id: &ResourceId,
    remote: &RemoteSnapshot,
) -> Result<()> {
    ctx.registry
        .register(id.clone(), resource_info(remote, StorageArea::ReadWrite, false));
    report.summary.update_count += 1;
    report.summary.update_total_length += u64::from(remote.length);
    report.summary.update_total_compressed_length += u64::from(remote.compressed_length);
    report.candidates.push(UpdateCandidate {
        id: id.clone(),
        container: remote.container.clone(),
        load_kind: remote.load_kind,
        length: remote.length,
        hash: remote.hash,
        compressed_length: remote.compressed_length,
        compressed_hash: remote.compressed_hash,
        local_path: ctx.loose.resource_path(id)?,
        downloading: false,
        retry_count: 0,
    });
    Ok(())
}

fn local_snapshot(resource: &LocalResource, container: Option<String>) -> LocalSnapshot {
    LocalSnapshot {
        load_kind: resource.load_kind,
        length: resource.length,
        hash: resource.hash,
        container,
    }
}

fn resource_info(remote: &RemoteSnapshot, area: StorageArea, ready: bool) -> ResourceInfo {
    ResourceInfo {
        load_kind: remote.load_kind,
        length: remote.length,
        hash: remote.hash,
        compressed_length: remote.compressed_length,
        container: remote.container.clone(),
        area,
        ready,
    }
}

/// Deletes the read-write copy of `id` and its manifest record.
fn remove_read_write_copy(ctx: &mut StoreContext<'_>, id: &ResourceId) -> Result<()> {
    if let Some(record) = ctx.read_write.remove(id) {
        ctx.delete_stored(id, record.container.as_deref())?;
        debug!("Removed read-write copy of {}", id);
    }
    Ok(())
}

/// Moves the read-write copy of `id` from container `from` to container `to`
/// (`None` meaning a loose file).
///
/// Returns false, without touching anything, if the recorded bytes are missing.
fn relocate(
    ctx: &mut StoreContext<'_>,
    id: &ResourceId,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<bool> {
    if let Some(old) = from {
        let Some(bytes) = ctx.read_stored(id, Some(old))? else {
            warn!("{} is recorded in container '{}' but missing", id, old);
            return Ok(false);
        };
        ctx.loose.write(id, &bytes)?;
        ctx.containers.delete_file(old, &id.full_name())?;
    } else if !ctx.loose.resource_path(id)?.is_file() {
        warn!("{} is recorded as a loose file but missing", id);
        return Ok(false);
    }

    if let Some(new) = to {
        let source = ctx.loose.resource_path(id)?;
        ctx.store_in_container(id, new, &source)?;
    }
    ctx.read_write.set_container(id, to.map(str::to_string))?;
    debug!(
        "Relocated {} from {} to {}",
        id,
        from.unwrap_or("<loose>"),
        to.unwrap_or("<loose>")
    );
    Ok(true)
}

/// Destroys touched containers that no longer hold any recorded resource.
fn prune_containers(ctx: &mut StoreContext<'_>, touched: &BTreeSet<String>) -> Result<()> {
    for name in touched {
        if ctx.read_write.container_len(name) > 0 {
            continue;
        }
        if ctx.open_container(name, false).is_err() {
            continue;
        }
        let leftover = ctx.containers.file_count(name)?;
        if leftover > 0 {
            warn!("Container '{}' has {} unrecorded files", name, leftover);
        }
        ctx.containers.destroy(name)?;
        info!("Pruned empty container '{}'", name);
    }
    Ok(())
}

/// Registers the default group, named groups and assets for matching resources.
fn populate_groups_and_assets(
    ctx: &mut StoreContext<'_>,
    remote: &RemoteManifest,
    current_variant: Option<&str>,
) {
    ctx.registry.declare_group(DEFAULT_GROUP_NAME);
    for resource in &remote.resources {
        if !resource.id.matches_variant(current_variant) {
            continue;
        }
        ctx.registry.add_to_group(DEFAULT_GROUP_NAME, resource.id.clone());

        for asset in resource
            .asset_indices
            .iter()
            .filter_map(|&i| remote.assets.get(i as usize))
        {
            let dependencies = asset
                .dependency_indices
                .iter()
                .filter_map(|&i| remote.assets.get(i as usize))
                .map(|dependency| dependency.name.clone())
                .collect();
            ctx.registry.register_asset(
                asset.name.clone(),
                AssetInfo {
                    resource: resource.id.clone(),
                    dependencies,
                },
            );
        }
    }

    for group in &remote.groups {
        ctx.registry.declare_group(&group.name);
        for resource in group
            .resource_indices
            .iter()
            .filter_map(|&i| remote.resources.get(i as usize))
            .filter(|r| r.id.matches_variant(current_variant))
        {
            ctx.registry.add_to_group(&group.name, resource.id.clone());
        }
    }
}
