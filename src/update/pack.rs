//! Pack application path.
//!
//! Matching candidates are extracted from an opened pack, a bounded number
//! per tick. A failed entry marks the batch failed but does not stop it.

use super::UpdateOrchestrator;
use crate::checksum;
use crate::context::StoreContext;
use crate::error::{Error, Result};
use crate::events::{ApplyComplete, Event};
use crate::identifier::{LoadKind, ResourceId};
use crate::manifest::ManifestCodec;
use crate::manifest::pack::{OpenPack, open_pack, verify_data_region};
use crate::storage::remove_if_exists;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A candidate scheduled for extraction from a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCandidate {
    pub id: ResourceId,
    pub container: Option<String>,
    pub load_kind: LoadKind,
    /// Offset relative to the pack's data region.
    pub offset: u64,
    pub length: u32,
    pub hash: u32,
    pub compressed_length: u32,
    pub compressed_hash: u32,
    pub local_path: PathBuf,
}

impl ApplyCandidate {
    fn is_compressed(&self) -> bool {
        self.length != self.compressed_length || self.hash != self.compressed_hash
    }
}

/// The pack currently being applied.
#[derive(Debug)]
pub(super) struct PackApplication {
    path: PathBuf,
    pack: OpenPack,
    queue: VecDeque<ApplyCandidate>,
    ok: bool,
    applied: usize,
}

impl PackApplication {
    pub(super) fn is_queued(&self, id: &ResourceId) -> bool {
        self.queue.iter().any(|c| &c.id == id)
    }
}

/// Checks a pack's header bounds and data-region checksum without applying it.
pub fn verify_pack(codec: &dyn ManifestCodec, path: &Path) -> Result<bool> {
    let mut pack = open_pack(codec, path)?;
    let ok = verify_data_region(&mut pack)?;
    if !ok {
        warn!("Pack {} failed data region verification", path.display());
    }
    Ok(ok)
}

impl UpdateOrchestrator {
    /// Starts applying the pack at `path`.
    ///
    /// The header is validated before anything changes; a rejected pack
    /// leaves every candidate untouched.
    pub fn apply_pack(&mut self, ctx: &mut StoreContext<'_>, path: &Path) -> Result<()> {
        if let Some(active) = &self.pack {
            return Err(Error::Busy(format!(
                "pack {} is already being applied",
                active.path.display()
            )));
        }
        if let Some(group) = &self.group {
            return Err(Error::Busy(format!("group '{}' is updating", group.name)));
        }

        let pack = open_pack(ctx.codec, path)?;
        let queue: VecDeque<ApplyCandidate> = pack
            .manifest
            .resources
            .iter()
            .filter_map(|entry| {
                let candidate = self.candidates.get(&entry.id)?;
                let matches = !candidate.downloading
                    && candidate.load_kind == entry.load_kind
                    && candidate.length == entry.length
                    && candidate.hash == entry.hash;
                matches.then(|| ApplyCandidate {
                    id: entry.id.clone(),
                    container: candidate.container.clone(),
                    load_kind: entry.load_kind,
                    offset: entry.offset,
                    length: entry.length,
                    hash: entry.hash,
                    compressed_length: entry.compressed_length,
                    compressed_hash: entry.compressed_hash,
                    local_path: candidate.local_path.clone(),
                })
            })
            .collect();

        let total_length = queue.iter().map(|c| u64::from(c.length)).sum();
        info!(
            "Applying pack {} ({} of {} entries match)",
            path.display(),
            queue.len(),
            pack.manifest.resources.len()
        );
        ctx.events.push(Event::ApplyStart {
            path: path.to_path_buf(),
            count: queue.len(),
            total_length,
        });

        self.pack = Some(PackApplication {
            path: path.to_path_buf(),
            pack,
            queue,
            ok: true,
            applied: 0,
        });
        // An empty application completes on the spot.
        self.tick_pack_with_budget(ctx, 0)
    }

    pub fn is_applying(&self) -> bool {
        self.pack.is_some()
    }

    pub(super) fn tick_pack(&mut self, ctx: &mut StoreContext<'_>) -> Result<()> {
        self.tick_pack_with_budget(ctx, self.apply_budget_per_tick)
    }

    fn tick_pack_with_budget(&mut self, ctx: &mut StoreContext<'_>, budget: usize) -> Result<()> {
        for _ in 0..budget {
            let Some(application) = self.pack.as_mut() else {
                return Ok(());
            };
            let Some(entry) = application.queue.pop_front() else {
                break;
            };
            // Downloaded meanwhile.
            if !self.candidates.contains_key(&entry.id) {
                continue;
            }

            match extract(ctx, &mut application.pack, &entry) {
                Ok(()) => {
                    application.applied += 1;
                    self.apply_success(ctx, &entry)?;
                }
                Err(e) => {
                    warn!("Pack entry {} failed: {}", entry.id, e);
                    application.ok = false;
                    if let Err(e) = remove_if_exists(&entry.local_path) {
                        warn!("Failed to remove {}: {}", entry.local_path.display(), e);
                    }
                    ctx.events.push(Event::ApplyFailure {
                        id: entry.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.pack.as_ref().is_some_and(|a| a.queue.is_empty()) {
            self.finish_pack(ctx)?;
        }
        Ok(())
    }

    fn apply_success(
        &mut self,
        ctx: &mut StoreContext<'_>,
        entry: &ApplyCandidate,
    ) -> Result<()> {
        let Some(candidate) = self.candidates.get(&entry.id).cloned() else {
            return Ok(());
        };
        debug!("Applied {} from pack", entry.id);
        self.finish_resource(ctx, &candidate);
        let emptied = self.release_pending(&entry.id, false);
        ctx.events.push(Event::ApplySuccess {
            id: entry.id.clone(),
            length: entry.length,
            compressed_length: entry.compressed_length,
        });
        self.maybe_persist(ctx, emptied)?;
        self.complete_group_if_done(ctx);
        Ok(())
    }

    fn finish_pack(&mut self, ctx: &mut StoreContext<'_>) -> Result<()> {
        let Some(application) = self.pack.take() else {
            return Ok(());
        };
        ctx.persist_read_write()?;
        self.bytes_since_persist = 0;
        info!(
            "Pack {} applied ({} entries, {})",
            application.path.display(),
            application.applied,
            if application.ok { "ok" } else { "with failures" }
        );
        ctx.events.push(Event::ApplyComplete(ApplyComplete {
            path: application.path,
            ok: application.ok,
            applied_count: application.applied,
        }));
        self.complete_group_if_done(ctx);
        Ok(())
    }
}

/// Copies one entry out of the pack, verifies it and stores it.
fn extract(ctx: &mut StoreContext<'_>, pack: &mut OpenPack, entry: &ApplyCandidate) -> Result<()> {
    let name = entry.id.to_string();
    let length = u64::from(entry.length);
    let compressed_length = u64::from(entry.compressed_length);

    pack.file
        .seek(SeekFrom::Start(pack.manifest.offset + entry.offset))?;
    if let Some(parent) = entry.local_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let copied = {
        let mut out = File::create(&entry.local_path)?;
        let copied = io::copy(&mut (&pack.file).take(compressed_length), &mut out)?;
        out.sync_all()?;
        copied
    };
    checksum::check_length(&name, compressed_length, copied)?;

    if entry.is_compressed() {
        let bytes = fs::read(&entry.local_path)?;
        checksum::verify_compressed(&name, &bytes, compressed_length, entry.compressed_hash)?;
        let plain = checksum::decompress(&name, &bytes, length)?;
        checksum::verify_resource(&name, &plain, entry.load_kind, length, entry.hash)?;
        fs::write(&entry.local_path, &plain)?;
    } else {
        let bytes = fs::read(&entry.local_path)?;
        checksum::verify_resource(&name, &bytes, entry.load_kind, length, entry.hash)?;
    }

    if let Some(container) = &entry.container {
        ctx.store_in_container(&entry.id, container, &entry.local_path)?;
    }
    Ok(())
}
