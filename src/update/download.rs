//! Per-resource download path.

use super::{UpdateCandidate, UpdateOrchestrator};
use crate::checksum;
use crate::config::join_uri;
use crate::constants::PARTIAL_PURGE_RETRY;
use crate::context::StoreContext;
use crate::error::Result;
use crate::events::Event;
use crate::identifier::ResourceId;
use crate::ports::{DownloadEvent, DownloadPort, DownloadTag};
use crate::storage::{download_path_for, remove_if_exists};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

impl UpdateOrchestrator {
    /// Starts downloads while the port has free slots; on-demand requests first.
    pub(super) fn fill_download_slots(
        &mut self,
        ctx: &mut StoreContext<'_>,
        downloads: &mut dyn DownloadPort,
    ) {
        while downloads.free_slots() > 0 {
            let Some(id) = self.next_to_fetch() else {
                break;
            };
            self.start_download(ctx, downloads, &id);
        }
    }

    fn next_to_fetch(&mut self) -> Option<ResourceId> {
        let idle = |orchestrator: &Self, id: &ResourceId| {
            orchestrator
                .candidates
                .get(id)
                .is_some_and(|c| !c.downloading)
                && !orchestrator.pack.as_ref().is_some_and(|p| p.is_queued(id))
        };

        if let Some(id) = self.on_demand.iter().find(|&id| idle(self, id)) {
            return Some(id.clone());
        }

        loop {
            let id = self.group.as_mut()?.queue.pop_front()?;
            if idle(self, &id) {
                return Some(id);
            }
        }
    }

    /// Enqueues the transfer of one candidate.
    pub(super) fn start_download(
        &mut self,
        ctx: &mut StoreContext<'_>,
        downloads: &mut dyn DownloadPort,
        id: &ResourceId,
    ) {
        if self.pack.as_ref().is_some_and(|p| p.is_queued(id)) {
            debug!("{} is queued in the active pack", id);
            return;
        }
        let Some(candidate) = self.candidates.get_mut(id) else {
            return;
        };
        if candidate.downloading {
            debug!("{} is already downloading", id);
            return;
        }
        let uri = join_uri(&self.uri_prefix, &candidate.remote_file_name());

        if let Some(parent) = candidate.local_path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warn!("Cannot prepare {}: {}", parent.display(), e);
        }

        match downloads.enqueue(&candidate.local_path, &uri, DownloadTag::Resource(id.clone())) {
            Ok(serial_id) => {
                debug!("Download {} started for {} ({})", serial_id, id, uri);
                candidate.downloading = true;
                ctx.events.push(Event::UpdateStart {
                    id: id.clone(),
                    uri,
                    retry_count: candidate.retry_count,
                });
            }
            Err(e) => {
                // Counts as a failed attempt so a broken port cannot spin forever.
                let path = candidate.local_path.clone();
                if let Err(e) = self.handle_failure(ctx, id, &path, &uri, e.to_string()) {
                    warn!("Failure bookkeeping for {} failed: {}", id, e);
                }
            }
        }
    }

    /// Handles an event tagged [`DownloadTag::Resource`].
    pub fn on_download_event(
        &mut self,
        ctx: &mut StoreContext<'_>,
        event: &DownloadEvent,
    ) -> Result<()> {
        let DownloadTag::Resource(id) = event.tag() else {
            return Ok(());
        };

        match event {
            DownloadEvent::Start { current_length, .. }
            | DownloadEvent::Update { current_length, .. } => {
                if self.candidates.contains_key(id) {
                    ctx.events.push(Event::UpdateProgress {
                        id: id.clone(),
                        current_length: *current_length,
                    });
                }
                Ok(())
            }
            DownloadEvent::Success {
                download_path,
                download_uri,
                ..
            } => {
                let Some(candidate) = self.candidates.get(id).cloned() else {
                    warn!("Ignoring completed download for unknown candidate {}", id);
                    return Ok(());
                };
                match install(ctx, &candidate, download_path) {
                    Ok(()) => self.handle_success(ctx, &candidate),
                    Err(e) => {
                        self.handle_failure(ctx, id, download_path, download_uri, e.to_string())
                    }
                }
            }
            DownloadEvent::Failure {
                download_path,
                download_uri,
                error_message,
                ..
            } => self.handle_failure(ctx, id, download_path, download_uri, error_message.clone()),
        }
    }

    fn handle_success(
        &mut self,
        ctx: &mut StoreContext<'_>,
        candidate: &UpdateCandidate,
    ) -> Result<()> {
        debug!("Updated {} ({} bytes)", candidate.id, candidate.length);
        self.finish_resource(ctx, candidate);
        let emptied = self.release_pending(&candidate.id, false);
        ctx.events.push(Event::UpdateSuccess {
            id: candidate.id.clone(),
            length: candidate.length,
            compressed_length: candidate.compressed_length,
        });
        self.maybe_persist(ctx, emptied)?;
        self.complete_group_if_done(ctx);
        Ok(())
    }

    /// Deletes the failed artifact, then retries or gives up on the candidate.
    fn handle_failure(
        &mut self,
        ctx: &mut StoreContext<'_>,
        id: &ResourceId,
        artifact: &Path,
        uri: &str,
        reason: String,
    ) -> Result<()> {
        if let Err(e) = remove_if_exists(artifact) {
            warn!("Failed to remove {}: {}", artifact.display(), e);
        }
        let max_retries = self.max_retries;
        let Some(candidate) = self.candidates.get_mut(id) else {
            return Ok(());
        };
        candidate.downloading = false;
        let partial = download_path_for(&candidate.local_path);

        if candidate.retry_count < max_retries {
            candidate.retry_count += 1;
            let retry_count = candidate.retry_count;
            if retry_count >= PARTIAL_PURGE_RETRY {
                purge_partial(&partial);
            }
            warn!(
                "Update of {} failed (retry {}/{}): {}",
                id, retry_count, max_retries, reason
            );
            ctx.events.push(Event::UpdateFailure {
                id: id.clone(),
                uri: uri.to_string(),
                retry_count,
                max_retries,
                reason,
            });
            self.requeue(id);
            return Ok(());
        }

        let retry_count = candidate.retry_count;
        self.candidates.remove(id);
        purge_partial(&partial);
        warn!("Update of {} failed permanently: {}", id, reason);
        ctx.events.push(Event::UpdateFailure {
            id: id.clone(),
            uri: uri.to_string(),
            retry_count,
            max_retries,
            reason,
        });

        let emptied = self.release_pending(id, true);
        self.maybe_persist(ctx, emptied)?;
        self.complete_group_if_done(ctx);
        Ok(())
    }

    /// Puts a retried candidate back where intake will find it.
    ///
    /// A candidate that is neither on demand nor part of the active group
    /// (its group was stopped mid-transfer) stays idle with its retry count
    /// until the next group or on-demand request.
    fn requeue(&mut self, id: &ResourceId) {
        if self.on_demand.contains(id) {
            return;
        }
        match &mut self.group {
            Some(group) if group.remaining.contains(id) => group.queue.push_back(id.clone()),
            _ => debug!("{} left idle until requested again", id),
        }
    }
}

/// Validates downloaded bytes and moves them to their final location.
fn install(ctx: &mut StoreContext<'_>, candidate: &UpdateCandidate, path: &Path) -> Result<()> {
    let name = candidate.id.to_string();
    let bytes = fs::read(path)?;
    let length = u64::from(candidate.length);

    if candidate.is_compressed() {
        checksum::verify_compressed(
            &name,
            &bytes,
            u64::from(candidate.compressed_length),
            candidate.compressed_hash,
        )?;
        let plain = checksum::decompress(&name, &bytes, length)?;
        checksum::verify_resource(&name, &plain, candidate.load_kind, length, candidate.hash)?;
        fs::write(path, &plain)?;
    } else {
        checksum::check_length(&name, u64::from(candidate.compressed_length), bytes.len() as u64)?;
        checksum::verify_resource(&name, &bytes, candidate.load_kind, length, candidate.hash)?;
    }

    if let Some(container) = &candidate.container {
        ctx.store_in_container(&candidate.id, container, path)?;
    } else if path != candidate.local_path {
        fs::rename(path, &candidate.local_path)?;
    }
    Ok(())
}

fn purge_partial(path: &Path) {
    match remove_if_exists(path) {
        Ok(true) => info!("Removed partial transfer {}", path.display()),
        Ok(false) => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
