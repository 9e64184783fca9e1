//! # Update Orchestration
//!
//! Fetches and applies every resource the reconciler classified as `Update`.
//!
//! ## State
//!
//! ```text
//!                   ┌─────────────────────────────┐
//!   add_candidate ─►│ candidates (everything that │
//!                   │ still needs an update)      │
//!                   └──────┬──────────────┬───────┘
//!          schedule_group  │              │  schedule_on_demand
//!                          ▼              ▼
//!                 group queue (FIFO)   on-demand set
//!                          │              │
//!                          └──────┬───────┘
//!                                 ▼  bounded by free download slots
//!                            DownloadPort
//! ```
//!
//! A pack application ([`UpdateOrchestrator::apply_pack`]) drains matching
//! candidates from a local archive instead, at most `apply_budget_per_tick`
//! entries per tick.
//!
//! ## Candidate Lifecycle
//!
//! ```text
//! Candidate ─► Fetching ─► verified ─► ready (removed, recorded)
//!                 │
//!                 └─► failed ─► retry_count < max ─► Fetching
//!                          └──► retry_count == max ─► Failed (removed, surfaced)
//! ```
//!
//! ## Durability
//!
//! Completed resources are recorded in the [`ReadWriteIndex`] immediately;
//! the manifest file is rewritten when the candidate set empties, when the
//! active pending set empties, or when the compressed bytes completed since
//! the last rewrite reach `persist_threshold_bytes`. A crash therefore loses
//! at most that many bytes of fetched-but-unrecorded resources.
//!
//! [`ReadWriteIndex`]: crate::manifest::ReadWriteIndex

mod download;
mod pack;

pub use pack::{ApplyCandidate, verify_pack};

use crate::config::UpdaterConfig;
use crate::constants::DEFAULT_GROUP_NAME;
use crate::context::StoreContext;
use crate::error::{Error, Result};
use crate::events::{Event, UpdateComplete};
use crate::identifier::{LoadKind, ResourceId};
use crate::manifest::ReadWriteRecord;
use crate::ports::DownloadPort;
use pack::PackApplication;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A resource waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCandidate {
    pub id: ResourceId,
    pub container: Option<String>,
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
    pub compressed_length: u32,
    pub compressed_hash: u32,
    /// Loose path the fetched bytes land at.
    pub local_path: PathBuf,
    pub downloading: bool,
    pub retry_count: u32,
}

impl UpdateCandidate {
    /// True when the transferred payload differs from the stored payload.
    pub fn is_compressed(&self) -> bool {
        self.length != self.compressed_length || self.hash != self.compressed_hash
    }

    /// Content-addressed name on the update server.
    pub fn remote_file_name(&self) -> String {
        self.id.remote_file_name(self.hash)
    }

    fn record(&self) -> ReadWriteRecord {
        ReadWriteRecord {
            load_kind: self.load_kind,
            length: self.length,
            hash: self.hash,
            container: self.container.clone(),
        }
    }
}

/// The group update in progress.
#[derive(Debug)]
struct GroupUpdate {
    name: String,
    /// Not yet started.
    queue: VecDeque<ResourceId>,
    /// Not yet finished, started or not.
    remaining: BTreeSet<ResourceId>,
    failed: bool,
}

/// Consumes update candidates via pack application or per-resource download.
#[derive(Debug)]
pub struct UpdateOrchestrator {
    uri_prefix: String,
    max_retries: u32,
    persist_threshold_bytes: u64,
    apply_budget_per_tick: usize,
    candidates: BTreeMap<ResourceId, UpdateCandidate>,
    group: Option<GroupUpdate>,
    on_demand: BTreeSet<ResourceId>,
    pack: Option<PackApplication>,
    bytes_since_persist: u64,
}

impl UpdateOrchestrator {
    pub fn new(config: &UpdaterConfig) -> Self {
        Self {
            uri_prefix: config.update_prefix_uri.clone(),
            max_retries: config.max_retries,
            persist_threshold_bytes: config.persist_threshold_bytes,
            apply_budget_per_tick: config.apply_budget_per_tick,
            candidates: BTreeMap::new(),
            group: None,
            on_demand: BTreeSet::new(),
            pack: None,
            bytes_since_persist: 0,
        }
    }

    // =========================================================================
    // Candidates
    // =========================================================================

    /// Adds or replaces a candidate. An in-flight transfer of the same
    /// payload is kept as is.
    pub fn add_candidate(&mut self, candidate: UpdateCandidate) {
        if let Some(existing) = self.candidates.get(&candidate.id)
            && existing.downloading
            && existing.hash == candidate.hash
        {
            return;
        }
        self.candidates.insert(candidate.id.clone(), candidate);
    }

    /// Forgets candidates that are not in flight; used before a new reconciliation.
    pub fn clear_candidates(&mut self) {
        self.candidates.retain(|_, c| c.downloading);
        self.on_demand.clear();
        self.group = None;
    }

    pub fn candidate(&self, id: &ResourceId) -> Option<&UpdateCandidate> {
        self.candidates.get(id)
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &UpdateCandidate> {
        self.candidates.values()
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Queues every remaining candidate of `group` for download.
    ///
    /// The default group covers all candidates. A group with nothing left to
    /// fetch completes immediately.
    pub fn schedule_group(&mut self, ctx: &mut StoreContext<'_>, group: &str) -> Result<()> {
        if let Some(active) = &self.group {
            return Err(Error::Busy(format!(
                "group '{}' is already updating",
                active.name
            )));
        }

        let members = ctx
            .registry
            .group(group)
            .ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let queue: VecDeque<ResourceId> = self
            .candidates
            .keys()
            .filter(|id| group == DEFAULT_GROUP_NAME || members.contains(id))
            .cloned()
            .collect();

        if queue.is_empty() {
            debug!("Group '{}' has nothing to update", group);
            ctx.events.push(Event::UpdateComplete(UpdateComplete {
                group: group.to_string(),
                ok: true,
            }));
            return Ok(());
        }

        info!("Updating group '{}' ({} resources)", group, queue.len());
        self.group = Some(GroupUpdate {
            name: group.to_string(),
            remaining: queue.iter().cloned().collect(),
            queue,
            failed: false,
        });
        Ok(())
    }

    /// Stops the group update. In-flight downloads still complete.
    ///
    /// A stopped transfer that fails still spends a retry but is not
    /// restarted; it waits for the next group or on-demand request.
    pub fn stop_update_group(&mut self) -> bool {
        match self.group.take() {
            Some(group) => {
                info!(
                    "Stopped group '{}' ({} resources not started)",
                    group.name,
                    group.queue.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn updating_group(&self) -> Option<&str> {
        self.group.as_ref().map(|g| g.name.as_str())
    }

    /// Requests `id` now, ahead of any group queue.
    ///
    /// Nothing new is started for a resource already in flight or queued in
    /// the active pack.
    pub fn schedule_on_demand(
        &mut self,
        ctx: &mut StoreContext<'_>,
        downloads: &mut dyn DownloadPort,
        id: &ResourceId,
    ) -> Result<()> {
        if !self.candidates.contains_key(id) {
            if ctx.registry.is_ready(id) {
                return Ok(());
            }
            return Err(Error::UnknownResource(id.to_string()));
        }
        if !self.on_demand.insert(id.clone()) {
            return Ok(());
        }
        debug!("On-demand update requested for {}", id);
        if downloads.free_slots() > 0 {
            self.start_download(ctx, downloads, id);
        }
        Ok(())
    }

    pub fn on_demand_count(&self) -> usize {
        self.on_demand.len()
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Applies up to the per-tick pack budget, then fills free download slots.
    pub fn tick(
        &mut self,
        ctx: &mut StoreContext<'_>,
        downloads: &mut dyn DownloadPort,
    ) -> Result<()> {
        if self.pack.is_some() {
            self.tick_pack(ctx)?;
        }
        self.fill_download_slots(ctx, downloads);
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Records a verified resource and updates every pending set.
    fn finish_resource(&mut self, ctx: &mut StoreContext<'_>, candidate: &UpdateCandidate) {
        self.candidates.remove(&candidate.id);
        if let Err(e) = ctx.registry.mark_ready(&candidate.id) {
            warn!("Updated resource {} is not registered: {}", candidate.id, e);
        }
        ctx.read_write.insert(candidate.id.clone(), candidate.record());
        self.bytes_since_persist += u64::from(candidate.compressed_length);
    }

    /// Drops `id` from the pending sets. Returns true if that emptied one of them.
    fn release_pending(&mut self, id: &ResourceId, failed: bool) -> bool {
        let mut emptied = false;
        if self.on_demand.remove(id) && self.on_demand.is_empty() {
            emptied = true;
        }
        if let Some(group) = &mut self.group
            && group.remaining.remove(id)
        {
            group.failed |= failed;
            if group.remaining.is_empty() {
                emptied = true;
            }
        }
        emptied
    }

    /// Rewrites the read-write manifest if the durability policy asks for it.
    fn maybe_persist(&mut self, ctx: &mut StoreContext<'_>, pending_emptied: bool) -> Result<()> {
        if self.candidates.is_empty()
            || pending_emptied
            || self.bytes_since_persist >= self.persist_threshold_bytes
        {
            ctx.persist_read_write()?;
            self.bytes_since_persist = 0;
        }
        Ok(())
    }

    /// Emits the group completion once its last resource finished.
    fn complete_group_if_done(&mut self, ctx: &mut StoreContext<'_>) {
        if self.group.as_ref().is_some_and(|g| g.remaining.is_empty())
            && let Some(group) = self.group.take()
        {
            info!(
                "Group '{}' update complete ({})",
                group.name,
                if group.failed { "with failures" } else { "ok" }
            );
            ctx.events.push(Event::UpdateComplete(UpdateComplete {
                group: group.name,
                ok: !group.failed,
            }));
        }
    }
}
