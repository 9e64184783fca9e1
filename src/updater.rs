//! # Resource Updater
//!
//! Facade owning the engine state and its collaborators.
//!
//! ## Typical Session
//!
//! ```text
//! check_version(target) ──► needs update? ──► update_manifest(digest)
//!                                                   │ tick() until ManifestUpdate
//!                                                   ▼
//! verify_resources() ── tick() until VerifyComplete
//!         │
//!         ▼
//! check_resources() ──► CheckComplete, candidates handed to the orchestrator
//!         │
//!         ├──► apply_pack(path)        tick() until ApplyComplete
//!         └──► schedule_group(name)    tick() until UpdateComplete
//! ```
//!
//! Everything runs on the caller's thread. [`ResourceUpdater::tick`] polls
//! the download port, routes each event by its tag and advances the
//! verifier and the orchestrator. Results are read with
//! [`ResourceUpdater::drain_events`].

use crate::config::UpdaterConfig;
use crate::constants::{READ_ONLY_MANIFEST_FILE, READ_WRITE_MANIFEST_FILE, REMOTE_MANIFEST_FILE};
use crate::context::StoreContext;
use crate::error::Result;
use crate::events::{CheckComplete, Event, EventQueue};
use crate::identifier::ResourceId;
use crate::manifest::{BinaryManifestCodec, ManifestCodec, ReadWriteIndex};
use crate::ports::{ByteLoader, ContainerPort, DownloadPort, DownloadTag, FsByteLoader};
use crate::reconcile::ManifestReconciler;
use crate::registry::ResourceRegistry;
use crate::remote::{ManifestDigest, RemoteManifestSync, VersionCheck};
use crate::storage::{DirectoryContainers, LooseFiles};
use crate::update::{UpdateOrchestrator, verify_pack};
use crate::verify::IntegrityVerifier;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Lends the shared state of a [`ResourceUpdater`] to one component call.
macro_rules! store_context {
    ($updater:expr) => {
        StoreContext {
            codec: $updater.codec.as_ref(),
            containers: $updater.containers.as_mut(),
            loose: &$updater.loose,
            registry: &mut $updater.registry,
            read_write: &mut $updater.read_write,
            events: &mut $updater.events,
        }
    };
}

/// Owns the registry, the read-write index, the ports and the four
/// engine components.
pub struct ResourceUpdater {
    config: UpdaterConfig,
    codec: Box<dyn ManifestCodec>,
    downloads: Box<dyn DownloadPort>,
    containers: Box<dyn ContainerPort>,
    loader: Box<dyn ByteLoader>,
    loose: LooseFiles,
    registry: ResourceRegistry,
    read_write: ReadWriteIndex,
    events: EventQueue,
    remote: RemoteManifestSync,
    reconciler: ManifestReconciler,
    verifier: IntegrityVerifier,
    orchestrator: UpdateOrchestrator,
}

impl ResourceUpdater {
    /// Creates an updater with the binary codec, directory containers and
    /// filesystem loader.
    pub fn new(config: UpdaterConfig, downloads: Box<dyn DownloadPort>) -> Result<Self> {
        Self::with_ports(
            config,
            Box::new(BinaryManifestCodec),
            downloads,
            Box::new(DirectoryContainers::new()),
            Box::new(FsByteLoader),
        )
    }

    pub fn with_ports(
        config: UpdaterConfig,
        codec: Box<dyn ManifestCodec>,
        downloads: Box<dyn DownloadPort>,
        containers: Box<dyn ContainerPort>,
        loader: Box<dyn ByteLoader>,
    ) -> Result<Self> {
        config.validate()?;
        let loose = LooseFiles::new(config.read_write_path.clone())?;
        let read_write = ReadWriteIndex::new(config.read_write_path.join(READ_WRITE_MANIFEST_FILE));
        let remote = RemoteManifestSync::new(
            config.read_write_path.join(REMOTE_MANIFEST_FILE),
            config.update_prefix_uri.clone(),
        );
        let reconciler = ManifestReconciler::new(
            config.read_write_path.join(REMOTE_MANIFEST_FILE),
            config.read_only_path.join(READ_ONLY_MANIFEST_FILE),
        );
        let orchestrator = UpdateOrchestrator::new(&config);

        info!(
            "Resource updater ready (read-only {}, read-write {})",
            config.read_only_path.display(),
            config.read_write_path.display()
        );

        Ok(Self {
            config,
            codec,
            downloads,
            containers,
            loader,
            loose,
            registry: ResourceRegistry::new(),
            read_write,
            events: EventQueue::new(),
            remote,
            reconciler,
            verifier: IntegrityVerifier::new(),
            orchestrator,
        })
    }

    // =========================================================================
    // Target Manifest
    // =========================================================================

    pub fn check_version(&self, target_internal_version: i32) -> VersionCheck {
        self.remote
            .check_version(self.codec.as_ref(), target_internal_version)
    }

    /// Starts fetching the target manifest; completion arrives as
    /// [`Event::ManifestUpdate`].
    pub fn update_manifest(&mut self, digest: ManifestDigest) -> Result<()> {
        self.remote.update_manifest(self.downloads.as_mut(), digest)
    }

    // =========================================================================
    // Verification and Reconciliation
    // =========================================================================

    /// Starts a verification pass over the read-write area.
    pub fn verify_resources(&mut self) -> Result<()> {
        let bytes_per_tick = self.config.verify_bytes_per_tick;
        let mut ctx = store_context!(self);
        self.verifier.verify_resources(&mut ctx, bytes_per_tick)
    }

    pub fn is_verifying(&self) -> bool {
        self.verifier.is_verifying()
    }

    /// Reconciles the three manifests and replaces the candidate set.
    pub fn check_resources(&mut self) -> Result<CheckComplete> {
        self.orchestrator.clear_candidates();
        let variant = self.config.current_variant.clone();
        let ignore_other_variant = self.config.ignore_other_variant;

        let mut ctx = store_context!(self);
        let report = self.reconciler.check_resources(
            &mut ctx,
            self.loader.as_mut(),
            variant.as_deref(),
            ignore_other_variant,
        )?;
        for candidate in report.candidates {
            self.orchestrator.add_candidate(candidate);
        }
        Ok(report.summary)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    pub fn schedule_group(&mut self, group: &str) -> Result<()> {
        let mut ctx = store_context!(self);
        self.orchestrator.schedule_group(&mut ctx, group)
    }

    pub fn stop_update_group(&mut self) -> bool {
        self.orchestrator.stop_update_group()
    }

    pub fn schedule_on_demand(&mut self, id: &ResourceId) -> Result<()> {
        let mut ctx = store_context!(self);
        self.orchestrator
            .schedule_on_demand(&mut ctx, self.downloads.as_mut(), id)
    }

    pub fn apply_pack(&mut self, path: &Path) -> Result<()> {
        let mut ctx = store_context!(self);
        self.orchestrator.apply_pack(&mut ctx, path)
    }

    /// Checks a pack without applying it.
    pub fn verify_pack(&self, path: &Path) -> Result<bool> {
        verify_pack(self.codec.as_ref(), path)
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Advances every component by one step.
    pub fn tick(&mut self, dt: Duration) -> Result<()> {
        for event in self.downloads.poll(dt) {
            match event.tag() {
                DownloadTag::RemoteManifest => {
                    self.remote.on_download_event(&event, &mut self.events);
                }
                DownloadTag::Resource(_) => {
                    let mut ctx = store_context!(self);
                    self.orchestrator.on_download_event(&mut ctx, &event)?;
                }
            }
        }

        let mut ctx = store_context!(self);
        self.verifier.tick(&mut ctx)?;
        self.orchestrator.tick(&mut ctx, self.downloads.as_mut())
    }

    /// Removes and returns all pending events in emission order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn read_write(&self) -> &ReadWriteIndex {
        &self.read_write
    }

    pub fn orchestrator(&self) -> &UpdateOrchestrator {
        &self.orchestrator
    }

    pub fn remote_manifest_path(&self) -> &Path {
        self.remote.manifest_path()
    }

    pub fn loose_files(&self) -> &LooseFiles {
        &self.loose
    }
}
