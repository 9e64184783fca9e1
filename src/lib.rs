//! # resync
//!
//! **Resource Version Reconciliation and Update Engine**
//!
//! This crate keeps an installed application's binary resource set in step
//! with a remote target version: incrementally, resumably and with checksum
//! guarantees. A small set of manifest files is the durable record of what
//! the local store holds.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         ResourceUpdater                             │
//! │        tick(dt) → poll downloads → route by tag → drain events      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   ┌───────────────────┐   ┌────────────────┐  │
//! │  │RemoteManifestSync│──►│ManifestReconciler │──►│UpdateOrchestr. │  │
//! │  │ version check    │   │ remote + RO + RW  │   │ pack apply     │  │
//! │  │ fetch + validate │   │ → status per res. │   │ downloads      │  │
//! │  └──────────────────┘   └─────────▲─────────┘   │ retries        │  │
//! │                                   │             └────────────────┘  │
//! │                         ┌─────────┴─────────┐                       │
//! │                         │ IntegrityVerifier │                       │
//! │                         │ audit RW bytes    │                       │
//! │                         └───────────────────┘                       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Shared state: ResourceRegistry │ ReadWriteIndex │ EventQueue       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Ports: ManifestCodec │ DownloadPort │ ContainerPort │ ByteLoader   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Storage Areas
//!
//! | Area       | Written by | Manifest                  | Contents                   |
//! |------------|------------|---------------------------|----------------------------|
//! | Read-only  | Installer  | `read_only_manifest.dat`  | Shipped resources          |
//! | Read-write | This crate | `read_write_manifest.dat` | Updates, cached target     |
//!
//! Resources live either as loose files named by their full name or inside
//! a named container.
//!
//! # Key Properties
//!
//! - **Pure classification**: a resource's status depends only on its three
//!   manifest snapshots, the current variant and `ignore_other_variant`
//!   (see [`reconcile::CheckRecord::classify`]).
//! - **Crash consistency**: the read-write manifest is only replaced via
//!   temp file, fsync and rename. Container writes are durable before the
//!   source file is deleted.
//! - **Bounded loss**: at most `persist_threshold_bytes` of fetched but
//!   unrecorded resources are lost on a crash.
//! - **Bounded ticks**: verification hashes about `verify_bytes_per_tick`
//!   bytes per tick and pack application extracts `apply_budget_per_tick`
//!   entries per tick.
//!
//! # Example
//!
//! ```rust,ignore
//! use resync::{ResourceUpdater, UpdaterConfig, Event};
//! use std::time::Duration;
//!
//! fn main() -> resync::Result<()> {
//!     let config = UpdaterConfig::from_json_file("resync.json".as_ref())?;
//!     let mut updater = ResourceUpdater::new(config, Box::new(MyDownloads::new()))?;
//!
//!     updater.verify_resources()?;
//!     while updater.is_verifying() {
//!         updater.tick(Duration::from_millis(16))?;
//!     }
//!
//!     let report = updater.check_resources()?;
//!     if report.update_count > 0 {
//!         updater.schedule_group("")?;
//!     }
//!     loop {
//!         updater.tick(Duration::from_millis(16))?;
//!         for event in updater.drain_events() {
//!             if let Event::UpdateComplete(done) = event {
//!                 return Ok(());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod identifier;
pub mod manifest;
pub mod ports;
pub mod reconcile;
pub mod registry;
pub mod remote;
pub mod storage;
pub mod update;
pub mod updater;
pub mod verify;

// Re-exports
pub use config::UpdaterConfig;
pub use constants::*;
pub use context::StoreContext;
pub use error::{Error, Result, SnapshotSource};
pub use events::{
    ApplyComplete, CheckComplete, Event, EventQueue, ManifestUpdateResult, UpdateComplete,
    VerifyComplete,
};
pub use identifier::{LoadKind, ResourceId};
pub use manifest::{BinaryManifestCodec, ManifestCodec, ReadWriteIndex, ReadWriteRecord};
pub use ports::{
    ByteLoader, ContainerMode, ContainerPort, DownloadEvent, DownloadPort, DownloadTag,
    FsByteLoader, NullDownloads,
};
pub use reconcile::{CheckReport, ManifestReconciler, ReconciliationStatus};
pub use registry::{GroupProgress, ResourceRegistry, StorageArea};
pub use remote::{ManifestDigest, RemoteManifestSync, VersionCheck};
pub use storage::{DirectoryContainers, LooseFiles};
pub use update::{UpdateCandidate, UpdateOrchestrator};
pub use updater::ResourceUpdater;
pub use verify::{IntegrityVerifier, VerifyRecord};
