//! # Collaborator Ports
//!
//! Traits for the subsystems the engine drives but does not own:
//!
//! - [`DownloadPort`]: network transfers with start/update/success/failure events
//! - [`ContainerPort`]: keyed blob store for containerized resources
//! - [`ByteLoader`]: whole-file reads of local manifests
//!
//! All ports are driven from the caller's thread. A download port may keep
//! several transfers in flight, but its events are only delivered from
//! [`DownloadPort::poll`], so the engine's state is never touched concurrently.

use crate::error::Result;
use crate::identifier::ResourceId;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Downloads
// =============================================================================

/// Identifies what a transfer was enqueued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DownloadTag {
    /// The target manifest.
    RemoteManifest,
    /// A resource update candidate.
    Resource(ResourceId),
}

/// Progress and completion notifications from a [`DownloadPort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Start {
        serial_id: u64,
        tag: DownloadTag,
        current_length: u64,
    },
    Update {
        serial_id: u64,
        tag: DownloadTag,
        current_length: u64,
    },
    /// The file is complete at `download_path`.
    Success {
        serial_id: u64,
        tag: DownloadTag,
        download_path: PathBuf,
        download_uri: String,
    },
    Failure {
        serial_id: u64,
        tag: DownloadTag,
        download_path: PathBuf,
        download_uri: String,
        error_message: String,
    },
}

impl DownloadEvent {
    pub fn tag(&self) -> &DownloadTag {
        match self {
            Self::Start { tag, .. }
            | Self::Update { tag, .. }
            | Self::Success { tag, .. }
            | Self::Failure { tag, .. } => tag,
        }
    }

    pub fn serial_id(&self) -> u64 {
        match self {
            Self::Start { serial_id, .. }
            | Self::Update { serial_id, .. }
            | Self::Success { serial_id, .. }
            | Self::Failure { serial_id, .. } => *serial_id,
        }
    }
}

/// Download transport.
///
/// Transfers for `local_path` are written to `<local_path>.download` and
/// renamed to `local_path` on success.
pub trait DownloadPort {
    /// Queues a transfer and returns its serial id.
    fn enqueue(&mut self, local_path: &Path, remote_uri: &str, tag: DownloadTag) -> Result<u64>;

    /// Number of transfers that could start right now.
    fn free_slots(&self) -> usize;

    /// Advances transfers and returns the events produced since the last poll.
    fn poll(&mut self, dt: Duration) -> Vec<DownloadEvent>;
}

/// Transport with no capacity; every update stays pending.
#[derive(Debug, Default)]
pub struct NullDownloads;

impl DownloadPort for NullDownloads {
    fn enqueue(&mut self, _local_path: &Path, remote_uri: &str, _tag: DownloadTag) -> Result<u64> {
        Err(crate::error::Error::DownloadFailed {
            uri: remote_uri.to_string(),
            reason: "no download transport configured".to_string(),
        })
    }

    fn free_slots(&self) -> usize {
        0
    }

    fn poll(&mut self, _dt: Duration) -> Vec<DownloadEvent> {
        Vec::new()
    }
}

// =============================================================================
// Containers
// =============================================================================

/// How a container is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerMode {
    Read,
    ReadWrite,
    /// Open for writing, creating the container if needed.
    CreateOrReadWrite,
}

/// Keyed blob store holding many resources under one container name.
///
/// Containers are addressed by name once opened.
pub trait ContainerPort {
    /// Opens (or creates, per `mode`) the container `name` backed by `path`.
    fn open(&mut self, name: &str, path: &Path, mode: ContainerMode) -> Result<()>;

    fn is_open(&self, name: &str) -> bool;

    /// Reads a file; `Ok(None)` if the container does not hold it.
    fn read_file(&mut self, container: &str, file: &str) -> Result<Option<Vec<u8>>>;

    /// Copies `source` into the container.
    ///
    /// Returns only after the bytes are durable, so the caller may delete
    /// `source` once this returns `Ok(true)`.
    fn write_file(&mut self, container: &str, file: &str, source: &Path) -> Result<bool>;

    /// Deletes a file; returns whether it existed.
    fn delete_file(&mut self, container: &str, file: &str) -> Result<bool>;

    fn file_count(&self, container: &str) -> Result<usize>;

    /// Closes the container and removes its backing storage.
    fn destroy(&mut self, container: &str) -> Result<()>;
}

// =============================================================================
// Byte Loading
// =============================================================================

/// Whole-file loader for local manifests.
pub trait ByteLoader {
    /// Returns the file's bytes, or `Ok(None)` if it does not exist.
    fn load(&mut self, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// [`ByteLoader`] over the local filesystem.
#[derive(Debug, Default)]
pub struct FsByteLoader;

impl ByteLoader for FsByteLoader {
    fn load(&mut self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
