//! Error types for the resource update engine.

use std::path::PathBuf;

/// Result type alias for resource update operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which manifest a snapshot was drawn from during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The cached remote (target) manifest.
    Remote,
    /// The shipped, read-only local manifest.
    ReadOnly,
    /// The mutable, read-write local manifest.
    ReadWrite,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::ReadOnly => write!(f, "read-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Errors that can occur while reconciling or updating the local store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Manifest Errors
    // =========================================================================
    /// Manifest bytes could not be decoded.
    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    /// A required manifest file does not exist.
    #[error("manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    /// The read-write manifest could not be rewritten.
    #[error("failed to write manifest {}: {reason}", .path.display())]
    ManifestWrite { path: PathBuf, reason: String },

    // =========================================================================
    // Pack Errors
    // =========================================================================
    /// Pack archive header or layout is invalid.
    #[error("invalid resource pack {}: {reason}", .path.display())]
    InvalidPack { path: PathBuf, reason: String },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    /// The same manifest contributed a resource twice.
    #[error("resource '{resource}' already has a {origin} snapshot")]
    DuplicateSnapshot {
        resource: String,
        origin: SnapshotSource,
    },

    /// Resource is not known to the registry or candidate set.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Group is not declared by the remote manifest.
    #[error("unknown resource group: '{0}'")]
    UnknownGroup(String),

    /// Operation conflicts with work already in progress.
    #[error("operation not allowed: {0}")]
    Busy(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Storage initialization failed.
    #[error("failed to initialize storage at {}: {reason}", .path.display())]
    StorageInitFailed { path: PathBuf, reason: String },

    /// Container has not been opened.
    #[error("container not open: {0}")]
    ContainerNotOpen(String),

    /// Writing a resource into a container failed.
    #[error("failed to write '{resource}' into container '{container}': {reason}")]
    ContainerWriteFailed {
        container: String,
        resource: String,
        reason: String,
    },

    // =========================================================================
    // Integrity Errors
    // =========================================================================
    /// Byte count does not match the recorded length.
    #[error("length mismatch for '{resource}': expected {expected}, found {actual}")]
    LengthMismatch {
        resource: String,
        expected: u64,
        actual: u64,
    },

    /// Checksum does not match the recorded hash.
    #[error("hash mismatch for '{resource}': expected {expected:08x}, computed {actual:08x}")]
    HashMismatch {
        resource: String,
        expected: u32,
        actual: u32,
    },

    /// Payload could not be decompressed.
    #[error("failed to decompress '{resource}': {reason}")]
    DecompressionFailed { resource: String, reason: String },

    // =========================================================================
    // Download Errors
    // =========================================================================
    /// Download transport rejected or failed a transfer.
    #[error("download of '{uri}' failed: {reason}")]
    DownloadFailed { uri: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration value is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true for errors that leave the manifest bookkeeping untrustworthy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ManifestParse(_) | Self::ManifestWrite { .. } | Self::Internal(_)
        )
    }
}
