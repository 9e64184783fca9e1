//! # Resource Update Constants
//!
//! File names, integrity parameters and default budgets for the update
//! engine. These constants are the **single source of truth** for on-disk
//! naming and scheduling defaults throughout the codebase.
//!
//! ## Cross-References
//!
//! - [`crate::remote`]: Uses the cached target manifest name
//! - [`crate::verify`]: Uses the masked checksum window and read-write manifest name
//! - [`crate::update`]: Uses retry, persistence and per-tick budgets
//! - [`crate::manifest`]: Uses the manifest magic bytes and format version

// =============================================================================
// File Naming
// =============================================================================

/// File name of the locally cached target (remote) manifest.
///
/// Lives in the read-write area. Overwritten in place whenever a newer
/// target manifest is fetched.
pub const REMOTE_MANIFEST_FILE: &str = "remote_manifest.dat";

/// File name of the shipped read-only manifest, relative to the read-only area.
pub const READ_ONLY_MANIFEST_FILE: &str = "read_only_manifest.dat";

/// File name of the mutable read-write manifest, relative to the read-write area.
pub const READ_WRITE_MANIFEST_FILE: &str = "read_write_manifest.dat";

/// Extension appended by the download transport to in-flight transfers.
///
/// A transfer for `<path>` writes to `<path>.download` and is renamed on success.
pub const DOWNLOAD_EXTENSION: &str = "download";

/// Extension used while rewriting a manifest before the atomic rename.
pub const TEMP_EXTENSION: &str = "tmp";

/// Directory suffix for containers managed by [`crate::storage::DirectoryContainers`].
pub const CONTAINER_DIR_SUFFIX: &str = "container";

// =============================================================================
// Manifest Format
// =============================================================================

/// Magic bytes opening a remote (target) manifest.
pub const REMOTE_MANIFEST_MAGIC: [u8; 3] = *b"RSR";

/// Magic bytes opening a read-only or read-write local manifest.
pub const LOCAL_MANIFEST_MAGIC: [u8; 3] = *b"RSL";

/// Magic bytes opening a resource pack.
pub const PACK_MANIFEST_MAGIC: [u8; 3] = *b"RSP";

/// Current binary layout version for all manifest shapes.
pub const MANIFEST_FORMAT_VERSION: u8 = 1;

/// Name of the implicit group containing every variant-matching resource.
pub const DEFAULT_GROUP_NAME: &str = "";

// =============================================================================
// Integrity
// =============================================================================

/// Length of the masked window for quick-decrypt load kinds.
///
/// The first `QUICK_ENCRYPT_LENGTH` bytes of such resources are XOR-ed with
/// the recorded hash before the checksum is computed. Full-decrypt kinds mask
/// the whole declared length instead.
pub const QUICK_ENCRYPT_LENGTH: usize = 220;

// =============================================================================
// Scheduling Defaults
// =============================================================================

/// Default number of download retries per resource before it is failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry count from which a stale `.download` partial file is discarded.
///
/// A corrupt partial transfer would otherwise be resumed on every retry.
pub const PARTIAL_PURGE_RETRY: u32 = 2;

/// Default number of fetched-but-unrecorded bytes before the read-write
/// manifest is rewritten (1 MiB).
pub const DEFAULT_PERSIST_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// Default number of bytes the integrity verifier hashes per tick (1 MiB).
pub const DEFAULT_VERIFY_BYTES_PER_TICK: u64 = 1024 * 1024;

/// Default number of pack entries extracted per tick.
pub const DEFAULT_APPLY_BUDGET_PER_TICK: usize = 1;

/// Buffer size used when streaming pack entries to disk (64 KiB).
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;
