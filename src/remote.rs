//! # Target Manifest Synchronization
//!
//! Keeps the locally cached target manifest current.
//!
//! ## Version Check
//!
//! [`RemoteManifestSync::check_version`] reads only the head of the cached
//! manifest to extract its internal version. Any mismatch, in either
//! direction, means an update is needed, so a lower target rolls back.
//!
//! ## Fetch
//!
//! The manifest is fetched under a content-addressed name
//! (`remote_manifest.<hex compressed hash>.dat`) and validated in order:
//!
//! 1. compressed length
//! 2. compressed CRC
//! 3. decompression and decompressed length
//! 4. decompressed CRC
//!
//! The cached file is then overwritten in place (truncate + rewrite). This is
//! weaker than the read-write manifest's temp-file + rename: a crash during
//! the rewrite leaves a damaged cache, which the next version check reports
//! as "needs update" and which is always re-fetchable.
//!
//! Failures delete the downloaded file and are reported once; there is no
//! internal retry.

use crate::checksum;
use crate::config::join_uri;
use crate::error::{Error, Result};
use crate::events::{Event, EventQueue, ManifestUpdateResult};
use crate::manifest::ManifestCodec;
use crate::ports::{DownloadEvent, DownloadPort, DownloadTag};
use crate::storage::remove_if_exists;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of comparing the cached manifest with a target version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    UpToDate,
    NeedsUpdate,
}

/// Sizes and checksums the caller expects of the target manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestDigest {
    pub length: u32,
    pub hash: u32,
    pub compressed_length: u32,
    pub compressed_hash: u32,
}

#[derive(Debug)]
struct PendingFetch {
    digest: ManifestDigest,
    uri: String,
}

/// Fetches and validates the target manifest.
#[derive(Debug)]
pub struct RemoteManifestSync {
    manifest_path: PathBuf,
    uri_prefix: String,
    pending: Option<PendingFetch>,
}

impl RemoteManifestSync {
    pub fn new(manifest_path: PathBuf, uri_prefix: impl Into<String>) -> Self {
        Self {
            manifest_path,
            uri_prefix: uri_prefix.into(),
            pending: None,
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn is_updating(&self) -> bool {
        self.pending.is_some()
    }

    /// Compares the cached manifest's internal version with `target`.
    pub fn check_version(&self, codec: &dyn ManifestCodec, target: i32) -> VersionCheck {
        let file = match File::open(&self.manifest_path) {
            Ok(file) => file,
            Err(_) => {
                debug!("No cached manifest at {}", self.manifest_path.display());
                return VersionCheck::NeedsUpdate;
            }
        };

        match codec.read_internal_version(&mut BufReader::new(file)) {
            Ok(version) if version == target => VersionCheck::UpToDate,
            Ok(version) => {
                info!("Cached manifest version {} differs from target {}", version, target);
                VersionCheck::NeedsUpdate
            }
            Err(e) => {
                warn!("Cached manifest unreadable: {}", e);
                VersionCheck::NeedsUpdate
            }
        }
    }

    /// Content-addressed remote name for a manifest with `compressed_hash`.
    pub fn remote_file_name(&self, compressed_hash: u32) -> String {
        let stem = self
            .manifest_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("remote_manifest");
        let hash = hex::encode(compressed_hash.to_be_bytes());
        match self.manifest_path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}.{}", stem, hash, ext),
            None => format!("{}.{}", stem, hash),
        }
    }

    /// Enqueues the target manifest download.
    pub fn update_manifest(
        &mut self,
        downloads: &mut dyn DownloadPort,
        digest: ManifestDigest,
    ) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::Busy("target manifest is already being fetched".to_string()));
        }

        let uri = join_uri(&self.uri_prefix, &self.remote_file_name(digest.compressed_hash));
        if let Some(parent) = self.manifest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        downloads.enqueue(&self.manifest_path, &uri, DownloadTag::RemoteManifest)?;
        info!("Fetching target manifest from {}", uri);

        self.pending = Some(PendingFetch { digest, uri });
        Ok(())
    }

    /// Handles a download event tagged [`DownloadTag::RemoteManifest`].
    pub fn on_download_event(&mut self, event: &DownloadEvent, events: &mut EventQueue) {
        let (download_path, result) = match event {
            DownloadEvent::Success { download_path, .. } => {
                let Some(pending) = self.pending.take() else {
                    return;
                };
                let result = self
                    .install(download_path, &pending.digest)
                    .map(|()| ManifestUpdateResult::Updated {
                        path: self.manifest_path.clone(),
                        uri: pending.uri.clone(),
                    })
                    .map_err(|e| (pending.uri, e.to_string()));
                (download_path, result)
            }
            DownloadEvent::Failure {
                download_path,
                error_message,
                ..
            } => {
                let Some(pending) = self.pending.take() else {
                    return;
                };
                (download_path, Err((pending.uri, error_message.clone())))
            }
            DownloadEvent::Start { .. } | DownloadEvent::Update { .. } => return,
        };

        let outcome = match result {
            Ok(updated) => {
                info!("Target manifest updated at {}", self.manifest_path.display());
                updated
            }
            Err((uri, reason)) => {
                warn!("Target manifest update from {} failed: {}", uri, reason);
                if let Err(e) = remove_if_exists(download_path) {
                    warn!("Failed to remove {}: {}", download_path.display(), e);
                }
                ManifestUpdateResult::Failed { uri, reason }
            }
        };
        events.push(Event::ManifestUpdate(outcome));
    }

    /// Validates the downloaded bytes and rewrites them decompressed, in place.
    fn install(&self, download_path: &Path, digest: &ManifestDigest) -> Result<()> {
        let name = "target manifest";
        let compressed = fs::read(download_path)?;
        checksum::verify_compressed(
            name,
            &compressed,
            u64::from(digest.compressed_length),
            digest.compressed_hash,
        )?;

        let bytes = checksum::decompress(name, &compressed, u64::from(digest.length))?;
        let actual = checksum::crc32(&bytes);
        if actual != digest.hash {
            return Err(Error::HashMismatch {
                resource: name.to_string(),
                expected: digest.hash,
                actual,
            });
        }

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(download_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }
}
