//! In-memory model of the read-write manifest.
//!
//! The read-write manifest is the durable record of what the mutable area
//! holds. It is only ever replaced whole, via `<file>.tmp` + fsync + rename,
//! so a crash leaves either the previous or the next version on disk.

use super::{LocalManifest, LocalResource, ManifestCodec};
use crate::constants::TEMP_EXTENSION;
use crate::error::{Error, Result};
use crate::identifier::{LoadKind, ResourceId};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One resource recorded in the read-write area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteRecord {
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
    pub container: Option<String>,
}

/// Read-write manifest contents keyed by resource.
#[derive(Debug)]
pub struct ReadWriteIndex {
    path: PathBuf,
    records: BTreeMap<ResourceId, ReadWriteRecord>,
}

impl ReadWriteIndex {
    /// Creates an empty index persisted at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: BTreeMap::new(),
        }
    }

    /// Loads the index from `path`; a missing file yields an empty index.
    pub fn load(path: PathBuf, codec: &dyn ManifestCodec) -> Result<Self> {
        let mut index = Self::new(path);
        match fs::read(&index.path) {
            Ok(bytes) => index.replace(&codec.decode_local(&bytes)?)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(index)
    }

    /// Replaces the contents with those of a decoded manifest.
    pub fn replace(&mut self, manifest: &LocalManifest) -> Result<()> {
        self.records.clear();
        for (resource, container) in manifest.entries()? {
            self.records.insert(
                resource.id,
                ReadWriteRecord {
                    load_kind: resource.load_kind,
                    length: resource.length,
                    hash: resource.hash,
                    container,
                },
            );
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ReadWriteRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.records.contains_key(id)
    }

    /// Records (or replaces) a resource.
    pub fn insert(&mut self, id: ResourceId, record: ReadWriteRecord) {
        self.records.insert(id, record);
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ReadWriteRecord> {
        self.records.remove(id)
    }

    /// Moves a recorded resource to another container (or to loose storage).
    pub fn set_container(&mut self, id: &ResourceId, container: Option<String>) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))?;
        record.container = container;
        Ok(())
    }

    /// Number of recorded resources in `container`.
    pub fn container_len(&self, container: &str) -> usize {
        self.records
            .values()
            .filter(|r| r.container.as_deref() == Some(container))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &ReadWriteRecord)> {
        self.records.iter()
    }

    /// Renders the index as a manifest.
    pub fn to_manifest(&self) -> LocalManifest {
        LocalManifest::from_entries(
            self.records
                .iter()
                .map(|(id, r)| {
                    (
                        LocalResource {
                            id: id.clone(),
                            load_kind: r.load_kind,
                            length: r.length,
                            hash: r.hash,
                        },
                        r.container.clone(),
                    )
                })
                .collect(),
        )
    }

    /// Rewrites the manifest file atomically.
    pub fn persist(&self, codec: &dyn ManifestCodec) -> Result<()> {
        let bytes = codec.encode_local(&self.to_manifest())?;
        write_manifest_atomic(&self.path, &bytes)?;
        debug!(
            "Persisted read-write manifest {} ({} resources)",
            self.path.display(),
            self.records.len()
        );
        Ok(())
    }
}

/// Writes `bytes` to `<path>.tmp`, fsyncs, then renames over `path`.
///
/// Any failure is reported as [`Error::ManifestWrite`].
pub(crate) fn write_manifest_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let fail = |reason: String| Error::ManifestWrite {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
    }

    let temp_path = temp_path_for(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(fail(e.to_string()));
    }

    info!("Wrote manifest {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Returns `<path>.tmp`.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TEMP_EXTENSION);
    PathBuf::from(name)
}
