//! Resource pack archives.
//!
//! A pack is a single file laid out as:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────────────────┐
//! │ index (PackManifest)     │ data region                          │
//! │ offset, length, hash,    │ entry payloads, back to back,        │
//! │ entries with offsets     │ each `compressed_length` bytes       │
//! └──────────────────────────┴──────────────────────────────────────┘
//! 0                          offset                      offset+length == file size
//! ```
//!
//! Entry offsets are relative to the start of the data region.

use super::{ManifestCodec, PackManifest, PackResource};
use crate::checksum;
use crate::constants::COPY_BUFFER_SIZE;
use crate::error::{Error, Result};
use crate::identifier::{LoadKind, ResourceId};
use crc32fast::Hasher;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// One payload to be packed. `payload` is the stored (possibly compressed) form.
#[derive(Debug, Clone)]
pub struct PackPayload {
    pub id: ResourceId,
    pub load_kind: LoadKind,
    pub length: u32,
    pub hash: u32,
    pub payload: Vec<u8>,
}

/// Builds a complete pack file from payloads.
pub fn assemble_pack(codec: &dyn ManifestCodec, payloads: &[PackPayload]) -> Result<Vec<u8>> {
    let mut resources = Vec::with_capacity(payloads.len());
    let mut data = Vec::new();
    for p in payloads {
        let compressed_length = u32::try_from(p.payload.len())
            .map_err(|_| Error::Internal(format!("payload for '{}' too large", p.id)))?;
        resources.push(PackResource {
            id: p.id.clone(),
            load_kind: p.load_kind,
            offset: data.len() as u64,
            length: p.length,
            hash: p.hash,
            compressed_length,
            compressed_hash: stored_hash(p),
        });
        data.extend_from_slice(&p.payload);
    }

    let mut manifest = PackManifest {
        offset: 0,
        length: data.len() as u64,
        hash: checksum::crc32(&data),
        resources,
    };
    // Index fields are fixed width, so its size does not depend on `offset`.
    manifest.offset = codec.encode_pack(&manifest)?.len() as u64;

    let mut file = codec.encode_pack(&manifest)?;
    file.extend_from_slice(&data);
    Ok(file)
}

/// Uncompressed payloads record their resource hash as the compressed hash,
/// so [`PackResource::is_compressed`] sees them as stored as-is.
fn stored_hash(p: &PackPayload) -> u32 {
    let length = u64::from(p.length);
    let stored_as_is = p.payload.len() as u64 == length
        && checksum::resource_hash(&p.payload, p.load_kind, p.hash, length) == p.hash;
    if stored_as_is {
        p.hash
    } else {
        checksum::crc32(&p.payload)
    }
}

/// An opened pack whose index has been validated against the file size.
#[derive(Debug)]
pub struct OpenPack {
    pub manifest: PackManifest,
    pub file: File,
    pub file_len: u64,
}

/// Opens a pack and validates `offset + length == file size`.
///
/// No payload byte is read.
pub fn open_pack(codec: &dyn ManifestCodec, path: &Path) -> Result<OpenPack> {
    let invalid = |reason: String| Error::InvalidPack {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let manifest = codec
        .decode_pack(&mut reader)
        .map_err(|e| invalid(e.to_string()))?;

    let end = manifest.offset.checked_add(manifest.length);
    if end != Some(file_len) {
        return Err(invalid(format!(
            "data region {}+{} does not match file size {}",
            manifest.offset, manifest.length, file_len
        )));
    }

    for resource in &manifest.resources {
        let end = resource.offset.checked_add(u64::from(resource.compressed_length));
        if end.is_none_or(|end| end > manifest.length) {
            return Err(invalid(format!(
                "entry '{}' exceeds data region",
                resource.id
            )));
        }
    }

    debug!(
        "Opened pack {} ({} entries, data {} bytes)",
        path.display(),
        manifest.resources.len(),
        manifest.length
    );

    Ok(OpenPack {
        manifest,
        file: reader.into_inner(),
        file_len,
    })
}

/// Checks the whole-data-region checksum of an opened pack.
pub fn verify_data_region(pack: &mut OpenPack) -> Result<bool> {
    pack.file.seek(SeekFrom::Start(pack.manifest.offset))?;
    let mut reader = (&pack.file).take(pack.manifest.length);
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize() == pack.manifest.hash)
}
