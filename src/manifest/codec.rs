//! Binary manifest codec.
//!
//! All integers are little-endian. Every manifest opens with a 3-byte magic
//! and a 1-byte format version. Strings are `u16` length-prefixed UTF-8; an
//! optional variant is a presence byte followed by a string. Lists are `u32`
//! counts followed by their items.

use super::{
    AssetEntry, IndexSet, LocalManifest, LocalResource, PackManifest, PackResource,
    RemoteManifest, RemoteResource,
};
use crate::constants::{
    LOCAL_MANIFEST_MAGIC, MANIFEST_FORMAT_VERSION, PACK_MANIFEST_MAGIC, REMOTE_MANIFEST_MAGIC,
};
use crate::error::{Error, Result};
use crate::identifier::{LoadKind, ResourceId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Upper bound on decoded list lengths; rejects corrupt counts before allocating.
const MAX_LIST_LEN: u32 = 1 << 24;

/// Serializer/deserializer for the manifest binary shapes.
pub trait ManifestCodec {
    fn decode_remote(&self, bytes: &[u8]) -> Result<RemoteManifest>;
    fn encode_remote(&self, manifest: &RemoteManifest) -> Result<Vec<u8>>;

    /// Reads only the internal version from the head of a remote manifest.
    fn read_internal_version(&self, reader: &mut dyn Read) -> Result<i32>;

    fn decode_local(&self, bytes: &[u8]) -> Result<LocalManifest>;
    fn encode_local(&self, manifest: &LocalManifest) -> Result<Vec<u8>>;

    /// Decodes a pack index from the head of an archive; the reader is left
    /// positioned at the end of the index.
    fn decode_pack(&self, reader: &mut dyn Read) -> Result<PackManifest>;
    fn encode_pack(&self, manifest: &PackManifest) -> Result<Vec<u8>>;
}

/// Default little-endian implementation of [`ManifestCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryManifestCodec;

fn parse_err(e: std::io::Error) -> Error {
    Error::ManifestParse(e.to_string())
}

// =============================================================================
// Primitive readers
// =============================================================================

fn read_header(r: &mut dyn Read, magic: [u8; 3]) -> Result<()> {
    let mut found = [0u8; 3];
    r.read_exact(&mut found).map_err(parse_err)?;
    if found != magic {
        return Err(Error::ManifestParse(format!(
            "bad magic {:?}, expected {:?}",
            String::from_utf8_lossy(&found),
            String::from_utf8_lossy(&magic)
        )));
    }
    let version = r.read_u8().map_err(parse_err)?;
    if version != MANIFEST_FORMAT_VERSION {
        return Err(Error::ManifestParse(format!(
            "unsupported format version {}",
            version
        )));
    }
    Ok(())
}

fn read_string(r: &mut dyn Read) -> Result<String> {
    let len = r.read_u16::<LittleEndian>().map_err(parse_err)?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).map_err(parse_err)?;
    String::from_utf8(buf).map_err(|e| Error::ManifestParse(e.to_string()))
}

fn read_optional_string(r: &mut dyn Read) -> Result<Option<String>> {
    match r.read_u8().map_err(parse_err)? {
        0 => Ok(None),
        1 => Ok(Some(read_string(r)?)),
        other => Err(Error::ManifestParse(format!(
            "bad presence byte {}",
            other
        ))),
    }
}

fn read_count(r: &mut dyn Read) -> Result<u32> {
    let count = r.read_u32::<LittleEndian>().map_err(parse_err)?;
    if count > MAX_LIST_LEN {
        return Err(Error::ManifestParse(format!("list length {} too large", count)));
    }
    Ok(count)
}

fn read_indices(r: &mut dyn Read) -> Result<Vec<u32>> {
    let count = read_count(r)?;
    (0..count)
        .map(|_| r.read_u32::<LittleEndian>().map_err(parse_err))
        .collect()
}

fn read_index_sets(r: &mut dyn Read) -> Result<Vec<IndexSet>> {
    let count = read_count(r)?;
    (0..count)
        .map(|_| {
            let name = read_string(r)?;
            let resource_indices = read_indices(r)?;
            Ok(IndexSet {
                name,
                resource_indices,
            })
        })
        .collect()
}

fn read_id_and_kind(r: &mut dyn Read) -> Result<(ResourceId, LoadKind)> {
    let name = read_string(r)?;
    let variant = read_optional_string(r)?;
    let extension = read_string(r)?;
    let kind = LoadKind::try_from(r.read_u8().map_err(parse_err)?)?;
    Ok((ResourceId::new(name, variant, extension), kind))
}

// =============================================================================
// Primitive writers
// =============================================================================

fn write_header(w: &mut Vec<u8>, magic: [u8; 3]) -> Result<()> {
    w.write_all(&magic)?;
    w.write_u8(MANIFEST_FORMAT_VERSION)?;
    Ok(())
}

fn write_string(w: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::ManifestParse(format!("string too long: {} bytes", value.len())))?;
    w.write_u16::<LittleEndian>(len)?;
    w.write_all(value.as_bytes())?;
    Ok(())
}

fn write_optional_string(w: &mut Vec<u8>, value: Option<&str>) -> Result<()> {
    match value {
        None => w.write_u8(0)?,
        Some(value) => {
            w.write_u8(1)?;
            write_string(w, value)?;
        }
    }
    Ok(())
}

fn write_count(w: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .ok()
        .filter(|&c| c <= MAX_LIST_LEN)
        .ok_or_else(|| Error::ManifestParse(format!("list length {} too large", count)))?;
    w.write_u32::<LittleEndian>(count)?;
    Ok(())
}

fn write_indices(w: &mut Vec<u8>, indices: &[u32]) -> Result<()> {
    write_count(w, indices.len())?;
    for &index in indices {
        w.write_u32::<LittleEndian>(index)?;
    }
    Ok(())
}

fn write_index_sets(w: &mut Vec<u8>, sets: &[IndexSet]) -> Result<()> {
    write_count(w, sets.len())?;
    for set in sets {
        write_string(w, &set.name)?;
        write_indices(w, &set.resource_indices)?;
    }
    Ok(())
}

fn write_id_and_kind(w: &mut Vec<u8>, id: &ResourceId, kind: LoadKind) -> Result<()> {
    write_string(w, id.name())?;
    write_optional_string(w, id.variant())?;
    write_string(w, id.extension())?;
    w.write_u8(kind.as_u8())?;
    Ok(())
}

/// Fails unless every byte of `bytes` was consumed.
fn ensure_consumed(cursor: &Cursor<&[u8]>) -> Result<()> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if remaining != 0 {
        return Err(Error::ManifestParse(format!(
            "{} trailing bytes after manifest",
            remaining
        )));
    }
    Ok(())
}

// =============================================================================
// Codec
// =============================================================================

impl ManifestCodec for BinaryManifestCodec {
    fn decode_remote(&self, bytes: &[u8]) -> Result<RemoteManifest> {
        let mut cursor = Cursor::new(bytes);
        let r: &mut dyn Read = &mut cursor;
        read_header(r, REMOTE_MANIFEST_MAGIC)?;
        let applicable_version = read_string(r)?;
        let internal_version = r.read_i32::<LittleEndian>().map_err(parse_err)?;

        let asset_count = read_count(r)?;
        let assets = (0..asset_count)
            .map(|_| {
                let name = read_string(r)?;
                let dependency_indices = read_indices(r)?;
                Ok(AssetEntry {
                    name,
                    dependency_indices,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let resource_count = read_count(r)?;
        let resources = (0..resource_count)
            .map(|_| {
                let (id, load_kind) = read_id_and_kind(r)?;
                Ok(RemoteResource {
                    id,
                    load_kind,
                    length: r.read_u32::<LittleEndian>().map_err(parse_err)?,
                    hash: r.read_u32::<LittleEndian>().map_err(parse_err)?,
                    compressed_length: r.read_u32::<LittleEndian>().map_err(parse_err)?,
                    compressed_hash: r.read_u32::<LittleEndian>().map_err(parse_err)?,
                    asset_indices: read_indices(r)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let containers = read_index_sets(r)?;
        let groups = read_index_sets(r)?;
        ensure_consumed(&cursor)?;

        let manifest = RemoteManifest {
            applicable_version,
            internal_version,
            assets,
            resources,
            containers,
            groups,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    fn encode_remote(&self, manifest: &RemoteManifest) -> Result<Vec<u8>> {
        let mut w = Vec::new();
        write_header(&mut w, REMOTE_MANIFEST_MAGIC)?;
        write_string(&mut w, &manifest.applicable_version)?;
        w.write_i32::<LittleEndian>(manifest.internal_version)?;

        write_count(&mut w, manifest.assets.len())?;
        for asset in &manifest.assets {
            write_string(&mut w, &asset.name)?;
            write_indices(&mut w, &asset.dependency_indices)?;
        }

        write_count(&mut w, manifest.resources.len())?;
        for resource in &manifest.resources {
            write_id_and_kind(&mut w, &resource.id, resource.load_kind)?;
            w.write_u32::<LittleEndian>(resource.length)?;
            w.write_u32::<LittleEndian>(resource.hash)?;
            w.write_u32::<LittleEndian>(resource.compressed_length)?;
            w.write_u32::<LittleEndian>(resource.compressed_hash)?;
            write_indices(&mut w, &resource.asset_indices)?;
        }

        write_index_sets(&mut w, &manifest.containers)?;
        write_index_sets(&mut w, &manifest.groups)?;
        Ok(w)
    }

    fn read_internal_version(&self, reader: &mut dyn Read) -> Result<i32> {
        read_header(reader, REMOTE_MANIFEST_MAGIC)?;
        let _applicable_version = read_string(reader)?;
        reader.read_i32::<LittleEndian>().map_err(parse_err)
    }

    fn decode_local(&self, bytes: &[u8]) -> Result<LocalManifest> {
        let mut cursor = Cursor::new(bytes);
        let r: &mut dyn Read = &mut cursor;
        read_header(r, LOCAL_MANIFEST_MAGIC)?;

        let resource_count = read_count(r)?;
        let resources = (0..resource_count)
            .map(|_| {
                let (id, load_kind) = read_id_and_kind(r)?;
                Ok(LocalResource {
                    id,
                    load_kind,
                    length: r.read_u32::<LittleEndian>().map_err(parse_err)?,
                    hash: r.read_u32::<LittleEndian>().map_err(parse_err)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let containers = read_index_sets(r)?;
        ensure_consumed(&cursor)?;

        let manifest = LocalManifest {
            resources,
            containers,
        };
        manifest.entries()?;
        Ok(manifest)
    }

    fn encode_local(&self, manifest: &LocalManifest) -> Result<Vec<u8>> {
        let mut w = Vec::new();
        write_header(&mut w, LOCAL_MANIFEST_MAGIC)?;
        write_count(&mut w, manifest.resources.len())?;
        for resource in &manifest.resources {
            write_id_and_kind(&mut w, &resource.id, resource.load_kind)?;
            w.write_u32::<LittleEndian>(resource.length)?;
            w.write_u32::<LittleEndian>(resource.hash)?;
        }
        write_index_sets(&mut w, &manifest.containers)?;
        Ok(w)
    }

    fn decode_pack(&self, reader: &mut dyn Read) -> Result<PackManifest> {
        read_header(reader, PACK_MANIFEST_MAGIC)?;
        let offset = reader.read_u64::<LittleEndian>().map_err(parse_err)?;
        let length = reader.read_u64::<LittleEndian>().map_err(parse_err)?;
        let hash = reader.read_u32::<LittleEndian>().map_err(parse_err)?;

        let resource_count = read_count(reader)?;
        let resources = (0..resource_count)
            .map(|_| {
                let (id, load_kind) = read_id_and_kind(reader)?;
                Ok(PackResource {
                    id,
                    load_kind,
                    offset: reader.read_u64::<LittleEndian>().map_err(parse_err)?,
                    length: reader.read_u32::<LittleEndian>().map_err(parse_err)?,
                    hash: reader.read_u32::<LittleEndian>().map_err(parse_err)?,
                    compressed_length: reader.read_u32::<LittleEndian>().map_err(parse_err)?,
                    compressed_hash: reader.read_u32::<LittleEndian>().map_err(parse_err)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PackManifest {
            offset,
            length,
            hash,
            resources,
        })
    }

    fn encode_pack(&self, manifest: &PackManifest) -> Result<Vec<u8>> {
        let mut w = Vec::new();
        write_header(&mut w, PACK_MANIFEST_MAGIC)?;
        w.write_u64::<LittleEndian>(manifest.offset)?;
        w.write_u64::<LittleEndian>(manifest.length)?;
        w.write_u32::<LittleEndian>(manifest.hash)?;
        write_count(&mut w, manifest.resources.len())?;
        for resource in &manifest.resources {
            write_id_and_kind(&mut w, &resource.id, resource.load_kind)?;
            w.write_u64::<LittleEndian>(resource.offset)?;
            w.write_u32::<LittleEndian>(resource.length)?;
            w.write_u32::<LittleEndian>(resource.hash)?;
            w.write_u32::<LittleEndian>(resource.compressed_length)?;
            w.write_u32::<LittleEndian>(resource.compressed_hash)?;
        }
        Ok(w)
    }
}
