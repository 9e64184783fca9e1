//! Tests for target manifest version checks and fetches.

mod common;

use common::*;
use resync::checksum;
use resync::manifest::{BinaryManifestCodec, ManifestCodec, RemoteManifest};
use resync::{DownloadTag, Error, Event, ManifestDigest, ManifestUpdateResult, VersionCheck};
use std::fs;

/// Encodes `manifest` the way the update server serves it.
fn served(manifest: &RemoteManifest) -> (Vec<u8>, ManifestDigest) {
    let plain = BinaryManifestCodec.encode_remote(manifest).unwrap();
    let compressed = checksum::compress(&plain).unwrap();
    let digest = ManifestDigest {
        length: plain.len() as u32,
        hash: checksum::crc32(&plain),
        compressed_length: compressed.len() as u32,
        compressed_hash: checksum::crc32(&compressed),
    };
    (compressed, digest)
}

fn manifest_update(events: &[Event]) -> Option<ManifestUpdateResult> {
    events.iter().find_map(|e| match e {
        Event::ManifestUpdate(result) => Some(result.clone()),
        _ => None,
    })
}

// =============================================================================
// Version Check
// =============================================================================

#[test]
fn test_missing_cache_needs_update() {
    let store = Store::new();
    let downloads = ScriptedDownloads::with_slots(1);
    let updater = store.updater(&downloads);
    assert_eq!(updater.check_version(1), VersionCheck::NeedsUpdate);
}

#[test]
fn test_version_mismatch_in_either_direction() {
    let store = Store::new();
    let a = Payload::universal("a", b"a");
    store.write_remote(&remote_manifest(7, &[(&a, None)]));

    let downloads = ScriptedDownloads::with_slots(1);
    let updater = store.updater(&downloads);
    assert_eq!(updater.check_version(7), VersionCheck::UpToDate);
    assert_eq!(updater.check_version(8), VersionCheck::NeedsUpdate);
    assert_eq!(updater.check_version(6), VersionCheck::NeedsUpdate);
}

#[test]
fn test_unreadable_cache_needs_update() {
    let store = Store::new();
    fs::write(store.rw().join(resync::REMOTE_MANIFEST_FILE), b"RS").unwrap();

    let downloads = ScriptedDownloads::with_slots(1);
    let updater = store.updater(&downloads);
    assert_eq!(updater.check_version(1), VersionCheck::NeedsUpdate);
}

// =============================================================================
// Fetch
// =============================================================================

#[test]
fn test_fetch_installs_decompressed_manifest() {
    let store = Store::new();
    let a = Payload::universal("a", b"first resource");
    let manifest = remote_manifest(12, &[(&a, None)]);
    let (compressed, digest) = served(&manifest);

    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.update_manifest(digest).unwrap();

    let flight = downloads.in_flight();
    assert_eq!(flight.len(), 1);
    assert_eq!(flight[0].tag, DownloadTag::RemoteManifest);
    assert_eq!(
        flight[0].uri,
        format!(
            "{}/remote_manifest.{}.dat",
            PREFIX,
            hex::encode(digest.compressed_hash.to_be_bytes())
        )
    );

    downloads.succeed(&DownloadTag::RemoteManifest, &compressed);
    updater.tick(TICK).unwrap();

    let path = updater.remote_manifest_path().to_path_buf();
    assert_eq!(
        manifest_update(&updater.drain_events()),
        Some(ManifestUpdateResult::Updated {
            path: path.clone(),
            uri: flight[0].uri.clone()
        })
    );
    let installed = BinaryManifestCodec
        .decode_remote(&fs::read(&path).unwrap())
        .unwrap();
    assert_eq!(installed, manifest);
    assert_eq!(updater.check_version(12), VersionCheck::UpToDate);
}

#[test]
fn test_corrupt_fetch_reported_and_removed() {
    let store = Store::new();
    let a = Payload::universal("a", b"first resource");
    let (mut compressed, digest) = served(&remote_manifest(12, &[(&a, None)]));
    let last = compressed.len() - 1;
    compressed[last] ^= 0xff;

    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.update_manifest(digest).unwrap();
    downloads.succeed(&DownloadTag::RemoteManifest, &compressed);
    updater.tick(TICK).unwrap();

    match manifest_update(&updater.drain_events()) {
        Some(ManifestUpdateResult::Failed { reason, .. }) => {
            assert!(reason.contains("hash mismatch"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!updater.remote_manifest_path().exists());
    assert_eq!(updater.check_version(12), VersionCheck::NeedsUpdate);
}

#[test]
fn test_transport_failure_reported_once() {
    let store = Store::new();
    let a = Payload::universal("a", b"first resource");
    let (_compressed, digest) = served(&remote_manifest(12, &[(&a, None)]));

    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.update_manifest(digest).unwrap();
    downloads.fail(&DownloadTag::RemoteManifest, None);
    updater.tick(TICK).unwrap();
    updater.tick(TICK).unwrap();

    let events = updater.drain_events();
    let failures = events
        .iter()
        .filter(|e| matches!(e, Event::ManifestUpdate(ManifestUpdateResult::Failed { .. })))
        .count();
    assert_eq!(failures, 1);
    // No internal retry.
    assert_eq!(downloads.history().len(), 1);
}

#[test]
fn test_concurrent_fetch_rejected() {
    let store = Store::new();
    let a = Payload::universal("a", b"first resource");
    let (_compressed, digest) = served(&remote_manifest(12, &[(&a, None)]));

    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.update_manifest(digest).unwrap();
    assert!(matches!(updater.update_manifest(digest), Err(Error::Busy(_))));
}
