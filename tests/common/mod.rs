//! Shared fixtures for the integration suites.
//!
//! [`ScriptedDownloads`] is a [`DownloadPort`] driven by the test: transfers
//! sit in flight until the test completes or fails them, and the resulting
//! events are delivered on the next poll.

#![allow(dead_code)]

use resync::checksum;
use resync::manifest::{
    BinaryManifestCodec, IndexSet, LocalManifest, LocalResource, ManifestCodec, RemoteManifest,
    RemoteResource,
};
use resync::storage::download_path_for;
use resync::{
    DownloadEvent, DownloadPort, DownloadTag, Event, LoadKind, READ_ONLY_MANIFEST_FILE,
    READ_WRITE_MANIFEST_FILE, REMOTE_MANIFEST_FILE, ResourceId, ResourceUpdater, UpdaterConfig,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;

pub const PREFIX: &str = "https://cdn.test/res";
pub const TICK: Duration = Duration::from_millis(16);

// =============================================================================
// Scripted Download Port
// =============================================================================

/// A transfer the engine enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub serial_id: u64,
    pub local_path: PathBuf,
    pub uri: String,
    pub tag: DownloadTag,
}

#[derive(Debug)]
struct PortState {
    slots: usize,
    next_serial: u64,
    reject: bool,
    in_flight: Vec<Transfer>,
    history: Vec<Transfer>,
    outbox: VecDeque<DownloadEvent>,
}

/// Cloneable handle onto one scripted transport.
#[derive(Debug, Clone)]
pub struct ScriptedDownloads {
    state: Rc<RefCell<PortState>>,
}

impl ScriptedDownloads {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(PortState {
                slots,
                next_serial: 1,
                reject: false,
                in_flight: Vec::new(),
                history: Vec::new(),
                outbox: VecDeque::new(),
            })),
        }
    }

    pub fn set_slots(&self, slots: usize) {
        self.state.borrow_mut().slots = slots;
    }

    /// Makes every subsequent enqueue fail.
    pub fn set_reject(&self, reject: bool) {
        self.state.borrow_mut().reject = reject;
    }

    pub fn in_flight(&self) -> Vec<Transfer> {
        self.state.borrow().in_flight.clone()
    }

    /// Every transfer ever enqueued, in order.
    pub fn history(&self) -> Vec<Transfer> {
        self.state.borrow().history.clone()
    }

    fn take(&self, tag: &DownloadTag) -> Transfer {
        let mut state = self.state.borrow_mut();
        let index = state
            .in_flight
            .iter()
            .position(|t| &t.tag == tag)
            .unwrap_or_else(|| panic!("no transfer in flight for {:?}", tag));
        state.in_flight.remove(index)
    }

    /// Reports a progress update for an in-flight transfer.
    pub fn progress(&self, tag: &DownloadTag, current_length: u64) {
        let mut state = self.state.borrow_mut();
        let transfer = state
            .in_flight
            .iter()
            .find(|t| &t.tag == tag)
            .cloned()
            .unwrap_or_else(|| panic!("no transfer in flight for {:?}", tag));
        state.outbox.push_back(DownloadEvent::Update {
            serial_id: transfer.serial_id,
            tag: transfer.tag,
            current_length,
        });
    }

    /// Completes a transfer, landing `bytes` at its local path.
    pub fn succeed(&self, tag: &DownloadTag, bytes: &[u8]) {
        let transfer = self.take(tag);
        fs::write(&transfer.local_path, bytes).unwrap();
        self.state
            .borrow_mut()
            .outbox
            .push_back(DownloadEvent::Success {
                serial_id: transfer.serial_id,
                tag: transfer.tag,
                download_path: transfer.local_path,
                download_uri: transfer.uri,
            });
    }

    /// Fails a transfer, leaving `partial` bytes in `<local>.download`.
    pub fn fail(&self, tag: &DownloadTag, partial: Option<&[u8]>) {
        let transfer = self.take(tag);
        if let Some(partial) = partial {
            fs::write(download_path_for(&transfer.local_path), partial).unwrap();
        }
        self.state
            .borrow_mut()
            .outbox
            .push_back(DownloadEvent::Failure {
                serial_id: transfer.serial_id,
                tag: transfer.tag,
                download_path: transfer.local_path,
                download_uri: transfer.uri,
                error_message: "connection reset".to_string(),
            });
    }
}

impl DownloadPort for ScriptedDownloads {
    fn enqueue(
        &mut self,
        local_path: &Path,
        remote_uri: &str,
        tag: DownloadTag,
    ) -> resync::Result<u64> {
        let mut state = self.state.borrow_mut();
        if state.reject {
            return Err(resync::Error::DownloadFailed {
                uri: remote_uri.to_string(),
                reason: "transport offline".to_string(),
            });
        }
        let transfer = Transfer {
            serial_id: state.next_serial,
            local_path: local_path.to_path_buf(),
            uri: remote_uri.to_string(),
            tag,
        };
        state.next_serial += 1;
        state.history.push(transfer.clone());
        state.in_flight.push(transfer.clone());
        state.outbox.push_back(DownloadEvent::Start {
            serial_id: transfer.serial_id,
            tag: transfer.tag,
            current_length: 0,
        });
        Ok(state.next_serial - 1)
    }

    fn free_slots(&self) -> usize {
        let state = self.state.borrow();
        state.slots.saturating_sub(state.in_flight.len())
    }

    fn poll(&mut self, _dt: Duration) -> Vec<DownloadEvent> {
        self.state.borrow_mut().outbox.drain(..).collect()
    }
}

pub fn resource_tag(id: &ResourceId) -> DownloadTag {
    DownloadTag::Resource(id.clone())
}

// =============================================================================
// Payloads
// =============================================================================

/// A resource with its plain, stored and transfer forms.
#[derive(Debug, Clone)]
pub struct Payload {
    pub id: ResourceId,
    pub load_kind: LoadKind,
    /// Bytes as kept on disk.
    pub stored: Vec<u8>,
    pub hash: u32,
    /// Bytes as served by the update server.
    pub transfer: Vec<u8>,
    pub compressed_hash: u32,
}

impl Payload {
    pub fn new(id: ResourceId, load_kind: LoadKind, plain: &[u8]) -> Self {
        let (stored, hash) = checksum::encode_resource(plain, load_kind);
        Self {
            id,
            load_kind,
            transfer: stored.clone(),
            compressed_hash: hash,
            stored,
            hash,
        }
    }

    pub fn universal(name: &str, plain: &[u8]) -> Self {
        Self::new(
            ResourceId::universal(name, "bundle"),
            LoadKind::LoadFromFile,
            plain,
        )
    }

    /// Serves this payload gzip-compressed.
    pub fn compressed(mut self) -> Self {
        self.transfer = checksum::compress(&self.stored).unwrap();
        self.compressed_hash = checksum::crc32(&self.transfer);
        self
    }

    pub fn length(&self) -> u32 {
        self.stored.len() as u32
    }

    pub fn remote(&self) -> RemoteResource {
        RemoteResource {
            id: self.id.clone(),
            load_kind: self.load_kind,
            length: self.length(),
            hash: self.hash,
            compressed_length: self.transfer.len() as u32,
            compressed_hash: self.compressed_hash,
            asset_indices: Vec::new(),
        }
    }

    pub fn local(&self) -> LocalResource {
        LocalResource {
            id: self.id.clone(),
            load_kind: self.load_kind,
            length: self.length(),
            hash: self.hash,
        }
    }
}

/// Groups resource indices by container name.
fn containers_of<'a>(names: impl Iterator<Item = Option<&'a str>>) -> Vec<IndexSet> {
    let mut by_name: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for (index, name) in names.enumerate() {
        if let Some(name) = name {
            by_name.entry(name).or_default().push(index as u32);
        }
    }
    by_name
        .into_iter()
        .map(|(name, indices)| IndexSet::new(name, indices))
        .collect()
}

/// Target manifest holding `entries` (payload, container).
pub fn remote_manifest(
    internal_version: i32,
    entries: &[(&Payload, Option<&str>)],
) -> RemoteManifest {
    RemoteManifest {
        applicable_version: "1.4.0".to_string(),
        internal_version,
        assets: Vec::new(),
        resources: entries.iter().map(|(p, _)| p.remote()).collect(),
        containers: containers_of(entries.iter().map(|(_, c)| *c)),
        groups: Vec::new(),
    }
}

/// Local manifest holding `entries` (payload, container).
pub fn local_manifest(entries: &[(&Payload, Option<&str>)]) -> LocalManifest {
    LocalManifest::from_entries(
        entries
            .iter()
            .map(|(p, c)| (p.local(), c.map(str::to_string)))
            .collect(),
    )
}

// =============================================================================
// Store Fixture
// =============================================================================

/// Read-only and read-write areas under one temp dir.
pub struct Store {
    pub temp: TempDir,
    pub config: UpdaterConfig,
}

impl Store {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let read_only = temp.path().join("ro");
        let read_write = temp.path().join("rw");
        fs::create_dir_all(&read_only).unwrap();
        fs::create_dir_all(&read_write).unwrap();

        let mut config = UpdaterConfig::with_paths(read_only, read_write);
        config.update_prefix_uri = PREFIX.to_string();
        Self { temp, config }
    }

    pub fn ro(&self) -> &Path {
        &self.config.read_only_path
    }

    pub fn rw(&self) -> &Path {
        &self.config.read_write_path
    }

    pub fn write_remote(&self, manifest: &RemoteManifest) {
        let bytes = BinaryManifestCodec.encode_remote(manifest).unwrap();
        fs::write(self.rw().join(REMOTE_MANIFEST_FILE), bytes).unwrap();
    }

    pub fn write_read_only(&self, manifest: &LocalManifest) {
        let bytes = BinaryManifestCodec.encode_local(manifest).unwrap();
        fs::write(self.ro().join(READ_ONLY_MANIFEST_FILE), bytes).unwrap();
    }

    pub fn write_read_write(&self, manifest: &LocalManifest) {
        let bytes = BinaryManifestCodec.encode_local(manifest).unwrap();
        fs::write(self.rw().join(READ_WRITE_MANIFEST_FILE), bytes).unwrap();
    }

    pub fn read_read_write(&self) -> LocalManifest {
        let bytes = fs::read(self.rw().join(READ_WRITE_MANIFEST_FILE)).unwrap();
        BinaryManifestCodec.decode_local(&bytes).unwrap()
    }

    /// Places a loose read-write copy of `payload`.
    pub fn put_loose(&self, payload: &Payload) -> PathBuf {
        let path = self.loose_path(&payload.id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, &payload.stored).unwrap();
        path
    }

    /// Places a read-write copy of `payload` inside `container`.
    pub fn put_in_container(&self, payload: &Payload, container: &str) -> PathBuf {
        let path = self.container_dir(container).join(payload.id.full_name());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, &payload.stored).unwrap();
        path
    }

    pub fn loose_path(&self, id: &ResourceId) -> PathBuf {
        self.rw().join(id.full_name())
    }

    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.rw().join(format!("{}.container", name))
    }

    pub fn updater(&self, downloads: &ScriptedDownloads) -> ResourceUpdater {
        ResourceUpdater::new(self.config.clone(), Box::new(downloads.clone())).unwrap()
    }
}

/// Ticks until `done` holds, collecting every event on the way.
pub fn tick_until(
    updater: &mut ResourceUpdater,
    mut done: impl FnMut(&ResourceUpdater) -> bool,
) -> Vec<Event> {
    let mut events = updater.drain_events();
    for _ in 0..1000 {
        if done(updater) {
            return events;
        }
        updater.tick(TICK).unwrap();
        events.extend(updater.drain_events());
    }
    panic!("condition not reached after 1000 ticks");
}
