//! Tests for per-resource downloads, retries and group scheduling.

mod common;

use common::*;
use resync::manifest::IndexSet;
use resync::storage::download_path_for;
use resync::{Error, Event, ResourceId, UpdateComplete};
use std::fs;

fn two_resource_store() -> (Store, Payload, Payload) {
    let store = Store::new();
    let a = Payload::universal("ui/a", b"alpha bundle bytes");
    let b = Payload::universal("ui/b", &[7u8; 4096]).compressed();
    store.write_remote(&remote_manifest(3, &[(&a, None), (&b, None)]));
    (store, a, b)
}

fn single_resource_store(max_retries: u32) -> (Store, Payload) {
    let mut store = Store::new();
    store.config.max_retries = max_retries;
    let a = Payload::universal("solo", b"only resource");
    store.write_remote(&remote_manifest(3, &[(&a, None)]));
    (store, a)
}

fn group_complete(events: &[Event]) -> Option<UpdateComplete> {
    events.iter().find_map(|e| match e {
        Event::UpdateComplete(done) => Some(done.clone()),
        _ => None,
    })
}

fn failures(events: &[Event]) -> Vec<(u32, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::UpdateFailure {
                retry_count,
                reason,
                ..
            } => Some((*retry_count, reason.clone())),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Successful Downloads
// =============================================================================

#[test]
fn test_group_download_installs_all() {
    let (store, a, b) = two_resource_store();
    let downloads = ScriptedDownloads::with_slots(4);
    let mut updater = store.updater(&downloads);

    let summary = updater.check_resources().unwrap();
    assert_eq!(summary.update_count, 2);
    assert_eq!(
        summary.update_total_length,
        u64::from(a.length() + b.length())
    );

    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();
    let flight = downloads.in_flight();
    assert_eq!(flight.len(), 2);
    assert_eq!(
        flight[0].uri,
        format!("{}/{}", PREFIX, a.id.remote_file_name(a.hash))
    );
    assert_eq!(flight[0].local_path, store.loose_path(&a.id));

    downloads.succeed(&resource_tag(&a.id), &a.transfer);
    downloads.succeed(&resource_tag(&b.id), &b.transfer);
    let events = tick_until(&mut updater, |u| u.orchestrator().updating_group().is_none());

    assert_eq!(
        group_complete(&events),
        Some(UpdateComplete {
            group: String::new(),
            ok: true
        })
    );
    let successes = events
        .iter()
        .filter(|e| matches!(e, Event::UpdateSuccess { .. }))
        .count();
    assert_eq!(successes, 2);

    // Compressed transfer lands decompressed.
    assert_eq!(fs::read(store.loose_path(&b.id)).unwrap(), b.stored);
    assert_eq!(fs::read(store.loose_path(&a.id)).unwrap(), a.stored);
    assert!(updater.registry().is_ready(&a.id));
    assert!(updater.registry().is_ready(&b.id));
    assert_eq!(updater.orchestrator().candidate_count(), 0);
    assert_eq!(store.read_read_write().resources.len(), 2);
}

#[test]
fn test_containerized_download_moves_into_container() {
    let store = Store::new();
    let a = Payload::universal("hero", b"hero bundle").compressed();
    store.write_remote(&remote_manifest(1, &[(&a, Some("characters"))]));

    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    downloads.succeed(&resource_tag(&a.id), &a.transfer);
    tick_until(&mut updater, |u| u.orchestrator().candidate_count() == 0);

    let in_container = store.container_dir("characters").join(a.id.full_name());
    assert_eq!(fs::read(in_container).unwrap(), a.stored);
    assert!(!store.loose_path(&a.id).exists());

    let entries = store.read_read_write().entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1.as_deref(), Some("characters"));
}

#[test]
fn test_progress_reported() {
    let (store, a) = single_resource_store(3);
    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    downloads.progress(&resource_tag(&a.id), 6);
    updater.tick(TICK).unwrap();
    let events = updater.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::UpdateProgress { id, current_length: 6 } if id == &a.id
    )));
}

// =============================================================================
// Durability
// =============================================================================

#[test]
fn test_manifest_persisted_only_when_policy_triggers() {
    let store = Store::new();
    let payloads: Vec<Payload> = ["r1", "r2", "r3"]
        .iter()
        .map(|name| Payload::universal(name, name.as_bytes()))
        .collect();
    let entries: Vec<(&Payload, Option<&str>)> = payloads.iter().map(|p| (p, None)).collect();
    store.write_remote(&remote_manifest(1, &entries));

    let downloads = ScriptedDownloads::with_slots(3);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    let manifest_path = store.rw().join(resync::READ_WRITE_MANIFEST_FILE);
    downloads.succeed(&resource_tag(&payloads[0].id), &payloads[0].transfer);
    updater.tick(TICK).unwrap();
    // Recorded in memory, below the byte threshold.
    assert!(updater.read_write().contains(&payloads[0].id));
    assert!(!manifest_path.exists());

    downloads.succeed(&resource_tag(&payloads[1].id), &payloads[1].transfer);
    downloads.succeed(&resource_tag(&payloads[2].id), &payloads[2].transfer);
    updater.tick(TICK).unwrap();
    assert_eq!(store.read_read_write().resources.len(), 3);
}

#[test]
fn test_byte_threshold_forces_persist() {
    let (mut store, a, b) = two_resource_store();
    store.config.persist_threshold_bytes = 1;

    let downloads = ScriptedDownloads::with_slots(2);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    downloads.succeed(&resource_tag(&a.id), &a.transfer);
    updater.tick(TICK).unwrap();

    let persisted = store.read_read_write();
    assert_eq!(persisted.resources.len(), 1);
    assert_eq!(persisted.resources[0].id, a.id);
    assert!(updater.orchestrator().candidate(&b.id).is_some());
}

// =============================================================================
// Failures and Retries
// =============================================================================

#[test]
fn test_partial_purged_from_second_retry() {
    let (store, a) = single_resource_store(3);
    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    let tag = resource_tag(&a.id);
    let partial = download_path_for(&store.loose_path(&a.id));

    downloads.fail(&tag, Some(b"half"));
    updater.tick(TICK).unwrap();
    assert!(partial.exists());
    assert_eq!(updater.orchestrator().candidate(&a.id).unwrap().retry_count, 1);
    // Retried within the same tick.
    assert_eq!(downloads.in_flight().len(), 1);

    downloads.fail(&tag, Some(b"half again"));
    updater.tick(TICK).unwrap();
    assert!(!partial.exists());
    assert_eq!(updater.orchestrator().candidate(&a.id).unwrap().retry_count, 2);
    assert_eq!(downloads.history().len(), 3);
}

#[test]
fn test_corrupt_download_retried() {
    let (store, a) = single_resource_store(3);
    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    let mut corrupt = a.transfer.clone();
    corrupt[0] ^= 0xff;
    downloads.succeed(&resource_tag(&a.id), &corrupt);
    updater.tick(TICK).unwrap();

    let events = updater.drain_events();
    let failed = failures(&events);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, 1);
    assert!(failed[0].1.contains("hash mismatch"));
    assert!(!updater.registry().is_ready(&a.id));
    assert_eq!(downloads.in_flight().len(), 1);
}

#[test]
fn test_exhausted_retries_fail_group() {
    let (store, a) = single_resource_store(1);
    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    let tag = resource_tag(&a.id);
    downloads.fail(&tag, None);
    updater.tick(TICK).unwrap();
    downloads.fail(&tag, None);
    updater.tick(TICK).unwrap();

    let events = updater.drain_events();
    let failed = failures(&events);
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[1].0, 1);
    assert_eq!(
        group_complete(&events),
        Some(UpdateComplete {
            group: String::new(),
            ok: false
        })
    );
    assert!(updater.orchestrator().candidate(&a.id).is_none());
    assert!(downloads.in_flight().is_empty());
    assert!(store.read_read_write().resources.is_empty());
}

#[test]
fn test_rejected_enqueue_counts_as_attempt() {
    let (store, a) = single_resource_store(3);
    let downloads = ScriptedDownloads::with_slots(1);
    downloads.set_reject(true);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    let events = updater.drain_events();
    assert_eq!(failures(&events).len(), 4);
    assert_eq!(group_complete(&events).map(|c| c.ok), Some(false));
    assert!(updater.orchestrator().candidate(&a.id).is_none());
}

// =============================================================================
// Scheduling
// =============================================================================

#[test]
fn test_unknown_group_rejected() {
    let (store, _a, _b) = two_resource_store();
    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();

    let result = updater.schedule_group("missing");
    assert!(matches!(result, Err(Error::UnknownGroup(name)) if name == "missing"));
}

#[test]
fn test_second_group_rejected_while_busy() {
    let (store, _a, _b) = two_resource_store();
    let downloads = ScriptedDownloads::with_slots(0);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();

    updater.schedule_group("").unwrap();
    assert!(matches!(updater.schedule_group(""), Err(Error::Busy(_))));
}

#[test]
fn test_group_with_nothing_to_fetch_completes_immediately() {
    let store = Store::new();
    let shipped = Payload::universal("shipped", b"from the installer");
    let fresh = Payload::universal("fresh", b"needs download");
    let mut manifest = remote_manifest(2, &[(&shipped, None), (&fresh, None)]);
    manifest.groups = vec![IndexSet::new("boot", vec![0])];
    store.write_remote(&manifest);
    store.write_read_only(&local_manifest(&[(&shipped, None)]));

    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.drain_events();

    updater.schedule_group("boot").unwrap();
    assert_eq!(
        group_complete(&updater.drain_events()),
        Some(UpdateComplete {
            group: "boot".to_string(),
            ok: true
        })
    );
    assert!(updater.orchestrator().updating_group().is_none());
}

#[test]
fn test_named_group_fetches_only_members() {
    let (store, a, b) = two_resource_store();
    let mut manifest = remote_manifest(3, &[(&a, None), (&b, None)]);
    manifest.groups = vec![IndexSet::new("lobby", vec![1])];
    store.write_remote(&manifest);

    let downloads = ScriptedDownloads::with_slots(4);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("lobby").unwrap();
    updater.tick(TICK).unwrap();

    let flight = downloads.in_flight();
    assert_eq!(flight.len(), 1);
    assert_eq!(flight[0].tag, resource_tag(&b.id));
}

#[test]
fn test_stop_group_lets_in_flight_finish() {
    let (store, a, b) = two_resource_store();
    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();

    assert!(updater.stop_update_group());
    assert!(!updater.stop_update_group());

    downloads.succeed(&resource_tag(&a.id), &a.transfer);
    updater.tick(TICK).unwrap();
    updater.tick(TICK).unwrap();

    assert!(updater.registry().is_ready(&a.id));
    assert!(!updater.registry().is_ready(&b.id));
    assert_eq!(downloads.history().len(), 1);
    assert!(group_complete(&updater.drain_events()).is_none());
}

#[test]
fn test_on_demand_jumps_group_queue() {
    let (store, _a, b) = two_resource_store();
    let downloads = ScriptedDownloads::with_slots(0);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();

    updater.schedule_on_demand(&b.id).unwrap();
    assert_eq!(updater.orchestrator().on_demand_count(), 1);
    assert!(downloads.in_flight().is_empty());

    downloads.set_slots(1);
    updater.tick(TICK).unwrap();
    let flight = downloads.in_flight();
    assert_eq!(flight.len(), 1);
    assert_eq!(flight[0].tag, resource_tag(&b.id));

    downloads.succeed(&resource_tag(&b.id), &b.transfer);
    updater.tick(TICK).unwrap();
    assert!(updater.registry().is_ready(&b.id));
    assert_eq!(updater.orchestrator().on_demand_count(), 0);
}

#[test]
fn test_on_demand_for_in_flight_resource_starts_nothing() {
    let (store, a) = single_resource_store(3);
    let downloads = ScriptedDownloads::with_slots(2);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();
    assert_eq!(downloads.in_flight().len(), 1);

    updater.schedule_on_demand(&a.id).unwrap();
    updater.tick(TICK).unwrap();
    assert_eq!(downloads.in_flight().len(), 1, "no second transfer");
    assert_eq!(downloads.history().len(), 1);

    downloads.succeed(&resource_tag(&a.id), &a.transfer);
    let events = tick_until(&mut updater, |u| u.orchestrator().updating_group().is_none());
    assert!(updater.registry().is_ready(&a.id));
    assert_eq!(updater.orchestrator().on_demand_count(), 0);
    assert_eq!(group_complete(&events).map(|done| done.ok), Some(true));
}

#[test]
fn test_failure_after_stop_waits_for_next_request() {
    let (store, a) = single_resource_store(3);
    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();
    updater.schedule_group("").unwrap();
    updater.tick(TICK).unwrap();
    assert!(updater.stop_update_group());

    downloads.fail(&resource_tag(&a.id), None);
    updater.tick(TICK).unwrap();
    updater.tick(TICK).unwrap();

    let candidate = updater.orchestrator().candidate(&a.id).unwrap();
    assert!(!candidate.downloading);
    assert_eq!(candidate.retry_count, 1);
    assert_eq!(downloads.history().len(), 1, "stopped group is not resumed");

    updater.schedule_on_demand(&a.id).unwrap();
    assert_eq!(downloads.in_flight().len(), 1);
    assert!(updater.drain_events().iter().any(|e| matches!(
        e,
        Event::UpdateStart { retry_count: 1, .. }
    )));
}

#[test]
fn test_on_demand_for_ready_or_unknown_resource() {
    let store = Store::new();
    let shipped = Payload::universal("shipped", b"from the installer");
    store.write_remote(&remote_manifest(2, &[(&shipped, None)]));
    store.write_read_only(&local_manifest(&[(&shipped, None)]));

    let downloads = ScriptedDownloads::with_slots(1);
    let mut updater = store.updater(&downloads);
    updater.check_resources().unwrap();

    updater.schedule_on_demand(&shipped.id).unwrap();
    assert!(downloads.history().is_empty());

    let unknown = ResourceId::universal("nope", "bundle");
    assert!(matches!(
        updater.schedule_on_demand(&unknown),
        Err(Error::UnknownResource(_))
    ));
}
