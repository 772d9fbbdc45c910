//! Integration tests for the item action tracker: row-lock protocol,
//! action collapsing, and value-segment persistence.

mod common;

use common::{env, TestEnv};
use keel_commit::{Item, ItemActionTracker, LockRecord};
use keel_core::{
    format_item_key, format_lock_key, BlobEntry, BlobStore, BlobsPayload, CommitFunction, Context,
    L2Cache, L2CacheExt, StoreInfo,
};
use std::time::Duration;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(60);

fn tracker_for(env: &TestEnv, store: &StoreInfo) -> (Uuid, ItemActionTracker) {
    let tid = Uuid::new_v4();
    (
        tid,
        ItemActionTracker::new(store.clone(), tid, env.resources.clone()),
    )
}

// ============================================================================
// Row-lock protocol
// ============================================================================

#[test]
fn lock_writes_our_claim_into_l2() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("locks", 100);
    let (_, mut tracker) = tracker_for(&env, &store);

    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    tracker.update(&ctx, &mut item).unwrap();

    assert!(tracker.lock(&ctx, TTL).unwrap());
    let tracked = tracker.tracked(item.id).expect("tracked");
    assert!(tracked.is_lock_owner);
    let tracked_key_id = tracked.key_id;
    let tracked_lock_id = tracked.lock_id;

    // The L2 row lock carries exactly our claim.
    let rec: LockRecord = env
        .l2
        .get_struct(&ctx, &format_lock_key(&tracked_key_id.to_string()))
        .unwrap()
        .expect("lock record present");
    assert_eq!(rec.lock_id, tracked_lock_id);

    assert!(tracker.is_locked(&ctx).unwrap());
    tracker.unlock(&ctx).unwrap();
    assert!(env
        .l2
        .get_struct::<LockRecord>(&ctx, &format_lock_key(&tracked_key_id.to_string()))
        .unwrap()
        .is_none());
}

#[test]
fn two_readers_share_a_row() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("readers", 100);
    let (_, mut first) = tracker_for(&env, &store);
    let (_, mut second) = tracker_for(&env, &store);

    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    first.get(&ctx, &mut item.clone()).unwrap();
    second.get(&ctx, &mut item).unwrap();

    assert!(first.lock(&ctx, TTL).unwrap());
    // The second reader tolerates the contention without owning the row.
    second.check_tracked_items(&ctx).unwrap();
    assert!(second.lock(&ctx, TTL).unwrap());
    assert!(!second.tracked(item.id).unwrap().is_lock_owner);
}

#[test]
fn writer_contention_is_a_conflict() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("writers", 100);
    let (_, mut first) = tracker_for(&env, &store);
    let (_, mut second) = tracker_for(&env, &store);

    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    first.update(&ctx, &mut item.clone()).unwrap();
    second.update(&ctx, &mut item).unwrap();

    assert!(first.lock(&ctx, TTL).unwrap());
    assert!(second.check_tracked_items(&ctx).unwrap_err().is_conflict());
    assert!(!second.lock(&ctx, TTL).unwrap());
}

// ============================================================================
// Action collapsing
// ============================================================================

#[test]
fn add_then_remove_leaves_no_trace() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("trace", 100);
    let (_, mut tracker) = tracker_for(&env, &store);

    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    tracker.add(&ctx, &mut item).unwrap();
    tracker.remove(&ctx, &mut item).unwrap();

    assert!(tracker.is_empty());
    assert_eq!(tracker.count_delta(), 0);
    assert!(env.blob_store.is_empty(), "nothing durable was written");
}

#[test]
fn count_delta_reflects_adds_and_removes() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("counts", 100);
    let (_, mut tracker) = tracker_for(&env, &store);

    let mut added = Item::new(b"a".to_vec(), b"1".to_vec());
    tracker.add(&ctx, &mut added).unwrap();
    let mut removed = Item::new(b"b".to_vec(), b"2".to_vec());
    tracker.remove(&ctx, &mut removed).unwrap();
    let mut read = Item::new(b"c".to_vec(), b"3".to_vec());
    tracker.get(&ctx, &mut read).unwrap();

    assert_eq!(tracker.count_delta(), 0);
    assert_eq!(tracker.len(), 3);
}

// ============================================================================
// Value segment persistence
// ============================================================================

#[test]
fn actively_persisted_add_writes_value_and_logs_it() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("active", 100).with_separate_values(true, true);
    let (tid, mut tracker) = tracker_for(&env, &store);

    let value = serde_json::to_vec(&serde_json::json!({"role": "engineer"})).unwrap();
    let mut item = Item::new(b"k".to_vec(), value.clone());
    tracker.add(&ctx, &mut item).unwrap();

    assert_eq!(
        env.blob_store
            .get_one(&ctx, &store.blob_table, item.id)
            .unwrap(),
        Some(value.clone())
    );
    assert_eq!(
        env.l2.get_bytes(&ctx, &format_item_key(item.id)).unwrap(),
        Some(value)
    );
    // The orphan-cleanup record was logged under our tid.
    let records = env.tlog.records(tid);
    assert!(records
        .iter()
        .any(|r| r.function == CommitFunction::AddActivelyPersistedItem));
    assert!(tracker.tracked(item.id).unwrap().persisted);
}

#[test]
fn buffered_values_flush_on_commit_values() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("buffered", 100).with_separate_values(false, false);
    let (_, mut tracker) = tracker_for(&env, &store);

    let mut item = Item::new(b"k".to_vec(), b"later".to_vec());
    tracker.add(&ctx, &mut item).unwrap();
    assert!(env.blob_store.is_empty(), "buffered until commit");

    tracker.commit_values(&ctx).unwrap();
    assert_eq!(
        env.blob_store
            .get_one(&ctx, &store.blob_table, item.id)
            .unwrap(),
        Some(b"later".to_vec())
    );
    let rollback = tracker.get_for_rollback_values();
    assert_eq!(rollback.ids, vec![item.id]);
}

#[test]
fn update_supersedes_the_stored_value_id() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("supersede", 100).with_separate_values(false, false);
    let (_, mut tracker) = tracker_for(&env, &store);

    let mut item = Item::new(b"k".to_vec(), b"old".to_vec());
    let original_id = item.id;
    tracker.get(&ctx, &mut item).unwrap();
    item.value = Some(b"new".to_vec());
    tracker.update(&ctx, &mut item).unwrap();

    assert_ne!(item.id, original_id, "update allocated a fresh value id");
    let obsolete = tracker.get_obsolete_values();
    assert_eq!(obsolete.ids, vec![original_id]);

    tracker.commit_values(&ctx).unwrap();
    assert_eq!(
        env.blob_store
            .get_one(&ctx, &store.blob_table, item.id)
            .unwrap(),
        Some(b"new".to_vec())
    );
    // The pre-transaction value survives phase 1.
    assert!(env
        .blob_store
        .get_one(&ctx, &store.blob_table, original_id)
        .unwrap()
        .is_none());
}

#[test]
fn get_materialises_value_through_cache_then_blob_store() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("fetch", 100).with_separate_values(false, true);
    let (_, mut tracker) = tracker_for(&env, &store);

    let id = Uuid::new_v4();
    env.blob_store
        .add(
            &ctx,
            &[BlobsPayload::new(
                &store.blob_table,
                vec![BlobEntry {
                    id,
                    payload: b"stored".to_vec(),
                }],
            )],
        )
        .unwrap();

    let mut item = Item {
        id,
        key: b"k".to_vec(),
        value: None,
        version: 1,
        value_needs_fetch: true,
    };
    tracker.get(&ctx, &mut item).unwrap();
    assert_eq!(item.value, Some(b"stored".to_vec()));
    assert!(!item.value_needs_fetch);

    // A cached copy is preferred over the blob store.
    let cached_id = Uuid::new_v4();
    env.l2
        .set_bytes(&ctx, &format_item_key(cached_id), b"from cache", None)
        .unwrap();
    let mut cached_item = Item {
        id: cached_id,
        key: b"c".to_vec(),
        value: None,
        version: 1,
        value_needs_fetch: true,
    };
    tracker.get(&ctx, &mut cached_item).unwrap();
    assert_eq!(cached_item.value, Some(b"from cache".to_vec()));
}

#[test]
fn remove_schedules_stored_value_for_deletion() {
    let ctx = Context::new();
    let env = env();
    let store = StoreInfo::new("removeval", 100).with_separate_values(true, false);
    let (_, mut tracker) = tracker_for(&env, &store);

    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    let id = item.id;
    tracker.remove(&ctx, &mut item).unwrap();

    let obsolete = tracker.get_obsolete_values();
    assert_eq!(obsolete.ids, vec![id]);
}
