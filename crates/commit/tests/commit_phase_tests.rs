//! Integration tests for the two-phase commit:
//! - happy paths for add/update/remove commits
//! - version-conflict retry with refetch-and-merge
//! - root-collision reclassification
//! - store-metadata failure propagation
//! - state errors and rollback behaviour

mod common;

use common::{env, handle_of, seed_node, seeded_store};
use keel_commit::{Item, Resources, Transaction, TransactionOptions};
use keel_core::{
    BlobStore, Context, Error, Handle, Node, Result, StoreInfo, StoreRepository,
};
use keel_storage::{InMemoryBlobStore, InMemoryL2Cache, InMemoryRegistry};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn writing_tx(resources: &Arc<Resources>) -> Transaction {
    Transaction::new(Arc::clone(resources), TransactionOptions::default())
}

// ============================================================================
// Happy paths
// ============================================================================

#[test]
fn add_commit_registers_root_with_version_one() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "adds");

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.add_item(&ctx, &mut item).unwrap();
    backend.add_node(Node::new(store.root_node_id, b"root slots".to_vec()));
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();
    assert!(tx.is_committed());

    let handle = handle_of(
        env.registry.as_ref(),
        &ctx,
        &store.registry_table,
        store.root_node_id,
    )
    .expect("root registered");
    assert_eq!(handle.version, 1);
    assert!(!handle.is_deleted);
    assert_eq!(handle.work_in_progress_timestamp, 0);

    // The active blob carries the handle's version.
    let bytes = env
        .blob_store
        .get_one(&ctx, &store.blob_table, handle.get_active_id())
        .unwrap()
        .expect("root blob present");
    assert_eq!(Node::from_bytes(&bytes).unwrap().version, 1);

    // Item count folded into store metadata; no log records remain.
    let stored = env.store_repo.get(&ctx, &[store.name.clone()]).unwrap();
    assert_eq!(stored[0].count, 1);
    assert!(env.tlog.is_empty());
}

#[test]
fn update_commit_flips_active_slot_and_bumps_version() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "updates");
    let lid = Uuid::new_v4();
    let mut seeded = Handle::new(lid);
    seeded.version = 1;
    seed_node(&env, &ctx, &store, seeded, b"old").unwrap();

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v2".to_vec());
    backend.update_item(&ctx, &mut item).unwrap();
    backend.update_node(Node {
        id: lid,
        version: 1,
        payload: b"new".to_vec(),
    });
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();

    let handle = handle_of(env.registry.as_ref(), &ctx, &store.registry_table, lid).unwrap();
    assert_eq!(handle.version, 2);
    assert_ne!(handle.get_active_id(), lid, "active slot flipped");
    // Activation leaves the 1 ms reclaim stamp on the old slot.
    assert_eq!(handle.get_inactive_id(), lid);
    assert_eq!(handle.work_in_progress_timestamp, 1);

    let bytes = env
        .blob_store
        .get_one(&ctx, &store.blob_table, handle.get_active_id())
        .unwrap()
        .expect("new blob present");
    let committed = Node::from_bytes(&bytes).unwrap();
    assert_eq!(committed.version, 2);
    assert_eq!(committed.payload, b"new".to_vec());

    // Obsolete cleanup dropped the superseded blob and all log records.
    assert!(env
        .blob_store
        .get_one(&ctx, &store.blob_table, lid)
        .unwrap()
        .is_none());
    assert!(env.tlog.is_empty());
}

#[test]
fn remove_commit_tombstones_then_deletes_the_handle() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "removes");
    let lid = Uuid::new_v4();
    let mut seeded = Handle::new(lid);
    seeded.version = 1;
    seed_node(&env, &ctx, &store, seeded, b"doomed").unwrap();

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.remove_item(&ctx, &mut item).unwrap();
    backend.get_node(&ctx, lid).unwrap().expect("node readable");
    backend.remove_node(lid).unwrap();
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();

    assert!(
        handle_of(env.registry.as_ref(), &ctx, &store.registry_table, lid).is_none(),
        "tombstoned handle deleted by obsolete cleanup"
    );
    assert!(env
        .blob_store
        .get_one(&ctx, &store.blob_table, lid)
        .unwrap()
        .is_none());
    assert!(env.tlog.is_empty());

    let stored = env.store_repo.get(&ctx, &[store.name.clone()]).unwrap();
    assert_eq!(stored[0].count, -1);
}

#[test]
fn commit_without_tracked_items_is_a_no_op() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "noop");

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let backend = tx.make_store_backend(store.clone());
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();
    assert!(tx.is_committed());
    assert!(env.registry.is_empty());
    assert!(env.tlog.is_empty());
}

#[test]
fn read_only_tracked_items_commit_without_registry_writes() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "reads");

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.get_item(&ctx, &mut item).unwrap();
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();
    assert!(env.registry.is_empty());
    assert!(env.blob_store.is_empty());
}

// ============================================================================
// Conflict retry paths
// ============================================================================

#[test]
fn updated_node_version_conflict_refetches_and_succeeds() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "conflict");
    let lid = Uuid::new_v4();
    let mut seeded = Handle::new(lid);
    seeded.version = 2;
    seed_node(&env, &ctx, &store, seeded, b"current").unwrap();

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.update_item(&ctx, &mut item).unwrap();
    // Local copy is one version behind the registry.
    backend.update_node(Node {
        id: lid,
        version: 1,
        payload: b"mine".to_vec(),
    });
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();

    let handle = handle_of(env.registry.as_ref(), &ctx, &store.registry_table, lid).unwrap();
    assert_eq!(handle.version, 3, "refetched to v2, committed to v3");
    let bytes = env
        .blob_store
        .get_one(&ctx, &store.blob_table, handle.get_active_id())
        .unwrap()
        .unwrap();
    assert_eq!(Node::from_bytes(&bytes).unwrap().payload, b"mine".to_vec());
}

#[test]
fn new_root_collision_reclassifies_to_update() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "rootrace");
    // A peer already registered the root.
    seed_node(&env, &ctx, &store, Handle::new(store.root_node_id), b"peer root").unwrap();

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.update_item(&ctx, &mut item).unwrap();
    backend.add_node(Node::new(store.root_node_id, b"my root".to_vec()));
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();

    let handle = handle_of(
        env.registry.as_ref(),
        &ctx,
        &store.registry_table,
        store.root_node_id,
    )
    .unwrap();
    assert_eq!(handle.version, 1, "committed as an update of the peer's v0 root");
    let bytes = env
        .blob_store
        .get_one(&ctx, &store.blob_table, handle.get_active_id())
        .unwrap()
        .unwrap();
    assert_eq!(
        Node::from_bytes(&bytes).unwrap().payload,
        b"my root".to_vec()
    );
}

#[test]
fn expired_inactive_slot_is_reclaimed() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "expired");
    let lid = Uuid::new_v4();
    let mut seeded = Handle::new(lid);
    seeded.version = 1;
    // A crashed peer left an allocated inactive slot behind, long expired.
    let _ = seeded.allocate_id();
    seeded.work_in_progress_timestamp = 1;
    seed_node(&env, &ctx, &store, seeded, b"old").unwrap();

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.update_item(&ctx, &mut item).unwrap();
    backend.update_node(Node {
        id: lid,
        version: 1,
        payload: b"fresh".to_vec(),
    });
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();

    let handle = handle_of(env.registry.as_ref(), &ctx, &store.registry_table, lid).unwrap();
    assert_eq!(handle.version, 2);
}

// ============================================================================
// Failure propagation
// ============================================================================

struct FailingStoreRepository {
    inner: keel_storage::InMemoryStoreRepository,
}

impl StoreRepository for FailingStoreRepository {
    fn add(&self, ctx: &Context, stores: &[StoreInfo]) -> Result<()> {
        self.inner.add(ctx, stores)
    }
    fn update(&self, _ctx: &Context, _stores: &[StoreInfo]) -> Result<Vec<StoreInfo>> {
        Err(Error::Other("store update err".to_string()))
    }
    fn get(&self, ctx: &Context, names: &[String]) -> Result<Vec<StoreInfo>> {
        self.inner.get(ctx, names)
    }
    fn get_with_ttl(
        &self,
        ctx: &Context,
        cache_duration: Duration,
        names: &[String],
    ) -> Result<Vec<StoreInfo>> {
        self.inner.get_with_ttl(ctx, cache_duration, names)
    }
    fn get_all(&self, ctx: &Context) -> Result<Vec<String>> {
        self.inner.get_all(ctx)
    }
    fn remove(&self, ctx: &Context, names: &[String]) -> Result<()> {
        self.inner.remove(ctx, names)
    }
    fn replicate(&self, ctx: &Context, stores: &[StoreInfo]) -> Result<()> {
        self.inner.replicate(ctx, stores)
    }
}

#[test]
fn store_info_failure_propagates_after_rollback() {
    let ctx = Context::new();
    let registry = Arc::new(InMemoryRegistry::new());
    let blob_store = Arc::new(InMemoryBlobStore::new());
    let resources = Arc::new(Resources::new(
        registry.clone(),
        blob_store.clone(),
        Arc::new(InMemoryL2Cache::new()),
        Arc::new(keel_durability::InMemoryTransactionLog::new()),
        Arc::new(FailingStoreRepository {
            inner: keel_storage::InMemoryStoreRepository::new(),
        }),
    ));

    let mut store = StoreInfo::new("failing", 100);
    store.root_node_id = Uuid::new_v4();

    let mut tx = Transaction::new(Arc::clone(&resources), TransactionOptions::default());
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.add_item(&ctx, &mut item).unwrap();
    backend.add_node(Node::new(store.root_node_id, b"root".to_vec()));
    tx.register(Box::new(backend));

    let err = tx.phase1_commit(&ctx).unwrap_err();
    assert_eq!(err.to_string(), "store update err");

    // Everything the phase wrote was undone.
    assert!(registry.is_empty());
    assert!(blob_store.is_empty());
}

// ============================================================================
// State machine
// ============================================================================

#[test]
fn phase_commits_require_begin() {
    let ctx = Context::new();
    let env = env();
    let mut tx = writing_tx(&env.resources);

    assert!(matches!(
        tx.phase1_commit(&ctx),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        tx.phase2_commit(&ctx),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(tx.rollback(&ctx), Err(Error::InvalidState(_))));
    assert!(env.registry.is_empty());
}

#[test]
fn begin_twice_is_rejected() {
    let env = env();
    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    assert!(matches!(tx.begin(), Err(Error::InvalidState(_))));
}

#[test]
fn phase2_requires_phase1() {
    let ctx = Context::new();
    let env = env();
    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    assert!(matches!(
        tx.phase2_commit(&ctx),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn rollback_after_commit_is_refused() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "committed");

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.add_item(&ctx, &mut item).unwrap();
    backend.add_node(Node::new(store.root_node_id, b"root".to_vec()));
    tx.register(Box::new(backend));
    tx.commit(&ctx).unwrap();

    let err = tx.rollback(&ctx).unwrap_err();
    assert_eq!(
        err.to_string(),
        "transaction got committed, 'can't rollback it"
    );
}

#[test]
fn rollback_after_phase1_undoes_everything() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "undo");

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.add_item(&ctx, &mut item).unwrap();
    backend.add_node(Node::new(store.root_node_id, b"root".to_vec()));
    tx.register(Box::new(backend));

    tx.phase1_commit(&ctx).unwrap();
    assert!(!env.registry.is_empty(), "phase 1 registered the root");

    tx.rollback(&ctx).unwrap();
    assert!(env.registry.is_empty());
    assert!(env.blob_store.is_empty());
    assert!(env.tlog.is_empty());

    // Store metadata was restored to its pre-image.
    let stored = env.store_repo.get(&ctx, &[store.name.clone()]).unwrap();
    assert_eq!(stored[0].count, 0);

    assert!(matches!(tx.rollback(&ctx), Err(Error::InvalidState(_))));
}

#[test]
fn multiple_backends_commit_together() {
    let ctx = Context::new();
    let env = env();
    let store_a = seeded_store(&env, &ctx, "multi_a");
    let store_b = seeded_store(&env, &ctx, "multi_b");

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();

    let mut backend_a = tx.make_store_backend(store_a.clone());
    let mut item_a = Item::new(b"a".to_vec(), b"1".to_vec());
    backend_a.add_item(&ctx, &mut item_a).unwrap();
    backend_a.add_node(Node::new(store_a.root_node_id, b"ra".to_vec()));
    tx.register(Box::new(backend_a));

    let mut backend_b = tx.make_store_backend(store_b.clone());
    let mut item_b = Item::new(b"b".to_vec(), b"2".to_vec());
    backend_b.add_item(&ctx, &mut item_b).unwrap();
    backend_b.add_node(Node::new(store_b.root_node_id, b"rb".to_vec()));
    tx.register(Box::new(backend_b));

    tx.commit(&ctx).unwrap();

    for (store, _) in [(store_a, "ra"), (store_b, "rb")] {
        let handle = handle_of(
            env.registry.as_ref(),
            &ctx,
            &store.registry_table,
            store.root_node_id,
        )
        .unwrap();
        assert_eq!(handle.version, 1);
    }
    assert!(env.tlog.is_empty());
}

#[test]
fn custom_backend_refetch_hook_is_used() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "hook");
    let lid = Uuid::new_v4();
    let mut seeded = Handle::new(lid);
    seeded.version = 5;
    seed_node(&env, &ctx, &store, seeded, b"old").unwrap();

    let mut tx = writing_tx(&env.resources);
    tx.begin().unwrap();
    let mut backend = tx.make_store_backend(store.clone());
    let mut item = Item::new(b"k".to_vec(), b"v".to_vec());
    backend.update_item(&ctx, &mut item).unwrap();
    backend.update_node(Node {
        id: lid,
        version: 4, // stale
        payload: b"hooked".to_vec(),
    });
    backend.set_refetch_hook(Box::new(move |hook_ctx, repo, _tracker| {
        repo.refetch_and_merge(hook_ctx)
    }));
    tx.register(Box::new(backend));

    tx.commit(&ctx).unwrap();
    let handle = handle_of(env.registry.as_ref(), &ctx, &store.registry_table, lid).unwrap();
    assert_eq!(handle.version, 6);
}
