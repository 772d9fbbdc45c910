//! Integration tests for the node repository: the read ladder, staging
//! semantics, finalize helpers, and empty-input boundaries.

mod common;

use common::{env, handle_of, seed_node, seeded_store};
use keel_commit::{
    activate_inactive_nodes, extract_inactive_blob_ids, touch_nodes, NodeRepository,
};
use keel_core::{format_node_key, CommitFunction, Context, Handle, L2CacheExt, Node, Registry};
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use uuid::Uuid;

fn repo_for(env: &common::TestEnv, store: &keel_core::StoreInfo) -> NodeRepository {
    NodeRepository::new(
        store.clone(),
        Uuid::new_v4(),
        env.resources.clone(),
        Arc::new(AtomicU8::new(0)),
    )
}

// ============================================================================
// Read ladder
// ============================================================================

#[test]
fn get_resolves_through_registry_and_blob_store() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "ladder");
    let lid = Uuid::new_v4();
    let mut handle = Handle::new(lid);
    handle.version = 3;
    seed_node(&env, &ctx, &store, handle, b"content").unwrap();

    let mut repo = repo_for(&env, &store);
    let node = repo.get(&ctx, lid).unwrap().expect("node found");
    assert_eq!(node.version, 3);
    assert_eq!(node.payload, b"content".to_vec());

    // Unknown ids and tombstoned handles both read as missing.
    assert!(repo.get(&ctx, Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn get_prefers_the_l2_cached_copy_over_the_blob() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "l2first");
    let lid = Uuid::new_v4();
    let handle = Handle::new(lid);
    env.registry
        .add(
            &ctx,
            &[keel_core::RegistryPayload::new(
                &store.registry_table,
                vec![handle],
            )],
        )
        .unwrap();
    // No blob; only the L2 cache knows this node.
    let cached = Node {
        id: lid,
        version: 0,
        payload: b"from l2".to_vec(),
    };
    env.l2
        .set_struct(&ctx, &format_node_key(handle.get_active_id()), &cached, None)
        .unwrap();

    let mut repo = repo_for(&env, &store);
    let node = repo.get(&ctx, lid).unwrap().expect("served from L2");
    assert_eq!(node.payload, b"from l2".to_vec());
}

#[test]
fn l1_shortcut_is_bypassed_once_phase1_starts() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "bypass");
    let lid = Uuid::new_v4();
    let handle = Handle::new(lid);
    // Only the L1 cache knows this node; the registry does not.
    env.resources.l1_cache.set_handle(handle, None);
    env.resources.l1_cache.set_node(
        handle.get_active_id(),
        Node::new(lid, b"stale".to_vec()),
        None,
    );

    let mut repo = repo_for(&env, &store);
    assert!(
        repo.get(&ctx, lid).unwrap().is_some(),
        "pre-phase-1 reads take the L1 shortcut"
    );

    let gauge = Arc::new(AtomicU8::new(
        CommitFunction::LockTrackedItems.wire_value(),
    ));
    let mut repo = NodeRepository::new(store.clone(), Uuid::new_v4(), env.resources.clone(), gauge);
    assert!(
        repo.get(&ctx, lid).unwrap().is_none(),
        "in-phase reads re-consult the registry"
    );
}

#[test]
fn tombstoned_nodes_read_as_missing() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "tomb");
    let lid = Uuid::new_v4();
    let mut handle = Handle::new(lid);
    handle.is_deleted = true;
    env.registry
        .add(
            &ctx,
            &[keel_core::RegistryPayload::new(
                &store.registry_table,
                vec![handle],
            )],
        )
        .unwrap();

    let mut repo = repo_for(&env, &store);
    assert!(repo.get(&ctx, lid).unwrap().is_none());
}

// ============================================================================
// Staging semantics
// ============================================================================

#[test]
fn remove_of_same_transaction_add_never_reaches_the_registry() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "purge");
    let mut repo = repo_for(&env, &store);

    let node = Node::new(Uuid::new_v4(), b"temp".to_vec());
    let id = node.id;
    repo.add(node);
    repo.remove(id).unwrap();

    assert!(repo.is_empty());
    let classified = repo.classify();
    assert!(classified.added_nodes.is_empty());
    assert!(classified.removed_nodes.is_empty());
}

#[test]
fn update_of_a_fresh_add_stays_an_add() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "addstays");
    let mut repo = repo_for(&env, &store);

    let id = Uuid::new_v4();
    repo.add(Node::new(id, b"v0".to_vec()));
    repo.update(Node {
        id,
        version: 0,
        payload: b"v0'".to_vec(),
    });

    let classified = repo.classify();
    assert_eq!(classified.added_nodes.len(), 1);
    assert!(classified.updated_nodes.is_empty());
    assert_eq!(classified.added_nodes[0].payload, b"v0'".to_vec());
}

#[test]
fn remove_of_unfetched_node_is_an_error() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "unfetched");
    let mut repo = repo_for(&env, &store);
    assert!(repo.remove(Uuid::new_v4()).is_err());
}

// ============================================================================
// Empty inputs are no-ops
// ============================================================================

#[test]
fn empty_commit_steps_succeed_without_side_effects() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "empty");
    let mut repo = repo_for(&env, &store);

    assert!(repo.commit_new_root_nodes(&ctx, &[]).unwrap().0);
    assert!(repo.commit_updated_nodes(&ctx, &[]).unwrap().0);
    assert!(repo.commit_removed_nodes(&ctx, &[]).unwrap().0);
    assert!(repo.commit_added_nodes(&ctx, &[]).unwrap().is_empty());
    assert!(repo.are_fetched_items_intact(&ctx, &[]).unwrap());
    repo.rollback_added_nodes(&ctx, &[]).unwrap();
    repo.rollback_updated_nodes(&ctx, false, &[]).unwrap();
    repo.rollback_removed_nodes(&ctx, false, &[]).unwrap();
    repo.rollback_new_root_nodes(&ctx, true, &[]).unwrap();

    assert!(env.registry.is_empty());
    assert!(env.blob_store.is_empty());
}

// ============================================================================
// Finalize helpers
// ============================================================================

#[test]
fn activate_then_rollback_restores_version_and_wip() {
    let ctx = Context::new();
    let env = env();
    let store = seeded_store(&env, &ctx, "law");
    let lid = Uuid::new_v4();
    let mut seeded = Handle::new(lid);
    seeded.version = 1;
    seed_node(&env, &ctx, &store, seeded, b"v1").unwrap();

    let mut repo = repo_for(&env, &store);
    let staged = Node {
        id: lid,
        version: 1,
        payload: b"v2".to_vec(),
    };
    let (ok, handles) = repo.commit_updated_nodes(&ctx, &[staged]).unwrap();
    assert!(ok);

    // Activation flips, bumps, and stamps the reclaim marker.
    let mut flipped = handles.clone();
    activate_inactive_nodes(&mut flipped);
    assert_eq!(flipped[0].version, 2);
    assert_eq!(flipped[0].work_in_progress_timestamp, 1);
    assert_eq!(flipped[0].get_inactive_id(), lid);
    assert_eq!(extract_inactive_blob_ids(&flipped), vec![lid]);

    // Rolling the un-activated commit back restores the pre-commit handle.
    repo.rollback_updated_nodes(&ctx, false, &handles).unwrap();
    let restored = handle_of(env.registry.as_ref(), &ctx, &store.registry_table, lid).unwrap();
    assert_eq!(restored.version, 1);
    assert_eq!(restored.work_in_progress_timestamp, 0);
    assert!(restored.get_inactive_id().is_nil());
}

#[test]
fn touch_bumps_versions_and_clears_wip() {
    let mut handles = vec![Handle::new(Uuid::new_v4())];
    handles[0].work_in_progress_timestamp = 99;
    touch_nodes(&mut handles);
    assert_eq!(handles[0].version, 1);
    assert_eq!(handles[0].work_in_progress_timestamp, 0);
}
