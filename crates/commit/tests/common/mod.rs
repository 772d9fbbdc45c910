//! Shared harness for the commit integration tests: in-memory backends
//! wired into a `Resources` bundle, plus store/handle helpers.

#![allow(dead_code)]

use keel_commit::Resources;
use keel_core::{
    BlobStore, Context, Handle, Node, Registry, RegistryPayload, Result, StoreInfo,
    StoreRepository,
};
use keel_durability::InMemoryTransactionLog;
use keel_storage::{InMemoryBlobStore, InMemoryL2Cache, InMemoryRegistry, InMemoryStoreRepository};
use std::sync::Arc;
use uuid::Uuid;

pub struct TestEnv {
    pub resources: Arc<Resources>,
    pub registry: Arc<InMemoryRegistry>,
    pub blob_store: Arc<InMemoryBlobStore>,
    pub l2: Arc<InMemoryL2Cache>,
    pub tlog: Arc<InMemoryTransactionLog>,
    pub store_repo: Arc<InMemoryStoreRepository>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn env() -> TestEnv {
    env_with_tlog(InMemoryTransactionLog::new())
}

/// Build an environment around a (possibly test-tuned) transaction log.
pub fn env_with_tlog(tlog: InMemoryTransactionLog) -> TestEnv {
    init_tracing();
    let registry = Arc::new(InMemoryRegistry::new());
    let blob_store = Arc::new(InMemoryBlobStore::new());
    let l2 = Arc::new(InMemoryL2Cache::new());
    let store_repo = Arc::new(InMemoryStoreRepository::new());
    let tlog = Arc::new(tlog);
    let resources = Arc::new(Resources::new(
        registry.clone(),
        blob_store.clone(),
        l2.clone(),
        tlog.clone(),
        store_repo.clone(),
    ));
    TestEnv {
        resources,
        registry,
        blob_store,
        l2,
        tlog,
        store_repo,
    }
}

/// A store with a pre-assigned root node id, registered in the store repo.
pub fn seeded_store(env: &TestEnv, ctx: &Context, name: &str) -> StoreInfo {
    let mut store = StoreInfo::new(name, 100);
    store.root_node_id = Uuid::new_v4();
    env.store_repo
        .add(ctx, std::slice::from_ref(&store))
        .unwrap();
    store
}

/// Current registry handle for a logical id.
pub fn handle_of(
    registry: &dyn Registry,
    ctx: &Context,
    table: &str,
    id: Uuid,
) -> Option<Handle> {
    registry
        .get(ctx, &[RegistryPayload::new(table, vec![id])])
        .unwrap()
        .into_iter()
        .flat_map(|p| p.ids)
        .next()
}

/// Register a handle and its node blob so the node is readable.
pub fn seed_node(
    env: &TestEnv,
    ctx: &Context,
    store: &StoreInfo,
    handle: Handle,
    payload: &[u8],
) -> Result<()> {
    env.registry.add(
        ctx,
        &[RegistryPayload::new(&store.registry_table, vec![handle])],
    )?;
    let node = Node {
        id: handle.logical_id,
        version: handle.version,
        payload: payload.to_vec(),
    };
    env.blob_store.add(
        ctx,
        &[keel_core::BlobsPayload::new(
            &store.blob_table,
            vec![keel_core::BlobEntry {
                id: handle.get_active_id(),
                payload: node.to_bytes()?,
            }],
        )],
    )
}
