//! # KeelDB
//!
//! Transactional commit core for an externally-backed B-tree storage
//! engine: ordered key/value data lives in logical nodes spread across a
//! per-transaction cache, a shared L2 cache, and a durable blob store
//! indexed by a virtual-id registry. Concurrent transactions on any number
//! of hosts get serializable outcomes from optimistic concurrency,
//! crash-safe rollback, and takeover of transactions abandoned by dead
//! peers.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use keeldb::{
//!     Context, InMemoryBlobStore, InMemoryL2Cache, InMemoryRegistry,
//!     InMemoryStoreRepository, InMemoryTransactionLog, Item, Node, Resources,
//!     StoreInfo, Transaction, TransactionOptions,
//! };
//!
//! fn main() -> keeldb::Result<()> {
//!     let resources = Arc::new(Resources::new(
//!         Arc::new(InMemoryRegistry::new()),
//!         Arc::new(InMemoryBlobStore::new()),
//!         Arc::new(InMemoryL2Cache::new()),
//!         Arc::new(InMemoryTransactionLog::new()),
//!         Arc::new(InMemoryStoreRepository::new()),
//!     ));
//!
//!     let ctx = Context::new();
//!     let mut store = StoreInfo::new("people", 100);
//!     store.root_node_id = keeldb::Uuid::new_v4();
//!     let mut tx = Transaction::new(resources, TransactionOptions::default());
//!     tx.begin()?;
//!
//!     let mut backend = tx.make_store_backend(store.clone());
//!     let mut item = Item::new(b"alice".to_vec(), b"engineer".to_vec());
//!     backend.add_item(&ctx, &mut item)?;
//!     backend.add_node(Node::new(store.root_node_id, b"slots".to_vec()));
//!     tx.register(Box::new(backend));
//!
//!     tx.commit(&ctx)
//! }
//! ```
//!
//! # Layout
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `keel-core` | Handle, StoreInfo, Context, errors, backend contracts |
//! | `keel-storage` | L1 MRU cache, in-memory conforming backends |
//! | `keel-durability` | in-memory transaction log and priority log |
//! | `keel-commit` | tracker, node repository, logger, transaction, sweepers |
//!
//! The in-memory backends are the single-host mode; distributed deployments
//! plug network-backed implementations of the same contracts into
//! [`Resources`].

pub use keel_core::{
    BlobEntry, BlobStore, BlobsPayload, CommitFunction, CommitLogRecord, Context, Error,
    ExpiredTransaction, Handle, L2Cache, L2CacheExt, LockKey, Node, PriorityLog, Registry,
    RegistryPayload, Result, SectorUserData, StoreInfo, StoreRepository, TransactionLog,
};

pub use keel_storage::{
    global_cache, GlobalCache, InMemoryBlobStore, InMemoryL2Cache, InMemoryRegistry,
    InMemoryStoreRepository, Mru,
};

pub use keel_durability::{InMemoryPriorityLog, InMemoryTransactionLog};

pub use keel_commit::{
    spawn_expired_log_sweeper, spawn_priority_rollback_sweeper, CommitBackend, Item, ItemAction,
    ItemActionTracker, NodeRepository, Resources, StoreBackend, Sweeper, SweeperHandle,
    Transaction, TransactionMode, TransactionOptions,
};

/// Re-exported id type; logical ids, physical ids, and transaction ids are
/// all UUIDs.
pub use uuid::Uuid;
