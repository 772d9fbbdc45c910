//! Collaborator handles shared by a transaction and its repositories
//!
//! The transaction owns its node repositories and item trackers exclusively;
//! those in turn borrow the backend handles through this shared, non-owning
//! bundle. One `Resources` per process (or per backend mix) is the normal
//! arrangement, cloned by `Arc` into every transaction.

use keel_core::{BlobStore, L2Cache, PriorityLog, Registry, StoreRepository, TransactionLog};
use keel_storage::GlobalCache;
use std::sync::Arc;

/// Backend handles used by every part of the commit core.
pub struct Resources {
    /// Durable logical-id registry.
    pub registry: Arc<dyn Registry>,
    /// Durable blob store.
    pub blob_store: Arc<dyn BlobStore>,
    /// Shared L2 cache (row locks, node snapshots, small values).
    pub l2_cache: Arc<dyn L2Cache>,
    /// Per-TID transaction log with nested priority log.
    pub transaction_log: Arc<dyn TransactionLog>,
    /// Per-store metadata repository.
    pub store_repository: Arc<dyn StoreRepository>,
    /// In-process L1 cache of handles and node copies.
    pub l1_cache: Arc<GlobalCache>,
}

impl Resources {
    /// Bundle backend handles with a fresh L1 cache.
    pub fn new(
        registry: Arc<dyn Registry>,
        blob_store: Arc<dyn BlobStore>,
        l2_cache: Arc<dyn L2Cache>,
        transaction_log: Arc<dyn TransactionLog>,
        store_repository: Arc<dyn StoreRepository>,
    ) -> Self {
        Resources {
            registry,
            blob_store,
            l2_cache,
            transaction_log,
            store_repository,
            l1_cache: Arc::new(GlobalCache::new()),
        }
    }

    /// The nested priority log of the transaction log backend.
    pub fn priority_log(&self) -> &dyn PriorityLog {
        self.transaction_log.priority_log()
    }
}
