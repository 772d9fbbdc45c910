//! Per-B-tree backend capability set
//!
//! The transaction addresses each participating B-tree through the
//! [`CommitBackend`] trait: item-level locking and value persistence on one
//! side, the node repository on the other. [`StoreBackend`] is the
//! reference implementation wiring an [`ItemActionTracker`] and a
//! [`NodeRepository`] together; a real B-tree frontend either uses it
//! directly (supplying its re-traversal as a refetch hook) or implements
//! the trait itself.

use crate::node_repository::NodeRepository;
use crate::payload::BlobTableIds;
use crate::resources::Resources;
use crate::tracker::ItemActionTracker;
use crate::Item;
use keel_core::{Context, Node, Result, StoreInfo};
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Re-staging callback run after a conflict rollback, before the retry.
pub type RefetchHook =
    Box<dyn FnMut(&Context, &mut NodeRepository, &mut ItemActionTracker) -> Result<()> + Send>;

/// Capability set one B-tree exposes to the transaction.
pub trait CommitBackend: Send {
    /// The backing store's configuration.
    fn store_info(&self) -> &StoreInfo;

    /// Whether any item was tracked; an all-empty transaction short-circuits.
    fn has_tracked_items(&self) -> bool;

    /// Detect row-level races before locking.
    fn check_tracked_items(&mut self, ctx: &Context) -> Result<()>;

    /// Acquire row locks; false on contention.
    fn lock_tracked_items(&mut self, ctx: &Context, ttl: Duration) -> Result<bool>;

    /// Confirm the acquired row locks are still ours.
    fn is_locked_tracked_items(&self, ctx: &Context) -> Result<bool>;

    /// Release owned row locks.
    fn unlock_tracked_items(&mut self, ctx: &Context) -> Result<()>;

    /// Flush buffered out-of-node values.
    fn commit_tracked_items_values(&mut self, ctx: &Context) -> Result<()>;

    /// Value blob ids to delete if the transaction rolls back.
    fn get_for_rollback_tracked_items_values(&self) -> BlobTableIds;

    /// Superseded value blob ids deleted by phase 2.
    fn get_obsolete_tracked_items_values(&self) -> BlobTableIds;

    /// Re-stage local state against the registry after a conflict.
    fn refetch_and_merge(&mut self, ctx: &Context) -> Result<()>;

    /// Net item-count change, folded into the store metadata commit.
    fn count_delta(&self) -> i64;

    /// The node repository.
    fn node_repository(&self) -> &NodeRepository;

    /// The node repository, mutably.
    fn node_repository_mut(&mut self) -> &mut NodeRepository;
}

/// Reference [`CommitBackend`]: tracker plus repository for one store.
pub struct StoreBackend {
    store: StoreInfo,
    tracker: ItemActionTracker,
    repository: NodeRepository,
    refetcher: Option<RefetchHook>,
}

impl StoreBackend {
    /// Wire a backend for `store` into transaction `tid`.
    pub fn new(
        store: StoreInfo,
        tid: Uuid,
        resources: Arc<Resources>,
        committed_state: Arc<AtomicU8>,
    ) -> Self {
        StoreBackend {
            tracker: ItemActionTracker::new(store.clone(), tid, Arc::clone(&resources)),
            repository: NodeRepository::new(store.clone(), tid, resources, committed_state),
            store,
            refetcher: None,
        }
    }

    /// Install the B-tree's re-traversal hook, replacing the default
    /// registry-merge behaviour of
    /// [`NodeRepository::refetch_and_merge`].
    pub fn set_refetch_hook(&mut self, hook: RefetchHook) {
        self.refetcher = Some(hook);
    }

    /// The item tracker.
    pub fn tracker(&self) -> &ItemActionTracker {
        &self.tracker
    }

    /// The item tracker, mutably.
    pub fn tracker_mut(&mut self) -> &mut ItemActionTracker {
        &mut self.tracker
    }

    // Staging shortcuts used by the B-tree frontend.

    /// Stage an item read.
    pub fn get_item(&mut self, ctx: &Context, item: &mut Item) -> Result<()> {
        self.tracker.get(ctx, item)
    }

    /// Stage an item add.
    pub fn add_item(&mut self, ctx: &Context, item: &mut Item) -> Result<()> {
        self.tracker.add(ctx, item)
    }

    /// Stage an item update.
    pub fn update_item(&mut self, ctx: &Context, item: &mut Item) -> Result<()> {
        self.tracker.update(ctx, item)
    }

    /// Stage an item remove.
    pub fn remove_item(&mut self, ctx: &Context, item: &mut Item) -> Result<()> {
        self.tracker.remove(ctx, item)
    }

    /// Stage a node add.
    pub fn add_node(&mut self, node: Node) {
        self.repository.add(node);
    }

    /// Stage a node update.
    pub fn update_node(&mut self, node: Node) {
        self.repository.update(node);
    }

    /// Stage a node remove.
    pub fn remove_node(&mut self, id: Uuid) -> Result<()> {
        self.repository.remove(id)
    }

    /// Fetch a node through the cache ladder.
    pub fn get_node(&mut self, ctx: &Context, id: Uuid) -> Result<Option<Node>> {
        self.repository.get(ctx, id)
    }

    /// Mark a read node as taking part in the transaction.
    pub fn node_fetched(&mut self, id: Uuid) {
        self.repository.fetched(id);
    }
}

impl CommitBackend for StoreBackend {
    fn store_info(&self) -> &StoreInfo {
        &self.store
    }

    fn has_tracked_items(&self) -> bool {
        self.tracker.has_tracked_items()
    }

    fn check_tracked_items(&mut self, ctx: &Context) -> Result<()> {
        self.tracker.check_tracked_items(ctx)
    }

    fn lock_tracked_items(&mut self, ctx: &Context, ttl: Duration) -> Result<bool> {
        self.tracker.lock(ctx, ttl)
    }

    fn is_locked_tracked_items(&self, ctx: &Context) -> Result<bool> {
        self.tracker.is_locked(ctx)
    }

    fn unlock_tracked_items(&mut self, ctx: &Context) -> Result<()> {
        self.tracker.unlock(ctx)
    }

    fn commit_tracked_items_values(&mut self, ctx: &Context) -> Result<()> {
        self.tracker.commit_values(ctx)
    }

    fn get_for_rollback_tracked_items_values(&self) -> BlobTableIds {
        self.tracker.get_for_rollback_values()
    }

    fn get_obsolete_tracked_items_values(&self) -> BlobTableIds {
        self.tracker.get_obsolete_values()
    }

    fn refetch_and_merge(&mut self, ctx: &Context) -> Result<()> {
        if let Some(mut hook) = self.refetcher.take() {
            let result = hook(ctx, &mut self.repository, &mut self.tracker);
            self.refetcher = Some(hook);
            return result;
        }
        self.repository.refetch_and_merge(ctx)
    }

    fn count_delta(&self) -> i64 {
        self.tracker.count_delta()
    }

    fn node_repository(&self) -> &NodeRepository {
        &self.repository
    }

    fn node_repository_mut(&mut self) -> &mut NodeRepository {
        &mut self.repository
    }
}
