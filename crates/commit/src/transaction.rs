//! Two-phase transaction commit
//!
//! Phase 1 is a bounded retry loop: acquire row locks, write values, then
//! drive the node commit steps in a fixed order, logging each step before
//! it runs. Version conflicts roll back the pass, refetch-and-merge, and
//! retry; structured registry sector failures may be consumed by taking
//! over the stalled peer's priority rollback. Phase 2 flips the committed
//! inactive slots to active, fires best-effort replication, and schedules
//! obsolete entries for deletion before dropping the transaction log.

use crate::backend::{CommitBackend, StoreBackend};
use crate::logger::{delete_obsolete_entries, delete_tracked_values, TransactionLogger};
use crate::node_repository::{activate_inactive_nodes, touch_nodes, ClassifiedNodes};
use crate::payload::{to_bytes, BlobTableIds, NodesPayload, ObsoletePayload, StoreInfoPayload};
use crate::resources::Resources;
use keel_core::{
    create_lock_keys_with_id, CommitFunction, Context, Error, Handle, LockKey, Node,
    RegistryPayload, Result, SectorUserData, StoreInfo,
};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default transaction commit window.
const DEFAULT_MAX_TIME: Duration = Duration::from_secs(2 * 60);
/// Commit windows above this are clamped; locks should never outlive an
/// hour-bucket sweep.
const MAX_MAX_TIME: Duration = Duration::from_secs(60 * 60);
/// TTL of a takeover lock while restoring a dead peer's pre-image.
const TAKEOVER_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// What the transaction is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Full read/write commit.
    ForWriting,
    /// Snapshot reads only; commit validates reads and writes nothing.
    ForReading,
    /// Reads without commit-time validation.
    NoCheck,
}

/// Transaction construction options.
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    /// Commit mode.
    pub mode: TransactionMode,
    /// Maximum wall-clock time for the commit; also the row-lock TTL, so a
    /// crashed owner's locks expire on their own.
    pub max_time: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            mode: TransactionMode::ForWriting,
            max_time: DEFAULT_MAX_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    NotBegun,
    Begun,
    Phase1Done,
    Committed,
    RolledBack,
}

#[derive(Default)]
struct BackendArtifacts {
    root: Vec<Handle>,
    updated: Vec<Handle>,
    removed: Vec<Handle>,
    added: Vec<Handle>,
}

/// One transaction coordinating any number of B-tree backends.
///
/// All methods must be called from a single thread; the transaction owns
/// its backends exclusively and shares only the collaborator handles.
pub struct Transaction {
    tid: Uuid,
    mode: TransactionMode,
    max_time: Duration,
    state: TxState,
    resources: Arc<Resources>,
    logger: TransactionLogger,
    backends: Vec<Box<dyn CommitBackend>>,
    artifacts: Vec<BackendArtifacts>,
    /// L2 locks over updated/removed node ids, held from mid-phase-1 until
    /// phase 2 activation (or rollback).
    nodes_keys: Option<Vec<LockKey>>,
    /// Store metadata as it was before `commitStoreInfo`.
    store_preimages: Vec<StoreInfo>,
    /// Store metadata as committed, for replication.
    committed_stores: Vec<StoreInfo>,
}

impl Transaction {
    /// Create a transaction against the given collaborators.
    pub fn new(resources: Arc<Resources>, options: TransactionOptions) -> Self {
        let tid = Uuid::new_v4();
        let max_time = options.max_time.min(MAX_MAX_TIME);
        let logging = options.mode == TransactionMode::ForWriting;
        Transaction {
            tid,
            mode: options.mode,
            max_time,
            state: TxState::NotBegun,
            logger: TransactionLogger::new(tid, Arc::clone(&resources), logging),
            resources,
            backends: Vec::new(),
            artifacts: Vec::new(),
            nodes_keys: None,
            store_preimages: Vec::new(),
            committed_stores: Vec::new(),
        }
    }

    /// This transaction's id.
    pub fn id(&self) -> Uuid {
        self.tid
    }

    /// Whether the transaction committed.
    pub fn is_committed(&self) -> bool {
        self.state == TxState::Committed
    }

    /// Last commit step started, as persisted in the log.
    pub fn committed_state(&self) -> CommitFunction {
        self.logger.committed_state()
    }

    /// Build a [`StoreBackend`] wired to this transaction's id, gauge, and
    /// collaborators. Register it with [`Transaction::register`] once the
    /// frontend has staged its work into it.
    pub fn make_store_backend(&self, store: StoreInfo) -> StoreBackend {
        StoreBackend::new(
            store,
            self.tid,
            Arc::clone(&self.resources),
            self.logger.gauge(),
        )
    }

    /// Enlist a backend. Returns its index.
    pub fn register(&mut self, backend: Box<dyn CommitBackend>) -> usize {
        self.backends.push(backend);
        self.artifacts.push(BackendArtifacts::default());
        self.backends.len() - 1
    }

    /// Begin the transaction.
    ///
    /// # Errors
    /// `Error::InvalidState` when already begun.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != TxState::NotBegun {
            return Err(Error::InvalidState(
                "transaction already begun".to_string(),
            ));
        }
        self.state = TxState::Begun;
        Ok(())
    }

    fn ensure_begun(&self) -> Result<()> {
        if self.state == TxState::NotBegun {
            return Err(Error::InvalidState(
                "transaction has not begun".to_string(),
            ));
        }
        Ok(())
    }

    /// Run phase 1 then phase 2.
    pub fn commit(&mut self, ctx: &Context) -> Result<()> {
        self.phase1_commit(ctx)?;
        self.phase2_commit(ctx)
    }

    /// Phase 1: conflict detection, locking, and all durable writes short
    /// of activation. Rolls itself back on failure.
    pub fn phase1_commit(&mut self, ctx: &Context) -> Result<()> {
        self.ensure_begun()?;
        if self.state != TxState::Begun {
            return Err(Error::InvalidState(format!(
                "phase 1 commit not allowed in {:?}",
                self.state
            )));
        }
        match self.phase1_work(ctx) {
            Ok(()) => {
                self.state = TxState::Phase1Done;
                Ok(())
            }
            Err(e) => match self.rollback_internal(ctx, false) {
                Ok(()) => Err(e),
                Err(rollback_err) => Err(Error::Other(format!(
                    "phase 1 commit failed, then rollback errored with: {}",
                    rollback_err
                ))),
            },
        }
    }

    /// Phase 2: activate inactive slots, replicate, clean up obsolete
    /// entries, drop the log.
    pub fn phase2_commit(&mut self, ctx: &Context) -> Result<()> {
        self.ensure_begun()?;
        if self.state != TxState::Phase1Done {
            return Err(Error::InvalidState(format!(
                "phase 2 commit requires a finished phase 1, not {:?}",
                self.state
            )));
        }
        self.phase2_work(ctx)
    }

    /// Undo every durable side effect of this transaction.
    ///
    /// # Errors
    /// A transaction already past finalize cannot be rolled back.
    pub fn rollback(&mut self, ctx: &Context) -> Result<()> {
        self.ensure_begun()?;
        if self.state == TxState::RolledBack {
            return Err(Error::InvalidState(
                "transaction already rolled back".to_string(),
            ));
        }
        self.rollback_internal(ctx, false)
    }

    // === phase 1 ===

    fn phase1_work(&mut self, ctx: &Context) -> Result<()> {
        match self.mode {
            TransactionMode::ForReading => return self.commit_for_reader(ctx),
            TransactionMode::NoCheck => return Ok(()),
            TransactionMode::ForWriting => {}
        }

        let start = Instant::now();
        loop {
            ctx.check()?;
            self.check_timeout(start)?;

            self.logger.log(ctx, CommitFunction::LockTrackedItems, vec![])?;
            if !self.backends.iter().any(|b| b.has_tracked_items()) {
                debug!(target: "keel::txn", tid = %self.tid, "nothing tracked, phase 1 is a no-op");
                return Ok(());
            }
            // A row-level race is a user-level conflict: no retry.
            for backend in &mut self.backends {
                backend.check_tracked_items(ctx)?;
            }

            // Row locks: acquire, then prove they are still ours. A lock
            // lost between acquisition and verification is re-attempted
            // after a short back-off; plain contention refetches first.
            let mut all_locked = true;
            for backend in &mut self.backends {
                if !backend.lock_tracked_items(ctx, self.max_time)? {
                    all_locked = false;
                    break;
                }
            }
            if !all_locked {
                debug!(target: "keel::txn", tid = %self.tid, "row lock contention, refetching");
                self.refetch_and_merge(ctx)?;
                Self::backoff();
                continue;
            }
            match self.is_locked_tracked_items(ctx) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(target: "keel::txn", tid = %self.tid, "row locks lost after acquisition");
                    Self::backoff();
                    continue;
                }
                Err(e) => {
                    warn!(target: "keel::txn", tid = %self.tid, error = %e, "row lock verification failed");
                    Self::backoff();
                    continue;
                }
            }

            let rollback_values: Vec<BlobTableIds> = self
                .backends
                .iter()
                .map(|b| b.get_for_rollback_tracked_items_values())
                .collect();
            self.logger.log(
                ctx,
                CommitFunction::CommitTrackedItemsValues,
                to_bytes(&rollback_values)?,
            )?;
            for backend in &mut self.backends {
                backend.commit_tracked_items_values(ctx)?;
            }

            let classified: Vec<ClassifiedNodes> = self
                .backends
                .iter()
                .map(|b| b.node_repository().classify())
                .collect();

            if self.commit_nodes_pass(ctx, &classified)? {
                break;
            }

            self.rollback_phase1_pass(ctx)?;
            self.refetch_and_merge(ctx)?;
            Self::backoff();
        }

        self.commit_store_info(ctx)?;
        self.logger.log(ctx, CommitFunction::BeforeFinalize, vec![])?;
        Ok(())
    }

    /// One pass over the node commit steps. Returns false on a retryable
    /// conflict (including a consumed sector takeover).
    fn commit_nodes_pass(
        &mut self,
        ctx: &Context,
        classified: &[ClassifiedNodes],
    ) -> Result<bool> {
        self.logger.log(
            ctx,
            CommitFunction::CommitNewRootNodes,
            to_bytes(&self.nodes_payloads(classified, |c| &c.root_nodes))?,
        )?;
        for (i, class) in classified.iter().enumerate() {
            let result = self.backends[i]
                .node_repository_mut()
                .commit_new_root_nodes(ctx, &class.root_nodes);
            match self.absorb_sector_failure(ctx, result)? {
                Some((true, handles)) => self.artifacts[i].root = handles,
                Some((false, _)) | None => return Ok(false),
            }
        }

        self.logger
            .log(ctx, CommitFunction::AreFetchedItemsIntact, vec![])?;
        for (i, class) in classified.iter().enumerate() {
            if !self.backends[i]
                .node_repository()
                .are_fetched_items_intact(ctx, &class.fetched_nodes)?
            {
                debug!(target: "keel::txn", tid = %self.tid, "fetched nodes changed under us");
                return Ok(false);
            }
        }

        if !self.lock_nodes_keys(ctx, classified)? {
            return Ok(false);
        }

        self.logger.log(
            ctx,
            CommitFunction::CommitUpdatedNodes,
            to_bytes(&self.nodes_payloads(classified, |c| &c.updated_nodes))?,
        )?;
        for (i, class) in classified.iter().enumerate() {
            let result = self.backends[i]
                .node_repository_mut()
                .commit_updated_nodes(ctx, &class.updated_nodes);
            match self.absorb_sector_failure(ctx, result)? {
                Some((true, handles)) => self.artifacts[i].updated = handles,
                Some((false, _)) | None => return Ok(false),
            }
        }

        self.logger.log(
            ctx,
            CommitFunction::CommitRemovedNodes,
            to_bytes(&self.nodes_payloads(classified, |c| &c.removed_nodes))?,
        )?;
        for (i, class) in classified.iter().enumerate() {
            let result = self.backends[i]
                .node_repository_mut()
                .commit_removed_nodes(ctx, &class.removed_nodes);
            match self.absorb_sector_failure(ctx, result)? {
                Some((true, handles)) => self.artifacts[i].removed = handles,
                Some((false, _)) | None => return Ok(false),
            }
        }

        self.logger.log(
            ctx,
            CommitFunction::CommitAddedNodes,
            to_bytes(&self.nodes_payloads(classified, |c| &c.added_nodes))?,
        )?;
        for (i, class) in classified.iter().enumerate() {
            let result = self.backends[i]
                .node_repository_mut()
                .commit_added_nodes(ctx, &class.added_nodes);
            match self.absorb_sector_failure(ctx, result)? {
                Some(handles) => self.artifacts[i].added = handles,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn nodes_payloads<'a, F>(
        &self,
        classified: &'a [ClassifiedNodes],
        pick: F,
    ) -> Vec<NodesPayload>
    where
        F: Fn(&'a ClassifiedNodes) -> &'a Vec<Node>,
    {
        let mut payloads = Vec::new();
        for (i, class) in classified.iter().enumerate() {
            let nodes = pick(class);
            if nodes.is_empty() {
                continue;
            }
            let store = self.backends[i].store_info();
            payloads.push(NodesPayload {
                registry_table: store.registry_table.clone(),
                blob_table: store.blob_table.clone(),
                ids: nodes.iter().map(|n| n.id).collect(),
            });
        }
        payloads
    }

    /// Advisory-lock the updated/removed node ids so the registry writes of
    /// this pass (and phase 2's activation) may skip the CAS.
    fn lock_nodes_keys(&mut self, ctx: &Context, classified: &[ClassifiedNodes]) -> Result<bool> {
        let mut names: Vec<String> = Vec::new();
        for class in classified {
            for node in class.updated_nodes.iter().chain(&class.removed_nodes) {
                names.push(node.id.to_string());
            }
        }
        if names.is_empty() {
            self.nodes_keys = None;
            return Ok(true);
        }
        let mut keys = create_lock_keys_with_id(&names, self.tid);
        let (ok, _owner) = self
            .resources
            .l2_cache
            .dual_lock(ctx, self.max_time, &mut keys)?;
        if !ok {
            if let Err(e) = self.resources.l2_cache.unlock(ctx, &mut keys) {
                warn!(target: "keel::txn", error = %e, "node key unlock failed");
            }
            return Ok(false);
        }
        self.nodes_keys = Some(keys);
        Ok(true)
    }

    fn unlock_nodes_keys(&mut self, ctx: &Context) {
        if let Some(mut keys) = self.nodes_keys.take() {
            if let Err(e) = self.resources.l2_cache.unlock(ctx, &mut keys) {
                warn!(target: "keel::txn", error = %e, "node key unlock failed");
            }
        }
    }

    /// Consume a recoverable sector failure by taking over the stalled
    /// owner; `None` means "consumed, retry the pass".
    fn absorb_sector_failure<T>(&mut self, ctx: &Context, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_sector_failure() => {
                self.handle_sector_lock_timeout(ctx, e)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Registry sector-timeout takeover: if the failure points at a peer's
    /// rollback lock key, grab it, restore the peer's pre-image, and
    /// consume the error so the caller retries.
    fn handle_sector_lock_timeout(&mut self, ctx: &Context, err: Error) -> Result<()> {
        let (key, lock_id) = match err.sector_user_data() {
            Some(SectorUserData::LockKey { key, lock_id }) => (key.clone(), *lock_id),
            _ => return Err(err),
        };
        let mut keys = [LockKey {
            key,
            lock_id: self.tid,
            is_lock_owner: false,
        }];
        let acquired = match self
            .resources
            .l2_cache
            .dual_lock(ctx, TAKEOVER_LOCK_TTL, &mut keys)
        {
            Ok((ok, _)) => ok,
            Err(e) => {
                warn!(target: "keel::txn", error = %e, "takeover lock attempt failed");
                false
            }
        };
        if !acquired {
            return Err(err);
        }
        let result = self.logger.priority_rollback(ctx, lock_id);
        if let Err(e) = self.resources.l2_cache.unlock(ctx, &mut keys) {
            warn!(target: "keel::txn", error = %e, "takeover lock release failed");
        }
        match result {
            Ok(()) => {
                info!(target: "keel::txn", tid = %self.tid, peer = %lock_id, "took over stalled transaction");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn commit_store_info(&mut self, ctx: &Context) -> Result<()> {
        let names: Vec<String> = self
            .backends
            .iter()
            .map(|b| b.store_info().name.clone())
            .collect();
        let preimages = self.resources.store_repository.get(ctx, &names)?;
        self.store_preimages = preimages.clone();
        self.logger.log(
            ctx,
            CommitFunction::CommitStoreInfo,
            to_bytes(&StoreInfoPayload { stores: preimages })?,
        )?;

        let mut updates = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            let mut store = self
                .store_preimages
                .iter()
                .find(|s| s.name == backend.store_info().name)
                .cloned()
                .unwrap_or_else(|| backend.store_info().clone());
            store.count += backend.count_delta();
            store.root_node_id = backend.store_info().root_node_id;
            updates.push(store);
        }
        self.committed_stores = self.resources.store_repository.update(ctx, &updates)?;
        Ok(())
    }

    fn commit_for_reader(&mut self, ctx: &Context) -> Result<()> {
        let start = Instant::now();
        loop {
            ctx.check()?;
            self.check_timeout(start)?;
            let mut intact = true;
            for backend in &self.backends {
                let class = backend.node_repository().classify();
                if !backend
                    .node_repository()
                    .are_fetched_items_intact(ctx, &class.fetched_nodes)?
                {
                    intact = false;
                    break;
                }
            }
            if intact {
                return Ok(());
            }
            self.refetch_and_merge(ctx)?;
            Self::backoff();
        }
    }

    // === phase 2 ===

    fn phase2_work(&mut self, ctx: &Context) -> Result<()> {
        if self.mode != TransactionMode::ForWriting {
            self.state = TxState::Committed;
            return Ok(());
        }

        let obsolete = self.build_obsolete_payload();
        self.logger
            .log(ctx, CommitFunction::FinalizeCommit, to_bytes(&obsolete)?)?;

        // Activate updates, touch adds.
        let mut to_persist: Vec<RegistryPayload<Handle>> = Vec::new();
        for (i, backend) in self.backends.iter().enumerate() {
            let table = backend.store_info().registry_table.clone();
            let artifacts = &mut self.artifacts[i];
            if !artifacts.updated.is_empty() {
                activate_inactive_nodes(&mut artifacts.updated);
                to_persist.push(RegistryPayload::new(&table, artifacts.updated.clone()));
            }
            let mut fresh: Vec<Handle> = artifacts
                .root
                .iter()
                .chain(&artifacts.added)
                .copied()
                .collect();
            if !fresh.is_empty() {
                touch_nodes(&mut fresh);
                let split = artifacts.root.len();
                artifacts.root = fresh[..split].to_vec();
                artifacts.added = fresh[split..].to_vec();
                to_persist.push(RegistryPayload::new(&table, fresh));
            }
        }
        if !to_persist.is_empty() {
            if let Err(e) = self
                .resources
                .registry
                .update_no_locks(ctx, true, &to_persist)
            {
                warn!(target: "keel::txn", tid = %self.tid, error = %e, "finalize failed, rolling back");
                self.unlock_nodes_keys(ctx);
                if let Err(prio_err) = self.resources.priority_log().remove(ctx, self.tid) {
                    warn!(target: "keel::txn", error = %prio_err, "priority log remove failed");
                }
                if let Err(rollback_err) = self.rollback_internal(ctx, true) {
                    warn!(target: "keel::txn", error = %rollback_err, "rollback after finalize failure errored");
                }
                return Err(e);
            }
        }

        // The flip is durable; the transaction is committed from here on.
        self.state = TxState::Committed;

        self.replicate(ctx);
        self.unlock_nodes_keys(ctx);

        self.logger
            .log(ctx, CommitFunction::DeleteObsoleteEntries, to_bytes(&obsolete)?)?;
        let mut last_err = delete_obsolete_entries(ctx, &self.resources, &obsolete).err();

        self.logger.log(
            ctx,
            CommitFunction::DeleteTrackedItemsValues,
            to_bytes(&obsolete.tracked_values)?,
        )?;
        if let Err(e) = delete_tracked_values(ctx, &self.resources, &obsolete.tracked_values) {
            last_err = Some(e);
        }

        for backend in &mut self.backends {
            if let Err(e) = backend.unlock_tracked_items(ctx) {
                warn!(target: "keel::txn", error = %e, "row unlock failed after commit");
            }
        }

        if let Some(e) = last_err {
            // Leave the log in place; the expired-log sweeper finishes the
            // cleanup by rolling this transaction forward.
            return Err(e);
        }

        self.logger.remove_logs(ctx)?;
        self.resources.priority_log().remove(ctx, self.tid)?;
        info!(target: "keel::txn", tid = %self.tid, "transaction committed");
        Ok(())
    }

    fn build_obsolete_payload(&self) -> ObsoletePayload {
        let mut obsolete = ObsoletePayload::default();
        for (i, backend) in self.backends.iter().enumerate() {
            let store = backend.store_info();
            let artifacts = &self.artifacts[i];

            let removed_ids: Vec<Uuid> =
                artifacts.removed.iter().map(|h| h.logical_id).collect();
            if !removed_ids.is_empty() {
                obsolete.deleted.push(NodesPayload {
                    registry_table: store.registry_table.clone(),
                    blob_table: store.blob_table.clone(),
                    ids: removed_ids,
                });
            }

            // Pre-flip active ids of updates become garbage after
            // activation; tombstoned handles' blobs die with them.
            let mut unused: Vec<Uuid> = artifacts
                .updated
                .iter()
                .map(|h| h.get_active_id())
                .collect();
            unused.extend(
                artifacts
                    .removed
                    .iter()
                    .map(|h| h.get_active_id())
                    .filter(|id| !id.is_nil()),
            );
            if !unused.is_empty() {
                obsolete
                    .unused_blobs
                    .push(BlobTableIds::new(&store.blob_table, unused));
            }

            let tracked = backend.get_obsolete_tracked_items_values();
            if !tracked.is_empty() {
                obsolete.tracked_values.push(tracked);
            }
        }
        obsolete
    }

    fn replicate(&self, ctx: &Context) {
        let mut roots = Vec::new();
        let mut added = Vec::new();
        let mut updated = Vec::new();
        let mut removed = Vec::new();
        for (i, backend) in self.backends.iter().enumerate() {
            let table = &backend.store_info().registry_table;
            let artifacts = &self.artifacts[i];
            if !artifacts.root.is_empty() {
                roots.push(RegistryPayload::new(table, artifacts.root.clone()));
            }
            if !artifacts.added.is_empty() {
                added.push(RegistryPayload::new(table, artifacts.added.clone()));
            }
            if !artifacts.updated.is_empty() {
                updated.push(RegistryPayload::new(table, artifacts.updated.clone()));
            }
            let removed_ids: Vec<Uuid> =
                artifacts.removed.iter().map(|h| h.logical_id).collect();
            if !removed_ids.is_empty() {
                removed.push(RegistryPayload::new(table, removed_ids));
            }
        }

        if let Err(e) = self
            .resources
            .store_repository
            .replicate(ctx, &self.committed_stores)
        {
            warn!(target: "keel::txn", error = %e, "store replication failed");
        }
        if let Err(e) = self
            .resources
            .registry
            .replicate(ctx, &roots, &added, &updated, &removed)
        {
            warn!(target: "keel::txn", error = %e, "registry replication failed");
        }
        if let Err(e) = self.resources.priority_log().log_commit_changes(
            ctx,
            &self.committed_stores,
            &roots,
            &added,
            &updated,
            &removed,
        ) {
            warn!(target: "keel::txn", error = %e, "commit change log failed");
        }
    }

    // === rollback ===

    /// Undo the current pass's node work so the loop can refetch and retry.
    /// Row locks stay held; committed values stay (their blob ids remain
    /// valid across retries).
    fn rollback_phase1_pass(&mut self, ctx: &Context) -> Result<()> {
        let locked = self.nodes_keys.is_some();
        let gauge = self.logger.committed_state();
        for (i, backend) in self.backends.iter().enumerate() {
            let artifacts = &self.artifacts[i];
            let repo = backend.node_repository();
            if !artifacts.added.is_empty() {
                repo.rollback_added_nodes(ctx, &artifacts.added)?;
            }
            if !artifacts.removed.is_empty() {
                repo.rollback_removed_nodes(ctx, locked, &artifacts.removed)?;
            }
            if !artifacts.updated.is_empty() {
                repo.rollback_updated_nodes(ctx, locked, &artifacts.updated)?;
            }
            if !artifacts.root.is_empty() {
                repo.rollback_new_root_nodes(
                    ctx,
                    gauge > CommitFunction::CommitNewRootNodes,
                    &artifacts.root,
                )?;
            }
        }
        if gauge >= CommitFunction::CommitUpdatedNodes {
            if let Err(e) = self.resources.priority_log().remove(ctx, self.tid) {
                warn!(target: "keel::txn", error = %e, "priority log remove failed");
            }
        }
        self.unlock_nodes_keys(ctx);
        for artifacts in &mut self.artifacts {
            *artifacts = BackendArtifacts::default();
        }
        Ok(())
    }

    fn rollback_internal(&mut self, ctx: &Context, ignore_committed_gauge: bool) -> Result<()> {
        let gauge = self.logger.committed_state();
        if !ignore_committed_gauge
            && (self.state == TxState::Committed || gauge >= CommitFunction::FinalizeCommit)
        {
            return Err(Error::Other(
                "transaction got committed, 'can't rollback it".to_string(),
            ));
        }

        if gauge > CommitFunction::CommitStoreInfo && !self.store_preimages.is_empty() {
            self.resources
                .store_repository
                .update(ctx, &self.store_preimages)?;
        }

        let locked = self.nodes_keys.is_some();
        for (i, backend) in self.backends.iter().enumerate() {
            let artifacts = &self.artifacts[i];
            let repo = backend.node_repository();
            if !artifacts.added.is_empty() {
                repo.rollback_added_nodes(ctx, &artifacts.added)?;
            }
            if !artifacts.removed.is_empty() {
                repo.rollback_removed_nodes(ctx, locked, &artifacts.removed)?;
            }
            if !artifacts.updated.is_empty() {
                repo.rollback_updated_nodes(ctx, locked, &artifacts.updated)?;
            }
            if !artifacts.root.is_empty() {
                repo.rollback_new_root_nodes(
                    ctx,
                    gauge > CommitFunction::CommitNewRootNodes,
                    &artifacts.root,
                )?;
            }
        }

        if gauge >= CommitFunction::CommitTrackedItemsValues {
            let values: Vec<BlobTableIds> = self
                .backends
                .iter()
                .map(|b| b.get_for_rollback_tracked_items_values())
                .collect();
            delete_tracked_values(ctx, &self.resources, &values)?;
        }

        if gauge >= CommitFunction::CommitUpdatedNodes {
            if let Err(e) = self.resources.priority_log().remove(ctx, self.tid) {
                if gauge >= CommitFunction::BeforeFinalize {
                    return Err(e);
                }
                warn!(target: "keel::txn", error = %e, "priority log remove failed");
            }
        }

        self.unlock_nodes_keys(ctx);
        let mut last_err = None;
        for backend in &mut self.backends {
            if let Err(e) = backend.unlock_tracked_items(ctx) {
                last_err = Some(e);
            }
        }
        self.logger.remove_logs(ctx)?;
        for artifacts in &mut self.artifacts {
            *artifacts = BackendArtifacts::default();
        }
        self.state = TxState::RolledBack;
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // === helpers ===

    fn refetch_and_merge(&mut self, ctx: &Context) -> Result<()> {
        for backend in &mut self.backends {
            backend.refetch_and_merge(ctx)?;
        }
        Ok(())
    }

    fn is_locked_tracked_items(&self, ctx: &Context) -> Result<bool> {
        for backend in &self.backends {
            if !backend.is_locked_tracked_items(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_timeout(&self, start: Instant) -> Result<()> {
        if start.elapsed() > self.max_time {
            return Err(Error::Timeout(format!(
                "commit exceeded max time of {:?}",
                self.max_time
            )));
        }
        Ok(())
    }

    fn backoff() {
        let jitter = rand::thread_rng().gen_range(0..100);
        std::thread::sleep(Duration::from_millis(50 + jitter));
    }
}
