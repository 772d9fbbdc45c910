//! Node repository backend: per-store node cache and commit machinery
//!
//! Buffers node mutations in a local `{action, node}` cache until phase 1,
//! then drives the registry/blob-store writes for each commit step. Reads
//! resolve through a ladder: local cache, read MRU, L1, then registry plus
//! L2/blob store. Once phase 1 has started the L1 handle shortcut is
//! bypassed so a transaction never trusts a pre-commit handle snapshot.
//!
//! The `rollback_*` family is also used by crash recovery, which only has
//! table names and logical ids from the log; everything else (inactive slot
//! ids, tombstone flags) is re-derived from the registry so rollback stays
//! idempotent.

use crate::action::ItemAction;
use crate::resources::Resources;
use keel_core::{
    format_node_key, now_unix_milli, BlobEntry, BlobsPayload, CommitFunction, Context, Error,
    Handle, L2CacheExt, Node, RegistryPayload, Result, StoreInfo,
};
use keel_storage::Mru;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const READ_CACHE_CAPACITY: usize = 128;

/// One locally cached node with the action that put it there.
#[derive(Debug, Clone)]
pub struct CachedNode {
    /// How the transaction touched this node.
    pub action: ItemAction,
    /// The node copy.
    pub node: Node,
}

/// Local-cache contents split by action, as consumed by the commit steps.
#[derive(Debug, Default, Clone)]
pub struct ClassifiedNodes {
    /// Brand-new roots (added nodes whose id is the store's root id).
    pub root_nodes: Vec<Node>,
    /// Nodes staged as updates.
    pub updated_nodes: Vec<Node>,
    /// Nodes staged as removes.
    pub removed_nodes: Vec<Node>,
    /// Added non-root nodes.
    pub added_nodes: Vec<Node>,
    /// Nodes read but not mutated; validated by the snapshot check.
    pub fetched_nodes: Vec<Node>,
}

/// Per-store node repository owned exclusively by one transaction.
pub struct NodeRepository {
    store: StoreInfo,
    tid: Uuid,
    resources: Arc<Resources>,
    /// Commit-step gauge shared with the owning transaction.
    committed_state: Arc<AtomicU8>,
    local_cache: FxHashMap<Uuid, CachedNode>,
    /// Nodes read but not (yet) tracked by the B-tree.
    read_nodes: Mru<Uuid, Node>,
}

impl NodeRepository {
    /// Create a repository for `store` owned by transaction `tid`.
    pub fn new(
        store: StoreInfo,
        tid: Uuid,
        resources: Arc<Resources>,
        committed_state: Arc<AtomicU8>,
    ) -> Self {
        NodeRepository {
            store,
            tid,
            resources,
            committed_state,
            local_cache: FxHashMap::default(),
            read_nodes: Mru::new(READ_CACHE_CAPACITY),
        }
    }

    /// The store this repository serves.
    pub fn store_info(&self) -> &StoreInfo {
        &self.store
    }

    fn phase1_started(&self) -> bool {
        self.committed_state.load(Ordering::Acquire) > CommitFunction::Unknown.wire_value()
    }

    fn cache_ttl(&self) -> Option<std::time::Duration> {
        Some(self.store.cache_duration)
    }

    // === staging ===

    /// Stage a brand-new node.
    pub fn add(&mut self, node: Node) {
        self.local_cache.insert(
            node.id,
            CachedNode {
                action: ItemAction::Add,
                node,
            },
        );
    }

    /// Stage a modification; an add stays an add with the new content.
    pub fn update(&mut self, node: Node) {
        let action = match self.local_cache.get(&node.id) {
            Some(c) if c.action == ItemAction::Add => ItemAction::Add,
            _ => ItemAction::Update,
        };
        self.local_cache.insert(node.id, CachedNode { action, node });
    }

    /// Stage a removal. A node added in this transaction is purged outright;
    /// the registry never sees it.
    pub fn remove(&mut self, id: Uuid) -> Result<()> {
        if let Some(cached) = self.local_cache.get_mut(&id) {
            if cached.action == ItemAction::Add {
                self.local_cache.remove(&id);
            } else {
                cached.action = ItemAction::Remove;
            }
            return Ok(());
        }
        if let Some(node) = self.read_nodes.get(&id) {
            self.read_nodes.delete(&id);
            self.local_cache.insert(
                id,
                CachedNode {
                    action: ItemAction::Remove,
                    node,
                },
            );
            return Ok(());
        }
        Err(Error::InvalidState(format!(
            "remove of unfetched node {}",
            id
        )))
    }

    /// Promote a read node into the local cache; called when the B-tree
    /// decides the node takes part in the transaction.
    pub fn fetched(&mut self, id: Uuid) {
        if self.local_cache.contains_key(&id) {
            return;
        }
        if let Some(node) = self.read_nodes.get(&id) {
            self.read_nodes.delete(&id);
            self.local_cache.insert(
                id,
                CachedNode {
                    action: ItemAction::Get,
                    node,
                },
            );
        }
    }

    /// Fetch a node by logical id through the cache ladder.
    pub fn get(&mut self, ctx: &Context, logical_id: Uuid) -> Result<Option<Node>> {
        if let Some(cached) = self.local_cache.get(&logical_id) {
            if cached.action == ItemAction::Remove {
                return Ok(None);
            }
            return Ok(Some(cached.node.clone()));
        }
        if let Some(node) = self.read_nodes.get(&logical_id) {
            return Ok(Some(node));
        }
        if !self.phase1_started() {
            if let Some(handle) = self.resources.l1_cache.get_handle(logical_id) {
                if let Some(node) = self.resources.l1_cache.get_node(handle.get_active_id()) {
                    self.read_nodes.set(logical_id, node.clone(), None);
                    return Ok(Some(node));
                }
            }
        }
        let handle = match self.fetch_handles(ctx, &[logical_id])? {
            Some(handles) => handles[0],
            None => return Ok(None),
        };
        if handle.is_deleted {
            return Ok(None);
        }
        let active = handle.get_active_id();
        if let Some(node) = self.resources.l1_cache.get_node(active) {
            self.read_nodes.set(logical_id, node.clone(), None);
            return Ok(Some(node));
        }
        let mut node: Option<Node> = None;
        match self
            .resources
            .l2_cache
            .get_struct::<Node>(ctx, &format_node_key(active))
        {
            Ok(found) => node = found,
            Err(e) => warn!(target: "keel::repo", error = %e, "node cache read failed"),
        }
        let node = match node {
            Some(n) => n,
            None => {
                let bytes = self
                    .resources
                    .blob_store
                    .get_one(ctx, &self.store.blob_table, active)?
                    .ok_or_else(|| {
                        Error::BlobStore(format!("node blob {} missing", active))
                    })?;
                Node::from_bytes(&bytes)?
            }
        };
        self.resources
            .l1_cache
            .set_handle(handle, self.cache_ttl());
        self.resources
            .l1_cache
            .set_node(active, node.clone(), self.cache_ttl());
        self.read_nodes.set(logical_id, node.clone(), None);
        Ok(Some(node))
    }

    /// Split the local cache by action.
    pub fn classify(&self) -> ClassifiedNodes {
        let mut out = ClassifiedNodes::default();
        for cached in self.local_cache.values() {
            let node = cached.node.clone();
            match cached.action {
                ItemAction::Add => {
                    if node.id == self.store.root_node_id {
                        out.root_nodes.push(node);
                    } else {
                        out.added_nodes.push(node);
                    }
                }
                ItemAction::Update => out.updated_nodes.push(node),
                ItemAction::Remove => out.removed_nodes.push(node),
                ItemAction::Get => out.fetched_nodes.push(node),
                ItemAction::Default => {}
            }
        }
        out
    }

    /// Re-read registry handles for every locally cached node and merge:
    /// adds whose id is already registered become updates, everything else
    /// adopts the registry's current version. A B-tree frontend replaces
    /// this with a real re-traversal through its own refetch hook.
    pub fn refetch_and_merge(&mut self, ctx: &Context) -> Result<()> {
        self.read_nodes.clear();
        if self.local_cache.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = self.local_cache.keys().copied().collect();
        let found = self.resources.registry.get(
            ctx,
            &[RegistryPayload::new(&self.store.registry_table, ids)],
        )?;
        let by_id: FxHashMap<Uuid, Handle> = found
            .iter()
            .flat_map(|p| p.ids.iter())
            .map(|h| (h.logical_id, *h))
            .collect();
        for cached in self.local_cache.values_mut() {
            if let Some(handle) = by_id.get(&cached.node.id) {
                if cached.action == ItemAction::Add {
                    cached.action = ItemAction::Update;
                }
                cached.node.version = handle.version;
            }
        }
        Ok(())
    }

    fn fetch_handles(&self, ctx: &Context, ids: &[Uuid]) -> Result<Option<Vec<Handle>>> {
        let found = self.resources.registry.get(
            ctx,
            &[RegistryPayload::new(&self.store.registry_table, ids.to_vec())],
        )?;
        let by_id: FxHashMap<Uuid, Handle> = found
            .iter()
            .flat_map(|p| p.ids.iter())
            .map(|h| (h.logical_id, *h))
            .collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            match by_id.get(id) {
                Some(h) => handles.push(*h),
                None => return Ok(None),
            }
        }
        Ok(Some(handles))
    }

    fn write_node_blobs(
        &self,
        ctx: &Context,
        entries: Vec<(Uuid, Node)>,
    ) -> Result<()> {
        let mut blobs = Vec::with_capacity(entries.len());
        for (physical_id, node) in &entries {
            blobs.push(BlobEntry {
                id: *physical_id,
                payload: node.to_bytes()?,
            });
        }
        self.resources
            .blob_store
            .add(ctx, &[BlobsPayload::new(&self.store.blob_table, blobs)])?;
        for (physical_id, node) in entries {
            if let Err(e) = self.resources.l2_cache.set_struct(
                ctx,
                &format_node_key(physical_id),
                &node,
                self.cache_ttl(),
            ) {
                warn!(target: "keel::repo", error = %e, "node cache write failed");
            }
        }
        Ok(())
    }

    // === commit steps ===

    /// Register brand-new root nodes. Returns `(false, empty)` when any
    /// root id is already registered; the caller refetches and retries.
    pub fn commit_new_root_nodes(
        &mut self,
        ctx: &Context,
        nodes: &[Node],
    ) -> Result<(bool, Vec<Handle>)> {
        if nodes.is_empty() {
            return Ok((true, Vec::new()));
        }
        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let existing = self.resources.registry.get(
            ctx,
            &[RegistryPayload::new(&self.store.registry_table, ids)],
        )?;
        if existing.iter().any(|p| !p.ids.is_empty()) {
            return Ok((false, Vec::new()));
        }
        let handles: Vec<Handle> = nodes.iter().map(|n| Handle::new(n.id)).collect();
        let entries: Vec<(Uuid, Node)> = nodes
            .iter()
            .zip(&handles)
            .map(|(n, h)| {
                let mut copy = n.clone();
                copy.version = n.version + 1;
                (h.get_active_id(), copy)
            })
            .collect();
        self.write_node_blobs(ctx, entries)?;
        if let Err(e) = self.resources.registry.add(
            ctx,
            &[RegistryPayload::new(
                &self.store.registry_table,
                handles.clone(),
            )],
        ) {
            self.delete_blobs_best_effort(ctx, handles.iter().map(|h| h.get_active_id()));
            return Err(e);
        }
        Ok((true, handles))
    }

    /// Validate that every fetched (read-only) node still matches the
    /// registry; the snapshot validation step.
    pub fn are_fetched_items_intact(&self, ctx: &Context, nodes: &[Node]) -> Result<bool> {
        if nodes.is_empty() {
            return Ok(true);
        }
        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let handles = match self.fetch_handles(ctx, &ids)? {
            Some(h) => h,
            None => return Ok(false),
        };
        for (node, handle) in nodes.iter().zip(&handles) {
            if handle.is_deleted || handle.version != node.version {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write updated nodes into freshly allocated inactive slots.
    ///
    /// Version conflicts, tombstones, and occupied (non-expired) inactive
    /// slots all yield `(false, empty)` so the caller can refetch and
    /// retry. Expired inactive slots are reclaimed on the spot. The
    /// pre-image handles are written to the priority log before the
    /// registry is touched.
    pub fn commit_updated_nodes(
        &mut self,
        ctx: &Context,
        nodes: &[Node],
    ) -> Result<(bool, Vec<Handle>)> {
        if nodes.is_empty() {
            return Ok((true, Vec::new()));
        }
        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let mut handles = match self.fetch_handles(ctx, &ids)? {
            Some(h) => h,
            None => return Ok((false, Vec::new())),
        };
        let preimage = handles.clone();
        let now = now_unix_milli();
        for (node, handle) in nodes.iter().zip(handles.iter_mut()) {
            if handle.is_deleted {
                if handle.is_expired_inactive(now) {
                    // A peer died between its remove-commit and finalize;
                    // reclaim the tombstone.
                    handle.is_deleted = false;
                } else {
                    return Ok((false, Vec::new()));
                }
            }
            if handle.version != node.version {
                return Ok((false, Vec::new()));
            }
            let mut inactive = handle.allocate_id();
            if inactive.is_nil() && handle.is_expired_inactive(now) {
                handle.clear_inactive_id();
                inactive = handle.allocate_id();
            }
            if inactive.is_nil() {
                // Another transaction is mid-update on this node.
                return Ok((false, Vec::new()));
            }
        }
        let plog = self.resources.priority_log();
        if plog.is_enabled() {
            plog.add(
                ctx,
                self.tid,
                &[RegistryPayload::new(&self.store.registry_table, preimage)],
            )?;
        }
        self.resources.registry.update_no_locks(
            ctx,
            true,
            &[RegistryPayload::new(
                &self.store.registry_table,
                handles.clone(),
            )],
        )?;
        let entries: Vec<(Uuid, Node)> = nodes
            .iter()
            .zip(&handles)
            .map(|(n, h)| {
                let mut copy = n.clone();
                copy.version = n.version + 1;
                (h.get_inactive_id(), copy)
            })
            .collect();
        self.write_node_blobs(ctx, entries)?;
        Ok((true, handles))
    }

    /// Tombstone removed nodes: set the deletion mark and stamp the
    /// in-flight marker. Any version mismatch yields `(false, empty)`.
    pub fn commit_removed_nodes(
        &mut self,
        ctx: &Context,
        nodes: &[Node],
    ) -> Result<(bool, Vec<Handle>)> {
        if nodes.is_empty() {
            return Ok((true, Vec::new()));
        }
        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let mut handles = match self.fetch_handles(ctx, &ids)? {
            Some(h) => h,
            None => return Ok((false, Vec::new())),
        };
        let now = now_unix_milli();
        for (node, handle) in nodes.iter().zip(handles.iter_mut()) {
            if handle.is_deleted || handle.version != node.version {
                return Ok((false, Vec::new()));
            }
            handle.is_deleted = true;
            handle.work_in_progress_timestamp = now;
        }
        self.resources.registry.update_no_locks(
            ctx,
            true,
            &[RegistryPayload::new(
                &self.store.registry_table,
                handles.clone(),
            )],
        )?;
        Ok((true, handles))
    }

    /// Register added (non-root) nodes with fresh handles. Fresh ids cannot
    /// conflict, so there is no retry outcome; errors propagate (and a
    /// structured sector failure triggers the takeover handler upstream).
    pub fn commit_added_nodes(&mut self, ctx: &Context, nodes: &[Node]) -> Result<Vec<Handle>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let handles: Vec<Handle> = nodes.iter().map(|n| Handle::new(n.id)).collect();
        let entries: Vec<(Uuid, Node)> = nodes
            .iter()
            .zip(&handles)
            .map(|(n, h)| {
                let mut copy = n.clone();
                copy.version = n.version + 1;
                (h.get_active_id(), copy)
            })
            .collect();
        self.write_node_blobs(ctx, entries)?;
        if let Err(e) = self.resources.registry.add(
            ctx,
            &[RegistryPayload::new(
                &self.store.registry_table,
                handles.clone(),
            )],
        ) {
            self.delete_blobs_best_effort(ctx, handles.iter().map(|h| h.get_active_id()));
            return Err(e);
        }
        Ok(handles)
    }

    fn delete_blobs_best_effort(&self, ctx: &Context, ids: impl Iterator<Item = Uuid>) {
        let ids: Vec<Uuid> = ids.collect();
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self
            .resources
            .blob_store
            .remove(ctx, &[BlobsPayload::new(&self.store.blob_table, ids)])
        {
            warn!(target: "keel::repo", error = %e, "orphan blob cleanup failed");
        }
    }

    // === rollback (instance wrappers over the recovery helpers) ===

    /// Undo [`NodeRepository::commit_added_nodes`].
    pub fn rollback_added_nodes(&self, ctx: &Context, handles: &[Handle]) -> Result<()> {
        let ids: Vec<Uuid> = handles.iter().map(|h| h.logical_id).collect();
        rollback_added(
            ctx,
            &self.resources,
            &self.store.registry_table,
            &self.store.blob_table,
            &ids,
        )
    }

    /// Undo [`NodeRepository::commit_new_root_nodes`]. `registered` says
    /// whether the registry registration had happened (the commit-state
    /// gauge moved past the root-commit step).
    pub fn rollback_new_root_nodes(
        &self,
        ctx: &Context,
        registered: bool,
        handles: &[Handle],
    ) -> Result<()> {
        let ids: Vec<Uuid> = handles.iter().map(|h| h.logical_id).collect();
        rollback_roots(
            ctx,
            &self.resources,
            registered,
            &self.store.registry_table,
            &self.store.blob_table,
            &ids,
        )
    }

    /// Undo [`NodeRepository::commit_updated_nodes`].
    pub fn rollback_updated_nodes(
        &self,
        ctx: &Context,
        nodes_are_locked: bool,
        handles: &[Handle],
    ) -> Result<()> {
        let ids: Vec<Uuid> = handles.iter().map(|h| h.logical_id).collect();
        rollback_updated(
            ctx,
            &self.resources,
            nodes_are_locked,
            &self.store.registry_table,
            &self.store.blob_table,
            &ids,
        )
    }

    /// Undo [`NodeRepository::commit_removed_nodes`].
    pub fn rollback_removed_nodes(
        &self,
        ctx: &Context,
        nodes_are_locked: bool,
        handles: &[Handle],
    ) -> Result<()> {
        let ids: Vec<Uuid> = handles.iter().map(|h| h.logical_id).collect();
        rollback_removed(
            ctx,
            &self.resources,
            nodes_are_locked,
            &self.store.registry_table,
            &ids,
        )
    }

    /// Number of locally cached nodes.
    pub fn len(&self) -> usize {
        self.local_cache.len()
    }

    /// Whether the local cache is empty.
    pub fn is_empty(&self) -> bool {
        self.local_cache.is_empty()
    }
}

// === finalize helpers ===

/// Flip every handle's inactive slot to active, bump the version, and stamp
/// the 1 ms safety marker so a later writer can reclaim the now-inactive
/// slot without waiting for expiry.
pub fn activate_inactive_nodes(handles: &mut [Handle]) {
    for handle in handles {
        handle.flip_active_id();
        handle.version += 1;
        handle.work_in_progress_timestamp = 1;
    }
}

/// Bump versions and clear the in-flight marker on freshly added handles.
pub fn touch_nodes(handles: &mut [Handle]) {
    for handle in handles {
        handle.version += 1;
        handle.work_in_progress_timestamp = 0;
    }
}

/// Physical ids sitting in the inactive slots; obsolete after activation.
pub fn extract_inactive_blob_ids(handles: &[Handle]) -> Vec<Uuid> {
    handles
        .iter()
        .map(|h| h.get_inactive_id())
        .filter(|id| !id.is_nil())
        .collect()
}

// === recovery-grade rollback helpers ===
//
// These work from table names and logical ids alone so the expired-log
// sweeper can call them with nothing but decoded log payloads. Each one is
// idempotent: a second pass finds nothing left to undo.

/// Remove added nodes' blobs, registrations, and cache entries.
pub fn rollback_added(
    ctx: &Context,
    resources: &Resources,
    registry_table: &str,
    blob_table: &str,
    ids: &[Uuid],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    // Added handles use the logical id as their first active physical id.
    resources
        .blob_store
        .remove(ctx, &[BlobsPayload::new(blob_table, ids.to_vec())])?;
    resources
        .registry
        .remove(ctx, &[RegistryPayload::new(registry_table, ids.to_vec())])?;
    delete_node_cache_entries(ctx, resources, ids, ids);
    Ok(())
}

/// Remove new-root blobs and cache entries; unregister only when the
/// registration step had actually run.
pub fn rollback_roots(
    ctx: &Context,
    resources: &Resources,
    registered: bool,
    registry_table: &str,
    blob_table: &str,
    ids: &[Uuid],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    resources
        .blob_store
        .remove(ctx, &[BlobsPayload::new(blob_table, ids.to_vec())])?;
    delete_node_cache_entries(ctx, resources, ids, ids);
    if registered {
        resources
            .registry
            .remove(ctx, &[RegistryPayload::new(registry_table, ids.to_vec())])?;
    }
    Ok(())
}

/// Clear allocated inactive slots and the in-flight marker, deleting the
/// orphaned inactive blobs. A handle with no inactive slot only loses its
/// marker.
pub fn rollback_updated(
    ctx: &Context,
    resources: &Resources,
    nodes_are_locked: bool,
    registry_table: &str,
    blob_table: &str,
    ids: &[Uuid],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let found = resources.registry.get(
        ctx,
        &[RegistryPayload::new(registry_table, ids.to_vec())],
    )?;
    let fetched: Vec<Handle> = found
        .into_iter()
        .flat_map(|p| p.ids.into_iter())
        .collect();
    let logical_ids: Vec<Uuid> = fetched.iter().map(|h| h.logical_id).collect();
    let obsolete_blobs = extract_inactive_blob_ids(&fetched);
    let mut to_persist = Vec::new();
    for mut handle in fetched {
        if !handle.get_inactive_id().is_nil() {
            handle.clear_inactive_id();
            to_persist.push(handle);
        } else if handle.work_in_progress_timestamp != 0 {
            handle.work_in_progress_timestamp = 0;
            to_persist.push(handle);
        }
    }
    if to_persist.is_empty() {
        return Ok(());
    }
    let payload = [RegistryPayload::new(registry_table, to_persist)];
    if nodes_are_locked {
        resources.registry.update_no_locks(ctx, false, &payload)?;
    } else {
        resources.registry.update(ctx, &payload)?;
    }
    if !obsolete_blobs.is_empty() {
        resources
            .blob_store
            .remove(ctx, &[BlobsPayload::new(blob_table, obsolete_blobs.clone())])?;
    }
    delete_node_cache_entries(ctx, resources, &logical_ids, &obsolete_blobs);
    Ok(())
}

/// Clear tombstones and in-flight markers set by a remove-commit; a no-op
/// on handles already clean.
pub fn rollback_removed(
    ctx: &Context,
    resources: &Resources,
    nodes_are_locked: bool,
    registry_table: &str,
    ids: &[Uuid],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let found = resources.registry.get(
        ctx,
        &[RegistryPayload::new(registry_table, ids.to_vec())],
    )?;
    let mut to_persist = Vec::new();
    for payload in found {
        for mut handle in payload.ids {
            if handle.is_deleted || handle.work_in_progress_timestamp != 0 {
                handle.is_deleted = false;
                handle.work_in_progress_timestamp = 0;
                to_persist.push(handle);
            }
        }
    }
    if to_persist.is_empty() {
        return Ok(());
    }
    let payload = [RegistryPayload::new(registry_table, to_persist)];
    if nodes_are_locked {
        resources.registry.update_no_locks(ctx, false, &payload)?;
    } else {
        resources.registry.update(ctx, &payload)?;
    }
    Ok(())
}

// The L1 handle cache is keyed by logical id while node copies (L1 and L2)
// are keyed by physical id, so the two purge lists are separate.
fn delete_node_cache_entries(
    ctx: &Context,
    resources: &Resources,
    logical_ids: &[Uuid],
    physical_ids: &[Uuid],
) {
    resources.l1_cache.delete_handles(logical_ids);
    resources.l1_cache.delete_nodes(physical_ids);
    let keys: Vec<String> = physical_ids.iter().map(|id| format_node_key(*id)).collect();
    if let Err(e) = resources.l2_cache.delete(ctx, &keys) {
        warn!(target: "keel::repo", error = %e, "node cache delete failed");
    }
}
