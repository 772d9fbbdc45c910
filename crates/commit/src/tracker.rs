//! Item action tracker: per-B-tree record of reads and mutations
//!
//! Buffers item-level work until phase 1 and owns the row-level locking
//! protocol: a row lock is an L2 entry holding a [`LockRecord`]; writing it
//! is optimistic, and ownership only counts once the follow-up read returns
//! our claim. Two readers may share a row; every other combination is a
//! conflict.

use crate::action::{Item, ItemAction, LockRecord, TrackedItem};
use crate::payload::{to_bytes, BlobTableIds};
use crate::resources::Resources;
use keel_core::{
    format_item_key, format_lock_key, BlobEntry, BlobsPayload, CommitFunction, Context, Error,
    L2CacheExt, Result, StoreInfo,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Tracks this transaction's item-level actions for one B-tree store.
pub struct ItemActionTracker {
    store: StoreInfo,
    tid: Uuid,
    resources: Arc<Resources>,
    /// Tracked records keyed by the item id at first tracking.
    items: FxHashMap<Uuid, TrackedItem>,
    /// Current item id -> tracking key, for items whose id was regenerated.
    aliases: FxHashMap<Uuid, Uuid>,
    /// Value blob ids written by this transaction; deleted on rollback.
    written_values: Vec<Uuid>,
    /// Superseded or removed value blob ids; deleted in phase 2.
    obsolete_values: Vec<Uuid>,
}

impl ItemActionTracker {
    /// Create a tracker for `store` owned by transaction `tid`.
    pub fn new(store: StoreInfo, tid: Uuid, resources: Arc<Resources>) -> Self {
        ItemActionTracker {
            store,
            tid,
            resources,
            items: FxHashMap::default(),
            aliases: FxHashMap::default(),
            written_values: Vec::new(),
            obsolete_values: Vec::new(),
        }
    }

    fn key_for(&self, item_id: Uuid) -> Uuid {
        self.aliases.get(&item_id).copied().unwrap_or(item_id)
    }

    fn track(&mut self, action: ItemAction, item: Item) -> Result<()> {
        let key = self.key_for(item.id);
        let drop_record = match self.items.get_mut(&key) {
            Some(tracked) => tracked.apply(action, item)?,
            None => {
                self.items.insert(key, TrackedItem::new(action, item));
                return Ok(());
            }
        };
        if drop_record {
            // add then remove: erase all trace of the item
            let removed = self.items.remove(&key);
            self.aliases.retain(|_, v| *v != key);
            if let Some(removed) = removed {
                if removed.persisted {
                    self.obsolete_values.push(removed.item.id);
                }
            }
        }
        Ok(())
    }

    fn separate_values(&self) -> bool {
        !self.store.is_value_data_in_node_segment
    }

    fn cache_ttl(&self) -> Option<Duration> {
        Some(self.store.cache_duration)
    }

    /// Write an item's value blob now and log the write so a crash can
    /// remove the orphan.
    fn persist_value(&mut self, ctx: &Context, item: &Item) -> Result<()> {
        let value = item.value.clone().ok_or_else(|| {
            Error::InvalidState(format!("item {} value not materialised", item.id))
        })?;
        self.resources.blob_store.add(
            ctx,
            &[BlobsPayload::new(
                &self.store.blob_table,
                vec![BlobEntry {
                    id: item.id,
                    payload: value.clone(),
                }],
            )],
        )?;
        self.written_values.push(item.id);
        let payload = to_bytes(&BlobTableIds::new(&self.store.blob_table, vec![item.id]))?;
        self.resources.transaction_log.add(
            ctx,
            self.tid,
            CommitFunction::AddActivelyPersistedItem,
            payload,
        )?;
        if self.store.is_value_data_globally_cached {
            if let Err(e) =
                self.resources
                    .l2_cache
                    .set_bytes(ctx, &format_item_key(item.id), &value, self.cache_ttl())
            {
                warn!(target: "keel::tracker", error = %e, "value cache write failed");
            }
        }
        let key = self.key_for(item.id);
        if let Some(tracked) = self.items.get_mut(&key) {
            tracked.persisted = true;
        }
        Ok(())
    }

    /// Track a read, materialising the value through L2 then the blob store
    /// when it lives outside the node segment. Cache failures are misses.
    pub fn get(&mut self, ctx: &Context, item: &mut Item) -> Result<()> {
        if self.separate_values() && item.value_needs_fetch {
            let cache_key = format_item_key(item.id);
            let mut value: Option<Vec<u8>> = None;
            if self.store.is_value_data_globally_cached {
                let read = if self.store.is_cache_ttl {
                    self.resources
                        .l2_cache
                        .get_bytes_ex(ctx, &cache_key, self.cache_ttl())
                } else {
                    self.resources.l2_cache.get_bytes(ctx, &cache_key)
                };
                match read {
                    Ok(found) => value = found,
                    Err(e) => {
                        warn!(target: "keel::tracker", error = %e, "value cache read failed");
                    }
                }
            }
            if value.is_none() {
                value = self
                    .resources
                    .blob_store
                    .get_one(ctx, &self.store.blob_table, item.id)?;
            }
            if let Some(v) = value {
                item.value = Some(v);
                item.value_needs_fetch = false;
            }
        }
        self.track(ItemAction::Get, item.clone())
    }

    /// Track an add. With active persistence the value blob is written
    /// immediately; otherwise it is buffered until
    /// [`ItemActionTracker::commit_values`].
    pub fn add(&mut self, ctx: &Context, item: &mut Item) -> Result<()> {
        self.track(ItemAction::Add, item.clone())?;
        if self.separate_values() && self.store.is_value_data_actively_persisted {
            self.persist_value(ctx, item)?;
        }
        Ok(())
    }

    /// Track an update. An out-of-segment value gets a fresh blob id; the
    /// superseded id joins the phase-2 deletion list.
    pub fn update(&mut self, ctx: &Context, item: &mut Item) -> Result<()> {
        let key = self.key_for(item.id);
        let was_add = self.items.get(&key).map(|t| t.action) == Some(ItemAction::Add);
        self.track(ItemAction::Update, item.clone())?;
        if self.separate_values() && !was_add {
            // A fresh add keeps its id; anything else supersedes a stored
            // value blob.
            self.obsolete_values.push(item.id);
            item.id = Uuid::new_v4();
            self.aliases.insert(item.id, key);
            if let Some(tracked) = self.items.get_mut(&key) {
                tracked.item.id = item.id;
            }
        }
        if self.separate_values() {
            if self.store.is_value_data_actively_persisted {
                self.persist_value(ctx, item)?;
            } else if let Some(tracked) = self.items.get_mut(&key) {
                tracked.persisted = false;
            }
        }
        Ok(())
    }

    /// Track a remove. Removing an item added in this transaction erases it;
    /// otherwise the stored value id joins the phase-2 deletion list.
    pub fn remove(&mut self, _ctx: &Context, item: &mut Item) -> Result<()> {
        let key = self.key_for(item.id);
        let tracked_action = self.items.get(&key).map(|t| t.action);
        if self.separate_values() && tracked_action != Some(ItemAction::Add) {
            self.obsolete_values.push(item.id);
        }
        self.track(ItemAction::Remove, item.clone())
    }

    /// Whether any item is tracked.
    pub fn has_tracked_items(&self) -> bool {
        !self.items.is_empty()
    }

    /// Read every non-add item's row-lock record and detect races.
    ///
    /// Missing record: not contended. Our record: we already own the row.
    /// Someone else's record: only get/get is compatible.
    pub fn check_tracked_items(&mut self, ctx: &Context) -> Result<()> {
        for tracked in self.items.values_mut() {
            if tracked.action == ItemAction::Add {
                continue;
            }
            let key = format_lock_key(&tracked.key_id.to_string());
            match self
                .resources
                .l2_cache
                .get_struct::<LockRecord>(ctx, &key)?
            {
                None => tracked.is_lock_owner = false,
                Some(rec) if rec.lock_id == tracked.lock_id => tracked.is_lock_owner = true,
                Some(rec) => {
                    if !rec.is_compatible(tracked.action) {
                        return Err(Error::Conflict(format!(
                            "item {} is claimed by another transaction",
                            tracked.key_id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Acquire row locks for every non-add item by optimistic set-if-absent
    /// plus confirming re-read. Returns false on contention (other than
    /// get/get, which is tolerated without ownership).
    pub fn lock(&mut self, ctx: &Context, ttl: Duration) -> Result<bool> {
        for tracked in self.items.values_mut() {
            if tracked.action == ItemAction::Add || tracked.is_lock_owner {
                continue;
            }
            let key = format_lock_key(&tracked.key_id.to_string());
            let ours = LockRecord {
                lock_id: tracked.lock_id,
                action: tracked.action,
            };
            match self
                .resources
                .l2_cache
                .get_struct::<LockRecord>(ctx, &key)?
            {
                Some(rec) if rec.lock_id == tracked.lock_id => {
                    tracked.is_lock_owner = true;
                    continue;
                }
                Some(rec) if rec.is_compatible(tracked.action) => continue,
                Some(_) => return Ok(false),
                None => {}
            }
            self.resources
                .l2_cache
                .set_struct(ctx, &key, &ours, Some(ttl))?;
            match self
                .resources
                .l2_cache
                .get_struct::<LockRecord>(ctx, &key)?
            {
                Some(rec) if rec.lock_id == tracked.lock_id => tracked.is_lock_owner = true,
                Some(rec) if rec.is_compatible(tracked.action) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Verify that every row we claimed is still ours.
    pub fn is_locked(&self, ctx: &Context) -> Result<bool> {
        for tracked in self.items.values() {
            if !tracked.is_lock_owner {
                continue;
            }
            let key = format_lock_key(&tracked.key_id.to_string());
            match self
                .resources
                .l2_cache
                .get_struct::<LockRecord>(ctx, &key)?
            {
                Some(rec) if rec.lock_id == tracked.lock_id => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Delete every row lock we own, collecting but never masking errors.
    pub fn unlock(&mut self, ctx: &Context) -> Result<()> {
        let mut last_err = None;
        for tracked in self.items.values_mut() {
            if !tracked.is_lock_owner {
                continue;
            }
            let key = format_lock_key(&tracked.key_id.to_string());
            if let Err(e) = self.resources.l2_cache.delete(ctx, &[key]) {
                warn!(target: "keel::tracker", error = %e, "row unlock failed");
                last_err = Some(e);
            }
            tracked.is_lock_owner = false;
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush buffered out-of-segment values to the blob store (and L2 when
    /// globally cached).
    pub fn commit_values(&mut self, ctx: &Context) -> Result<()> {
        if !self.separate_values() {
            return Ok(());
        }
        let pending: Vec<Uuid> = self
            .items
            .values()
            .filter(|t| {
                matches!(t.action, ItemAction::Add | ItemAction::Update) && !t.persisted
            })
            .map(|t| t.key_id)
            .collect();
        for key in pending {
            let (id, value) = {
                let tracked = match self.items.get(&key) {
                    Some(t) => t,
                    None => continue,
                };
                let value = tracked.item.value.clone().ok_or_else(|| {
                    Error::InvalidState(format!(
                        "item {} value not materialised",
                        tracked.item.id
                    ))
                })?;
                (tracked.item.id, value)
            };
            self.resources.blob_store.add(
                ctx,
                &[BlobsPayload::new(
                    &self.store.blob_table,
                    vec![BlobEntry {
                        id,
                        payload: value.clone(),
                    }],
                )],
            )?;
            self.written_values.push(id);
            if self.store.is_value_data_globally_cached {
                if let Err(e) = self.resources.l2_cache.set_bytes(
                    ctx,
                    &format_item_key(id),
                    &value,
                    self.cache_ttl(),
                ) {
                    warn!(target: "keel::tracker", error = %e, "value cache write failed");
                }
            }
            if let Some(tracked) = self.items.get_mut(&key) {
                tracked.persisted = true;
            }
        }
        Ok(())
    }

    /// Value blob ids this transaction wrote or is about to write; deleted
    /// when it rolls back. Includes buffered ids so the intent logged ahead
    /// of the value-commit step covers the writes that follow it.
    pub fn get_for_rollback_values(&self) -> BlobTableIds {
        let mut ids = self.written_values.clone();
        if self.separate_values() {
            for tracked in self.items.values() {
                if matches!(tracked.action, ItemAction::Add | ItemAction::Update)
                    && !tracked.persisted
                {
                    ids.push(tracked.item.id);
                }
            }
        }
        ids.dedup();
        BlobTableIds::new(&self.store.blob_table, ids)
    }

    /// Superseded or removed value blob ids; deleted by phase 2.
    pub fn get_obsolete_values(&self) -> BlobTableIds {
        BlobTableIds::new(&self.store.blob_table, self.obsolete_values.clone())
    }

    /// Net item-count change of this transaction.
    pub fn count_delta(&self) -> i64 {
        self.items
            .values()
            .map(|t| match t.action {
                ItemAction::Add => 1,
                ItemAction::Remove => -1,
                _ => 0,
            })
            .sum()
    }

    /// Tracked record for an item id, if any (test and frontend support).
    pub fn tracked(&self, item_id: Uuid) -> Option<&TrackedItem> {
        self.items.get(&self.key_for(item_id))
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
