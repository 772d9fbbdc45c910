//! Transaction logger: step-stamped logging and rollback drivers
//!
//! Each commit step is logged (step tag + intent payload) before it runs,
//! and the in-memory gauge advances with it. Live rollback works from the
//! transaction's own state; crash recovery replays the persisted records in
//! reverse through [`rollback_committed_logs`], or rolls forward when the
//! log shows the transaction had already reached finalize.

use crate::node_repository::{rollback_added, rollback_removed, rollback_roots, rollback_updated};
use crate::payload::{from_bytes, BlobTableIds, NodesPayload, ObsoletePayload, StoreInfoPayload};
use crate::resources::Resources;
use keel_core::{
    format_item_key, format_node_key, CommitFunction, CommitLogRecord, Context, Result,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Step-stamped logger owned by one transaction.
pub struct TransactionLogger {
    tid: Uuid,
    resources: Arc<Resources>,
    committed_state: Arc<AtomicU8>,
    /// Reader transactions skip log writes but still advance the gauge.
    logging: bool,
}

impl TransactionLogger {
    /// Create a logger for transaction `tid`.
    pub fn new(tid: Uuid, resources: Arc<Resources>, logging: bool) -> Self {
        TransactionLogger {
            tid,
            resources,
            committed_state: Arc::new(AtomicU8::new(CommitFunction::Unknown.wire_value())),
            logging,
        }
    }

    /// The owning transaction's id.
    pub fn tid(&self) -> Uuid {
        self.tid
    }

    /// Shared commit-state gauge, handed to node repositories.
    pub fn gauge(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.committed_state)
    }

    /// Last step started.
    pub fn committed_state(&self) -> CommitFunction {
        CommitFunction::from_wire(self.committed_state.load(Ordering::Acquire))
    }

    /// Advance the gauge to `function` and persist the step record.
    pub fn log(&self, ctx: &Context, function: CommitFunction, payload: Vec<u8>) -> Result<()> {
        self.committed_state
            .store(function.wire_value(), Ordering::Release);
        if self.logging {
            self.resources
                .transaction_log
                .add(ctx, self.tid, function, payload)?;
        }
        Ok(())
    }

    /// Drop every log record of this transaction.
    pub fn remove_logs(&self, ctx: &Context) -> Result<()> {
        if !self.logging {
            return Ok(());
        }
        self.resources.transaction_log.remove(ctx, self.tid)
    }

    /// Restore a dead peer's pre-image handles and consume its priority-log
    /// entry. Used by the sector-timeout takeover path.
    pub fn priority_rollback(&self, ctx: &Context, tid: Uuid) -> Result<()> {
        let handles = self.resources.priority_log().get(ctx, tid)?;
        if !handles.is_empty() {
            self.resources.registry.update_no_locks(ctx, true, &handles)?;
        }
        self.resources.priority_log().remove(ctx, tid)
    }
}

/// Highest phase step present in a record set. The actively-persisted-item
/// marker is a staging record, not a phase step, and is excluded.
pub fn committed_gauge(records: &[CommitLogRecord]) -> CommitFunction {
    records
        .iter()
        .map(|r| r.function)
        .filter(|f| *f != CommitFunction::AddActivelyPersistedItem)
        .max()
        .unwrap_or(CommitFunction::Unknown)
}

/// Delete obsolete entries scheduled by a finalized commit: superseded
/// blobs, tombstoned registry rows, and their cache entries. Durable
/// failures are collected (last one returned); cache failures are warnings.
pub fn delete_obsolete_entries(
    ctx: &Context,
    resources: &Resources,
    payload: &ObsoletePayload,
) -> Result<()> {
    let mut last_err = None;
    for blobs in &payload.unused_blobs {
        if blobs.ids.is_empty() {
            continue;
        }
        if let Err(e) = resources.blob_store.remove(
            ctx,
            &[keel_core::BlobsPayload::new(
                &blobs.blob_table,
                blobs.ids.clone(),
            )],
        ) {
            warn!(target: "keel::txn", error = %e, "obsolete blob delete failed");
            last_err = Some(e);
        }
        resources.l1_cache.delete_nodes(&blobs.ids);
        let keys: Vec<String> = blobs.ids.iter().map(|id| format_node_key(*id)).collect();
        if let Err(e) = resources.l2_cache.delete(ctx, &keys) {
            warn!(target: "keel::txn", error = %e, "obsolete node cache delete failed");
        }
    }
    for deleted in &payload.deleted {
        if deleted.ids.is_empty() {
            continue;
        }
        if let Err(e) = resources.registry.remove(
            ctx,
            &[keel_core::RegistryPayload::new(
                &deleted.registry_table,
                deleted.ids.clone(),
            )],
        ) {
            warn!(target: "keel::txn", error = %e, "tombstone registry delete failed");
            last_err = Some(e);
        }
        resources.l1_cache.delete_handles(&deleted.ids);
        // The blob under a tombstoned handle's active id dies with it.
        if let Err(e) = resources.blob_store.remove(
            ctx,
            &[keel_core::BlobsPayload::new(
                &deleted.blob_table,
                deleted.ids.clone(),
            )],
        ) {
            warn!(target: "keel::txn", error = %e, "tombstone blob delete failed");
            last_err = Some(e);
        }
        let keys: Vec<String> = deleted.ids.iter().map(|id| format_node_key(*id)).collect();
        if let Err(e) = resources.l2_cache.delete(ctx, &keys) {
            warn!(target: "keel::txn", error = %e, "tombstone cache delete failed");
        }
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Delete out-of-node item values (blobs plus their L2 entries).
pub fn delete_tracked_values(
    ctx: &Context,
    resources: &Resources,
    values: &[BlobTableIds],
) -> Result<()> {
    let mut last_err = None;
    for list in values {
        if list.ids.is_empty() {
            continue;
        }
        if let Err(e) = resources.blob_store.remove(
            ctx,
            &[keel_core::BlobsPayload::new(
                &list.blob_table,
                list.ids.clone(),
            )],
        ) {
            warn!(target: "keel::txn", error = %e, "tracked value delete failed");
            last_err = Some(e);
        }
        let keys: Vec<String> = list.ids.iter().map(|id| format_item_key(*id)).collect();
        if let Err(e) = resources.l2_cache.delete(ctx, &keys) {
            warn!(target: "keel::txn", error = %e, "tracked value cache delete failed");
        }
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Crash-recovery driver: undo (or finish) a dead transaction from its
/// persisted records, then drop the log.
///
/// A log that reached `finalizeCommit` is rolled forward: the registry flip
/// may already be durable, so the obsolete-entry cleanup is completed
/// instead of undone. Everything earlier is replayed in reverse through the
/// same rollback routines the live path uses; all of them are idempotent.
pub fn rollback_committed_logs(
    ctx: &Context,
    resources: &Resources,
    tid: Uuid,
    records: &[CommitLogRecord],
) -> Result<()> {
    let gauge = committed_gauge(records);

    if gauge >= CommitFunction::FinalizeCommit {
        if let Some(record) = records
            .iter()
            .rev()
            .find(|r| r.function == CommitFunction::FinalizeCommit)
        {
            let obsolete: ObsoletePayload = from_bytes(&record.payload)?;
            delete_obsolete_entries(ctx, resources, &obsolete)?;
            delete_tracked_values(ctx, resources, &obsolete.tracked_values)?;
        }
        resources.priority_log().remove(ctx, tid)?;
        resources.transaction_log.remove(ctx, tid)?;
        return Ok(());
    }

    for record in records.iter().rev() {
        match record.function {
            CommitFunction::CommitAddedNodes => {
                let payloads: Vec<NodesPayload> = from_bytes(&record.payload)?;
                for p in &payloads {
                    rollback_added(ctx, resources, &p.registry_table, &p.blob_table, &p.ids)?;
                }
            }
            CommitFunction::CommitRemovedNodes => {
                let payloads: Vec<NodesPayload> = from_bytes(&record.payload)?;
                for p in &payloads {
                    rollback_removed(ctx, resources, false, &p.registry_table, &p.ids)?;
                }
            }
            CommitFunction::CommitUpdatedNodes => {
                let payloads: Vec<NodesPayload> = from_bytes(&record.payload)?;
                for p in &payloads {
                    rollback_updated(
                        ctx,
                        resources,
                        false,
                        &p.registry_table,
                        &p.blob_table,
                        &p.ids,
                    )?;
                }
            }
            CommitFunction::CommitNewRootNodes => {
                let payloads: Vec<NodesPayload> = from_bytes(&record.payload)?;
                let registered = gauge > CommitFunction::CommitNewRootNodes;
                for p in &payloads {
                    rollback_roots(
                        ctx,
                        resources,
                        registered,
                        &p.registry_table,
                        &p.blob_table,
                        &p.ids,
                    )?;
                }
            }
            CommitFunction::CommitTrackedItemsValues => {
                let values: Vec<BlobTableIds> = from_bytes(&record.payload)?;
                delete_tracked_values(ctx, resources, &values)?;
            }
            CommitFunction::AddActivelyPersistedItem => {
                let value: BlobTableIds = from_bytes(&record.payload)?;
                delete_tracked_values(ctx, resources, std::slice::from_ref(&value))?;
            }
            CommitFunction::CommitStoreInfo => {
                let payload: StoreInfoPayload = from_bytes(&record.payload)?;
                if !payload.stores.is_empty() {
                    resources.store_repository.update(ctx, &payload.stores)?;
                }
            }
            CommitFunction::BeforeFinalize => {
                resources.priority_log().remove(ctx, tid)?;
            }
            _ => {}
        }
    }
    resources.transaction_log.remove(ctx, tid)
}
