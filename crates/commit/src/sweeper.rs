//! Background sweepers: expired-log recovery and priority rollbacks
//!
//! Two long-running workers keep the cluster healthy:
//!
//! - The expired-log sweeper (one per host) picks the oldest abandoned
//!   transaction log, undoes or finishes it, then drains the rest of its
//!   hour bucket.
//! - The priority-rollback sweeper (globally serialised by the `Prbs` lock)
//!   restores registry pre-images left behind by dead writers.
//!
//! Both run on cooperative cancellation with bounded stop latency.

use crate::logger::rollback_committed_logs;
use crate::resources::Resources;
use keel_core::{
    create_lock_keys_with_id, Context, Error, Handle, LockKey, RegistryPayload, Result,
    SectorUserData,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Coordinator lock name serialising priority-rollback sweeps clusterwide.
pub const PRIORITY_ROLLBACK_LOCK: &str = "Prbs";

/// How long one sweep may hold the coordinator lock.
const SWEEP_LOCK_TTL: Duration = Duration::from_secs(5 * 60);
/// TTL of the per-logical-id locks taken while restoring a pre-image.
const RESTORE_LOCK_TTL: Duration = Duration::from_secs(5 * 60);
/// Granularity at which sleeping workers observe shutdown.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Self-healing driver over the shared backends.
pub struct Sweeper {
    resources: Arc<Resources>,
}

impl Sweeper {
    /// Create a sweeper over `resources`.
    pub fn new(resources: Arc<Resources>) -> Self {
        Sweeper { resources }
    }

    /// Undo (or finish) the oldest expired transaction log, then drain the
    /// rest of its hour bucket. Returns true when any log was processed.
    pub fn process_expired_logs(&self, ctx: &Context) -> Result<bool> {
        let expired = match self.resources.transaction_log.get_one(ctx)? {
            Some(e) => e,
            None => return Ok(false),
        };
        info!(target: "keel::sweep", tid = %expired.tid, hour = %expired.hour, "recovering expired transaction");
        rollback_committed_logs(ctx, &self.resources, expired.tid, &expired.records)?;

        while let Some((tid, records)) = self
            .resources
            .transaction_log
            .get_one_of_hour(ctx, &expired.hour)?
        {
            ctx.check()?;
            info!(target: "keel::sweep", tid = %tid, "recovering expired transaction");
            rollback_committed_logs(ctx, &self.resources, tid, &records)?;
        }
        Ok(true)
    }

    /// Pull one batch of abandoned pre-images and restore them, serialised
    /// clusterwide by the coordinator lock. Returns true when any entry was
    /// attempted.
    pub fn do_priority_rollbacks(&self, ctx: &Context, batch_size: usize) -> Result<bool> {
        let mut coordinator =
            create_lock_keys_with_id(&[PRIORITY_ROLLBACK_LOCK.to_string()], Uuid::new_v4());
        let (ok, _) = self
            .resources
            .l2_cache
            .dual_lock(ctx, SWEEP_LOCK_TTL, &mut coordinator)?;
        if !ok {
            debug!(target: "keel::sweep", "another sweeper holds the coordinator lock");
            return Ok(false);
        }
        let result = self.priority_batch(ctx, batch_size);
        if let Err(e) = self.resources.l2_cache.unlock(ctx, &mut coordinator) {
            warn!(target: "keel::sweep", error = %e, "coordinator unlock failed");
        }
        result
    }

    fn priority_batch(&self, ctx: &Context, batch_size: usize) -> Result<bool> {
        let batch = self.resources.priority_log().get_batch(ctx, batch_size)?;
        if batch.is_empty() {
            return Ok(false);
        }
        for (tid, handles) in &batch {
            if ctx.is_done() {
                break;
            }
            match self.restore_one(ctx, *tid, handles) {
                Ok(()) => {
                    info!(target: "keel::sweep", tid = %tid, "restored pre-image of dead transaction");
                }
                Err(e) => {
                    // Left in the log for the next sweep.
                    warn!(target: "keel::sweep", tid = %tid, error = %e, "priority rollback failed");
                }
            }
        }
        Ok(true)
    }

    fn restore_one(
        &self,
        ctx: &Context,
        tid: Uuid,
        handles: &[RegistryPayload<Handle>],
    ) -> Result<()> {
        self.resources
            .priority_log()
            .write_backup(ctx, tid, handles)?;
        let mut keys = acquire_locks(ctx, &self.resources, tid, handles)?;
        let result = self.restore_locked(ctx, tid, handles);
        if let Err(e) = self.resources.l2_cache.unlock(ctx, &mut keys) {
            warn!(target: "keel::sweep", error = %e, "restore lock release failed");
        }
        result
    }

    fn restore_locked(
        &self,
        ctx: &Context,
        tid: Uuid,
        handles: &[RegistryPayload<Handle>],
    ) -> Result<()> {
        // A current version more than one ahead of the pre-image means
        // other writers built on top of the dead transaction's state; the
        // pre-image can no longer be applied safely.
        for payload in handles {
            let ids: Vec<Uuid> = payload.ids.iter().map(|h| h.logical_id).collect();
            let current = self.resources.registry.get(
                ctx,
                &[RegistryPayload::new(&payload.registry_table, ids)],
            )?;
            for current_handle in current.iter().flat_map(|p| p.ids.iter()) {
                if let Some(preimage) = payload
                    .ids
                    .iter()
                    .find(|h| h.logical_id == current_handle.logical_id)
                {
                    if current_handle.version > preimage.version + 1 {
                        return Err(Error::SectorFailure {
                            detail: format!(
                                "transaction {} is beyond recovery: node {} moved from v{} to v{}",
                                tid,
                                current_handle.logical_id,
                                preimage.version,
                                current_handle.version
                            ),
                            user_data: SectorUserData::Tid(tid),
                        });
                    }
                }
            }
        }
        self.resources.registry.update_no_locks(ctx, true, handles)?;
        self.resources.priority_log().remove(ctx, tid)?;
        self.resources.priority_log().remove_backup(ctx, tid)?;
        Ok(())
    }
}

/// Take over the per-logical-id locks of transaction `tid`.
///
/// Locks are written under the dead transaction's own id, so a sweeper
/// resuming its previous attempt re-enters cleanly. Any key owned by a
/// different id fails the takeover with a structured sector failure.
pub fn acquire_locks(
    ctx: &Context,
    resources: &Resources,
    tid: Uuid,
    handles: &[RegistryPayload<Handle>],
) -> Result<Vec<LockKey>> {
    let names: Vec<String> = handles
        .iter()
        .flat_map(|p| p.ids.iter())
        .map(|h| h.logical_id.to_string())
        .collect();
    let mut keys = create_lock_keys_with_id(&names, tid);
    let (ok, owner) = resources
        .l2_cache
        .lock(ctx, RESTORE_LOCK_TTL, &mut keys)?;
    if !ok && owner != tid {
        return Err(Error::SectorFailure {
            detail: format!("lock for transaction {} is held by {}", tid, owner),
            user_data: SectorUserData::Tid(owner),
        });
    }
    // Prove every key really carries the tid, regardless of who wrote it.
    // The sliding read also refreshes the lock TTL so a slow restore does
    // not lose its locks mid-flight.
    for key in keys.iter_mut() {
        match resources
            .l2_cache
            .get_ex(ctx, &key.key, Some(RESTORE_LOCK_TTL))?
        {
            Some(value) if value == tid.to_string() => {
                key.is_lock_owner = true;
            }
            Some(other) => {
                return Err(Error::SectorFailure {
                    detail: format!("lock {} stolen by {}", key.key, other),
                    user_data: SectorUserData::None,
                });
            }
            None => {
                return Err(Error::SectorFailure {
                    detail: format!("lock {} vanished during takeover", key.key),
                    user_data: SectorUserData::None,
                });
            }
        }
    }
    Ok(keys)
}

/// Handle to a spawned sweeper thread; stop it with
/// [`SweeperHandle::stop`] or by dropping it.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    ctx: Context,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal shutdown and wait for the worker to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.ctx.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn spawn_worker<F>(name: &str, interval: Duration, mut tick: F) -> SweeperHandle
where
    F: FnMut(&Context) + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let ctx = Context::new();
    let worker_shutdown = Arc::clone(&shutdown);
    let worker_ctx = ctx.clone();
    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            while !worker_shutdown.load(Ordering::Acquire) {
                tick(&worker_ctx);
                // Sleep in small slices so shutdown latency stays bounded.
                let mut slept = Duration::ZERO;
                while slept < interval && !worker_shutdown.load(Ordering::Acquire) {
                    std::thread::sleep(STOP_POLL);
                    slept += STOP_POLL;
                }
            }
        })
        .expect("failed to spawn sweeper thread");
    SweeperHandle {
        shutdown,
        ctx,
        thread: Some(thread),
    }
}

/// Spawn the per-host expired-log sweeper.
pub fn spawn_expired_log_sweeper(resources: Arc<Resources>, interval: Duration) -> SweeperHandle {
    let sweeper = Sweeper::new(resources);
    spawn_worker("keel-sweep-logs", interval, move |ctx| {
        match sweeper.process_expired_logs(ctx) {
            Ok(true) => {}
            Ok(false) => debug!(target: "keel::sweep", "no expired logs"),
            Err(e) if e.is_timeout() => {}
            Err(e) => warn!(target: "keel::sweep", error = %e, "expired log sweep failed"),
        }
    })
}

/// Spawn the cluster-serialised priority-rollback sweeper.
pub fn spawn_priority_rollback_sweeper(
    resources: Arc<Resources>,
    interval: Duration,
    batch_size: usize,
) -> SweeperHandle {
    let sweeper = Sweeper::new(resources);
    spawn_worker("keel-sweep-prio", interval, move |ctx| {
        match sweeper.do_priority_rollbacks(ctx, batch_size) {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {}
            Err(e) => warn!(target: "keel::sweep", error = %e, "priority rollback sweep failed"),
        }
    })
}
