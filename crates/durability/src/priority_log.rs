//! In-memory priority log

use keel_core::{Context, Handle, PriorityLog, RegistryPayload, Result, StoreInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Entries younger than this are skipped by `get_batch`; their owners are
/// most likely alive and mid-commit.
const DEFAULT_MIN_AGE: Duration = Duration::from_secs(2 * 60);

struct PriorityEntry {
    created: Instant,
    handles: Vec<RegistryPayload<Handle>>,
}

/// In-memory conforming [`PriorityLog`] backend.
pub struct InMemoryPriorityLog {
    entries: Mutex<HashMap<Uuid, PriorityEntry>>,
    backups: Mutex<HashMap<Uuid, Vec<RegistryPayload<Handle>>>>,
    min_age: Duration,
}

impl InMemoryPriorityLog {
    /// Create an empty priority log with the default batch age threshold.
    pub fn new() -> Self {
        InMemoryPriorityLog {
            entries: Mutex::new(HashMap::new()),
            backups: Mutex::new(HashMap::new()),
            min_age: DEFAULT_MIN_AGE,
        }
    }

    /// Lower (or raise) the age below which entries are invisible to
    /// `get_batch`. Tests use zero.
    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    /// Backup recorded for `tid`, if any.
    pub fn get_backup(&self, tid: Uuid) -> Option<Vec<RegistryPayload<Handle>>> {
        self.backups.lock().get(&tid).cloned()
    }

    /// Number of live pre-image entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no pre-image entries exist.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for InMemoryPriorityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityLog for InMemoryPriorityLog {
    fn is_enabled(&self) -> bool {
        true
    }

    fn add(&self, ctx: &Context, tid: Uuid, handles: &[RegistryPayload<Handle>]) -> Result<()> {
        ctx.check()?;
        self.entries.lock().insert(
            tid,
            PriorityEntry {
                created: Instant::now(),
                handles: handles.to_vec(),
            },
        );
        Ok(())
    }

    fn remove(&self, ctx: &Context, tid: Uuid) -> Result<()> {
        ctx.check()?;
        self.entries.lock().remove(&tid);
        Ok(())
    }

    fn get(&self, ctx: &Context, tid: Uuid) -> Result<Vec<RegistryPayload<Handle>>> {
        ctx.check()?;
        Ok(self
            .entries
            .lock()
            .get(&tid)
            .map(|e| e.handles.clone())
            .unwrap_or_default())
    }

    fn get_batch(
        &self,
        ctx: &Context,
        batch_size: usize,
    ) -> Result<Vec<(Uuid, Vec<RegistryPayload<Handle>>)>> {
        ctx.check()?;
        let entries = self.entries.lock();
        let now = Instant::now();
        let mut aged: Vec<_> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.created) >= self.min_age)
            .collect();
        aged.sort_by_key(|(_, e)| e.created);
        Ok(aged
            .into_iter()
            .take(batch_size)
            .map(|(tid, e)| (*tid, e.handles.clone()))
            .collect())
    }

    fn log_commit_changes(
        &self,
        ctx: &Context,
        _stores: &[StoreInfo],
        _new_root_nodes: &[RegistryPayload<Handle>],
        _added_nodes: &[RegistryPayload<Handle>],
        _updated_nodes: &[RegistryPayload<Handle>],
        _removed_nodes: &[RegistryPayload<Uuid>],
    ) -> Result<()> {
        // Best-effort mirror feed; nothing consumes it in-process.
        ctx.check()?;
        Ok(())
    }

    fn write_backup(
        &self,
        ctx: &Context,
        tid: Uuid,
        handles: &[RegistryPayload<Handle>],
    ) -> Result<()> {
        ctx.check()?;
        self.backups.lock().insert(tid, handles.to_vec());
        Ok(())
    }

    fn remove_backup(&self, ctx: &Context, tid: Uuid) -> Result<()> {
        ctx.check()?;
        self.backups.lock().remove(&tid);
        Ok(())
    }
}
