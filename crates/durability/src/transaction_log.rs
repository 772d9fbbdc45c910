//! In-memory transaction log with hour buckets
//!
//! Commit-step records are grouped per TID; TIDs are grouped into hour
//! buckets by the wall-clock time of their first record. A transaction is
//! "expired" once its first record is older than the age threshold, at
//! which point the expired-log sweeper picks it up via `get_one` /
//! `get_one_of_hour` and undoes (or finishes) it.

use crate::priority_log::InMemoryPriorityLog;
use chrono::{TimeZone, Utc};
use keel_core::{
    CommitFunction, CommitLogRecord, Context, ExpiredTransaction, PriorityLog, Result,
    TransactionLog,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Logs younger than this are owned by a live transaction until proven
/// otherwise.
const DEFAULT_AGE_THRESHOLD: Duration = Duration::from_secs(60 * 60);

struct TidLog {
    created_ms: i64,
    records: Vec<CommitLogRecord>,
}

/// In-memory conforming [`TransactionLog`] backend with a nested
/// [`InMemoryPriorityLog`].
pub struct InMemoryTransactionLog {
    logs: Mutex<HashMap<Uuid, TidLog>>,
    priority: InMemoryPriorityLog,
    age_threshold: Duration,
}

fn hour_bucket(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y%m%d%H").to_string(),
        None => String::new(),
    }
}

impl InMemoryTransactionLog {
    /// Create an empty log with the default expiry threshold.
    pub fn new() -> Self {
        InMemoryTransactionLog {
            logs: Mutex::new(HashMap::new()),
            priority: InMemoryPriorityLog::new(),
            age_threshold: DEFAULT_AGE_THRESHOLD,
        }
    }

    /// Override the expiry threshold. Tests use zero to make fresh logs
    /// immediately sweepable.
    pub fn with_age_threshold(mut self, age_threshold: Duration) -> Self {
        self.age_threshold = age_threshold;
        self
    }

    /// Replace the nested priority log (for tuning its batch age in tests).
    pub fn with_priority_log(mut self, priority: InMemoryPriorityLog) -> Self {
        self.priority = priority;
        self
    }

    /// Records currently held for `tid`, oldest first.
    pub fn records(&self, tid: Uuid) -> Vec<CommitLogRecord> {
        self.logs
            .lock()
            .get(&tid)
            .map(|l| l.records.clone())
            .unwrap_or_default()
    }

    /// Whether no transaction has records.
    pub fn is_empty(&self) -> bool {
        self.logs.lock().is_empty()
    }

    fn cutoff_ms(&self) -> i64 {
        keel_core::now_unix_milli() - self.age_threshold.as_millis() as i64
    }
}

impl Default for InMemoryTransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn add(
        &self,
        ctx: &Context,
        tid: Uuid,
        function: CommitFunction,
        payload: Vec<u8>,
    ) -> Result<()> {
        ctx.check()?;
        let mut logs = self.logs.lock();
        let entry = logs.entry(tid).or_insert_with(|| TidLog {
            created_ms: keel_core::now_unix_milli(),
            records: Vec::new(),
        });
        entry.records.push(CommitLogRecord { function, payload });
        Ok(())
    }

    fn remove(&self, ctx: &Context, tid: Uuid) -> Result<()> {
        ctx.check()?;
        self.logs.lock().remove(&tid);
        Ok(())
    }

    fn get_one(&self, ctx: &Context) -> Result<Option<ExpiredTransaction>> {
        ctx.check()?;
        let logs = self.logs.lock();
        let cutoff = self.cutoff_ms();
        let oldest = logs
            .iter()
            .filter(|(_, l)| l.created_ms <= cutoff)
            .min_by_key(|(_, l)| l.created_ms);
        Ok(oldest.map(|(tid, l)| ExpiredTransaction {
            tid: *tid,
            hour: hour_bucket(l.created_ms),
            records: l.records.clone(),
        }))
    }

    fn get_one_of_hour(
        &self,
        ctx: &Context,
        hour: &str,
    ) -> Result<Option<(Uuid, Vec<CommitLogRecord>)>> {
        ctx.check()?;
        if hour.is_empty() {
            return Ok(None);
        }
        let logs = self.logs.lock();
        let cutoff = self.cutoff_ms();
        let next = logs
            .iter()
            .filter(|(_, l)| l.created_ms <= cutoff && hour_bucket(l.created_ms) == hour)
            .min_by_key(|(_, l)| l.created_ms);
        Ok(next.map(|(tid, l)| (*tid, l.records.clone())))
    }

    fn priority_log(&self) -> &dyn PriorityLog {
        &self.priority
    }
}
