//! Transaction log and priority log contracts
//!
//! The transaction log is an append-only per-TID stream of commit-step
//! records. Each record is stamped with the [`CommitFunction`] that was about
//! to run when it was written, so crash recovery knows exactly how far a
//! dead transaction got and can undo (or finish) its work.
//!
//! The priority log is a nested stream holding registry pre-images of nodes
//! a transaction is about to overwrite. Peers use it for takeover rollback
//! when the owner dies mid-commit.

use crate::context::Context;
use crate::error::Result;
use crate::handle::Handle;
use crate::registry::RegistryPayload;
use crate::store::StoreInfo;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commit-step gauge persisted inside log records.
///
/// Wire values are the declaration order and are stable; never reorder or
/// remove variants, only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommitFunction {
    /// No step recorded yet.
    Unknown = 0,
    /// Acquiring row-level locks on tracked items.
    LockTrackedItems = 1,
    /// Writing out-of-node item values.
    CommitTrackedItemsValues = 2,
    /// Registering brand-new root nodes.
    CommitNewRootNodes = 3,
    /// Validating that fetched (read-only) nodes are unchanged.
    AreFetchedItemsIntact = 4,
    /// Writing updated nodes into inactive slots.
    CommitUpdatedNodes = 5,
    /// Tombstoning removed nodes.
    CommitRemovedNodes = 6,
    /// Registering added (non-root) nodes.
    CommitAddedNodes = 7,
    /// Persisting per-store metadata.
    CommitStoreInfo = 8,
    /// Phase 1 finished; the transaction is about to finalize.
    BeforeFinalize = 9,
    /// Phase 2 started: flipping active slots.
    FinalizeCommit = 10,
    /// Deleting obsolete blobs, cache entries, and tombstoned handles.
    DeleteObsoleteEntries = 11,
    /// Deleting superseded out-of-node item values.
    DeleteTrackedItemsValues = 12,
    /// An item value was actively persisted ahead of commit.
    AddActivelyPersistedItem = 13,
}

impl CommitFunction {
    /// Stable wire value of this step.
    pub fn wire_value(self) -> u8 {
        self as u8
    }

    /// Decode a wire value; unknown values map to [`CommitFunction::Unknown`].
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => CommitFunction::LockTrackedItems,
            2 => CommitFunction::CommitTrackedItemsValues,
            3 => CommitFunction::CommitNewRootNodes,
            4 => CommitFunction::AreFetchedItemsIntact,
            5 => CommitFunction::CommitUpdatedNodes,
            6 => CommitFunction::CommitRemovedNodes,
            7 => CommitFunction::CommitAddedNodes,
            8 => CommitFunction::CommitStoreInfo,
            9 => CommitFunction::BeforeFinalize,
            10 => CommitFunction::FinalizeCommit,
            11 => CommitFunction::DeleteObsoleteEntries,
            12 => CommitFunction::DeleteTrackedItemsValues,
            13 => CommitFunction::AddActivelyPersistedItem,
            _ => CommitFunction::Unknown,
        }
    }
}

/// One commit-step record: the step tag plus its marshalled payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitLogRecord {
    /// Step that was about to run when this record was written.
    pub function: CommitFunction,
    /// Step-specific payload; empty when the step needs none.
    pub payload: Vec<u8>,
}

/// An abandoned transaction handed out by [`TransactionLog::get_one`].
#[derive(Debug, Clone)]
pub struct ExpiredTransaction {
    /// The dead transaction's id.
    pub tid: Uuid,
    /// Hour bucket the log records came from, formatted `%Y%m%d%H`.
    pub hour: String,
    /// The transaction's records in append order.
    pub records: Vec<CommitLogRecord>,
}

/// Append-only per-TID transaction log contract.
pub trait TransactionLog: Send + Sync {
    /// Append a commit-step record for `tid`.
    fn add(
        &self,
        ctx: &Context,
        tid: Uuid,
        function: CommitFunction,
        payload: Vec<u8>,
    ) -> Result<()>;

    /// Drop every record of `tid`.
    fn remove(&self, ctx: &Context, tid: Uuid) -> Result<()>;

    /// Hand out the oldest expired transaction, or `None` when no log is old
    /// enough to be considered abandoned.
    fn get_one(&self, ctx: &Context) -> Result<Option<ExpiredTransaction>>;

    /// Walk the rest of the hour bucket returned by a previous
    /// [`TransactionLog::get_one`] call.
    fn get_one_of_hour(
        &self,
        ctx: &Context,
        hour: &str,
    ) -> Result<Option<(Uuid, Vec<CommitLogRecord>)>>;

    /// The nested priority log.
    fn priority_log(&self) -> &dyn PriorityLog;
}

/// Priority log contract: registry pre-images for takeover rollback.
pub trait PriorityLog: Send + Sync {
    /// Whether priority logging is enabled for this backend.
    fn is_enabled(&self) -> bool;

    /// Record the pre-image handles `tid` is about to overwrite.
    fn add(&self, ctx: &Context, tid: Uuid, handles: &[RegistryPayload<Handle>]) -> Result<()>;

    /// Drop `tid`'s pre-image record.
    fn remove(&self, ctx: &Context, tid: Uuid) -> Result<()>;

    /// Fetch `tid`'s pre-image handles; empty when none were recorded.
    fn get(&self, ctx: &Context, tid: Uuid) -> Result<Vec<RegistryPayload<Handle>>>;

    /// Pull a finite batch of aged `(tid, pre-image)` pairs, oldest first.
    /// The batch is not restartable; callers iterate once and ask again.
    fn get_batch(
        &self,
        ctx: &Context,
        batch_size: usize,
    ) -> Result<Vec<(Uuid, Vec<RegistryPayload<Handle>>)>>;

    /// Best-effort record of a committed change set for downstream mirrors.
    fn log_commit_changes(
        &self,
        ctx: &Context,
        stores: &[StoreInfo],
        new_root_nodes: &[RegistryPayload<Handle>],
        added_nodes: &[RegistryPayload<Handle>],
        updated_nodes: &[RegistryPayload<Handle>],
        removed_nodes: &[RegistryPayload<Uuid>],
    ) -> Result<()>;

    /// Write a takeover backup so a sweeper crash mid-restore can resume.
    fn write_backup(
        &self,
        ctx: &Context,
        tid: Uuid,
        handles: &[RegistryPayload<Handle>],
    ) -> Result<()>;

    /// Drop `tid`'s takeover backup.
    fn remove_backup(&self, ctx: &Context, tid: Uuid) -> Result<()>;
}
