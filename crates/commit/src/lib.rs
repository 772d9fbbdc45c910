//! Transactional commit core for Keel
//!
//! This crate implements the two-phase optimistic commit over the backend
//! contracts defined in `keel-core`:
//! - ItemActionTracker: per-B-tree read/add/update/remove tracking with
//!   row-level L2 locks and value-segment persistence
//! - NodeRepository: per-store node cache, commit steps, and rollback
//! - TransactionLogger: step-stamped logging plus the recovery drivers
//! - Transaction: the phase-1 retry loop, phase-2 finalization, and the
//!   registry sector-timeout takeover
//! - Sweeper: background self-healing (expired logs, priority rollbacks)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod backend;
pub mod logger;
pub mod node_repository;
pub mod payload;
pub mod resources;
pub mod sweeper;
pub mod tracker;
pub mod transaction;

pub use action::{Item, ItemAction, LockRecord, TrackedItem};
pub use backend::{CommitBackend, RefetchHook, StoreBackend};
pub use logger::{rollback_committed_logs, TransactionLogger};
pub use node_repository::{
    activate_inactive_nodes, extract_inactive_blob_ids, touch_nodes, ClassifiedNodes,
    NodeRepository,
};
pub use payload::{BlobTableIds, NodesPayload, ObsoletePayload, StoreInfoPayload};
pub use resources::Resources;
pub use sweeper::{
    acquire_locks, spawn_expired_log_sweeper, spawn_priority_rollback_sweeper, Sweeper,
    SweeperHandle, PRIORITY_ROLLBACK_LOCK,
};
pub use tracker::ItemActionTracker;
pub use transaction::{Transaction, TransactionMode, TransactionOptions};
