//! In-memory transaction log and priority log for Keel
//!
//! Conforming backends for the `keel-core` log contracts:
//!
//! - [`InMemoryTransactionLog`]: append-only per-TID commit-step records,
//!   grouped into hour buckets. `get_one` hands out the oldest transaction
//!   whose records are old enough to be considered abandoned, for the
//!   expired-log sweeper to undo.
//! - [`InMemoryPriorityLog`]: registry pre-images for takeover rollback,
//!   with backup records so an interrupted takeover can resume.
//!
//! Both expose age thresholds tunable by tests; production code keeps the
//! defaults.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod priority_log;
pub mod transaction_log;

pub use priority_log::InMemoryPriorityLog;
pub use transaction_log::InMemoryTransactionLog;
