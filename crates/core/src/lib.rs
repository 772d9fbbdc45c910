//! Core types and contracts for Keel
//!
//! This crate defines the foundational pieces shared by every layer of the
//! commit core:
//! - Handle: logical-to-physical indirection record with A/B slots and versioning
//! - StoreInfo: per-B-tree configuration and metadata
//! - Context: cooperative cancellation token threaded through every backend call
//! - Error: unified error type, including the structured sector failure used
//!   for registry takeover
//! - Backend contracts: Registry, BlobStore, L2Cache, TransactionLog,
//!   PriorityLog, StoreRepository
//!
//! Only contracts and plain data live here; conforming in-memory backends are
//! in `keel-storage` and `keel-durability`, and the transaction machinery is
//! in `keel-commit`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod cache;
pub mod context;
pub mod error;
pub mod handle;
pub mod log;
pub mod node;
pub mod registry;
pub mod store;
pub mod store_repository;

pub use blob::{BlobEntry, BlobStore, BlobsPayload};
pub use cache::{
    create_lock_keys, create_lock_keys_with_id, format_item_key, format_lock_key, format_node_key,
    L2Cache, L2CacheExt, LockKey,
};
pub use context::Context;
pub use error::{Error, Result, SectorUserData};
pub use handle::{now_unix_milli, Handle, INACTIVE_EXPIRY};
pub use log::{CommitFunction, CommitLogRecord, ExpiredTransaction, PriorityLog, TransactionLog};
pub use node::Node;
pub use registry::{Registry, RegistryPayload};
pub use store::StoreInfo;
pub use store_repository::StoreRepository;
