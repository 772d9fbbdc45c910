//! In-process caches and in-memory conforming backends for Keel
//!
//! Two things live here:
//!
//! - The L1 layer: a TTL'd MRU map ([`Mru`]) and the process-global
//!   [`GlobalCache`] of handles and nodes shared by all in-process
//!   transactions.
//! - In-memory reference backends implementing the `keel-core` contracts:
//!   [`InMemoryRegistry`] (with CAS), [`InMemoryBlobStore`],
//!   [`InMemoryL2Cache`] (TTL + advisory locks), and
//!   [`InMemoryStoreRepository`].
//!
//! The in-memory backends make the commit core fully testable in one process
//! and double as the single-host deployment mode. Distributed deployments
//! substitute network-backed implementations of the same contracts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod l1;
pub mod l2;
pub mod mru;
pub mod registry;
pub mod store_repository;

pub use blob::InMemoryBlobStore;
pub use l1::{global_cache, GlobalCache};
pub use l2::InMemoryL2Cache;
pub use mru::Mru;
pub use registry::InMemoryRegistry;
pub use store_repository::InMemoryStoreRepository;
