//! Registry contract: durable map of logical id to [`Handle`]
//!
//! The registry is the authority on node identity and versioning. Two update
//! paths exist on purpose:
//!
//! - [`Registry::update`] performs a compare-and-swap against the stored
//!   version; any mutating path that has NOT acquired the L2 advisory locks
//!   for the involved ids must use it.
//! - [`Registry::update_no_locks`] skips the CAS; the caller vouches that it
//!   holds the advisory locks (or is the only possible writer, as during
//!   takeover of a dead peer).
//!
//! `update_no_locks` may fail with [`crate::Error::SectorFailure`] whose
//! `user_data`, when of lock-key form, invites the caller to attempt a
//! takeover of the stalled owner.

use crate::context::Context;
use crate::error::Result;
use crate::handle::Handle;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ids or handles grouped by the registry table they belong to.
///
/// Backends must preserve both the grouping and the per-table order of
/// `ids` in their results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryPayload<T> {
    /// Registry table name (see [`crate::StoreInfo::registry_table`]).
    pub registry_table: String,
    /// Ids or handles in caller order.
    pub ids: Vec<T>,
}

impl<T> RegistryPayload<T> {
    /// Group `ids` under `table`.
    pub fn new(table: &str, ids: Vec<T>) -> Self {
        RegistryPayload {
            registry_table: table.to_string(),
            ids,
        }
    }
}

/// Durable registry backend contract.
pub trait Registry: Send + Sync {
    /// Register new handles unconditionally.
    fn add(&self, ctx: &Context, handles: &[RegistryPayload<Handle>]) -> Result<()>;

    /// Update handles with a compare-and-swap on the stored version.
    ///
    /// # Errors
    /// [`crate::Error::VersionMismatch`] when any stored version differs
    /// from the caller's copy.
    fn update(&self, ctx: &Context, handles: &[RegistryPayload<Handle>]) -> Result<()>;

    /// Update handles without version checks. `all_or_nothing` asks the
    /// backend to apply the batch atomically where it can.
    fn update_no_locks(
        &self,
        ctx: &Context,
        all_or_nothing: bool,
        handles: &[RegistryPayload<Handle>],
    ) -> Result<()>;

    /// Fetch handles for the given ids. Missing ids are omitted from the
    /// result; grouping and order of the found handles follow the request.
    fn get(
        &self,
        ctx: &Context,
        ids: &[RegistryPayload<Uuid>],
    ) -> Result<Vec<RegistryPayload<Handle>>>;

    /// Remove handles unconditionally.
    fn remove(&self, ctx: &Context, ids: &[RegistryPayload<Uuid>]) -> Result<()>;

    /// Best-effort mirror of a committed change set to a passive copy.
    /// Failures are reported but never block a commit.
    fn replicate(
        &self,
        ctx: &Context,
        new_root_nodes: &[RegistryPayload<Handle>],
        added_nodes: &[RegistryPayload<Handle>],
        updated_nodes: &[RegistryPayload<Handle>],
        removed_nodes: &[RegistryPayload<Uuid>],
    ) -> Result<()>;
}
