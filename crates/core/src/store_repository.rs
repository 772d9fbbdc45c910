//! Store repository contract: durable per-B-tree metadata

use crate::context::Context;
use crate::error::Result;
use crate::store::StoreInfo;
use std::time::Duration;

/// Durable repository of [`StoreInfo`] records, one per B-tree.
pub trait StoreRepository: Send + Sync {
    /// Register new stores.
    fn add(&self, ctx: &Context, stores: &[StoreInfo]) -> Result<()>;

    /// Persist updated store metadata (root node id, item count, flags).
    /// Returns the stored copies after the update.
    fn update(&self, ctx: &Context, stores: &[StoreInfo]) -> Result<Vec<StoreInfo>>;

    /// Fetch stores by name; missing names are omitted.
    fn get(&self, ctx: &Context, names: &[String]) -> Result<Vec<StoreInfo>>;

    /// Fetch stores by name, refreshing cached copies with `cache_duration`.
    fn get_with_ttl(
        &self,
        ctx: &Context,
        cache_duration: Duration,
        names: &[String],
    ) -> Result<Vec<StoreInfo>>;

    /// Names of all known stores.
    fn get_all(&self, ctx: &Context) -> Result<Vec<String>>;

    /// Remove stores by name.
    fn remove(&self, ctx: &Context, names: &[String]) -> Result<()>;

    /// Best-effort mirror to a passive copy; never blocks a commit.
    fn replicate(&self, ctx: &Context, stores: &[StoreInfo]) -> Result<()>;
}
