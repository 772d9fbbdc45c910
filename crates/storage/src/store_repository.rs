//! In-memory store repository

use dashmap::DashMap;
use keel_core::{now_unix_milli, Context, Result, StoreInfo, StoreRepository};
use std::time::Duration;

/// In-memory conforming [`StoreRepository`] backend.
pub struct InMemoryStoreRepository {
    stores: DashMap<String, StoreInfo>,
}

impl InMemoryStoreRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        InMemoryStoreRepository {
            stores: DashMap::new(),
        }
    }
}

impl Default for InMemoryStoreRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreRepository for InMemoryStoreRepository {
    fn add(&self, ctx: &Context, stores: &[StoreInfo]) -> Result<()> {
        ctx.check()?;
        for store in stores {
            self.stores.insert(store.name.clone(), store.clone());
        }
        Ok(())
    }

    fn update(&self, ctx: &Context, stores: &[StoreInfo]) -> Result<Vec<StoreInfo>> {
        ctx.check()?;
        let mut updated = Vec::with_capacity(stores.len());
        for store in stores {
            let mut copy = store.clone();
            copy.timestamp = now_unix_milli();
            self.stores.insert(copy.name.clone(), copy.clone());
            updated.push(copy);
        }
        Ok(updated)
    }

    fn get(&self, ctx: &Context, names: &[String]) -> Result<Vec<StoreInfo>> {
        ctx.check()?;
        Ok(names
            .iter()
            .filter_map(|n| self.stores.get(n).map(|s| s.clone()))
            .collect())
    }

    fn get_with_ttl(
        &self,
        ctx: &Context,
        _cache_duration: Duration,
        names: &[String],
    ) -> Result<Vec<StoreInfo>> {
        // No cache layer in front of an in-memory repository.
        self.get(ctx, names)
    }

    fn get_all(&self, ctx: &Context) -> Result<Vec<String>> {
        ctx.check()?;
        Ok(self.stores.iter().map(|e| e.key().clone()).collect())
    }

    fn remove(&self, ctx: &Context, names: &[String]) -> Result<()> {
        ctx.check()?;
        for name in names {
            self.stores.remove(name);
        }
        Ok(())
    }

    fn replicate(&self, ctx: &Context, _stores: &[StoreInfo]) -> Result<()> {
        ctx.check()?;
        Ok(())
    }
}
