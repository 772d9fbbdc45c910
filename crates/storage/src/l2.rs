//! In-memory L2 cache with TTL and advisory locks
//!
//! Locks are plain cache entries whose value is the owner's UUID; expiry of
//! the entry is expiry of the lock. This mirrors how a shared networked
//! cache implements advisory locking, so code tested against this backend
//! behaves the same against one.

use dashmap::DashMap;
use keel_core::{Context, Error, L2Cache, LockKey, Result};
use std::time::{Duration, Instant};
use uuid::Uuid;

struct CacheEntry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn live(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

/// In-memory conforming [`L2Cache`] backend.
pub struct InMemoryL2Cache {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryL2Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        InMemoryL2Cache {
            entries: DashMap::new(),
        }
    }

    fn read(&self, key: &str, refresh: Option<Duration>) -> Option<Vec<u8>> {
        let mut entry = self.entries.get_mut(key)?;
        if !entry.live() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        if let Some(ttl) = refresh {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Some(entry.bytes.clone())
    }

    fn lock_owner(&self, key: &str) -> Option<Uuid> {
        self.read(key, None)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| Uuid::parse_str(&s).ok())
    }
}

impl Default for InMemoryL2Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl L2Cache for InMemoryL2Cache {
    fn set(&self, ctx: &Context, key: &str, value: &str, expiry: Option<Duration>) -> Result<()> {
        self.set_bytes(ctx, key, value.as_bytes(), expiry)
    }

    fn get(&self, ctx: &Context, key: &str) -> Result<Option<String>> {
        ctx.check()?;
        match self.read(key, None) {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Cache(e.to_string())),
            None => Ok(None),
        }
    }

    fn get_ex(&self, ctx: &Context, key: &str, expiry: Option<Duration>) -> Result<Option<String>> {
        ctx.check()?;
        match self.read(key, expiry) {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Cache(e.to_string())),
            None => Ok(None),
        }
    }

    fn set_bytes(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        expiry: Option<Duration>,
    ) -> Result<()> {
        ctx.check()?;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                bytes: value.to_vec(),
                expires_at: expiry.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    fn get_bytes(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        Ok(self.read(key, None))
    }

    fn get_bytes_ex(
        &self,
        ctx: &Context,
        key: &str,
        expiry: Option<Duration>,
    ) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        Ok(self.read(key, expiry))
    }

    fn delete(&self, ctx: &Context, keys: &[String]) -> Result<bool> {
        ctx.check()?;
        let mut any = false;
        for key in keys {
            any |= self.entries.remove(key).is_some();
        }
        Ok(any)
    }

    fn lock(&self, ctx: &Context, ttl: Duration, keys: &mut [LockKey]) -> Result<(bool, Uuid)> {
        ctx.check()?;
        for k in keys.iter_mut() {
            let owner_bytes = k.lock_id.to_string().into_bytes();
            match self.entries.entry(k.key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    if occupied.get().live() {
                        match self.lock_owner_of(occupied.get()) {
                            Some(owner) if owner == k.lock_id => {
                                k.is_lock_owner = true;
                            }
                            Some(owner) => return Ok((false, owner)),
                            None => return Ok((false, Uuid::nil())),
                        }
                    } else {
                        occupied.insert(CacheEntry {
                            bytes: owner_bytes,
                            expires_at: Some(Instant::now() + ttl),
                        });
                        k.is_lock_owner = true;
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(CacheEntry {
                        bytes: owner_bytes,
                        expires_at: Some(Instant::now() + ttl),
                    });
                    k.is_lock_owner = true;
                }
            }
        }
        Ok((true, Uuid::nil()))
    }

    fn is_locked(&self, ctx: &Context, keys: &[LockKey]) -> Result<bool> {
        ctx.check()?;
        for k in keys {
            match self.lock_owner(&k.key) {
                Some(owner) if owner == k.lock_id => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn is_locked_by_others(&self, ctx: &Context, names: &[String]) -> Result<bool> {
        ctx.check()?;
        for name in names {
            if self.read(name, None).is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn unlock(&self, ctx: &Context, keys: &mut [LockKey]) -> Result<()> {
        ctx.check()?;
        for k in keys.iter_mut() {
            if !k.is_lock_owner {
                continue;
            }
            // Compare-and-delete: only drop the entry while we still own it.
            if self.lock_owner(&k.key) == Some(k.lock_id) {
                self.entries.remove(&k.key);
            }
            k.is_lock_owner = false;
        }
        Ok(())
    }
}

impl InMemoryL2Cache {
    fn lock_owner_of(&self, entry: &CacheEntry) -> Option<Uuid> {
        std::str::from_utf8(&entry.bytes)
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Drop everything; used by tests.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
