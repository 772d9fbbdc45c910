//! L2 cache contract, lock keys, and key formatting
//!
//! The L2 cache is a shared out-of-process key/value store with TTL. On top
//! of plain get/set it provides advisory locking: a lock is a cache entry
//! whose value is the owner's UUID, and ownership is only proven by writing
//! the key and reading it back ([`L2Cache::dual_lock`]). All non-lock cache
//! traffic is best-effort; callers treat errors as misses.

use crate::context::Context;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Prefix applied by [`format_lock_key`].
const LOCK_KEY_PREFIX: &str = "L";

/// Format an advisory lock key.
pub fn format_lock_key(name: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, name)
}

/// Format the L2 key caching a node blob, keyed by physical id.
pub fn format_node_key(id: Uuid) -> String {
    format!("N{}", id)
}

/// Format the L2 key caching an item value, keyed by item id.
pub fn format_item_key(id: Uuid) -> String {
    format!("V{}", id)
}

/// One advisory lock request/acquisition.
///
/// `is_lock_owner` is set by [`L2Cache::lock`] / cleared by
/// [`L2Cache::unlock`]; only keys marked as owned are deleted on unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKey {
    /// Formatted lock key (see [`format_lock_key`]).
    pub key: String,
    /// Owner id written as the lock value.
    pub lock_id: Uuid,
    /// True once this process proved ownership of the key.
    pub is_lock_owner: bool,
}

/// Build lock keys with a fresh owner id per key.
pub fn create_lock_keys(names: &[String]) -> Vec<LockKey> {
    names
        .iter()
        .map(|n| LockKey {
            key: format_lock_key(n),
            lock_id: Uuid::new_v4(),
            is_lock_owner: false,
        })
        .collect()
}

/// Build lock keys that all carry the same owner id. Used when the owner is
/// a transaction taking locks on behalf of its id.
pub fn create_lock_keys_with_id(names: &[String], lock_id: Uuid) -> Vec<LockKey> {
    names
        .iter()
        .map(|n| LockKey {
            key: format_lock_key(n),
            lock_id,
            is_lock_owner: false,
        })
        .collect()
}

/// Shared L2 cache contract.
///
/// Implementations must be safe for concurrent use from many threads and
/// hosts. TTLs are advisory; an entry may vanish earlier under memory
/// pressure, and consistency never depends on cache success.
pub trait L2Cache: Send + Sync {
    /// Store a string value with optional TTL.
    fn set(&self, ctx: &Context, key: &str, value: &str, expiry: Option<Duration>) -> Result<()>;

    /// Fetch a string value.
    fn get(&self, ctx: &Context, key: &str) -> Result<Option<String>>;

    /// Fetch a string value, refreshing its TTL (sliding expiry).
    fn get_ex(&self, ctx: &Context, key: &str, expiry: Option<Duration>) -> Result<Option<String>>;

    /// Store a raw byte value with optional TTL.
    fn set_bytes(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        expiry: Option<Duration>,
    ) -> Result<()>;

    /// Fetch a raw byte value.
    fn get_bytes(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>>;

    /// Fetch a raw byte value, refreshing its TTL.
    fn get_bytes_ex(
        &self,
        ctx: &Context,
        key: &str,
        expiry: Option<Duration>,
    ) -> Result<Option<Vec<u8>>>;

    /// Delete keys. Returns true when at least one existed.
    fn delete(&self, ctx: &Context, keys: &[String]) -> Result<bool>;

    /// Try to acquire every key in `keys` for its `lock_id`.
    ///
    /// Returns `(true, nil)` when all keys were acquired, or
    /// `(false, owner)` on contention, where `owner` is the conflicting
    /// owner's id when the backend can tell (nil otherwise). Acquired keys
    /// get `is_lock_owner` set; on contention, keys acquired so far stay
    /// owned so the caller can release them with [`L2Cache::unlock`].
    fn lock(&self, ctx: &Context, ttl: Duration, keys: &mut [LockKey]) -> Result<(bool, Uuid)>;

    /// Verify that every key is still held by its `lock_id`.
    fn is_locked(&self, ctx: &Context, keys: &[LockKey]) -> Result<bool>;

    /// Whether any of the named locks is held by someone (regardless of owner).
    fn is_locked_by_others(&self, ctx: &Context, names: &[String]) -> Result<bool>;

    /// Release every key marked as owned, clearing `is_lock_owner`.
    ///
    /// Attempts all keys even when one fails; the last error is returned.
    fn unlock(&self, ctx: &Context, keys: &mut [LockKey]) -> Result<()>;

    /// Acquire then verify, proving ownership against concurrent writers.
    ///
    /// A lock write can race another host's write of the same key; only the
    /// follow-up read proves which one won.
    fn dual_lock(
        &self,
        ctx: &Context,
        ttl: Duration,
        keys: &mut [LockKey],
    ) -> Result<(bool, Uuid)> {
        let (ok, owner) = self.lock(ctx, ttl, keys)?;
        if !ok {
            return Ok((false, owner));
        }
        if self.is_locked(ctx, keys)? {
            Ok((true, Uuid::nil()))
        } else {
            Ok((false, Uuid::nil()))
        }
    }
}

/// Typed get/set over the raw byte operations.
///
/// Kept as an extension trait so [`L2Cache`] stays object safe.
pub trait L2CacheExt: L2Cache {
    /// Serialize and store a value.
    fn set_struct<T: Serialize>(
        &self,
        ctx: &Context,
        key: &str,
        value: &T,
        expiry: Option<Duration>,
    ) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.set_bytes(ctx, key, &bytes, expiry)
    }

    /// Fetch and deserialize a value. A payload that fails to decode is an
    /// error, not a miss; stale-format entries should be deleted by callers.
    fn get_struct<T: DeserializeOwned>(&self, ctx: &Context, key: &str) -> Result<Option<T>> {
        match self.get_bytes(ctx, key)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Fetch and deserialize a value, refreshing its TTL.
    fn get_struct_ex<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        key: &str,
        expiry: Option<Duration>,
    ) -> Result<Option<T>> {
        match self.get_bytes_ex(ctx, key, expiry)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl<C: L2Cache + ?Sized> L2CacheExt for C {}
