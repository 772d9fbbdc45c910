//! In-memory registry with per-handle CAS

use dashmap::DashMap;
use keel_core::{Context, Error, Handle, Registry, RegistryPayload, Result};
use uuid::Uuid;

/// In-memory conforming [`Registry`] backend.
///
/// `update` is a per-handle compare-and-swap on the stored version;
/// `update_no_locks` replaces unconditionally, trusting the caller's
/// advisory locks. `replicate` is a no-op because there is no passive copy
/// to mirror to in-process.
pub struct InMemoryRegistry {
    handles: DashMap<(String, Uuid), Handle>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        InMemoryRegistry {
            handles: DashMap::new(),
        }
    }

    /// Number of registered handles across all tables.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handles are registered.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for InMemoryRegistry {
    fn add(&self, ctx: &Context, handles: &[RegistryPayload<Handle>]) -> Result<()> {
        ctx.check()?;
        for payload in handles {
            for handle in &payload.ids {
                self.handles
                    .insert((payload.registry_table.clone(), handle.logical_id), *handle);
            }
        }
        Ok(())
    }

    fn update(&self, ctx: &Context, handles: &[RegistryPayload<Handle>]) -> Result<()> {
        ctx.check()?;
        for payload in handles {
            for handle in &payload.ids {
                let key = (payload.registry_table.clone(), handle.logical_id);
                match self.handles.get_mut(&key) {
                    Some(mut entry) => {
                        if entry.version != handle.version {
                            return Err(Error::VersionMismatch {
                                id: handle.logical_id,
                                expected: handle.version,
                                actual: entry.version,
                            });
                        }
                        *entry = *handle;
                    }
                    None => {
                        return Err(Error::Registry(format!(
                            "handle {} not found in {}",
                            handle.logical_id, payload.registry_table
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn update_no_locks(
        &self,
        ctx: &Context,
        _all_or_nothing: bool,
        handles: &[RegistryPayload<Handle>],
    ) -> Result<()> {
        ctx.check()?;
        for payload in handles {
            for handle in &payload.ids {
                self.handles
                    .insert((payload.registry_table.clone(), handle.logical_id), *handle);
            }
        }
        Ok(())
    }

    fn get(
        &self,
        ctx: &Context,
        ids: &[RegistryPayload<Uuid>],
    ) -> Result<Vec<RegistryPayload<Handle>>> {
        ctx.check()?;
        let mut result = Vec::with_capacity(ids.len());
        for payload in ids {
            let mut found = Vec::new();
            for id in &payload.ids {
                if let Some(handle) = self
                    .handles
                    .get(&(payload.registry_table.clone(), *id))
                {
                    found.push(*handle);
                }
            }
            result.push(RegistryPayload {
                registry_table: payload.registry_table.clone(),
                ids: found,
            });
        }
        Ok(result)
    }

    fn remove(&self, ctx: &Context, ids: &[RegistryPayload<Uuid>]) -> Result<()> {
        ctx.check()?;
        for payload in ids {
            for id in &payload.ids {
                self.handles.remove(&(payload.registry_table.clone(), *id));
            }
        }
        Ok(())
    }

    fn replicate(
        &self,
        ctx: &Context,
        _new_root_nodes: &[RegistryPayload<Handle>],
        _added_nodes: &[RegistryPayload<Handle>],
        _updated_nodes: &[RegistryPayload<Handle>],
        _removed_nodes: &[RegistryPayload<Uuid>],
    ) -> Result<()> {
        ctx.check()?;
        Ok(())
    }
}
