//! Process-global L1 cache of handles and nodes
//!
//! Shared by every in-process transaction. Readers are only ever given
//! possibly-stale copies; commit paths always re-verify against the
//! registry, so no invalidation protocol is needed beyond best-effort
//! deletes during obsolete cleanup.

use crate::mru::Mru;
use keel_core::{Handle, Node};
use once_cell::sync::Lazy;
use std::time::Duration;
use uuid::Uuid;

const HANDLE_CAPACITY: usize = 5_000;
const NODE_CAPACITY: usize = 2_500;

/// In-process MRU of registry handles (by logical id) and node copies
/// (by physical id), with per-store TTLs supplied on insert.
pub struct GlobalCache {
    handles: Mru<Uuid, Handle>,
    nodes: Mru<Uuid, Node>,
}

impl GlobalCache {
    /// Create an empty cache with the default capacities.
    pub fn new() -> Self {
        GlobalCache {
            handles: Mru::new(HANDLE_CAPACITY),
            nodes: Mru::new(NODE_CAPACITY),
        }
    }

    /// Cache a handle under its logical id.
    pub fn set_handle(&self, handle: Handle, ttl: Option<Duration>) {
        self.handles.set(handle.logical_id, handle, ttl);
    }

    /// Cached handle for a logical id, if any.
    pub fn get_handle(&self, logical_id: Uuid) -> Option<Handle> {
        self.handles.get(&logical_id)
    }

    /// Drop cached handles.
    pub fn delete_handles(&self, logical_ids: &[Uuid]) {
        for id in logical_ids {
            self.handles.delete(id);
        }
    }

    /// Cache a node copy under the physical id its blob is stored at.
    pub fn set_node(&self, physical_id: Uuid, node: Node, ttl: Option<Duration>) {
        self.nodes.set(physical_id, node, ttl);
    }

    /// Cached node copy for a physical id, if any.
    pub fn get_node(&self, physical_id: Uuid) -> Option<Node> {
        self.nodes.get(&physical_id)
    }

    /// Drop cached node copies.
    pub fn delete_nodes(&self, physical_ids: &[Uuid]) {
        for id in physical_ids {
            self.nodes.delete(id);
        }
    }

    /// Drop everything; used by tests sharing the process-global instance.
    pub fn clear(&self) {
        self.handles.clear();
        self.nodes.clear();
    }
}

impl Default for GlobalCache {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Lazy<GlobalCache> = Lazy::new(GlobalCache::new);

/// The process-wide cache instance.
pub fn global_cache() -> &'static GlobalCache {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_and_node_round_trip() {
        let cache = GlobalCache::new();
        let handle = Handle::new(Uuid::new_v4());
        cache.set_handle(handle, None);
        assert_eq!(cache.get_handle(handle.logical_id), Some(handle));

        let pid = Uuid::new_v4();
        let node = Node::new(Uuid::new_v4(), b"x".to_vec());
        cache.set_node(pid, node.clone(), None);
        assert_eq!(cache.get_node(pid), Some(node));

        cache.delete_handles(&[handle.logical_id]);
        cache.delete_nodes(&[pid]);
        assert!(cache.get_handle(handle.logical_id).is_none());
        assert!(cache.get_node(pid).is_none());
    }

    #[test]
    fn global_instance_is_shared() {
        let handle = Handle::new(Uuid::new_v4());
        global_cache().set_handle(handle, None);
        assert_eq!(global_cache().get_handle(handle.logical_id), Some(handle));
        global_cache().delete_handles(&[handle.logical_id]);
    }
}
