//! Per-B-tree store configuration and metadata

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Configuration and live metadata of one B-tree store.
///
/// The registry and blob table names are derived from the store name so that
/// every component addressing this store agrees on them. The value-data
/// flags select where item values live and when they are persisted:
///
/// - `is_value_data_in_node_segment`: values are serialized inside the node
///   payload; the item tracker never writes separate value blobs.
/// - `is_value_data_actively_persisted`: add/update write the value blob
///   immediately instead of buffering it until commit.
/// - `is_value_data_globally_cached`: values are mirrored into the L2 cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Store name; unique within a cluster.
    pub name: String,
    /// Registry table holding this store's handles.
    pub registry_table: String,
    /// Blob table holding this store's node and value blobs.
    pub blob_table: String,
    /// Number of items per B-tree node slot array.
    pub slot_length: usize,
    /// Total item count, maintained by commits.
    pub count: i64,
    /// Logical id of the root node; nil until the first root commit.
    pub root_node_id: Uuid,
    /// How long cached entries of this store live in L1/L2.
    pub cache_duration: Duration,
    /// Whether cached reads refresh the TTL (sliding expiry).
    pub is_cache_ttl: bool,
    /// Item values are stored inside the node segment.
    pub is_value_data_in_node_segment: bool,
    /// Item values are written to the blob store as soon as they are staged.
    pub is_value_data_actively_persisted: bool,
    /// Item values are mirrored into the shared L2 cache.
    pub is_value_data_globally_cached: bool,
    /// Last update time in Unix milliseconds.
    pub timestamp: i64,
}

impl StoreInfo {
    /// Create a store with derived table names and default placement flags
    /// (values in node segment, no active persistence, no global cache).
    pub fn new(name: &str, slot_length: usize) -> Self {
        StoreInfo {
            name: name.to_string(),
            registry_table: format!("{}_r", name),
            blob_table: format!("{}_b", name),
            slot_length,
            count: 0,
            root_node_id: Uuid::nil(),
            cache_duration: Duration::from_secs(15 * 60),
            is_cache_ttl: false,
            is_value_data_in_node_segment: true,
            is_value_data_actively_persisted: false,
            is_value_data_globally_cached: false,
            timestamp: 0,
        }
    }

    /// Builder-style toggle moving values out of the node segment.
    pub fn with_separate_values(mut self, actively_persisted: bool, globally_cached: bool) -> Self {
        self.is_value_data_in_node_segment = false;
        self.is_value_data_actively_persisted = actively_persisted;
        self.is_value_data_globally_cached = globally_cached;
        self
    }
}
