//! Wire payloads carried inside commit-step log records
//!
//! Every payload names the tables it touches so crash recovery can undo (or
//! finish) a dead transaction's work from the log alone, without access to
//! the transaction's in-memory state.

use keel_core::{Result, StoreInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Blob ids scoped to their blob table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlobTableIds {
    /// Blob table the ids live in.
    pub blob_table: String,
    /// Blob ids.
    pub ids: Vec<Uuid>,
}

impl BlobTableIds {
    /// Scope `ids` to `table`.
    pub fn new(table: &str, ids: Vec<Uuid>) -> Self {
        BlobTableIds {
            blob_table: table.to_string(),
            ids,
        }
    }

    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Logical node ids scoped to both tables of their store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodesPayload {
    /// Registry table holding the handles.
    pub registry_table: String,
    /// Blob table holding the node blobs.
    pub blob_table: String,
    /// Logical ids.
    pub ids: Vec<Uuid>,
}

/// Obsolete entries scheduled for deletion by phase 2, logged with
/// `finalizeCommit` so recovery can finish the cleanup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObsoletePayload {
    /// Tombstoned handles whose registry rows get removed.
    pub deleted: Vec<NodesPayload>,
    /// Physical blob ids superseded by the flip.
    pub unused_blobs: Vec<BlobTableIds>,
    /// Out-of-node item values superseded or removed by this transaction.
    pub tracked_values: Vec<BlobTableIds>,
}

/// Store metadata pre-images logged with `commitStoreInfo` so rollback can
/// restore counts and root pointers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreInfoPayload {
    /// Stores as they were before this transaction's metadata commit.
    pub stores: Vec<StoreInfo>,
}

/// Serialize a payload for a log record.
pub fn to_bytes<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(payload)?)
}

/// Deserialize a payload out of a log record.
pub fn from_bytes<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
