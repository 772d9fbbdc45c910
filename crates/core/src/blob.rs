//! Blob store contract: content bytes keyed by physical id

use crate::context::Context;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One blob write: physical id plus marshalled payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobEntry {
    /// Physical id the payload is stored under.
    pub id: Uuid,
    /// Marshalled bytes.
    pub payload: Vec<u8>,
}

/// Blob ids or entries grouped by blob table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobsPayload<T> {
    /// Blob table name (see [`crate::StoreInfo::blob_table`]).
    pub blob_table: String,
    /// Entries in caller order.
    pub blobs: Vec<T>,
}

impl<T> BlobsPayload<T> {
    /// Group `blobs` under `table`.
    pub fn new(table: &str, blobs: Vec<T>) -> Self {
        BlobsPayload {
            blob_table: table.to_string(),
            blobs,
        }
    }
}

/// Durable blob store contract.
///
/// The store is content-addressed by caller-supplied UUIDs within a table;
/// it never interprets payloads.
pub trait BlobStore: Send + Sync {
    /// Fetch a single blob; `None` when absent.
    fn get_one(&self, ctx: &Context, table: &str, id: Uuid) -> Result<Option<Vec<u8>>>;

    /// Store new blobs.
    fn add(&self, ctx: &Context, blobs: &[BlobsPayload<BlobEntry>]) -> Result<()>;

    /// Overwrite existing blobs.
    fn update(&self, ctx: &Context, blobs: &[BlobsPayload<BlobEntry>]) -> Result<()>;

    /// Delete blobs by id. Absent ids are ignored.
    fn remove(&self, ctx: &Context, ids: &[BlobsPayload<Uuid>]) -> Result<()>;
}
