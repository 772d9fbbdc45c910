//! In-memory blob store

use dashmap::DashMap;
use keel_core::{BlobEntry, BlobStore, BlobsPayload, Context, Result};
use uuid::Uuid;

/// In-memory conforming [`BlobStore`] backend.
pub struct InMemoryBlobStore {
    blobs: DashMap<(String, Uuid), Vec<u8>>,
}

impl InMemoryBlobStore {
    /// Create an empty blob store.
    pub fn new() -> Self {
        InMemoryBlobStore {
            blobs: DashMap::new(),
        }
    }

    /// Number of stored blobs across all tables.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn get_one(&self, ctx: &Context, table: &str, id: Uuid) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        Ok(self
            .blobs
            .get(&(table.to_string(), id))
            .map(|v| v.clone()))
    }

    fn add(&self, ctx: &Context, blobs: &[BlobsPayload<BlobEntry>]) -> Result<()> {
        ctx.check()?;
        for payload in blobs {
            for entry in &payload.blobs {
                self.blobs.insert(
                    (payload.blob_table.clone(), entry.id),
                    entry.payload.clone(),
                );
            }
        }
        Ok(())
    }

    fn update(&self, ctx: &Context, blobs: &[BlobsPayload<BlobEntry>]) -> Result<()> {
        self.add(ctx, blobs)
    }

    fn remove(&self, ctx: &Context, ids: &[BlobsPayload<Uuid>]) -> Result<()> {
        ctx.check()?;
        for payload in ids {
            for id in &payload.blobs {
                self.blobs.remove(&(payload.blob_table.clone(), *id));
            }
        }
        Ok(())
    }
}
