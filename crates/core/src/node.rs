//! Logical B-tree node as seen by the commit core
//!
//! The commit core moves nodes between caches and the blob store but never
//! interprets their contents; the slot array, separators, and child links
//! live opaquely in `payload`. What the core does rely on is the `(id,
//! version)` pair: the version written into a blob always equals the handle
//! version that blob will be authoritative under.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One logical node: identity, optimistic-concurrency version, and the
/// B-tree's marshalled content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Logical id; stable across rewrites.
    pub id: Uuid,
    /// Version of this copy, compared against the registry handle.
    pub version: u32,
    /// Opaque marshalled node content.
    pub payload: Vec<u8>,
}

impl Node {
    /// Create a version-0 node, as staged by an `add`.
    pub fn new(id: Uuid, payload: Vec<u8>) -> Self {
        Node {
            id,
            version: 0,
            payload,
        }
    }

    /// Marshal for blob storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Unmarshal from blob storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_round_trip() {
        let node = Node {
            id: Uuid::new_v4(),
            version: 7,
            payload: b"slots".to_vec(),
        };
        let bytes = node.to_bytes().unwrap();
        assert_eq!(Node::from_bytes(&bytes).unwrap(), node);
    }
}
