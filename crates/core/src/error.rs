//! Error types for the Keel commit core
//!
//! A single `Error` enum is used across all crates. Two kinds deserve special
//! mention:
//!
//! - `Conflict` is the non-fatal, retryable kind: version mismatches and lock
//!   contention. The phase-1 loop rolls back, refetches, and retries on it.
//! - `SectorFailure` is the structured registry failure. Its `user_data` may
//!   carry the lock key of a stalled peer, in which case the transaction
//!   coordinator attempts a takeover instead of failing outright.
//!
//! Cache failures are never surfaced through this type by the core; they are
//! logged as warnings and treated as misses.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Keel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Payload attached to a [`Error::SectorFailure`].
///
/// The registry backend decides what to attach; takeover dispatch is total
/// over this type, so an unknown payload simply propagates the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectorUserData {
    /// No extra information; the failure is operator-facing.
    None,
    /// A lock key owned by a (possibly dead) peer transaction. The holder of
    /// this key can be taken over via a priority rollback.
    LockKey {
        /// Formatted L2 lock key guarding the failed sector.
        key: String,
        /// Lock owner; doubles as the owning transaction's id.
        lock_id: Uuid,
    },
    /// A transaction id, for failures tied to a specific peer.
    Tid(Uuid),
}

/// Error type for the Keel commit core
#[derive(Debug, Error)]
pub enum Error {
    /// Registry-level sector failure: storage corruption or a sector lock
    /// timeout. May be recoverable via takeover when `user_data` carries a
    /// lock key.
    #[error("registry sector failure: {detail}")]
    SectorFailure {
        /// Human-readable failure description from the backend.
        detail: String,
        /// Optional takeover payload.
        user_data: SectorUserData,
    },

    /// Retryable conflict: version mismatch or lock contention.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Version mismatch on a CAS registry update.
    #[error("version mismatch on {id}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Logical id whose handle failed the check.
        id: Uuid,
        /// Version the caller expected.
        expected: u32,
        /// Version currently stored.
        actual: u32,
    },

    /// Operation called in the wrong transaction state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The transaction exceeded its maximum commit time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Blob store failure.
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Registry failure without a structured sector code.
    #[error("registry error: {0}")]
    Registry(String),

    /// Store repository failure.
    #[error("store repository error: {0}")]
    StoreRepository(String),

    /// Transaction or priority log failure.
    #[error("transaction log error: {0}")]
    Log(String),

    /// L2 cache failure. The core downgrades these to warnings on read and
    /// write paths; this kind only propagates from lock primitives.
    #[error("cache error: {0}")]
    Cache(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Pass-through error preserving the source message verbatim.
    #[error("{0}")]
    Other(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Check whether this error is a retryable conflict.
    ///
    /// The phase-1 commit loop retries (rollback + refetch) only on these.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::VersionMismatch { .. }
        )
    }

    /// Check whether this error is a structured sector failure.
    pub fn is_sector_failure(&self) -> bool {
        matches!(self, Error::SectorFailure { .. })
    }

    /// Takeover payload of a sector failure, if any.
    pub fn sector_user_data(&self) -> Option<&SectorUserData> {
        match self {
            Error::SectorFailure { user_data, .. } => Some(user_data),
            _ => None,
        }
    }

    /// Check whether this error came from cancellation or timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Cancelled)
    }
}
