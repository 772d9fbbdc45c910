//! Handle: logical-to-physical id indirection
//!
//! A `Handle` maps a stable logical id to two physical id slots (A/B).
//! Exactly one slot is active and authoritative; writers land new blobs in
//! the inactive slot and the finalize step flips which slot is active. The
//! `version` field is the optimistic-concurrency token checked by registry
//! CAS updates. `work_in_progress_timestamp` marks an in-flight write; when
//! it is older than [`INACTIVE_EXPIRY`], the inactive slot is considered
//! abandoned by a crashed peer and may be reclaimed.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Age past which a non-zero work-in-progress timestamp is considered
/// abandoned. Chosen well above the worst expected phase-1 latency (the
/// default transaction `max_time` is two minutes).
pub const INACTIVE_EXPIRY: Duration = Duration::from_secs(7 * 60);

/// Current wall-clock time in Unix milliseconds.
pub fn now_unix_milli() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-logical-node registry record.
///
/// Invariant: exactly one of the A/B slots is active. A freshly created
/// handle uses its logical id as the first active physical id, so the blob
/// of a new node is keyed by the id its creator already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    /// Stable identity used by callers.
    pub logical_id: Uuid,
    /// Which of the A/B slots is currently authoritative.
    pub is_active_id_b: bool,
    /// Physical id slot A.
    pub physical_id_a: Uuid,
    /// Physical id slot B.
    pub physical_id_b: Uuid,
    /// Monotonically increasing optimistic-concurrency token.
    pub version: u32,
    /// Tombstone flag set by a remove commit; cleared on rollback.
    pub is_deleted: bool,
    /// Non-zero while a write is in flight, in Unix milliseconds.
    pub work_in_progress_timestamp: i64,
}

impl Handle {
    /// Create a handle for `logical_id` with slot A active and equal to the
    /// logical id.
    pub fn new(logical_id: Uuid) -> Self {
        Handle {
            logical_id,
            is_active_id_b: false,
            physical_id_a: logical_id,
            physical_id_b: Uuid::nil(),
            version: 0,
            is_deleted: false,
            work_in_progress_timestamp: 0,
        }
    }

    /// The currently authoritative physical id.
    pub fn get_active_id(&self) -> Uuid {
        if self.is_active_id_b {
            self.physical_id_b
        } else {
            self.physical_id_a
        }
    }

    /// The non-authoritative physical id (nil when the slot is free).
    pub fn get_inactive_id(&self) -> Uuid {
        if self.is_active_id_b {
            self.physical_id_a
        } else {
            self.physical_id_b
        }
    }

    /// Allocate a fresh physical id into the inactive slot and stamp the
    /// work-in-progress marker.
    ///
    /// Returns `Uuid::nil()` when the inactive slot is already occupied,
    /// meaning another write is (or was) in flight; callers check
    /// [`Handle::is_expired_inactive`] before reclaiming.
    pub fn allocate_id(&mut self) -> Uuid {
        if !self.get_inactive_id().is_nil() {
            return Uuid::nil();
        }
        let id = Uuid::new_v4();
        self.work_in_progress_timestamp = now_unix_milli();
        if self.is_active_id_b {
            self.physical_id_a = id;
        } else {
            self.physical_id_b = id;
        }
        id
    }

    /// Whether the in-flight marker is old enough that the inactive slot can
    /// be reclaimed from a crashed peer.
    pub fn is_expired_inactive(&self, now_ms: i64) -> bool {
        self.work_in_progress_timestamp > 0
            && now_ms - self.work_in_progress_timestamp > INACTIVE_EXPIRY.as_millis() as i64
    }

    /// Free the inactive slot and clear the in-flight marker.
    ///
    /// Only permitted once the marker is expired; callers enforce that.
    pub fn clear_inactive_id(&mut self) {
        if self.is_active_id_b {
            self.physical_id_a = Uuid::nil();
        } else {
            self.physical_id_b = Uuid::nil();
        }
        self.work_in_progress_timestamp = 0;
    }

    /// Make the inactive slot authoritative. The previous active id stays in
    /// the now-inactive slot until obsolete cleanup clears it.
    pub fn flip_active_id(&mut self) {
        self.is_active_id_b = !self.is_active_id_b;
    }

    /// Whether either slot holds `id`.
    pub fn has_id(&self, id: Uuid) -> bool {
        self.physical_id_a == id || self.physical_id_b == id
    }

    /// Whether the handle is the zero value.
    pub fn is_empty(&self) -> bool {
        self.logical_id.is_nil()
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::new(Uuid::nil())
    }
}
