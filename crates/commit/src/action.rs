//! Items, actions, and tracked records
//!
//! The item action tracker records what a transaction did to each B-tree
//! item. Repeated operations on the same item collapse according to a fixed
//! transition table (see [`ItemAction::transition`]); notably, removing an
//! item added in the same transaction erases it without any durable trace.

use keel_core::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a transaction did to an item or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemAction {
    /// Not tracked yet.
    Default,
    /// Read.
    Get,
    /// Created in this transaction.
    Add,
    /// Modified.
    Update,
    /// Deleted.
    Remove,
}

/// Outcome of applying a new action on top of a tracked one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep tracking with the given action.
    Track(ItemAction),
    /// Drop the record entirely (add then remove).
    Drop,
    /// The combination is not allowed.
    Invalid,
}

impl ItemAction {
    /// Collapse `next` onto the current action.
    pub fn transition(self, next: ItemAction) -> Transition {
        use ItemAction::*;
        match (self, next) {
            (Default, a) => Transition::Track(a),
            (Add, Get) => Transition::Track(Add),
            (Add, Update) => Transition::Track(Add),
            (Add, Remove) => Transition::Drop,
            (Add, _) => Transition::Invalid,
            (Update, Get) => Transition::Track(Update),
            (Update, Update) => Transition::Track(Update),
            (Update, Remove) => Transition::Track(Remove),
            (Update, Add) => Transition::Invalid,
            (Update, Default) => Transition::Invalid,
            (Remove, Get) => Transition::Track(Remove),
            (Remove, Remove) => Transition::Track(Remove),
            (Remove, _) => Transition::Invalid,
            (Get, Get) => Transition::Track(Get),
            (Get, Update) => Transition::Track(Update),
            (Get, Remove) => Transition::Track(Remove),
            (Get, Add) => Transition::Invalid,
            (Get, Default) => Transition::Invalid,
        }
    }
}

/// One B-tree item as seen by the commit core: identity, key, optional
/// value, and the version observed at read time.
///
/// When values live outside the node segment, `id` doubles as the value's
/// blob id. An update therefore allocates a fresh id for the new value and
/// the superseded one is deleted in phase 2, never in phase 1, so rollback
/// cannot destroy the pre-transaction value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item id; regenerated when an out-of-segment value is replaced.
    pub id: Uuid,
    /// B-tree key bytes.
    pub key: Vec<u8>,
    /// Value bytes; `None` until materialised.
    pub value: Option<Vec<u8>>,
    /// Version observed when the item was read.
    pub version: u32,
    /// True when the value lives outside the node segment and has not been
    /// fetched yet.
    pub value_needs_fetch: bool,
}

impl Item {
    /// Create an item with a fresh id and a materialised value.
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Item {
            id: Uuid::new_v4(),
            key,
            value: Some(value),
            version: 0,
            value_needs_fetch: false,
        }
    }
}

/// Row-lock record stored in the L2 cache under the item's lock key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The claiming transaction's lock id.
    pub lock_id: Uuid,
    /// The action the claimant intends.
    pub action: ItemAction,
}

impl LockRecord {
    /// Whether a peer's claim is compatible with ours. Only two readers may
    /// share a row.
    pub fn is_compatible(&self, ours: ItemAction) -> bool {
        self.action == ItemAction::Get && ours == ItemAction::Get
    }
}

/// Per-item tracking record.
#[derive(Debug, Clone)]
pub struct TrackedItem {
    /// Claim id generated at first tracking; written as the row-lock value.
    pub lock_id: Uuid,
    /// Id the row lock is keyed by: the item's id at first tracking. Stays
    /// stable even when updates regenerate the item id.
    pub key_id: Uuid,
    /// Collapsed action.
    pub action: ItemAction,
    /// The item as the transaction last saw it.
    pub item: Item,
    /// Version observed in the store at read time.
    pub version_in_db: u32,
    /// True only if this transaction wrote the row lock.
    pub is_lock_owner: bool,
    /// True once the value blob was written (actively or at commit).
    pub persisted: bool,
}

impl TrackedItem {
    /// Start tracking `item` under `action`.
    pub fn new(action: ItemAction, item: Item) -> Self {
        TrackedItem {
            lock_id: Uuid::new_v4(),
            key_id: item.id,
            action,
            version_in_db: item.version,
            item,
            is_lock_owner: false,
            persisted: false,
        }
    }

    /// Apply a follow-up action, enforcing the transition table.
    ///
    /// Returns true when the record should be dropped.
    pub fn apply(&mut self, next: ItemAction, item: Item) -> Result<bool> {
        match self.action.transition(next) {
            Transition::Track(collapsed) => {
                self.action = collapsed;
                self.item = item;
                Ok(false)
            }
            Transition::Drop => Ok(true),
            Transition::Invalid => Err(Error::InvalidState(format!(
                "{:?} not allowed on item tracked as {:?}",
                next, self.action
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_drops_the_record() {
        let item = Item::new(b"k".to_vec(), b"v".to_vec());
        let mut tracked = TrackedItem::new(ItemAction::Add, item.clone());
        assert!(tracked.apply(ItemAction::Remove, item).unwrap());
    }

    #[test]
    fn add_survives_update() {
        let item = Item::new(b"k".to_vec(), b"v".to_vec());
        let mut tracked = TrackedItem::new(ItemAction::Add, item.clone());
        assert!(!tracked.apply(ItemAction::Update, item).unwrap());
        assert_eq!(tracked.action, ItemAction::Add);
    }

    #[test]
    fn get_escalates_to_update_and_remove() {
        let item = Item::new(b"k".to_vec(), b"v".to_vec());
        let mut tracked = TrackedItem::new(ItemAction::Get, item.clone());
        assert!(!tracked.apply(ItemAction::Update, item.clone()).unwrap());
        assert_eq!(tracked.action, ItemAction::Update);
        assert!(!tracked.apply(ItemAction::Remove, item).unwrap());
        assert_eq!(tracked.action, ItemAction::Remove);
    }

    #[test]
    fn update_on_removed_is_invalid() {
        let item = Item::new(b"k".to_vec(), b"v".to_vec());
        let mut tracked = TrackedItem::new(ItemAction::Remove, item.clone());
        assert!(tracked.apply(ItemAction::Update, item).is_err());
    }

    #[test]
    fn only_get_get_is_compatible() {
        let rec = LockRecord {
            lock_id: Uuid::new_v4(),
            action: ItemAction::Get,
        };
        assert!(rec.is_compatible(ItemAction::Get));
        assert!(!rec.is_compatible(ItemAction::Update));

        let writer = LockRecord {
            lock_id: Uuid::new_v4(),
            action: ItemAction::Update,
        };
        assert!(!writer.is_compatible(ItemAction::Get));
    }
}
