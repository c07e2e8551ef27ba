//! Table of live transfer slots keyed by [`SlotId`].
//!
//! Ids grow monotonically and wrap around at `u32::MAX`, skipping `0` and any
//! id whose slot has not been recycled yet. Slots are shared as
//! [`SlotRef`]s so a lookup never holds the table lock while the slot itself
//! is being worked on.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use readback_core::alloc::HashMap;

use crate::error::ReadbackError;
use crate::slot::{SlotId, SlotState, TransferSlot};

/// Shared handle to a slot.
///
/// Read-only access (state, fault, completed bytes) goes through
/// `read_recursive` so any number of readers can coexist with a live
/// [`ReadbackView`](crate::ReadbackView). Transitions take the write lock.
pub(crate) type SlotRef = Arc<RwLock<TransferSlot>>;

struct RegistryInner {
    slots: HashMap<SlotId, SlotRef>,
    next_id: u32,
}

pub(crate) struct SlotRegistry {
    inner: Mutex<RegistryInner>,
}

impl SlotRegistry {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    /// Registry whose first id is `first` (or `1` when `first` is `0`).
    pub(crate) fn starting_at(first: u32) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                slots: HashMap::new(),
                next_id: first.max(1),
            }),
        }
    }

    /// Create a fresh Pending slot.
    pub(crate) fn allocate(&self) -> (SlotId, SlotRef) {
        let mut inner = self.inner.lock();
        let id = loop {
            let candidate = SlotId::new(inner.next_id);
            inner.next_id = match inner.next_id.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if !inner.slots.contains_key(&candidate) {
                break candidate;
            }
        };

        let slot = Arc::new(RwLock::new(TransferSlot::new(id)));
        inner.slots.insert(id, slot.clone());
        (id, slot)
    }

    pub(crate) fn lookup(&self, id: SlotId) -> Result<SlotRef, ReadbackError> {
        self.inner
            .lock()
            .slots
            .get(&id)
            .cloned()
            .ok_or(ReadbackError::InvalidId(id))
    }

    /// Drop a disposed slot from the table, making its id reusable.
    ///
    /// The caller holds the slot, which is why it is passed in instead of
    /// being locked here.
    pub(crate) fn recycle(&self, slot: &TransferSlot) -> bool {
        if slot.state() != SlotState::Disposed {
            tracing::error!(slot = %slot.id(), "refusing to recycle a slot in state {:?}", slot.state());
            return false;
        }
        self.inner.lock().slots.remove(&slot.id()).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Slot handles of every live slot.
    #[cfg(test)]
    pub(crate) fn slots(&self) -> Vec<SlotRef> {
        self.inner.lock().slots.values().cloned().collect()
    }
}
