//! Consumer-facing handle to one readback.

use std::fmt;
use std::ops::Deref;

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};
use readback_core::{BackendError, TransferBackend};

use crate::engine::ReadbackEngine;
use crate::error::ReadbackError;
use crate::registry::SlotRef;
use crate::slot::{SlotId, SlotState, TransferSlot};

/// An asynchronous readback of one surface.
///
/// Poll it with [`update`](Self::update) until [`is_done`](Self::is_done) or
/// [`has_error`](Self::has_error), then read the bytes with
/// [`data`](Self::data). Dropping the request disposes it.
pub struct ReadbackRequest<B: TransferBackend> {
    engine: ReadbackEngine<B>,
    id: SlotId,
    slot: SlotRef,
    /// Last state observed by [`update`](Self::update).
    state: SlotState,
    disposed: bool,
}

impl<B: TransferBackend> ReadbackRequest<B> {
    pub(crate) fn new(engine: ReadbackEngine<B>, id: SlotId, slot: SlotRef, state: SlotState) -> Self {
        Self {
            engine,
            id,
            slot,
            state,
            disposed: false,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Check the GPU for completion without blocking.
    ///
    /// Does nothing once the request has settled or was disposed.
    pub fn update(&mut self) -> SlotState {
        if self.disposed {
            return SlotState::Disposed;
        }
        if self.state == SlotState::InFlight {
            self.state = self.engine.update_slot(&self.slot);
        } else if self.state == SlotState::Pending {
            // Deferred requests are submitted by `submit_pending`.
            self.state = self.slot.read_recursive().state();
        }
        self.state
    }

    /// State as of the last [`update`](Self::update).
    pub fn state(&self) -> SlotState {
        if self.disposed {
            SlotState::Disposed
        } else {
            self.state
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == SlotState::Done
    }

    pub fn has_error(&self) -> bool {
        self.state() == SlotState::Error
    }

    /// The failure that put this request in the error state.
    pub fn error(&self) -> Option<BackendError> {
        if !self.has_error() {
            return None;
        }
        self.slot.read_recursive().fault().cloned()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Borrow the read-back bytes.
    ///
    /// Only available once the request is Done. The view shares the slot with
    /// other readers: more views, [`to_vec`](Self::to_vec),
    /// [`error`](Self::error) and [`ReadbackEngine::state_of`] all work while
    /// it is alive. It borrows the request, so the request cannot be disposed
    /// until the view is dropped.
    pub fn data(&self) -> Result<ReadbackView<'_>, ReadbackError> {
        match self.state() {
            SlotState::Done => {}
            SlotState::Disposed => return Err(ReadbackError::UseAfterDispose(self.id)),
            SlotState::Error => {
                return Err(match self.error() {
                    Some(fault) => fault.into(),
                    None => ReadbackError::NotReady(self.id),
                });
            }
            SlotState::Pending | SlotState::InFlight => return Err(ReadbackError::NotReady(self.id)),
        }

        RwLockReadGuard::try_map(self.slot.read_recursive(), TransferSlot::bytes)
            .map(|bytes| ReadbackView { bytes })
            .map_err(|_| ReadbackError::NotReady(self.id))
    }

    /// Copy the read-back bytes out.
    pub fn to_vec(&self) -> Result<Vec<u8>, ReadbackError> {
        Ok(self.data()?.to_vec())
    }

    /// Release the slot and its staging buffer.
    ///
    /// Calling it again does nothing. If the copy is still in flight the
    /// buffer is released once the GPU settles it, see
    /// [`ReadbackEngine::maintain`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.engine.dispose_slot(&self.slot);
        tracing::trace!(slot = %self.id, "disposed readback request");
    }
}

impl<B: TransferBackend> Drop for ReadbackRequest<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<B: TransferBackend> fmt::Debug for ReadbackRequest<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadbackRequest")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Read-only view of a completed readback.
pub struct ReadbackView<'a> {
    bytes: MappedRwLockReadGuard<'a, [u8]>,
}

impl Deref for ReadbackView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for ReadbackView<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for ReadbackView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadbackView").field("len", &self.bytes.len()).finish()
    }
}
