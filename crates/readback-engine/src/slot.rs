//! Transfer slots: the per-request state the engine tracks.

use std::fmt;

use readback_core::{BackendError, SyncToken};

use crate::staging::StagingBuffer;

/// Process-wide identifier of a transfer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

impl SlotId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a transfer slot.
///
/// Slots only move forward:
///
/// ```text
/// Pending -> InFlight -> Done  -> Disposed
///    |          |
///    |          +-----> Error -> Disposed
///    +----------------> Error
///    +----------------> Disposed   (never submitted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Allocated, copy not submitted yet.
    Pending,
    /// Copy submitted, waiting for the GPU.
    InFlight,
    /// Copy completed; the staging buffer is readable.
    Done,
    /// Submission or transfer failed.
    Error,
    /// Retired; nothing is left to read.
    Disposed,
}

impl SlotState {
    /// `true` once the GPU can no longer touch the staging buffer.
    #[inline]
    pub fn is_settled(self) -> bool {
        matches!(self, SlotState::Done | SlotState::Error)
    }

    fn can_advance_to(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, Error)
                | (Pending, Disposed)
                | (InFlight, Done)
                | (InFlight, Error)
                | (Done, Disposed)
                | (Error, Disposed)
        )
    }
}

/// State the engine keeps for one readback.
///
/// The slot owns its staging buffer from submission until it is disposed.
#[derive(Debug)]
pub(crate) struct TransferSlot {
    id: SlotId,
    state: SlotState,
    buffer: Option<StagingBuffer>,
    token: Option<SyncToken>,
    fault: Option<BackendError>,
    /// Set when the request was disposed while the copy was in flight.
    retire_on_settle: bool,
}

impl TransferSlot {
    pub(crate) fn new(id: SlotId) -> Self {
        Self {
            id,
            state: SlotState::Pending,
            buffer: None,
            token: None,
            fault: None,
            retire_on_settle: false,
        }
    }

    pub(crate) fn id(&self) -> SlotId {
        self.id
    }

    pub(crate) fn state(&self) -> SlotState {
        self.state
    }

    pub(crate) fn token(&self) -> Option<SyncToken> {
        self.token
    }

    pub(crate) fn fault(&self) -> Option<&BackendError> {
        self.fault.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn buffer(&self) -> Option<&StagingBuffer> {
        self.buffer.as_ref()
    }

    pub(crate) fn buffer_mut(&mut self) -> Option<&mut StagingBuffer> {
        self.buffer.as_mut()
    }

    pub(crate) fn retire_on_settle(&self) -> bool {
        self.retire_on_settle
    }

    pub(crate) fn mark_retire_on_settle(&mut self) {
        self.retire_on_settle = true;
    }

    /// Bytes of a completed transfer.
    pub(crate) fn bytes(&self) -> Option<&[u8]> {
        if self.state != SlotState::Done {
            return None;
        }
        self.buffer.as_ref().map(StagingBuffer::as_slice)
    }

    /// Pending -> InFlight, taking ownership of the staging buffer.
    pub(crate) fn begin_transfer(&mut self, buffer: StagingBuffer, token: SyncToken) -> bool {
        if !self.advance(SlotState::InFlight) {
            return false;
        }
        self.buffer = Some(buffer);
        self.token = Some(token);
        true
    }

    /// InFlight -> Done.
    pub(crate) fn complete(&mut self) -> bool {
        self.advance(SlotState::Done)
    }

    /// Pending/InFlight -> Error.
    pub(crate) fn fail(&mut self, fault: BackendError) -> bool {
        if !self.advance(SlotState::Error) {
            return false;
        }
        self.fault = Some(fault);
        true
    }

    /// Hand back the staging buffer and sync token and mark the slot disposed.
    ///
    /// Only valid from a state where the GPU can no longer write the buffer.
    pub(crate) fn dispose(&mut self) -> Option<(Option<StagingBuffer>, Option<SyncToken>)> {
        if !self.advance(SlotState::Disposed) {
            return None;
        }
        Some((self.buffer.take(), self.token.take()))
    }

    fn advance(&mut self, next: SlotState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::error!(
                slot = %self.id,
                "rejected slot transition {:?} -> {:?}",
                self.state,
                next
            );
            return false;
        }
        tracing::debug!(slot = %self.id, "slot {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }
}
