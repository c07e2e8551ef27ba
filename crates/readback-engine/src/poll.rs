//! Non-blocking completion checks for in-flight slots.
//!
//! Runs on the consumer context. Polling a slot that is not InFlight does
//! nothing, so callers can poll as often as they like.

use readback_core::diagnostics::{self, DiagnosticCode};
use readback_core::profiling::profile_function;
use readback_core::{FenceStatus, TransferBackend};

use crate::slot::{SlotState, TransferSlot};

pub(crate) struct CompletionPoller<'a, B: TransferBackend> {
    backend: &'a B,
}

impl<'a, B: TransferBackend> CompletionPoller<'a, B> {
    pub(crate) fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Check the slot's sync token and move it to Done or Error once the
    /// GPU has settled the copy. Returns the resulting state.
    pub(crate) fn poll(&self, slot: &mut TransferSlot) -> SlotState {
        profile_function!();
        if slot.state() != SlotState::InFlight {
            return slot.state();
        }

        let id = slot.id();
        let Some(token) = slot.token() else {
            tracing::error!(slot = %id, "in-flight slot without a sync token");
            return SlotState::InFlight;
        };
        let status = match slot.buffer_mut() {
            Some(buffer) => self.backend.poll(token, buffer.as_mut_slice()),
            None => {
                tracing::error!(slot = %id, "in-flight slot without a staging buffer");
                return SlotState::InFlight;
            }
        };

        match status {
            Ok(FenceStatus::Pending) => {
                tracing::trace!(slot = %slot.id(), %token, "readback still in flight");
            }
            Ok(FenceStatus::Signaled) => {
                tracing::debug!(slot = %slot.id(), %token, "readback complete");
                slot.complete();
            }
            Err(error) => {
                tracing::error!(slot = %slot.id(), %token, "readback failed: {}", error);
                diagnostics::emit("poll: transfer failed", DiagnosticCode::Fault);
                slot.fail(error);
            }
        }
        slot.state()
    }
}
