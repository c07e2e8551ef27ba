//! Issues GPU copies for Pending slots.
//!
//! Everything here runs on the submission context, the only context allowed
//! to record GPU commands. The engine checks that precondition before it
//! builds a coordinator.

use readback_core::diagnostics::{self, DiagnosticCode};
use readback_core::profiling::profile_function;
use readback_core::{BackendError, SyncToken, TransferBackend};

use crate::slot::{SlotState, TransferSlot};
use crate::staging::StagingBufferManager;

pub(crate) struct SubmissionCoordinator<'a, B: TransferBackend> {
    backend: &'a B,
    staging: &'a StagingBufferManager,
}

impl<'a, B: TransferBackend> SubmissionCoordinator<'a, B> {
    pub(crate) fn new(backend: &'a B, staging: &'a StagingBufferManager) -> Self {
        Self { backend, staging }
    }

    /// Copy `surface` into a staging buffer owned by `slot`.
    ///
    /// On success the slot is InFlight. On failure it is in Error with no
    /// buffer attached, and the error is returned as well.
    pub(crate) fn submit(
        &self,
        slot: &mut TransferSlot,
        surface: &B::Surface,
    ) -> Result<SyncToken, BackendError> {
        profile_function!();
        debug_assert_eq!(slot.state(), SlotState::Pending);
        diagnostics::emit("submit: begin", DiagnosticCode::Begin);

        let result = self
            .backend
            .describe(surface)
            .and_then(|desc| Ok((desc, self.backend.submit(surface, &desc)?)));

        match result {
            Ok((desc, token)) => {
                let buffer = self.staging.acquire(desc.byte_len());
                tracing::debug!(
                    slot = %slot.id(),
                    %token,
                    width = desc.width,
                    height = desc.height,
                    bytes = desc.byte_len(),
                    "submitted readback"
                );
                slot.begin_transfer(buffer, token);
                diagnostics::emit("submit: end", DiagnosticCode::End);
                Ok(token)
            }
            Err(error) => {
                tracing::warn!(slot = %slot.id(), "readback submission failed: {}", error);
                diagnostics::emit("submit: failed", DiagnosticCode::Fault);
                slot.fail(error.clone());
                Err(error)
            }
        }
    }
}
