//! The readback engine: ties the slot registry, staging buffers and the bound
//! [`TransferBackend`] together.
//!
//! # Contexts
//!
//! | Operation | Context |
//! |-----------|---------|
//! | [`ReadbackEngine::request_readback`], [`ReadbackEngine::submit_pending`] | submission |
//! | [`ReadbackEngine::defer_readback`], [`ReadbackEngine::maintain`], request methods | consumer |
//!
//! Both contexts may be one thread. When they are not, the engine is shared
//! between them by cloning it (it is an `Arc` internally).
//!
//! # Example
//!
//! ```ignore
//! use readback_engine::{ReadbackEngine, WgpuBackend};
//!
//! let engine = ReadbackEngine::new(WgpuBackend::new(&context));
//! let mut request = engine.request_readback(&texture)?;
//!
//! // Once per frame
//! request.update();
//! if request.is_done() {
//!     let bytes = request.data()?;
//!     // ...
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use readback_core::TransferBackend;
use readback_core::diagnostics::{self, DiagnosticCode};
use readback_core::profiling::profile_function;

use crate::config::EngineConfig;
use crate::error::ReadbackError;
use crate::poll::CompletionPoller;
use crate::registry::{SlotRef, SlotRegistry};
use crate::request::ReadbackRequest;
use crate::slot::{SlotId, SlotState, TransferSlot};
use crate::staging::{StagingBufferManager, StagingStats};
use crate::submit::SubmissionCoordinator;

/// Snapshot of engine bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Slots that have not been recycled yet.
    pub active_slots: usize,
    /// Disposed requests whose copy has not settled yet.
    pub orphaned_slots: usize,
    /// Deferred requests waiting for [`ReadbackEngine::submit_pending`].
    pub deferred_submissions: usize,
    pub staging: StagingStats,
}

pub(crate) struct EngineShared<B: TransferBackend> {
    backend: B,
    config: EngineConfig,
    registry: SlotRegistry,
    staging: StagingBufferManager,
    deferred: Mutex<VecDeque<(SlotId, B::Surface)>>,
    orphans: Mutex<Vec<SlotRef>>,
    submission_thread: OnceLock<ThreadId>,
}

/// Asynchronous GPU-to-CPU readback engine bound to one backend.
pub struct ReadbackEngine<B: TransferBackend> {
    shared: Arc<EngineShared<B>>,
}

impl<B: TransferBackend> Clone for ReadbackEngine<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<B: TransferBackend> ReadbackEngine<B> {
    /// Create an engine with the default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: B, config: EngineConfig) -> Self {
        Self::with_registry(backend, config, SlotRegistry::new())
    }

    pub(crate) fn with_registry(backend: B, config: EngineConfig, registry: SlotRegistry) -> Self {
        tracing::info!(
            backend = std::any::type_name::<B>(),
            "created readback engine"
        );
        let staging = StagingBufferManager::new(&config);
        Self {
            shared: Arc::new(EngineShared {
                backend,
                config,
                registry,
                staging,
                deferred: Mutex::new(VecDeque::new()),
                orphans: Mutex::new(Vec::new()),
                submission_thread: OnceLock::new(),
            }),
        }
    }

    /// The backend bound to this engine.
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Bind the calling thread as the submission context.
    ///
    /// Optional: without it the first thread that submits is bound. Fails
    /// with [`ReadbackError::WrongContext`] if another thread is already bound.
    pub fn bind_submission_context(&self) -> Result<(), ReadbackError> {
        self.check_submission_context()
    }

    /// Allocate a slot and submit the copy of `surface` right away.
    ///
    /// Must be called from the submission context. A surface the backend
    /// rejects does not make this fail: the returned request is already in
    /// the error state, see [`ReadbackRequest::has_error`].
    pub fn request_readback(&self, surface: &B::Surface) -> Result<ReadbackRequest<B>, ReadbackError> {
        profile_function!();
        self.check_submission_context()?;

        let (id, slot) = self.shared.registry.allocate();
        let state = {
            let mut guard = slot.write();
            // A rejected surface is recorded in the slot.
            let _ = self.coordinator().submit(&mut guard, surface);
            guard.state()
        };
        Ok(ReadbackRequest::new(self.clone(), id, slot, state))
    }

    /// Allocate a Pending slot and queue `surface` for the next
    /// [`submit_pending`](Self::submit_pending).
    ///
    /// Safe to call from the consumer context.
    pub fn defer_readback(&self, surface: B::Surface) -> ReadbackRequest<B> {
        let (id, slot) = self.shared.registry.allocate();
        self.shared.deferred.lock().push_back((id, surface));
        tracing::debug!(slot = %id, "deferred readback");
        ReadbackRequest::new(self.clone(), id, slot, SlotState::Pending)
    }

    /// Submit every deferred readback whose request is still alive.
    ///
    /// Must be called from the submission context. Returns how many copies
    /// were submitted (failed submissions are not counted).
    pub fn submit_pending(&self) -> Result<usize, ReadbackError> {
        profile_function!();
        self.check_submission_context()?;

        let deferred = std::mem::take(&mut *self.shared.deferred.lock());
        let mut submitted = 0;
        for (id, surface) in deferred {
            let Ok(slot) = self.shared.registry.lookup(id) else {
                tracing::trace!(slot = %id, "deferred readback disposed before submission");
                continue;
            };
            let mut guard = slot.write();
            if guard.state() != SlotState::Pending {
                continue;
            }
            if self.coordinator().submit(&mut guard, &surface).is_ok() {
                submitted += 1;
            }
        }
        Ok(submitted)
    }

    /// Retire disposed requests whose copies have settled since.
    ///
    /// Call periodically from the consumer context. Returns the number of
    /// slots retired. Whatever is still orphaned when the last engine handle
    /// drops gets one final poll then.
    pub fn maintain(&self) -> usize {
        profile_function!();
        self.shared.collect_orphans()
    }

    /// Current state of a slot by id.
    pub fn state_of(&self, id: SlotId) -> Result<SlotState, ReadbackError> {
        let slot = self.shared.registry.lookup(id)?;
        let state = slot.read_recursive().state();
        Ok(state)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_slots: self.shared.registry.len(),
            orphaned_slots: self.shared.orphans.lock().len(),
            deferred_submissions: self.shared.deferred.lock().len(),
            staging: self.shared.staging.stats(),
        }
    }

    /// Free pooled staging buffers.
    pub fn trim_staging(&self) {
        self.shared.staging.trim();
    }

    /// Poll one slot on behalf of its request.
    pub(crate) fn update_slot(&self, slot: &SlotRef) -> SlotState {
        CompletionPoller::new(&self.shared.backend).poll(&mut slot.write())
    }

    /// Dispose a slot on behalf of its request.
    ///
    /// In-flight slots are handed to [`maintain`](Self::maintain) and retired
    /// once the GPU settles them; their buffer stays untouched until then.
    /// A Pending slot also loses its deferred submission.
    pub(crate) fn dispose_slot(&self, slot: &SlotRef) {
        let mut guard = slot.write();
        match guard.state() {
            SlotState::Disposed => {}
            SlotState::InFlight => {
                if !guard.retire_on_settle() {
                    guard.mark_retire_on_settle();
                    tracing::debug!(slot = %guard.id(), "disposed while in flight, deferring release");
                    diagnostics::emit("dispose: deferred until settled", DiagnosticCode::Warning);
                    drop(guard);
                    self.shared.orphans.lock().push(slot.clone());
                }
            }
            SlotState::Pending => {
                let id = guard.id();
                self.shared.retire(&mut guard);
                drop(guard);
                self.shared.deferred.lock().retain(|(queued, _)| *queued != id);
            }
            SlotState::Done | SlotState::Error => self.shared.retire(&mut guard),
        }
    }

    fn coordinator(&self) -> SubmissionCoordinator<'_, B> {
        SubmissionCoordinator::new(&self.shared.backend, &self.shared.staging)
    }

    fn check_submission_context(&self) -> Result<(), ReadbackError> {
        if !self.shared.config.enforce_submission_context {
            return Ok(());
        }
        let current = thread::current().id();
        let bound = *self.shared.submission_thread.get_or_init(|| current);
        if bound == current {
            Ok(())
        } else {
            tracing::error!(
                ?bound,
                ?current,
                "readback submission attempted outside the submission context"
            );
            diagnostics::emit("submit: wrong context", DiagnosticCode::Fault);
            Err(ReadbackError::WrongContext)
        }
    }
}

impl<B: TransferBackend> EngineShared<B> {
    /// Poll every orphaned slot once and retire the settled ones.
    fn collect_orphans(&self) -> usize {
        let orphans = std::mem::take(&mut *self.orphans.lock());
        if orphans.is_empty() {
            return 0;
        }

        let poller = CompletionPoller::new(&self.backend);
        let mut still_in_flight = Vec::new();
        let mut retired = 0;
        for slot in orphans {
            let mut guard = slot.write();
            if poller.poll(&mut guard).is_settled() {
                self.retire(&mut guard);
                retired += 1;
            } else {
                drop(guard);
                still_in_flight.push(slot);
            }
        }

        if !still_in_flight.is_empty() {
            self.orphans.lock().extend(still_in_flight);
        }
        if retired > 0 {
            tracing::debug!(retired, "retired orphaned readbacks");
        }
        retired
    }

    /// Release the slot's staging buffer and backend resources and recycle it.
    fn retire(&self, slot: &mut TransferSlot) {
        let Some((buffer, token)) = slot.dispose() else {
            return;
        };
        if let Some(buffer) = buffer {
            self.staging.release(buffer);
        }
        if let Some(token) = token {
            self.backend.release(token);
        }
        self.registry.recycle(slot);
        diagnostics::emit("dispose: end", DiagnosticCode::End);
    }
}

impl<B: TransferBackend> Drop for EngineShared<B> {
    fn drop(&mut self) {
        self.collect_orphans();
        let unsettled = self.orphans.get_mut().len();
        if unsettled > 0 {
            // Never released early; the backend reclaims them when it drops.
            tracing::warn!(unsettled, "readback engine dropped with copies still in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readback_core::BackendError;
    use readback_test_utils::{MockBackend, MockSurface, OPAQUE_BLACK};

    fn engine(latency: u32) -> ReadbackEngine<MockBackend> {
        ReadbackEngine::new(MockBackend::with_latency(latency))
    }

    #[test]
    fn test_live_slots_never_share_staging_buffers() {
        let engine = engine(3);
        let surfaces: Vec<_> = (1..=12).map(|n| MockSurface::filled(n, n, OPAQUE_BLACK)).collect();
        let mut requests: Vec<_> = surfaces
            .iter()
            .map(|surface| engine.request_readback(surface).unwrap())
            .collect();

        // Recycle a few so later requests draw from the pool.
        for request in requests.iter_mut().take(4) {
            while !request.is_done() {
                request.update();
            }
            request.dispose();
        }
        for surface in &surfaces[..4] {
            requests.push(engine.request_readback(surface).unwrap());
        }

        let mut ids: Vec<u64> = engine
            .shared
            .registry
            .slots()
            .iter()
            .filter_map(|slot| slot.read().buffer().map(|buffer| buffer.id()))
            .collect();
        let live = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(live, 12);
        assert_eq!(ids.len(), live);
        assert!(engine.stats().staging.reuses > 0);
    }

    #[test]
    fn test_retire_releases_everything_once() {
        let engine = engine(0);
        let surface = MockSurface::filled(2, 2, OPAQUE_BLACK);
        let mut request = engine.request_readback(&surface).unwrap();
        request.update();
        assert!(request.is_done());

        request.dispose();
        request.dispose();
        assert_eq!(engine.backend().count_releases(), 1);
        assert_eq!(engine.stats().staging.outstanding, 0);
        assert_eq!(engine.stats().staging.pooled_buffers, 1);
        assert_eq!(engine.stats().active_slots, 0);
    }

    #[test]
    fn test_wrong_context_is_rejected() {
        let engine = engine(0);
        engine.bind_submission_context().unwrap();
        let surface = MockSurface::filled(1, 1, OPAQUE_BLACK);

        let other = engine.clone();
        let result = std::thread::spawn(move || {
            let result = other.request_readback(&surface).map(|_| ());
            let pending = other.submit_pending();
            (result, pending)
        })
        .join()
        .unwrap();

        assert_eq!(result.0, Err(ReadbackError::WrongContext));
        assert_eq!(result.1, Err(ReadbackError::WrongContext));
        assert_eq!(engine.backend().count_submits(), 0);
    }

    #[test]
    fn test_context_check_can_be_disabled() {
        let config = EngineConfig::new().with_submission_context_check(false);
        let engine = ReadbackEngine::with_config(MockBackend::new(), config);
        engine.bind_submission_context().unwrap();

        let other = engine.clone();
        let surface = MockSurface::filled(1, 1, OPAQUE_BLACK);
        let ok = std::thread::spawn(move || other.request_readback(&surface).is_ok())
            .join()
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_submit_failure_leaves_no_buffer() {
        let engine = engine(0);
        engine
            .backend()
            .fail_next_submit(BackendError::TransferFault("queue full".to_string()));
        let request = engine
            .request_readback(&MockSurface::filled(1, 1, OPAQUE_BLACK))
            .unwrap();

        assert!(request.has_error());
        assert_eq!(engine.stats().staging.outstanding, 0);
        assert_eq!(engine.stats().staging.allocations, 0);
    }

    #[test]
    fn test_dropping_engine_retires_settled_orphans() {
        let backend = Arc::new(MockBackend::with_latency(0));
        let engine = ReadbackEngine::new(backend.clone());
        let surface = MockSurface::filled(2, 2, OPAQUE_BLACK);

        let mut request = engine.request_readback(&surface).unwrap();
        request.dispose();
        assert_eq!(engine.stats().orphaned_slots, 1);
        assert_eq!(backend.count_releases(), 0);

        // No maintain() before shutdown.
        drop(request);
        drop(engine);
        assert_eq!(backend.count_releases(), 1);
        assert!(backend.early_releases().is_empty());
    }

    #[test]
    fn test_dropping_engine_never_releases_unsettled_copies() {
        let backend = Arc::new(MockBackend::new());
        backend.pause();
        let engine = ReadbackEngine::new(backend.clone());
        let mut request = engine
            .request_readback(&MockSurface::filled(2, 2, OPAQUE_BLACK))
            .unwrap();
        request.dispose();

        drop(request);
        drop(engine);
        assert_eq!(backend.count_releases(), 0);
        assert!(backend.early_releases().is_empty());
        assert_eq!(backend.unsettled().len(), 1);
    }

    #[test]
    fn test_ids_wrap_through_engine() {
        let engine = ReadbackEngine::with_registry(
            MockBackend::new(),
            EngineConfig::default(),
            SlotRegistry::starting_at(u32::MAX),
        );
        let surface = MockSurface::filled(1, 1, OPAQUE_BLACK);
        let held = engine.request_readback(&surface).unwrap();
        let next = engine.request_readback(&surface).unwrap();
        assert_eq!(held.id().raw(), u32::MAX);
        assert_eq!(next.id().raw(), 1);
    }
}
