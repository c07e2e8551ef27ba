//! Bounded FIFO of outstanding readbacks.
//!
//! Frame-capture style consumers request one readback per frame and consume
//! them in order. The queue caps how many can be outstanding so a stalled GPU
//! shows up as [`ReadbackError::QueueFull`] instead of unbounded growth.

use std::collections::VecDeque;

use readback_core::{BackendError, TransferBackend};

use crate::config::EngineConfig;
use crate::engine::ReadbackEngine;
use crate::error::ReadbackError;
use crate::request::ReadbackRequest;
use crate::slot::{SlotId, SlotState};

/// What [`ReadbackQueue::drain`] hands to its callback for each settled request.
#[derive(Debug)]
pub enum ReadbackOutcome<'a> {
    /// The copy completed; the bytes are valid for the duration of the callback.
    Done { id: SlotId, bytes: &'a [u8] },
    Failed { id: SlotId, error: BackendError },
}

impl ReadbackOutcome<'_> {
    pub fn id(&self) -> SlotId {
        match self {
            Self::Done { id, .. } | Self::Failed { id, .. } => *id,
        }
    }
}

pub struct ReadbackQueue<B: TransferBackend> {
    pending: VecDeque<ReadbackRequest<B>>,
    capacity: usize,
}

impl<B: TransferBackend> ReadbackQueue<B> {
    /// Queue sized by [`EngineConfig::queue_capacity`].
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_capacity(config.queue_capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Request a readback of `surface` and enqueue it.
    ///
    /// Fails with [`ReadbackError::QueueFull`] without touching the engine
    /// when `capacity` requests are already outstanding.
    pub fn request(&mut self, engine: &ReadbackEngine<B>, surface: &B::Surface) -> Result<SlotId, ReadbackError> {
        if self.is_full() {
            return Err(self.full());
        }
        let request = engine.request_readback(surface)?;
        let id = request.id();
        self.pending.push_back(request);
        Ok(id)
    }

    /// Enqueue a request created elsewhere, handing it back when full.
    pub fn try_push(&mut self, request: ReadbackRequest<B>) -> Result<SlotId, (ReadbackRequest<B>, ReadbackError)> {
        if self.is_full() {
            let error = self.full();
            return Err((request, error));
        }
        let id = request.id();
        self.pending.push_back(request);
        Ok(id)
    }

    /// Poll the queue front to back, handing every settled request to
    /// `consume` and disposing it afterwards.
    ///
    /// Stops at the first request that is still in flight so outcomes are
    /// always delivered in request order. Returns how many were consumed.
    pub fn drain(&mut self, mut consume: impl FnMut(ReadbackOutcome<'_>)) -> usize {
        let mut consumed = 0;
        while let Some(front) = self.pending.front_mut() {
            match front.update() {
                SlotState::Pending | SlotState::InFlight => break,
                SlotState::Done => {
                    let id = front.id();
                    match front.data() {
                        Ok(bytes) => consume(ReadbackOutcome::Done { id, bytes: &*bytes }),
                        Err(error) => tracing::error!(slot = %id, "completed readback unreadable: {}", error),
                    }
                }
                SlotState::Error => {
                    let id = front.id();
                    let error = front
                        .error()
                        .unwrap_or_else(|| BackendError::TransferFault("unknown failure".to_string()));
                    consume(ReadbackOutcome::Failed { id, error });
                }
                SlotState::Disposed => {}
            }

            if let Some(mut request) = self.pending.pop_front() {
                request.dispose();
            }
            consumed += 1;
        }
        consumed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dispose every queued request.
    pub fn clear(&mut self) {
        for mut request in self.pending.drain(..) {
            request.dispose();
        }
    }

    fn full(&self) -> ReadbackError {
        tracing::warn!(capacity = self.capacity, "too many readback requests, dropping request");
        ReadbackError::QueueFull {
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readback_test_utils::{MockBackend, MockSurface, OPAQUE_BLACK};

    #[test]
    fn test_queue_rejects_when_full() {
        let engine = ReadbackEngine::new(MockBackend::with_latency(10));
        let mut queue = ReadbackQueue::with_capacity(2);
        let surface = MockSurface::filled(1, 1, OPAQUE_BLACK);

        queue.request(&engine, &surface).unwrap();
        queue.request(&engine, &surface).unwrap();
        assert_eq!(
            queue.request(&engine, &surface),
            Err(ReadbackError::QueueFull { capacity: 2 })
        );
        assert_eq!(engine.backend().count_submits(), 2);

        let extra = engine.request_readback(&surface).unwrap();
        let (returned, error) = queue.try_push(extra).unwrap_err();
        assert_eq!(error, ReadbackError::QueueFull { capacity: 2 });
        assert_eq!(returned.state(), SlotState::InFlight);
    }

    #[test]
    fn test_drain_is_in_order() {
        let backend = MockBackend::new();
        let engine = ReadbackEngine::new(backend);
        let mut queue = ReadbackQueue::new(engine.config());

        let slow = MockSurface::filled(1, 1, [1, 1, 1, 1]);
        let fast = MockSurface::filled(1, 1, [2, 2, 2, 2]);
        engine.backend().set_latency(3);
        let first = queue.request(&engine, &slow).unwrap();
        engine.backend().set_latency(0);
        let second = queue.request(&engine, &fast).unwrap();

        let mut seen = Vec::new();
        assert_eq!(queue.drain(|outcome| seen.push(outcome.id())), 0);
        assert!(seen.is_empty(), "second must wait behind first");

        while queue.drain(|outcome| seen.push(outcome.id())) == 0 {}
        assert_eq!(seen, vec![first, second]);
        assert!(queue.is_empty());
        assert_eq!(engine.stats().active_slots, 0);
    }

    #[test]
    fn test_drain_reports_failures() {
        let engine = ReadbackEngine::new(MockBackend::with_latency(1));
        let mut queue = ReadbackQueue::with_capacity(4);
        let surface = MockSurface::filled(1, 1, OPAQUE_BLACK);
        queue.request(&engine, &surface).unwrap();
        engine.backend().lose_device("driver reset");

        let mut failures = 0;
        queue.drain(|outcome| {
            if let ReadbackOutcome::Failed { error, .. } = outcome {
                assert!(matches!(error, BackendError::DeviceLost(_)));
                failures += 1;
            }
        });
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_drain_callback_can_query_the_engine() {
        let engine = ReadbackEngine::new(MockBackend::new());
        let mut queue = ReadbackQueue::with_capacity(4);
        let surface = MockSurface::filled(1, 1, OPAQUE_BLACK);
        queue.request(&engine, &surface).unwrap();

        let mut states = Vec::new();
        queue.drain(|outcome| states.push(engine.state_of(outcome.id())));
        assert_eq!(states, vec![Ok(SlotState::Done)]);
    }

    #[test]
    fn test_clear_disposes_everything() {
        let engine = ReadbackEngine::new(MockBackend::new());
        let mut queue = ReadbackQueue::with_capacity(4);
        let surface = MockSurface::filled(1, 1, OPAQUE_BLACK);
        queue.request(&engine, &surface).unwrap();
        queue.request(&engine, &surface).unwrap();

        queue.clear();
        assert!(queue.is_empty());
        engine.maintain();
        assert_eq!(engine.stats().active_slots, 0);
    }
}
