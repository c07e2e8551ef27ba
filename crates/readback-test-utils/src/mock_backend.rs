//! Mock implementation of [`TransferBackend`] for testing.
//!
//! The mock behaves like a GPU that finishes each copy after a configurable
//! number of polls. Tests can pause completion, lose the device, or inject
//! faults, and afterwards inspect every call the engine made.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use readback_core::alloc::HashMap;
use readback_core::{BackendError, FenceStatus, SurfaceDesc, SyncToken, TransferBackend};

static NEXT_SURFACE_ID: AtomicUsize = AtomicUsize::new(1);

/// Records a backend call for verification in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Describe { surface_id: usize },
    Submit { surface_id: usize, bytes: usize },
    Poll { token: SyncToken },
    Release { token: SyncToken },
}

/// A fake render target.
///
/// Cloning is cheap and clones share contents, so a test can keep a handle
/// to rewrite or destroy a surface the engine still references.
#[derive(Debug, Clone)]
pub struct MockSurface {
    inner: Arc<MockSurfaceInner>,
}

#[derive(Debug)]
struct MockSurfaceInner {
    id: usize,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    pixels: Mutex<Vec<u8>>,
    destroyed: AtomicBool,
}

impl MockSurface {
    /// Create a surface holding `pixels`.
    ///
    /// A length that does not match `width * height * bytes_per_pixel` makes
    /// the surface incompatible, which `describe` reports.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32, pixels: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(MockSurfaceInner {
                id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
                width,
                height,
                bytes_per_pixel,
                pixels: Mutex::new(pixels),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// RGBA8 surface filled with a single color.
    pub fn filled(width: u32, height: u32, pixel: [u8; 4]) -> Self {
        Self::new(width, height, 4, crate::solid_pixels(width, height, pixel))
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Replace the surface contents, e.g. to simulate the next rendered frame.
    pub fn write(&self, pixels: Vec<u8>) {
        *self.inner.pixels.lock() = pixels;
    }

    /// Mark the surface as destroyed; later submissions fail.
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct MockCopy {
    snapshot: Vec<u8>,
    polls_left: u32,
    settled: bool,
    fault: Option<BackendError>,
}

#[derive(Debug, Default)]
struct MockState {
    next_token: u64,
    latency: u32,
    paused: bool,
    device_lost: Option<String>,
    submit_fault: Option<BackendError>,
    copies: HashMap<SyncToken, MockCopy>,
    early_releases: Vec<SyncToken>,
}

/// Mock implementation of [`TransferBackend`].
///
/// # Example
///
/// ```rust
/// use readback_test_utils::{BackendCall, MockBackend, MockSurface};
/// use readback_core::TransferBackend;
///
/// let backend = MockBackend::new();
/// let surface = MockSurface::filled(1, 1, [1, 2, 3, 4]);
/// let desc = backend.describe(&surface).unwrap();
/// backend.submit(&surface, &desc).unwrap();
///
/// assert_eq!(backend.count_submits(), 1);
/// assert!(matches!(backend.calls()[1], BackendCall::Submit { bytes: 4, .. }));
/// ```
#[derive(Debug, Default)]
pub struct MockBackend {
    /// Recorded calls for verification
    calls: Mutex<Vec<BackendCall>>,
    state: Mutex<MockState>,
}

impl MockBackend {
    /// A backend whose copies complete on the first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose copies report `Pending` for `polls` polls before signaling.
    pub fn with_latency(polls: u32) -> Self {
        let backend = Self::new();
        backend.set_latency(polls);
        backend
    }

    /// Latency applied to copies submitted from now on.
    pub fn set_latency(&self, polls: u32) {
        self.state.lock().latency = polls;
    }

    /// Freeze the simulated GPU: every poll reports `Pending` until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
    }

    /// Lose the device; every unsettled copy fails on its next poll.
    pub fn lose_device(&self, reason: impl Into<String>) {
        self.state.lock().device_lost = Some(reason.into());
    }

    /// Make the next `submit` fail with `error`.
    pub fn fail_next_submit(&self, error: BackendError) {
        self.state.lock().submit_fault = Some(error);
    }

    /// Make the copy behind `token` fail on its next poll.
    pub fn fail_copy(&self, token: SyncToken, error: BackendError) {
        if let Some(copy) = self.state.lock().copies.get_mut(&token) {
            copy.fault = Some(error);
        }
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count_submits(&self) -> usize {
        self.count(|call| matches!(call, BackendCall::Submit { .. }))
    }

    pub fn count_polls(&self) -> usize {
        self.count(|call| matches!(call, BackendCall::Poll { .. }))
    }

    pub fn count_releases(&self) -> usize {
        self.count(|call| matches!(call, BackendCall::Release { .. }))
    }

    /// Tokens of submitted copies that have neither signaled nor failed yet.
    pub fn unsettled(&self) -> Vec<SyncToken> {
        let state = self.state.lock();
        let mut tokens: Vec<_> = state
            .copies
            .iter()
            .filter(|(_, copy)| !copy.settled)
            .map(|(token, _)| *token)
            .collect();
        tokens.sort();
        tokens
    }

    /// Number of copies that were submitted and not yet released.
    pub fn live_copies(&self) -> usize {
        self.state.lock().copies.len()
    }

    /// Tokens released while their copy could still have been writing.
    ///
    /// A correct engine never produces any.
    pub fn early_releases(&self) -> Vec<SyncToken> {
        self.state.lock().early_releases.clone()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    fn count(&self, filter: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| filter(call)).count()
    }
}

impl TransferBackend for MockBackend {
    type Surface = MockSurface;

    fn describe(&self, surface: &MockSurface) -> Result<SurfaceDesc, BackendError> {
        self.record(BackendCall::Describe {
            surface_id: surface.id(),
        });

        if surface.is_destroyed() {
            return Err(BackendError::InvalidSurface(format!(
                "surface {} was destroyed",
                surface.id()
            )));
        }

        let inner = &surface.inner;
        let desc = SurfaceDesc::new(inner.width, inner.height, inner.bytes_per_pixel);
        if desc.is_empty() {
            return Err(BackendError::InvalidSurface(format!(
                "surface {} is empty",
                surface.id()
            )));
        }
        let stored = inner.pixels.lock().len();
        if stored != desc.byte_len() {
            return Err(BackendError::InvalidSurface(format!(
                "surface {} holds {} bytes, format implies {}",
                surface.id(),
                stored,
                desc.byte_len()
            )));
        }
        Ok(desc)
    }

    fn submit(&self, surface: &MockSurface, desc: &SurfaceDesc) -> Result<SyncToken, BackendError> {
        self.record(BackendCall::Submit {
            surface_id: surface.id(),
            bytes: desc.byte_len(),
        });

        let mut state = self.state.lock();
        if let Some(error) = state.submit_fault.take() {
            return Err(error);
        }
        if let Some(reason) = &state.device_lost {
            return Err(BackendError::DeviceLost(reason.clone()));
        }

        state.next_token += 1;
        let token = SyncToken::new(state.next_token);
        let copy = MockCopy {
            snapshot: surface.inner.pixels.lock().clone(),
            polls_left: state.latency,
            settled: false,
            fault: None,
        };
        state.copies.insert(token, copy);
        Ok(token)
    }

    fn poll(&self, token: SyncToken, dst: &mut [u8]) -> Result<FenceStatus, BackendError> {
        self.record(BackendCall::Poll { token });

        let mut state = self.state.lock();
        let paused = state.paused;
        let device_lost = state.device_lost.clone();
        let Some(copy) = state.copies.get_mut(&token) else {
            return Err(BackendError::TransferFault(format!("unknown {token}")));
        };

        if copy.settled {
            return match &copy.fault {
                Some(error) => Err(error.clone()),
                None => Ok(FenceStatus::Signaled),
            };
        }
        if let Some(reason) = device_lost {
            copy.fault = Some(BackendError::DeviceLost(reason));
        }
        if let Some(error) = &copy.fault {
            copy.settled = true;
            return Err(error.clone());
        }
        if paused {
            return Ok(FenceStatus::Pending);
        }
        if copy.polls_left > 0 {
            copy.polls_left -= 1;
            return Ok(FenceStatus::Pending);
        }
        if dst.len() != copy.snapshot.len() {
            let error = BackendError::TransferFault(format!(
                "destination holds {} bytes, copy produced {}",
                dst.len(),
                copy.snapshot.len()
            ));
            copy.fault = Some(error.clone());
            copy.settled = true;
            return Err(error);
        }

        dst.copy_from_slice(&copy.snapshot);
        copy.settled = true;
        Ok(FenceStatus::Signaled)
    }

    fn release(&self, token: SyncToken) {
        self.record(BackendCall::Release { token });

        let mut state = self.state.lock();
        if let Some(copy) = state.copies.remove(&token)
            && !copy.settled
        {
            state.early_releases.push(token);
        }
    }
}
