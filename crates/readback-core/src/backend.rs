//! The seam between the transfer engine and a concrete GPU API.
//!
//! A [`TransferBackend`] knows how to copy the contents of one of its surfaces
//! into CPU memory and how to tell, without blocking, whether that copy has
//! landed. The engine binds exactly one backend for its whole lifetime; picking
//! between a native readback path and a custom one happens once, when the
//! engine is built, never per request.
//!
//! # Contexts
//!
//! [`TransferBackend::describe`] and [`TransferBackend::submit`] run on the
//! submission context (the only context allowed to record GPU commands).
//! [`TransferBackend::poll`] and [`TransferBackend::release`] run on the
//! consumer context. Implementations must publish completion with proper
//! memory ordering (fence plus acquire/release), not with a plain flag.

use std::fmt;
use std::sync::Arc;

/// Failures a backend can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The surface is destroyed, empty, or in a format the backend cannot copy.
    #[error("invalid surface: {0}")]
    InvalidSurface(String),
    /// The device went away while the copy was outstanding.
    #[error("device lost: {0}")]
    DeviceLost(String),
    /// The copy or the mapping of its destination failed.
    #[error("transfer fault: {0}")]
    TransferFault(String),
}

/// Marker in the GPU command stream after which a copy is visible to the CPU.
///
/// Tokens are issued by the backend and are unique per backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncToken(u64);

impl SyncToken {
    /// Wrap a raw backend token value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync#{}", self.0)
    }
}

/// Result of a non-blocking fence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU has not reached the token yet; the destination is untouched.
    Pending,
    /// The copy completed and the destination holds the surface bytes.
    Signaled,
}

/// Shape of a surface as seen by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl SurfaceDesc {
    pub const fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// Tightly packed row size in bytes.
    #[inline]
    pub const fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    /// Total number of bytes a completed readback yields.
    #[inline]
    pub const fn byte_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    /// `true` when the surface holds no pixels at all.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }
}

/// GPU-side half of an asynchronous readback.
///
/// # Example
///
/// ```rust
/// use readback_core::{BackendError, FenceStatus, SurfaceDesc, SyncToken, TransferBackend};
///
/// /// A backend whose copies complete instantly.
/// struct Immediate;
///
/// impl TransferBackend for Immediate {
///     type Surface = Vec<u8>;
///
///     fn describe(&self, surface: &Vec<u8>) -> Result<SurfaceDesc, BackendError> {
///         Ok(SurfaceDesc::new(surface.len() as u32, 1, 1))
///     }
///
///     fn submit(&self, _surface: &Vec<u8>, _desc: &SurfaceDesc) -> Result<SyncToken, BackendError> {
///         Ok(SyncToken::new(0))
///     }
///
///     fn poll(&self, _token: SyncToken, dst: &mut [u8]) -> Result<FenceStatus, BackendError> {
///         dst.fill(0);
///         Ok(FenceStatus::Signaled)
///     }
///
///     fn release(&self, _token: SyncToken) {}
/// }
/// ```
pub trait TransferBackend: Send + Sync + 'static {
    /// Opaque handle to a rendered surface.
    type Surface: Send + Sync + 'static;

    /// Query the dimensions and pixel size of `surface`.
    ///
    /// Returns [`BackendError::InvalidSurface`] when the surface cannot be read back.
    fn describe(&self, surface: &Self::Surface) -> Result<SurfaceDesc, BackendError>;

    /// Record the copy of `surface` into backend-owned transfer memory and
    /// return the token that marks its completion.
    ///
    /// Must only be called from the submission context.
    fn submit(&self, surface: &Self::Surface, desc: &SurfaceDesc) -> Result<SyncToken, BackendError>;

    /// Check, without blocking, whether the copy behind `token` has completed.
    ///
    /// On [`FenceStatus::Signaled`] the backend has written exactly `dst.len()`
    /// tightly packed bytes into `dst`. An error means the copy is abandoned and
    /// `dst` must not be read.
    fn poll(&self, token: SyncToken, dst: &mut [u8]) -> Result<FenceStatus, BackendError>;

    /// Free backend-side resources for a settled copy.
    fn release(&self, token: SyncToken);
}

/// A backend shared with code outside the engine.
impl<B: TransferBackend> TransferBackend for Arc<B> {
    type Surface = B::Surface;

    fn describe(&self, surface: &Self::Surface) -> Result<SurfaceDesc, BackendError> {
        (**self).describe(surface)
    }

    fn submit(&self, surface: &Self::Surface, desc: &SurfaceDesc) -> Result<SyncToken, BackendError> {
        (**self).submit(surface, desc)
    }

    fn poll(&self, token: SyncToken, dst: &mut [u8]) -> Result<FenceStatus, BackendError> {
        (**self).poll(token, dst)
    }

    fn release(&self, token: SyncToken) {
        (**self).release(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_desc_lengths() {
        let desc = SurfaceDesc::new(400, 300, 4);
        assert_eq!(desc.row_bytes(), 1600);
        assert_eq!(desc.byte_len(), 480_000);
        assert!(!desc.is_empty());
        assert!(SurfaceDesc::new(0, 300, 4).is_empty());
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::DeviceLost("driver reset".to_string());
        assert!(err.to_string().contains("device lost"));
        assert!(err.to_string().contains("driver reset"));
    }

    #[test]
    fn test_sync_token_display() {
        assert_eq!(SyncToken::new(12).to_string(), "sync#12");
        assert_eq!(SyncToken::new(12).raw(), 12);
    }
}
