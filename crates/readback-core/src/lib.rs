//! Readback Core
//!
//! Shared building blocks for the readback engine: the [`backend::TransferBackend`]
//! seam every GPU implementation plugs into, the process-wide diagnostic sink,
//! logging setup and profiling macros.

pub mod alloc;
pub mod backend;
pub mod diagnostics;
pub mod logging;
pub mod profiling;

pub use backend::{BackendError, FenceStatus, SurfaceDesc, SyncToken, TransferBackend};
