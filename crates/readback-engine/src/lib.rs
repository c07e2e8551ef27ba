//! Readback Engine
//!
//! Asynchronous GPU-to-CPU readback. A [`ReadbackEngine`] bound to a
//! [`TransferBackend`] hands out [`ReadbackRequest`]s; each one copies a GPU
//! surface into its own staging buffer, is polled without blocking until the
//! copy settles, and exposes the bytes once it is done.
//!
//! ```ignore
//! use readback_engine::{GraphicsContext, ReadbackEngine, ReadbackQueue, WgpuBackend};
//!
//! let context = GraphicsContext::new_owned_sync()?;
//! let engine = ReadbackEngine::new(WgpuBackend::new(context.clone()));
//! let mut queue = ReadbackQueue::new(engine.config());
//!
//! // Each frame
//! queue.request(&engine, &frame_texture)?;
//! queue.drain(|outcome| {
//!     if let ReadbackOutcome::Done { bytes, .. } = outcome {
//!         encoder.push(bytes);
//!     }
//! });
//! engine.maintain();
//! ```

mod config;
mod context;
mod engine;
mod error;
mod poll;
mod queue;
mod registry;
mod request;
mod slot;
mod staging;
mod submit;
mod wgpu_backend;

pub use config::EngineConfig;
pub use context::{GraphicsContext, GraphicsContextDescriptor, GraphicsError};
pub use engine::{EngineStats, ReadbackEngine};
pub use error::ReadbackError;
pub use queue::{ReadbackOutcome, ReadbackQueue};
pub use request::{ReadbackRequest, ReadbackView};
pub use slot::{SlotId, SlotState};
pub use staging::{StagingBuffer, StagingBufferManager, StagingBufferPool, StagingStats};
pub use wgpu_backend::{WgpuBackend, bytes_per_pixel, padded_bytes_per_row};

pub use readback_core::{BackendError, FenceStatus, SurfaceDesc, SyncToken, TransferBackend};
