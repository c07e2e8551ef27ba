//! Test utilities for the readback engine.
//!
//! This crate provides testing infrastructure for the transfer engine:
//!
//! - [`fixtures`] - Known pixel patterns for round-trip assertions
//! - `MockBackend` / `MockSurface` - A scriptable [`TransferBackend`] that
//!   simulates GPU latency, device loss and copy faults (requires `mock` feature)
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use readback_core::{FenceStatus, TransferBackend};
//! use readback_test_utils::{MockBackend, MockSurface};
//!
//! // Copies complete on the second poll
//! let backend = MockBackend::with_latency(1);
//! let surface = MockSurface::filled(2, 2, [0, 0, 0, 255]);
//!
//! let desc = backend.describe(&surface).unwrap();
//! let token = backend.submit(&surface, &desc).unwrap();
//!
//! let mut dst = vec![0u8; desc.byte_len()];
//! assert_eq!(backend.poll(token, &mut dst).unwrap(), FenceStatus::Pending);
//! assert_eq!(backend.poll(token, &mut dst).unwrap(), FenceStatus::Signaled);
//! assert_eq!(dst, [0, 0, 0, 255].repeat(4));
//! # }
//! ```
//!
//! # Design
//!
//! The mock uses `parking_lot::Mutex` for interior mutability so every trait
//! method can take `&self` and still record what the engine asked of it.
//!
//! [`TransferBackend`]: readback_core::TransferBackend

pub mod fixtures;
#[cfg(feature = "mock")]
pub mod mock_backend;

pub use fixtures::*;
#[cfg(feature = "mock")]
pub use mock_backend::*;
