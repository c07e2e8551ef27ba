//! [`TransferBackend`] over a wgpu device.
//!
//! Each readback copies a texture into its own `MAP_READ` buffer and asks
//! wgpu to map it right after the copy is submitted. Polling drives the
//! device without blocking and, once the map callback has fired, copies the
//! rows out of the mapped range with the row padding stripped.
//!
//! # Example
//!
//! ```ignore
//! use readback_engine::{GraphicsContext, ReadbackEngine, WgpuBackend};
//!
//! let context = GraphicsContext::new_owned_sync()?;
//! let engine = ReadbackEngine::new(WgpuBackend::new(context.clone()));
//! let request = engine.request_readback(&texture)?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;
use readback_core::alloc::HashMap;
use readback_core::profiling::profile_function;
use readback_core::{BackendError, FenceStatus, SurfaceDesc, SyncToken, TransferBackend};

use crate::context::GraphicsContext;

const MAP_PENDING: u8 = 0;
const MAP_READY: u8 = 1;
const MAP_FAILED: u8 = 2;

/// Bytes per texel of the formats that can be read back, or `None`.
pub fn bytes_per_pixel(format: wgpu::TextureFormat) -> Option<u32> {
    use wgpu::TextureFormat::*;
    match format {
        R8Unorm | R8Snorm | R8Uint | R8Sint => Some(1),
        Rg8Unorm | Rg8Snorm | Rg8Uint | Rg8Sint => Some(2),
        Rgba8Unorm | Rgba8UnormSrgb | Rgba8Snorm | Rgba8Uint | Rgba8Sint | Bgra8Unorm
        | Bgra8UnormSrgb => Some(4),
        Rgb10a2Unorm => Some(4),
        R32Float | R32Uint | R32Sint => Some(4),
        Rgba16Float => Some(8),
        Rgba32Float => Some(16),
        _ => None,
    }
}

/// Row pitch of a texture-to-buffer copy: `unpadded` rounded up to
/// [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`].
pub fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// One submitted copy.
struct InFlightCopy {
    buffer: wgpu::Buffer,
    desc: SurfaceDesc,
    bytes_per_row: u32,
    map_state: Arc<AtomicU8>,
    delivered: bool,
}

/// Readback backend for [`wgpu::Texture`] surfaces.
pub struct WgpuBackend {
    context: Arc<GraphicsContext>,
    copies: Mutex<HashMap<SyncToken, InFlightCopy>>,
    next_token: AtomicU64,
    device_lost: Arc<Mutex<Option<String>>>,
}

impl WgpuBackend {
    pub fn new(context: Arc<GraphicsContext>) -> Self {
        let device_lost = Arc::new(Mutex::new(None));
        let lost = device_lost.clone();
        context
            .device()
            .set_device_lost_callback(move |reason, message| {
                tracing::error!(?reason, "GPU device lost: {}", message);
                *lost.lock() = Some(format!("{reason:?}: {message}"));
            });

        Self {
            context,
            copies: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            device_lost,
        }
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.context
    }

    /// Copies submitted and not yet released.
    pub fn in_flight(&self) -> usize {
        self.copies.lock().len()
    }

    fn check_device(&self) -> Result<(), BackendError> {
        match &*self.device_lost.lock() {
            Some(reason) => Err(BackendError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }
}

impl TransferBackend for WgpuBackend {
    type Surface = wgpu::Texture;

    fn describe(&self, texture: &wgpu::Texture) -> Result<SurfaceDesc, BackendError> {
        self.check_device()?;

        let size = texture.size();
        if size.width == 0 || size.height == 0 {
            return Err(BackendError::InvalidSurface(format!(
                "texture is {}x{}",
                size.width, size.height
            )));
        }
        if !texture.usage().contains(wgpu::TextureUsages::COPY_SRC) {
            return Err(BackendError::InvalidSurface(
                "texture was not created with COPY_SRC".to_string(),
            ));
        }
        let format = texture.format();
        let bytes_per_pixel = bytes_per_pixel(format).ok_or_else(|| {
            BackendError::InvalidSurface(format!("unsupported readback format {format:?}"))
        })?;

        Ok(SurfaceDesc::new(size.width, size.height, bytes_per_pixel))
    }

    fn submit(&self, texture: &wgpu::Texture, desc: &SurfaceDesc) -> Result<SyncToken, BackendError> {
        profile_function!();
        self.check_device()?;

        let bytes_per_row = padded_bytes_per_row(desc.width * desc.bytes_per_pixel);
        let device = self.context.device();
        // A destroyed texture passes `describe` but fails validation here.
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size: u64::from(bytes_per_row) * u64::from(desc.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue().submit(Some(encoder.finish()));
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            tracing::warn!("readback copy rejected by validation: {}", error);
            buffer.destroy();
            return Err(BackendError::InvalidSurface(error.to_string()));
        }

        let map_state = Arc::new(AtomicU8::new(MAP_PENDING));
        let signal = map_state.clone();
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let state = match result {
                Ok(()) => MAP_READY,
                Err(error) => {
                    tracing::warn!("readback buffer mapping failed: {}", error);
                    MAP_FAILED
                }
            };
            signal.store(state, Ordering::Release);
        });

        let token = SyncToken::new(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.copies.lock().insert(
            token,
            InFlightCopy {
                buffer,
                desc: *desc,
                bytes_per_row,
                map_state,
                delivered: false,
            },
        );
        Ok(token)
    }

    fn poll(&self, token: SyncToken, dst: &mut [u8]) -> Result<FenceStatus, BackendError> {
        profile_function!();
        self.check_device()?;

        if let Err(error) = self.context.device().poll(wgpu::PollType::Poll) {
            return Err(BackendError::TransferFault(error.to_string()));
        }

        let mut copies = self.copies.lock();
        let Some(copy) = copies.get_mut(&token) else {
            return Err(BackendError::TransferFault(format!("unknown {token}")));
        };
        if copy.delivered {
            return Ok(FenceStatus::Signaled);
        }

        match copy.map_state.load(Ordering::Acquire) {
            MAP_PENDING => return Ok(FenceStatus::Pending),
            MAP_READY => {}
            _ => {
                // A lost device fails every pending map; report the cause.
                self.check_device()?;
                return Err(BackendError::TransferFault(
                    "readback buffer could not be mapped".to_string(),
                ));
            }
        }

        let row_bytes = copy.desc.row_bytes();
        if dst.len() != copy.desc.byte_len() {
            return Err(BackendError::TransferFault(format!(
                "destination holds {} bytes, readback produced {}",
                dst.len(),
                copy.desc.byte_len()
            )));
        }

        {
            let mapped = copy.buffer.slice(..).get_mapped_range();
            let pitch = copy.bytes_per_row as usize;
            for (row, out) in dst.chunks_exact_mut(row_bytes).enumerate() {
                let start = row * pitch;
                out.copy_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        copy.buffer.unmap();
        copy.delivered = true;
        Ok(FenceStatus::Signaled)
    }

    fn release(&self, token: SyncToken) {
        if let Some(copy) = self.copies.lock().remove(&token) {
            if copy.map_state.load(Ordering::Acquire) == MAP_PENDING {
                tracing::warn!(%token, "releasing readback buffer before the GPU finished");
            }
            copy.buffer.destroy();
        }
    }
}
