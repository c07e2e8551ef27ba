//! Frame Capture Demo
//!
//! Reads a 400x300 render target back to the CPU once per frame without ever
//! stalling on the GPU:
//! - one readback request per frame through a `ReadbackQueue` of 8
//! - completed frames are drained in order and checked
//! - frames are dropped (and counted) when the GPU falls too far behind
//!
//! Run with:
//!   cargo run -p frame-capture
//!
//! Set `RUST_LOG=debug` to watch slot transitions, and open puffin_viewer on
//! 127.0.0.1:8585 for the flame graph.

use std::time::Instant;

use readback_core::logging;
use readback_core::profiling::{ProfilingBackend, init_profiling, new_frame, profile_scope};
use readback_engine::{
    EngineConfig, GraphicsContext, ReadbackEngine, ReadbackError, ReadbackOutcome, ReadbackQueue,
    WgpuBackend,
};
use readback_test_utils::gradient_pixels;

const WIDTH: u32 = 400;
const HEIGHT: u32 = 300;
const FRAMES: u32 = 600;

fn main() {
    logging::init();
    init_profiling(ProfilingBackend::PuffinHttp);

    let context = GraphicsContext::new_owned_sync().expect("Failed to create graphics context");
    let size = wgpu::Extent3d {
        width: WIDTH,
        height: HEIGHT,
        depth_or_array_layers: 1,
    };
    let target = context.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("capture_target"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let engine = ReadbackEngine::with_config(
        WgpuBackend::new(context.clone()),
        EngineConfig::new().with_queue_capacity(8),
    );
    let mut queue = ReadbackQueue::new(engine.config());

    let mut captured = 0u32;
    let mut dropped = 0u32;
    let mut failed = 0u32;
    let start = Instant::now();

    for frame in 0..FRAMES + 64 {
        new_frame();

        if frame < FRAMES {
            profile_scope!("render");
            // Stand-in for a real render pass.
            context.queue().write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &target,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &gradient_pixels(WIDTH, HEIGHT, frame as u8),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(WIDTH * 4),
                    rows_per_image: Some(HEIGHT),
                },
                size,
            );

            match queue.request(&engine, &target) {
                Ok(_) => {}
                Err(ReadbackError::QueueFull { .. }) => dropped += 1,
                Err(error) => {
                    tracing::error!("readback request failed: {}", error);
                    break;
                }
            }
        }

        queue.drain(|outcome| match outcome {
            ReadbackOutcome::Done { id, bytes } => {
                // Blue channel carries the frame counter.
                tracing::trace!(slot = %id, frame = bytes[2], "captured frame");
                captured += 1;
            }
            ReadbackOutcome::Failed { id, error } => {
                tracing::warn!(slot = %id, "frame capture failed: {}", error);
                failed += 1;
            }
        });
        engine.maintain();

        if frame >= FRAMES && queue.is_empty() {
            break;
        }
    }

    queue.clear();
    // Cleared requests may still be in flight; let the GPU settle them.
    for _ in 0..64 {
        engine.maintain();
        if engine.stats().orphaned_slots == 0 {
            break;
        }
        std::thread::yield_now();
    }
    let elapsed = start.elapsed();
    let stats = engine.stats();
    tracing::info!(
        captured,
        dropped,
        failed,
        fps = f64::from(captured) / elapsed.as_secs_f64(),
        mib_per_sec = f64::from(captured) * f64::from(WIDTH * HEIGHT * 4)
            / (1024.0 * 1024.0)
            / elapsed.as_secs_f64(),
        staging_allocations = stats.staging.allocations,
        staging_reuses = stats.staging.reuses,
        "frame capture finished"
    );
}
