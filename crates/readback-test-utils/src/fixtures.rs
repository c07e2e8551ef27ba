//! Known pixel patterns.

/// Opaque black in RGBA8.
pub const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

/// `pixel` repeated `width * height` times.
pub fn solid_pixels(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    pixel.repeat(width as usize * height as usize)
}

/// RGBA8 pattern where every pixel is distinct within a 256x256 window:
/// red is the column, green the row, blue the frame counter.
///
/// Useful for catching row-order or padding mistakes that a solid color hides.
pub fn gradient_pixels(width: u32, height: u32, frame: u8) -> Vec<u8> {
    let pixels: Vec<[u8; 4]> = (0..height)
        .flat_map(|y| (0..width).map(move |x| [x as u8, y as u8, frame, 255]))
        .collect();
    bytemuck::cast_slice(&pixels).to_vec()
}
