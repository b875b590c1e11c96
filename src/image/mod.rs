//! Owned 2D maps and rescaling utilities.
//!
//! `Map2` is a contiguous row-major buffer generic over the pixel type; the
//! pipeline uses it for depth (`f32`), grayscale (`f32`), quantized symbol
//! maps (`u8`) and HSV color (`[u8; 3]`). Rescaling uses bilinear sampling so
//! one base scene can feed every pyramid level.

use serde::{Deserialize, Serialize};

use crate::util::{DetectError, DetectResult};

#[cfg(feature = "image-io")]
pub mod io;

/// Owned contiguous row-major 2D map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Map2<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Copy> Map2<T> {
    /// Creates a map filled with `fill`.
    pub fn filled(width: usize, height: usize, fill: T) -> DetectResult<Self> {
        let len = checked_len(width, height)?;
        Ok(Self {
            data: vec![fill; len],
            width,
            height,
        })
    }

    /// Creates a map from a contiguous row-major buffer.
    pub fn from_vec(data: Vec<T>, width: usize, height: usize) -> DetectResult<Self> {
        let needed = checked_len(width, height)?;
        if data.len() != needed {
            return Err(DetectError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Returns the map width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the map height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the element at `(x, y)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    /// Returns the element at `(x, y)`; callers must have checked bounds.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> T {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.width + x]
    }

    /// Writes the element at `(x, y)`; out-of-bounds writes are ignored.
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = value;
        }
    }

    /// Returns the backing slice in row-major order.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

fn checked_len(width: usize, height: usize) -> DetectResult<usize> {
    if width == 0 || height == 0 {
        return Err(DetectError::InvalidDimensions { width, height });
    }
    width
        .checked_mul(height)
        .ok_or(DetectError::InvalidDimensions { width, height })
}

/// Rescales a scalar map by `scale` with bilinear sampling.
///
/// Depth values are passed through unchanged; only the raster geometry
/// shrinks or grows. The output is at least 1x1.
pub fn rescale_f32(src: &Map2<f32>, scale: f32) -> DetectResult<Map2<f32>> {
    rescale_with(src, scale, |a, b, c, d, wx, wy| {
        let top = a + (b - a) * wx;
        let bottom = c + (d - c) * wx;
        top + (bottom - top) * wy
    })
}

/// Rescales an HSV (or any 3-channel byte) map by `scale` per channel.
pub fn rescale_rgb3(src: &Map2<[u8; 3]>, scale: f32) -> DetectResult<Map2<[u8; 3]>> {
    rescale_with(src, scale, |a, b, c, d, wx, wy| {
        let mut out = [0u8; 3];
        for ch in 0..3 {
            let top = a[ch] as f32 + (b[ch] as f32 - a[ch] as f32) * wx;
            let bottom = c[ch] as f32 + (d[ch] as f32 - c[ch] as f32) * wx;
            out[ch] = (top + (bottom - top) * wy).round().clamp(0.0, 255.0) as u8;
        }
        out
    })
}

fn rescale_with<T: Copy>(
    src: &Map2<T>,
    scale: f32,
    blend: impl Fn(T, T, T, T, f32, f32) -> T,
) -> DetectResult<Map2<T>> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(DetectError::Config {
            reason: format!("rescale factor {scale} must be positive and finite"),
        });
    }

    let dst_width = ((src.width() as f32 * scale).round() as usize).max(1);
    let dst_height = ((src.height() as f32 * scale).round() as usize).max(1);
    let mut data = Vec::with_capacity(dst_width * dst_height);

    let x_ratio = src.width() as f32 / dst_width as f32;
    let y_ratio = src.height() as f32 / dst_height as f32;

    for y in 0..dst_height {
        let sy = ((y as f32 + 0.5) * y_ratio - 0.5).max(0.0);
        let y0 = (sy as usize).min(src.height() - 1);
        let y1 = (y0 + 1).min(src.height() - 1);
        let wy = sy - y0 as f32;
        for x in 0..dst_width {
            let sx = ((x as f32 + 0.5) * x_ratio - 0.5).max(0.0);
            let x0 = (sx as usize).min(src.width() - 1);
            let x1 = (x0 + 1).min(src.width() - 1);
            let wx = sx - x0 as f32;
            data.push(blend(
                src.at(x0, y0),
                src.at(x1, y0),
                src.at(x0, y1),
                src.at(x1, y1),
                wx,
                wy,
            ));
        }
    }

    Map2::from_vec(data, dst_width, dst_height)
}
