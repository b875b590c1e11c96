//! Per-pixel derivative maps consumed by the verification cascade.
//!
//! These are the minimal concrete implementations of the processing
//! contract: quantized surface normals from depth, quantized gradient
//! orientations with magnitudes from grayscale, and RGB to HSV conversion
//! for the color test.

use crate::geometry::{quantize_normal, quantize_orientation, INVALID_NORMAL};
use crate::image::Map2;
use crate::util::DetectResult;
use nalgebra::Vector3;

/// Quantizes surface normals of a depth map into octant indices.
///
/// Depth derivatives are converted to metric slopes through the focal
/// lengths before quantization, so the octant reflects real surface
/// orientation rather than raster units. Pixels with missing depth, depth
/// beyond `max_depth`, neighbourhoods spanning a discontinuity larger than
/// `max_depth_diff`, or lying on the map border are marked
/// [`INVALID_NORMAL`].
pub fn quantized_normals(
    depth: &Map2<f32>,
    fx: f32,
    fy: f32,
    max_depth: f32,
    max_depth_diff: f32,
) -> DetectResult<Map2<u8>> {
    let mut out = Map2::filled(depth.width(), depth.height(), INVALID_NORMAL)?;

    for y in 1..depth.height().saturating_sub(1) {
        for x in 1..depth.width().saturating_sub(1) {
            let center = depth.at(x, y);
            if !(center > 0.0) || center > max_depth {
                continue;
            }

            let dzdx = (depth.at(x + 1, y) - depth.at(x - 1, y)) / 2.0;
            let dzdy = (depth.at(x, y + 1) - depth.at(x, y - 1)) / 2.0;
            if !dzdx.is_finite()
                || !dzdy.is_finite()
                || dzdx.abs() > max_depth_diff
                || dzdy.abs() > max_depth_diff
            {
                continue;
            }

            // Pixel footprint at depth z is z/f, so the metric slope is
            // the raster derivative scaled by f/z.
            let normal = Vector3::new(
                -dzdx * fx / center,
                -dzdy * fy / center,
                1.0,
            )
            .normalize();
            out.set(x, y, quantize_normal(&normal));
        }
    }

    Ok(out)
}

/// Quantized gradient orientations and magnitudes of a grayscale map.
///
/// Central differences; orientation is folded into the 180 degree
/// half-circle and binned, magnitude is the Euclidean gradient norm.
/// Border pixels carry zero magnitude and bin 0.
pub fn quantized_gradients(gray: &Map2<f32>) -> DetectResult<(Map2<u8>, Map2<f32>)> {
    let mut angles = Map2::filled(gray.width(), gray.height(), 0u8)?;
    let mut magnitudes = Map2::filled(gray.width(), gray.height(), 0.0f32)?;

    for y in 1..gray.height().saturating_sub(1) {
        for x in 1..gray.width().saturating_sub(1) {
            let dx = (gray.at(x + 1, y) - gray.at(x - 1, y)) / 2.0;
            let dy = (gray.at(x, y + 1) - gray.at(x, y - 1)) / 2.0;
            let magnitude = (dx * dx + dy * dy).sqrt();
            magnitudes.set(x, y, magnitude);
            if magnitude > 0.0 {
                angles.set(x, y, quantize_orientation(dy.atan2(dx).to_degrees()));
            }
        }
    }

    Ok((angles, magnitudes))
}

/// Converts one RGB pixel to HSV with the half-degree hue convention
/// (`H` in `[0, 180)`, `S` and `V` in `[0, 255]`).
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let r = rgb[0] as f32 / 255.0;
    let g = rgb[1] as f32 / 255.0;
    let b = rgb[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };

    [
        (hue / 2.0).round().clamp(0.0, 179.0) as u8,
        (saturation * 255.0).round() as u8,
        (max * 255.0).round() as u8,
    ]
}

/// Grayscale intensity of one RGB pixel (Rec. 601 weights).
pub fn gray_from_rgb(rgb: [u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::INVALID_NORMAL;

    #[test]
    fn flat_depth_yields_one_valid_octant() {
        let depth = Map2::filled(6, 6, 1500.0).unwrap();
        let normals = quantized_normals(&depth, 1000.0, 1000.0, 20_000.0, 100.0).unwrap();
        assert_eq!(normals.at(0, 0), INVALID_NORMAL);
        let center = normals.at(3, 3);
        assert!(center < 8);
        assert_eq!(normals.at(2, 2), center);
    }

    #[test]
    fn missing_depth_is_marked_invalid() {
        let mut depth = Map2::filled(6, 6, 1500.0).unwrap();
        depth.set(3, 3, 0.0);
        let normals = quantized_normals(&depth, 1000.0, 1000.0, 20_000.0, 100.0).unwrap();
        assert_eq!(normals.at(3, 3), INVALID_NORMAL);
    }

    #[test]
    fn discontinuities_are_marked_invalid() {
        let mut depth = Map2::filled(6, 6, 1500.0).unwrap();
        depth.set(4, 3, 5000.0);
        let normals = quantized_normals(&depth, 1000.0, 1000.0, 20_000.0, 100.0).unwrap();
        assert_eq!(normals.at(3, 3), INVALID_NORMAL);
    }

    #[test]
    fn vertical_edge_has_horizontal_gradient() {
        let mut gray = Map2::filled(6, 6, 0.0f32).unwrap();
        for y in 0..6 {
            for x in 3..6 {
                gray.set(x, y, 200.0);
            }
        }
        let (angles, magnitudes) = quantized_gradients(&gray).unwrap();
        assert!(magnitudes.at(3, 3) > 0.0);
        assert_eq!(angles.at(3, 3), 0);
    }

    #[test]
    fn hsv_of_primaries() {
        assert_eq!(rgb_to_hsv([255, 0, 0])[0], 0);
        assert_eq!(rgb_to_hsv([0, 255, 0])[0], 60);
        assert_eq!(rgb_to_hsv([0, 0, 255])[0], 120);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
    }
}
