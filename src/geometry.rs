//! Geometry and quantization primitives.
//!
//! Pure functions converting raw depth measurements into the discrete symbols
//! used by hash keys and feature descriptors: relative depth differences,
//! surface-normal octants and gradient-orientation bins, plus the explicit
//! object pose replacing raw pose arrays.

use nalgebra::{Matrix4, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::image::Map2;
use crate::util::{DetectError, DetectResult};

/// Largest representable depth difference, one side of the signed domain.
pub const DEPTH_VALUE_MAX: i32 = 65_535;

/// Number of discrete values in the signed depth-difference domain
/// `[-DEPTH_VALUE_MAX, DEPTH_VALUE_MAX]`.
pub const DEPTH_VALUES_RANGE: usize = DEPTH_VALUE_MAX as usize * 2 + 1;

/// Number of gradient-orientation bins over a 180 degree half-circle.
pub const ORIENTATION_BINS: u8 = 5;

/// Marker for pixels without a valid quantized normal.
pub const INVALID_NORMAL: u8 = 255;

// Octant reference directions over the upper hemisphere (z > 0), in fixed
// order; quantization picks the first maximum-dot-product direction.
const OCTANT_DIRECTIONS: [[f32; 3]; 8] = [
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [0.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
    [-1.0, 0.0, 1.0],
    [-1.0, -1.0, 1.0],
    [0.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
];

/// Computes the viewer-oriented surface normal at `(x, y)` of a depth map.
///
/// Uses central differences, so all four direct neighbours must exist; a
/// coordinate closer than one pixel to the border or a non-finite depth in
/// the neighbourhood is a data violation.
pub fn surface_normal(depth: &Map2<f32>, x: usize, y: usize) -> DetectResult<Vector3<f32>> {
    if x == 0 || y == 0 || x + 1 >= depth.width() || y + 1 >= depth.height() {
        return Err(DetectError::data(
            "surface normal",
            format!(
                "point ({x}, {y}) too close to the border of a {}x{} depth map",
                depth.width(),
                depth.height()
            ),
        ));
    }

    let dzdx = (depth.at(x + 1, y) - depth.at(x - 1, y)) / 2.0;
    let dzdy = (depth.at(x, y + 1) - depth.at(x, y - 1)) / 2.0;
    if !dzdx.is_finite() || !dzdy.is_finite() {
        return Err(DetectError::data(
            "surface normal",
            format!("non-finite depth around ({x}, {y})"),
        ));
    }

    Ok(Vector3::new(-dzdx, -dzdy, 1.0).normalize())
}

/// Quantizes a viewer-oriented unit normal into one of 8 upper-hemisphere
/// octants.
///
/// The octant with the maximum dot product wins; ties keep the first maximum
/// in iteration order, so the result is deterministic.
pub fn quantize_normal(normal: &Vector3<f32>) -> u8 {
    debug_assert!(normal.z >= 0.0);

    let mut best = 0u8;
    let mut best_dot = f32::MIN;
    for (index, dir) in OCTANT_DIRECTIONS.iter().enumerate() {
        let dot = normal.dot(&Vector3::new(dir[0], dir[1], dir[2]).normalize());
        if dot > best_dot {
            best_dot = dot;
            best = index as u8;
        }
    }
    best
}

/// Relative depths of `p2` and `p3` against the anchor `p1`.
///
/// Differences are truncated to integers and clamped into the signed depth
/// domain so downstream histogram indexing is always in range.
pub fn relative_depths(
    depth: &Map2<f32>,
    p1: (usize, usize),
    p2: (usize, usize),
    p3: (usize, usize),
) -> (i32, i32) {
    let anchor = depth.at(p1.0, p1.1);
    let clamp = |d: f32| (d as i32).clamp(-DEPTH_VALUE_MAX, DEPTH_VALUE_MAX);
    (
        clamp(depth.at(p2.0, p2.1) - anchor),
        clamp(depth.at(p3.0, p3.1) - anchor),
    )
}

/// Quantizes a gradient direction in degrees into one of
/// [`ORIENTATION_BINS`] bins over the 180 degree half-circle.
pub fn quantize_orientation(angle_deg: f32) -> u8 {
    let folded = angle_deg.rem_euclid(180.0);
    let bin = (folded / (180.0 / ORIENTATION_BINS as f32)) as u8;
    bin.min(ORIENTATION_BINS - 1)
}

/// Circular distance between two orientation bins.
pub fn orientation_distance(a: u8, b: u8) -> u8 {
    let diff = a.abs_diff(b);
    diff.min(ORIENTATION_BINS - diff)
}

/// Normalized hue distance between two HSV pixels, in `[0, 1]`.
///
/// Hue uses the half-degree convention (`[0, 180)`), so the farthest two
/// hues can be apart is 90 units.
pub fn hue_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    let diff = (a[0] as i32 - b[0] as i32).abs();
    let circular = diff.min(180 - diff);
    circular as f32 / 90.0
}

/// Object pose of a rendered template view.
///
/// Translation and rotation are explicit named fields; the rotation vector
/// holds XYZ Euler angles in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Camera-space translation.
    pub translation: Vector3<f32>,
    /// XYZ Euler angles in radians.
    pub rotation: Vector3<f32>,
}

impl Pose {
    /// Creates a pose from translation and Euler rotation components.
    pub fn new(translation: Vector3<f32>, rotation: Vector3<f32>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Returns the homogeneous model transform for this pose.
    pub fn model_matrix(&self) -> Matrix4<f32> {
        let rotation = Rotation3::from_euler_angles(self.rotation.x, self.rotation.y, self.rotation.z);
        Matrix4::new_translation(&self.translation) * rotation.to_homogeneous()
    }
}
