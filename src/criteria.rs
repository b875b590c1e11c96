//! Detector configuration.
//!
//! `Criteria` is built once, validated, and passed by reference to every
//! component; nothing in the pipeline mutates it. Quantities measured from
//! the training set itself live in [`TrainedInfo`], which is computed during
//! training and persisted next to the index.

use serde::{Deserialize, Serialize};

use crate::util::{DetectError, DetectResult};

/// Feature-point grid dimensions used by triplet sampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    /// Grid columns.
    pub width: u8,
    /// Grid rows.
    pub height: u8,
}

/// One segment of the piecewise depth-deviation allowance.
///
/// Segments are ordered by `up_to`; the allowance of the first segment whose
/// bound covers the measured depth applies. Deeper scenes tolerate larger
/// absolute deviation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthDeviation {
    /// Upper depth bound this segment covers.
    pub up_to: f32,
    /// Allowed absolute deviation below that bound.
    pub allowed: f32,
}

/// Process-wide detector configuration, read-only after construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Criteria {
    /// Number of hash tables (triplets) in the index.
    pub table_count: usize,
    /// Normalized feature-point grid the triplets sample.
    pub feature_grid: GridSize,
    /// Number of equal-frequency depth-difference bins.
    pub histogram_bin_count: usize,
    /// Minimum votes for a template to become a verification candidate.
    pub min_votes: u32,
    /// Candidate cap per window after vote filtering.
    pub max_window_candidates: usize,
    /// Side of the square sliding window in pixels.
    pub window_size: usize,
    /// Sliding-window step in pixels.
    pub window_step: usize,
    /// Aggregate score threshold for the verification cascade.
    pub match_factor: f32,
    /// Weights of the per-point tests (normals, gradients, color) in the
    /// aggregate score.
    pub test_weights: [f32; 3],
    /// IoU above which a lower-scoring detection is suppressed.
    pub overlap_factor: f32,
    /// Piecewise depth-deviation allowance for the depth gate, ordered by
    /// depth bound.
    pub depth_deviation: Vec<DepthDeviation>,
    /// Relative tolerance of the object-size gate.
    pub size_tolerance: f32,
    /// Depth step treated as a discontinuity when computing normals and
    /// depth edgels.
    pub max_depth_diff: f32,
    /// Largest depth considered valid scene data.
    pub max_depth: f32,
    /// Camera focal length, x.
    pub fx: f32,
    /// Camera focal length, y.
    pub fy: f32,
    /// Feature points selected per template and point kind.
    pub feature_point_count: usize,
    /// Minimum pixel distance between selected feature points.
    pub min_feature_distance: f32,
    /// Gradient magnitude below which edge points are ignored.
    pub min_gradient_magnitude: f32,
    /// Normalized hue distance accepted by the color test.
    pub color_threshold: f32,
    /// Fraction of the trained minimum edgel count a window must reach to be
    /// proposed by objectness.
    pub edgel_factor: f32,
    /// Scale of the first pyramid level.
    pub initial_scale: f32,
    /// Geometric scale step between pyramid levels.
    pub scale_factor: f32,
    /// Number of pyramid levels per scene.
    pub pyramid_levels: usize,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            table_count: 100,
            feature_grid: GridSize {
                width: 12,
                height: 12,
            },
            histogram_bin_count: 5,
            min_votes: 3,
            max_window_candidates: 50,
            window_size: 120,
            window_step: 5,
            match_factor: 0.4,
            test_weights: [1.0, 1.0, 1.0],
            overlap_factor: 0.5,
            depth_deviation: vec![
                DepthDeviation {
                    up_to: 10_000.0,
                    allowed: 120.0,
                },
                DepthDeviation {
                    up_to: 25_000.0,
                    allowed: 350.0,
                },
                DepthDeviation {
                    up_to: f32::MAX,
                    allowed: 800.0,
                },
            ],
            size_tolerance: 0.3,
            max_depth_diff: 100.0,
            max_depth: 30_000.0,
            fx: 1076.74,
            fy: 1075.88,
            feature_point_count: 100,
            min_feature_distance: 5.0,
            min_gradient_magnitude: 40.0,
            color_threshold: 0.3,
            edgel_factor: 0.3,
            initial_scale: 0.4,
            scale_factor: 1.25,
            pyramid_levels: 9,
        }
    }
}

impl Criteria {
    /// Checks structural constraints; violations are fatal at startup.
    pub fn validate(&self) -> DetectResult<()> {
        if self.table_count == 0 {
            return Err(DetectError::config("table_count must be positive"));
        }
        if self.feature_grid.width == 0 || self.feature_grid.height == 0 {
            return Err(DetectError::config("feature_grid must be non-empty"));
        }
        if self.histogram_bin_count == 0 {
            return Err(DetectError::config("histogram_bin_count must be positive"));
        }
        if self.window_size == 0 || self.window_step == 0 {
            return Err(DetectError::config(
                "window_size and window_step must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.match_factor) {
            return Err(DetectError::config("match_factor must be within [0, 1]"));
        }
        if self.test_weights.iter().sum::<f32>() <= 0.0 {
            return Err(DetectError::config("test_weights must sum to a positive value"));
        }
        if self.overlap_factor < 0.0 {
            return Err(DetectError::config("overlap_factor must be non-negative"));
        }
        if self.depth_deviation.is_empty() {
            return Err(DetectError::config("depth_deviation must not be empty"));
        }
        if self.feature_point_count == 0 {
            return Err(DetectError::config("feature_point_count must be positive"));
        }
        if !(self.initial_scale > 0.0) || !(self.scale_factor > 1.0) {
            return Err(DetectError::config(
                "initial_scale must be positive and scale_factor above 1",
            ));
        }
        if self.pyramid_levels == 0 {
            return Err(DetectError::config("pyramid_levels must be positive"));
        }
        Ok(())
    }

    /// Allowed absolute depth deviation at the given scene depth.
    pub fn allowed_depth_deviation(&self, depth: f32) -> f32 {
        for segment in &self.depth_deviation {
            if depth <= segment.up_to {
                return segment.allowed;
            }
        }
        // Ordered segments end with an open bound; fall back to the last.
        self.depth_deviation.last().map_or(0.0, |s| s.allowed)
    }
}

/// Quantities measured from the training set, persisted with the index.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TrainedInfo {
    /// Smallest depth-edgel count over all trained templates.
    pub min_edgels: u32,
    /// Dimensions of the smallest trained template.
    pub smallest_template: (usize, usize),
}
