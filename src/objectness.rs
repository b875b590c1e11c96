//! Coarse window proposal from depth discontinuities.
//!
//! A scene region is worth verifying when it holds enough depth edgels to
//! plausibly contain the least textured trained template. Proposals are
//! deliberately generous: hash verification slides a finer window inside
//! each region afterwards.

use crate::criteria::{Criteria, TrainedInfo};
use crate::image::Map2;
use crate::scene::Window;
use crate::trace::trace_event;

/// Depth-edgel based window proposer.
pub struct Objectness<'a> {
    criteria: &'a Criteria,
    info: &'a TrainedInfo,
}

impl<'a> Objectness<'a> {
    /// Creates a proposer over the given configuration and trained info.
    pub fn new(criteria: &'a Criteria, info: &'a TrainedInfo) -> Self {
        Self { criteria, info }
    }

    /// Proposes candidate regions over a depth map at one pyramid level.
    ///
    /// Regions are sized 3/2 of the sliding window and stepped by half a
    /// window; a region qualifies when its depth-edgel count reaches
    /// `edgel_factor` of the smallest trained template's edgel count.
    /// An empty result is a valid zero-detection outcome.
    pub fn propose_windows(&self, depth: &Map2<f32>) -> Vec<Window> {
        let window = self.criteria.window_size;
        let region = window + window / 2;
        if depth.width() < region || depth.height() < region {
            return Vec::new();
        }

        let edgels = edgel_map(depth, self.criteria.max_depth_diff);
        let required = (self.info.min_edgels as f32 * self.criteria.edgel_factor) as u32;
        let step = (window / 2).max(1);

        let mut windows = Vec::new();
        let mut y = 0;
        while y + region <= depth.height() {
            let mut x = 0;
            while x + region <= depth.width() {
                if count_edgels(&edgels, x, y, region) >= required.max(1) {
                    windows.push(Window::region(x, y, region, region));
                }
                x += step;
            }
            y += step;
        }

        trace_event!("objectness", proposed = windows.len());
        windows
    }
}

fn edgel_map(depth: &Map2<f32>, max_depth_diff: f32) -> Map2<u8> {
    let mut edgels =
        Map2::filled(depth.width(), depth.height(), 0u8).expect("depth map is non-empty");
    for y in 1..depth.height().saturating_sub(1) {
        for x in 1..depth.width().saturating_sub(1) {
            let dx = depth.at(x + 1, y) - depth.at(x - 1, y);
            let dy = depth.at(x, y + 1) - depth.at(x, y - 1);
            if dx.abs().max(dy.abs()) > max_depth_diff {
                edgels.set(x, y, 1);
            }
        }
    }
    edgels
}

fn count_edgels(edgels: &Map2<u8>, x0: usize, y0: usize, side: usize) -> u32 {
    let mut count = 0u32;
    for y in y0..(y0 + side).min(edgels.height()) {
        for x in x0..(x0 + side).min(edgels.width()) {
            count += edgels.at(x, y) as u32;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{Criteria, TrainedInfo};

    fn small_criteria() -> Criteria {
        Criteria {
            window_size: 16,
            window_step: 4,
            ..Criteria::default()
        }
    }

    #[test]
    fn flat_scene_proposes_nothing() {
        let criteria = small_criteria();
        let info = TrainedInfo {
            min_edgels: 40,
            smallest_template: (16, 16),
        };
        let depth = Map2::filled(64, 64, 1000.0).unwrap();
        let windows = Objectness::new(&criteria, &info).propose_windows(&depth);
        assert!(windows.is_empty());
    }

    #[test]
    fn depth_step_proposes_windows() {
        let criteria = small_criteria();
        let info = TrainedInfo {
            min_edgels: 10,
            smallest_template: (16, 16),
        };
        let mut depth = Map2::filled(64, 64, 1000.0).unwrap();
        for y in 0..64 {
            for x in 30..64 {
                depth.set(x, y, 2000.0);
            }
        }
        let windows = Objectness::new(&criteria, &info).propose_windows(&depth);
        assert!(!windows.is_empty());
        assert!(windows.iter().all(|w| w.width == 24 && w.height == 24));
    }

    #[test]
    fn scene_smaller_than_region_proposes_nothing() {
        let criteria = small_criteria();
        let info = TrainedInfo::default();
        let depth = Map2::filled(8, 8, 1000.0).unwrap();
        let windows = Objectness::new(&criteria, &info).propose_windows(&depth);
        assert!(windows.is_empty());
    }
}
