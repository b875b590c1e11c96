//! Template feature training and the match-verification cascade.
//!
//! Training selects a fixed number of spatially spread feature points per
//! template: edge points ranked by gradient magnitude and stable points
//! ranked by surface smoothness, thinned by a minimum-distance greedy pass.
//! At detection time each candidate (window, template) pair runs five
//! ordered tests; object size and depth consistency are hard gates, the
//! per-point tests contribute a weighted aggregate score compared against
//! the match factor.

use crate::criteria::Criteria;
use crate::geometry::INVALID_NORMAL;
use crate::image::Map2;
use crate::processing::{quantized_gradients, quantized_normals};
use crate::scene::{Scene, Window};
use crate::template::{FeaturePoint, RawTemplate, Template, TemplateId, TemplatePool};
use crate::trace::{trace_event, trace_span};
use crate::util::math::{median_f32, sq_distance};
use crate::util::{DetectError, DetectResult};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A confirmed detection produced by the verification cascade.
#[derive(Clone, Copy, Debug)]
pub struct Match {
    /// The matched template.
    pub template: TemplateId,
    /// Object the template belongs to.
    pub object_id: u32,
    /// Window left edge at this pyramid level.
    pub x: usize,
    /// Window top edge at this pyramid level.
    pub y: usize,
    /// Window width.
    pub width: usize,
    /// Window height.
    pub height: usize,
    /// Pyramid scale the window was found at.
    pub scale: f32,
    /// Aggregate cascade score in `[0, 1]`.
    pub score: f32,
    /// Fraction of stable points passing the surface-normal test.
    pub normal_score: f32,
    /// Fraction of edge points passing the gradient test.
    pub gradient_score: f32,
    /// Fraction of stable points passing the color test.
    pub color_score: f32,
}

/// Trains template feature points and verifies candidate pairs.
pub struct Matcher<'a> {
    criteria: &'a Criteria,
}

impl<'a> Matcher<'a> {
    /// Creates a matcher over the given configuration.
    pub fn new(criteria: &'a Criteria) -> Self {
        Self { criteria }
    }

    /// Extracts and stores feature points for freshly parsed templates.
    pub fn train(&self, raws: &mut [RawTemplate]) -> DetectResult<()> {
        let _span = trace_span!("matcher_train", templates = raws.len()).entered();
        for raw in raws {
            self.train_one(raw)?;
        }
        Ok(())
    }

    fn train_one(&self, raw: &mut RawTemplate) -> DetectResult<()> {
        let template = &mut raw.template;
        let context = format!("template {}", template.id);

        let dims = (template.depth.width(), template.depth.height());
        if (raw.maps.gray.width(), raw.maps.gray.height()) != dims
            || (raw.maps.hsv.width(), raw.maps.hsv.height()) != dims
        {
            return Err(DetectError::data(
                context,
                "gray and hsv maps must match the depth geometry",
            ));
        }

        let (angles, magnitudes) = quantized_gradients(&raw.maps.gray)?;
        let normals = quantized_normals(
            &template.depth,
            self.criteria.fx,
            self.criteria.fy,
            self.criteria.max_depth,
            self.criteria.max_depth_diff,
        )?;

        // Edge candidates: strong gradient first.
        let mut edges: Vec<(usize, usize, f32)> = Vec::new();
        // Stable candidates: valid geometry, flattest surface first.
        let mut stables: Vec<(usize, usize, f32)> = Vec::new();

        let depth = &template.depth;
        for y in 1..depth.height().saturating_sub(1) {
            for x in 1..depth.width().saturating_sub(1) {
                let magnitude = magnitudes.at(x, y);
                if magnitude >= self.criteria.min_gradient_magnitude {
                    edges.push((x, y, magnitude));
                }
                if normals.at(x, y) != INVALID_NORMAL && depth.at(x, y) > 0.0 {
                    let laplacian = depth.at(x + 1, y)
                        + depth.at(x - 1, y)
                        + depth.at(x, y + 1)
                        + depth.at(x, y - 1)
                        - 4.0 * depth.at(x, y);
                    stables.push((x, y, -laplacian.abs()));
                }
            }
        }

        edges.sort_by(|a, b| b.2.total_cmp(&a.2));
        stables.sort_by(|a, b| b.2.total_cmp(&a.2));

        let picked_edges = cherry_pick(
            &edges,
            self.criteria.min_feature_distance,
            self.criteria.feature_point_count,
        );
        let picked_stables = cherry_pick(
            &stables,
            self.criteria.min_feature_distance,
            self.criteria.feature_point_count,
        );
        if picked_edges.is_empty() || picked_stables.is_empty() {
            return Err(DetectError::data(
                context,
                "no edge or stable feature points could be selected",
            ));
        }

        let edge_points = picked_edges
            .iter()
            .map(|&(x, y)| descriptor(x, y, depth, &raw.maps.hsv, &normals, &angles))
            .collect();
        let stable_points = picked_stables
            .iter()
            .map(|&(x, y)| descriptor(x, y, depth, &raw.maps.hsv, &normals, &angles))
            .collect();

        let mut depths: Vec<f32> = depth.as_slice().iter().copied().filter(|&d| d > 0.0).collect();
        let depth_median = median_f32(&mut depths)
            .ok_or_else(|| DetectError::data(context.clone(), "depth map holds no valid depths"))?;
        let edgel_count = count_depth_edgels(depth, self.criteria.max_depth_diff);

        template.edge_points = edge_points;
        template.stable_points = stable_points;
        template.depth_median = depth_median;
        template.edgel_count = edgel_count;

        trace_event!(
            "template_trained",
            edges = template.edge_points.len(),
            stables = template.stable_points.len()
        );
        Ok(())
    }

    /// Runs the verification cascade over all candidate pairs.
    pub fn match_windows(
        &self,
        scale: f32,
        scene: &Scene,
        windows: &[Window],
        pool: &TemplatePool,
    ) -> Vec<Match> {
        let _span = trace_span!("match_windows", windows = windows.len()).entered();

        // Pair every window with its candidates once; the windows' median
        // depth is shared by the size and depth gates.
        let mut jobs: Vec<(&Window, f32, &Template)> = Vec::new();
        for window in windows {
            let Some(depth_median) = window_depth_median(&scene.depth, window) else {
                continue;
            };
            for candidate in &window.candidates {
                if let Some(template) = pool.get(candidate.template) {
                    jobs.push((window, depth_median, template));
                }
            }
        }

        #[cfg(feature = "rayon")]
        let matches: Vec<Match> = jobs
            .par_iter()
            .filter_map(|&(window, depth_median, template)| {
                self.verify_pair(scale, scene, window, depth_median, template)
            })
            .collect();

        #[cfg(not(feature = "rayon"))]
        let matches: Vec<Match> = jobs
            .iter()
            .filter_map(|&(window, depth_median, template)| {
                self.verify_pair(scale, scene, window, depth_median, template)
            })
            .collect();

        trace_event!("matches", pairs = jobs.len(), matches = matches.len());
        matches
    }

    /// Evaluates the five tests for one candidate pair.
    fn verify_pair(
        &self,
        scale: f32,
        scene: &Scene,
        window: &Window,
        depth_median: f32,
        template: &Template,
    ) -> Option<Match> {
        // Test I: object size, cheap hard gate.
        if !self.test_object_size(scale, depth_median, window, template) {
            return None;
        }

        // Test II: surface normals over stable points.
        let normal_hits = template
            .stable_points
            .iter()
            .filter(|point| {
                point.normal != INVALID_NORMAL
                    && reproject(scene.normals.width(), scene.normals.height(), window, point)
                        .map(|(sx, sy)| scene.normals.at(sx, sy) == point.normal)
                        .unwrap_or(false)
            })
            .count();

        // Test III: gradient orientation over edge points.
        let gradient_hits = template
            .edge_points
            .iter()
            .filter(|point| {
                reproject(scene.angles.width(), scene.angles.height(), window, point)
                    .map(|(sx, sy)| {
                        scene.magnitudes.at(sx, sy) >= self.criteria.min_gradient_magnitude
                            && crate::geometry::orientation_distance(
                                scene.angles.at(sx, sy),
                                point.gradient,
                            ) <= 1
                    })
                    .unwrap_or(false)
            })
            .count();

        // Test IV: depth consistency, hard gate.
        if !self.test_depth(scale, depth_median, template) {
            return None;
        }

        // Test V: color over stable points.
        let color_hits = template
            .stable_points
            .iter()
            .filter(|point| {
                reproject(scene.hsv.width(), scene.hsv.height(), window, point)
                    .map(|(sx, sy)| {
                        crate::geometry::hue_distance(scene.hsv.at(sx, sy), point.hsv)
                            <= self.criteria.color_threshold
                    })
                    .unwrap_or(false)
            })
            .count();

        let normal_score = ratio(normal_hits, template.stable_points.len());
        let gradient_score = ratio(gradient_hits, template.edge_points.len());
        let color_score = ratio(color_hits, template.stable_points.len());

        let [w_normal, w_gradient, w_color] = self.criteria.test_weights;
        let score = (w_normal * normal_score + w_gradient * gradient_score + w_color * color_score)
            / (w_normal + w_gradient + w_color);

        if score < self.criteria.match_factor {
            return None;
        }

        Some(Match {
            template: template.id,
            object_id: template.object_id,
            x: window.x,
            y: window.y,
            width: window.width,
            height: window.height,
            scale,
            score,
            normal_score,
            gradient_score,
            color_score,
        })
    }

    /// Window diameter derived from depth and focal length must agree with
    /// the template's physical diameter at this scale.
    fn test_object_size(
        &self,
        scale: f32,
        depth_median: f32,
        window: &Window,
        template: &Template,
    ) -> bool {
        if depth_median <= 0.0 {
            return false;
        }
        let apparent = template.diameter * self.criteria.fx * scale / depth_median;
        let reference = template.depth.width().max(template.depth.height()) as f32;
        let ratio = apparent / reference;
        (ratio - 1.0).abs() <= self.criteria.size_tolerance && apparent <= window.width as f32 * 2.0
    }

    /// Median window depth must sit within the piecewise allowance of the
    /// template's expected depth at this scale.
    fn test_depth(&self, scale: f32, depth_median: f32, template: &Template) -> bool {
        let expected = template.depth_median * scale;
        let allowed = self.criteria.allowed_depth_deviation(depth_median);
        (depth_median - expected).abs() <= allowed
    }
}

/// Greedy minimum-distance selection over ranked candidate points.
///
/// Walks the ranked list, accepting a point only if it keeps at least
/// `min_distance` to every previously accepted point, until `count` points
/// are selected or the list is exhausted.
fn cherry_pick(
    ranked: &[(usize, usize, f32)],
    min_distance: f32,
    count: usize,
) -> Vec<(usize, usize)> {
    let min_sq = min_distance * min_distance;
    let mut picked: Vec<(usize, usize)> = Vec::with_capacity(count);

    for &(x, y, _) in ranked {
        if picked.len() == count {
            break;
        }
        if picked
            .iter()
            .all(|&other| sq_distance((x, y), other) >= min_sq)
        {
            picked.push((x, y));
        }
    }
    picked
}

fn descriptor(
    x: usize,
    y: usize,
    depth: &Map2<f32>,
    hsv: &Map2<[u8; 3]>,
    normals: &Map2<u8>,
    angles: &Map2<u8>,
) -> FeaturePoint {
    FeaturePoint {
        x: x as u16,
        y: y as u16,
        normal: normals.at(x, y),
        gradient: angles.at(x, y),
        depth: depth.at(x, y),
        hsv: hsv.at(x, y),
    }
}

/// Maps a template-local feature point into scene coordinates of a window.
///
/// Points are offset by the window origin without rescaling: the size gate
/// already guarantees the object's apparent size agrees with the template
/// raster at this pyramid level, and windows are only marginally larger
/// than the templates they frame.
fn reproject(
    scene_width: usize,
    scene_height: usize,
    window: &Window,
    point: &FeaturePoint,
) -> Option<(usize, usize)> {
    let sx = window.x + point.x as usize;
    let sy = window.y + point.y as usize;
    (sx < scene_width && sy < scene_height).then_some((sx, sy))
}

fn window_depth_median(depth: &Map2<f32>, window: &Window) -> Option<f32> {
    let mut values = Vec::new();
    let x_end = (window.x + window.width).min(depth.width());
    let y_end = (window.y + window.height).min(depth.height());
    for y in window.y..y_end {
        for x in window.x..x_end {
            let d = depth.at(x, y);
            if d > 0.0 {
                values.push(d);
            }
        }
    }
    median_f32(&mut values)
}

fn count_depth_edgels(depth: &Map2<f32>, max_depth_diff: f32) -> u32 {
    let mut count = 0u32;
    for y in 1..depth.height().saturating_sub(1) {
        for x in 1..depth.width().saturating_sub(1) {
            let dx = depth.at(x + 1, y) - depth.at(x - 1, y);
            let dy = depth.at(x, y + 1) - depth.at(x, y - 1);
            if dx.abs().max(dy.abs()) > max_depth_diff {
                count += 1;
            }
        }
    }
    count
}

fn ratio(hits: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::cherry_pick;

    #[test]
    fn cherry_pick_enforces_minimum_distance() {
        let ranked = vec![
            (10, 10, 9.0),
            (11, 10, 8.0),
            (30, 10, 7.0),
            (10, 30, 6.0),
        ];
        let picked = cherry_pick(&ranked, 5.0, 10);
        assert_eq!(picked, vec![(10, 10), (30, 10), (10, 30)]);
    }

    #[test]
    fn cherry_pick_stops_at_requested_count() {
        let ranked: Vec<_> = (0..100).map(|i| (i * 10, 0, 100.0 - i as f32)).collect();
        let picked = cherry_pick(&ranked, 5.0, 4);
        assert_eq!(picked.len(), 4);
        assert_eq!(picked[0], (0, 0));
    }

    #[test]
    fn cherry_pick_handles_exhausted_lists() {
        let ranked = vec![(5, 5, 1.0), (6, 5, 0.5)];
        let picked = cherry_pick(&ranked, 10.0, 8);
        assert_eq!(picked, vec![(5, 5)]);
    }
}
