//! Non-maximum suppression over detected matches.

use crate::matcher::Match;

/// Collapses overlapping detections, keeping the best per cluster.
///
/// Matches are sorted by descending score (stable, so ties preserve their
/// original order); the highest-scoring unsuppressed match is kept and every
/// remaining match whose base-scale IoU with it exceeds `overlap_factor` is
/// discarded. The kept set comes back in descending score order.
pub fn non_max_suppression(matches: &mut Vec<Match>, overlap_factor: f32) {
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Match> = Vec::with_capacity(matches.len());
    'outer: for m in matches.iter() {
        for k in &kept {
            if overlap(m, k) > overlap_factor {
                continue 'outer;
            }
        }
        kept.push(*m);
    }
    *matches = kept;
}

/// Intersection over union of two match windows, both normalized to the
/// common base scale so detections from different pyramid levels compare.
fn overlap(a: &Match, b: &Match) -> f32 {
    let ra = base_rect(a);
    let rb = base_rect(b);

    let ix = (ra.2.min(rb.2) - ra.0.max(rb.0)).max(0.0);
    let iy = (ra.3.min(rb.3) - ra.1.max(rb.1)).max(0.0);
    let intersection = ix * iy;
    let union = (ra.2 - ra.0) * (ra.3 - ra.1) + (rb.2 - rb.0) * (rb.3 - rb.1) - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn base_rect(m: &Match) -> (f32, f32, f32, f32) {
    let inv = 1.0 / m.scale;
    (
        m.x as f32 * inv,
        m.y as f32 * inv,
        (m.x + m.width) as f32 * inv,
        (m.y + m.height) as f32 * inv,
    )
}

#[cfg(test)]
mod tests {
    use super::non_max_suppression;
    use crate::matcher::Match;

    fn m(x: usize, y: usize, scale: f32, score: f32) -> Match {
        Match {
            template: 0,
            object_id: 0,
            x,
            y,
            width: 100,
            height: 100,
            scale,
            score,
            normal_score: score,
            gradient_score: score,
            color_score: score,
        }
    }

    #[test]
    fn identical_windows_keep_only_the_best() {
        let mut matches = vec![m(10, 10, 1.0, 0.6), m(10, 10, 1.0, 0.9)];
        non_max_suppression(&mut matches, 0.5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 0.9);
    }

    #[test]
    fn overlap_factor_one_disables_suppression() {
        let mut matches = vec![m(10, 10, 1.0, 0.6), m(10, 10, 1.0, 0.9)];
        non_max_suppression(&mut matches, 1.0);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].score, 0.9);
    }

    #[test]
    fn disjoint_windows_all_survive() {
        let mut matches = vec![
            m(0, 0, 1.0, 0.5),
            m(500, 0, 1.0, 0.7),
            m(0, 500, 1.0, 0.6),
        ];
        non_max_suppression(&mut matches, 0.5);
        assert_eq!(matches.len(), 3);
        assert!(matches[0].score >= matches[1].score);
    }

    #[test]
    fn scales_normalize_to_a_common_frame() {
        // Same physical region seen at two pyramid levels.
        let mut matches = vec![
            Match {
                width: 200,
                height: 200,
                ..m(20, 20, 2.0, 0.8)
            },
            m(10, 10, 1.0, 0.6),
        ];
        non_max_suppression(&mut matches, 0.5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 0.8);
    }
}
