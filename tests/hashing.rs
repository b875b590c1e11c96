//! Index construction and candidate-retrieval behavior over synthetic
//! template geometry.

use hashmatch::{
    Criteria, GridSize, Hasher, Map2, Pose, Scene, SceneSource, Template, TemplateGroup, Window,
};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Depth plane `base + sx * (x - size/2) + sy * (y - size/2)`.
fn ramp_depth(size: usize, base: f32, sx: f32, sy: f32) -> Map2<f32> {
    let half = size as f32 / 2.0;
    let mut data = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            data.push(base + sx * (x as f32 - half) + sy * (y as f32 - half));
        }
    }
    Map2::from_vec(data, size, size).unwrap()
}

fn template(id: u32, object_id: u32, depth: Map2<f32>) -> Template {
    Template {
        id,
        object_id,
        diameter: 200.0,
        pose: Pose::new(Vector3::zeros(), Vector3::zeros()),
        depth,
        depth_median: 5000.0,
        edgel_count: 0,
        edge_points: Vec::new(),
        stable_points: Vec::new(),
    }
}

fn group(object_id: u32, templates: Vec<Template>) -> TemplateGroup {
    TemplateGroup {
        object_id,
        object: format!("obj_{object_id:02}"),
        templates,
    }
}

fn small_criteria() -> Criteria {
    Criteria {
        table_count: 10,
        feature_grid: GridSize {
            width: 4,
            height: 4,
        },
        window_size: 48,
        window_step: 5,
        min_votes: 3,
        ..Criteria::default()
    }
}

#[test]
fn trained_index_has_distinct_triplets() {
    let criteria = Criteria {
        table_count: 25,
        feature_grid: GridSize {
            width: 8,
            height: 8,
        },
        ..Criteria::default()
    };
    let hasher = Hasher::new(&criteria);
    let groups = vec![group(0, vec![template(0, 0, ramp_depth(64, 5000.0, 8.0, 0.0))])];

    let mut rng = StdRng::seed_from_u64(11);
    let index = hasher.train(&groups, &mut rng).unwrap();

    assert_eq!(index.tables.len(), 25);
    for (i, a) in index.tables.iter().enumerate() {
        for b in index.tables.iter().skip(i + 1) {
            assert_ne!(a.triplet, b.triplet);
        }
    }
}

#[test]
fn histogram_ranges_partition_the_domain() {
    let criteria = Criteria::default();
    let hasher = Hasher::new(&criteria);

    let mut histogram = vec![0u64; hashmatch::geometry::DEPTH_VALUES_RANGE];
    let offset = hashmatch::geometry::DEPTH_VALUE_MAX as usize;
    // Uniform mass over [-100, 100].
    for value in -100i32..=100 {
        histogram[(value + offset as i32) as usize] = 7;
    }
    let total = 201 * 7;

    let ranges = hasher.histogram_ranges(total, &histogram).unwrap();
    assert_eq!(ranges.len(), criteria.histogram_bin_count);

    // Contiguous cover of the whole signed domain.
    assert_eq!(ranges[0].start, -hashmatch::geometry::DEPTH_VALUE_MAX);
    assert_eq!(
        ranges.last().unwrap().end,
        hashmatch::geometry::DEPTH_VALUE_MAX + 1
    );
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }

    // Every bin except the last accumulates roughly total / bin_count.
    let target = total / criteria.histogram_bin_count as u64;
    for range in &ranges[..ranges.len() - 1] {
        let mass: u64 = (range.start..range.end)
            .map(|v| histogram[(v + offset as i32) as usize])
            .sum();
        assert!(
            mass >= target && mass <= target + 7,
            "bin {range:?} holds {mass}, target {target}"
        );
    }
}

#[test]
fn degenerate_histogram_still_yields_exact_bin_count() {
    let criteria = Criteria::default();
    let hasher = Hasher::new(&criteria);

    let mut histogram = vec![0u64; hashmatch::geometry::DEPTH_VALUES_RANGE];
    histogram[hashmatch::geometry::DEPTH_VALUE_MAX as usize] = 1000;

    let ranges = hasher.histogram_ranges(1000, &histogram).unwrap();
    assert_eq!(ranges.len(), criteria.histogram_bin_count);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
    assert_eq!(
        ranges.last().unwrap().end,
        hashmatch::geometry::DEPTH_VALUE_MAX + 1
    );
}

#[test]
fn empty_group_fails_training() {
    let criteria = small_criteria();
    let hasher = Hasher::new(&criteria);
    let groups = vec![group(0, Vec::new())];
    let mut rng = StdRng::seed_from_u64(1);
    assert!(hasher.train(&groups, &mut rng).is_err());
}

#[test]
fn undersized_template_fails_training() {
    let criteria = small_criteria();
    let hasher = Hasher::new(&criteria);
    // 4 pixels per 4-cell grid leaves no border margin for normals.
    let groups = vec![group(0, vec![template(0, 0, ramp_depth(4, 5000.0, 1.0, 0.0))])];
    let mut rng = StdRng::seed_from_u64(1);
    assert!(hasher.train(&groups, &mut rng).is_err());
}

#[test]
fn matching_window_votes_exclusively_for_the_matching_template() {
    let criteria = small_criteria();
    let hasher = Hasher::new(&criteria);

    // Template A tilts along x, template B along y: every triplet sees
    // different normal octants, so no key can collide between the two.
    let tpl_a = ramp_depth(48, 5000.0, 10.0, 0.0);
    let tpl_b = ramp_depth(48, 5000.0, 0.0, -10.0);
    let groups = vec![
        group(0, vec![template(0, 0, tpl_a.clone())]),
        group(1, vec![template(2000, 1, tpl_b)]),
    ];

    let mut rng = StdRng::seed_from_u64(5);
    let index = hasher.train(&groups, &mut rng).unwrap();

    // Scene: flat background with template A's exact geometry at (24, 24).
    let mut depth = Map2::filled(96, 96, 5000.0).unwrap();
    for y in 0..48 {
        for x in 0..48 {
            depth.set(24 + x, 24 + y, tpl_a.at(x, y));
        }
    }
    let source = SceneSource {
        depth,
        gray: Map2::filled(96, 96, 128.0).unwrap(),
        hsv: Map2::filled(96, 96, [0u8, 0, 0]).unwrap(),
    };
    let scene = Scene::build(&source, &criteria).unwrap();

    let proposals = vec![Window::region(24, 24, 48, 48)];
    let windows = hasher.verify_candidates(&scene, &index, &proposals);

    assert_eq!(windows.len(), 1);
    let window = &windows[0];
    assert_eq!((window.x, window.y), (24, 24));
    assert_eq!(window.candidates.len(), 1);
    assert_eq!(window.candidates[0].template, 0);
    // Every table re-derives template A's key exactly.
    assert_eq!(window.candidates[0].votes, criteria.table_count as u32);
}

#[test]
fn windows_without_votes_are_dropped_silently() {
    let criteria = small_criteria();
    let hasher = Hasher::new(&criteria);

    let groups = vec![group(0, vec![template(0, 0, ramp_depth(48, 5000.0, 10.0, 0.0))])];
    let mut rng = StdRng::seed_from_u64(5);
    let index = hasher.train(&groups, &mut rng).unwrap();

    // Purely flat scene: no window reproduces the ramp signature.
    let source = SceneSource {
        depth: Map2::filled(96, 96, 5000.0).unwrap(),
        gray: Map2::filled(96, 96, 128.0).unwrap(),
        hsv: Map2::filled(96, 96, [0u8, 0, 0]).unwrap(),
    };
    let scene = Scene::build(&source, &criteria).unwrap();

    let proposals = vec![Window::region(0, 0, 96, 96)];
    let windows = hasher.verify_candidates(&scene, &index, &proposals);
    assert!(windows.is_empty());
}
