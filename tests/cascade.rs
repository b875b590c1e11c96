//! Verification cascade behavior over synthetic candidate pairs.

use hashmatch::{
    Candidate, Criteria, Map2, Matcher, Pose, RawTemplate, Scene, SceneSource, Template,
    TemplateGroup, TemplateMaps, TemplatePool, Window,
};
use nalgebra::Vector3;

const SIZE: usize = 48;
const DEPTH: f32 = 5000.0;

/// Vertical gray stripes with strong edges every 8 pixels.
fn striped_gray(size: usize) -> Map2<f32> {
    let mut data = Vec::with_capacity(size * size);
    for _y in 0..size {
        for x in 0..size {
            data.push(if (x / 4) % 2 == 0 { 0.0 } else { 200.0 });
        }
    }
    Map2::from_vec(data, size, size).unwrap()
}

fn trained_template(criteria: &Criteria) -> Template {
    let depth = Map2::filled(SIZE, SIZE, DEPTH).unwrap();
    // Diameter chosen so the apparent size at DEPTH matches the raster.
    let diameter = SIZE as f32 * DEPTH / criteria.fx;

    let mut raws = vec![RawTemplate {
        template: Template {
            id: 0,
            object_id: 0,
            diameter,
            pose: Pose::new(Vector3::zeros(), Vector3::zeros()),
            depth,
            depth_median: 0.0,
            edgel_count: 0,
            edge_points: Vec::new(),
            stable_points: Vec::new(),
        },
        maps: TemplateMaps {
            gray: striped_gray(SIZE),
            hsv: Map2::filled(SIZE, SIZE, [60u8, 180, 200]).unwrap(),
        },
    }];
    Matcher::new(criteria).train(&mut raws).unwrap();
    raws.remove(0).template
}

/// Scene with the template's stripes embedded at `(x0, y0)`, constant depth
/// `scene_depth` everywhere and the template's HSV color.
fn scene_with_stripes(criteria: &Criteria, x0: usize, y0: usize, scene_depth: f32) -> Scene {
    let side = 100;
    let mut gray = Map2::filled(side, side, 128.0f32).unwrap();
    let stripes = striped_gray(SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            gray.set(x0 + x, y0 + y, stripes.at(x, y));
        }
    }
    let source = SceneSource {
        depth: Map2::filled(side, side, scene_depth).unwrap(),
        gray,
        hsv: Map2::filled(side, side, [60u8, 180, 200]).unwrap(),
    };
    Scene::build(&source, criteria).unwrap()
}

fn candidate_window(x: usize, y: usize) -> Window {
    Window {
        x,
        y,
        width: SIZE,
        height: SIZE,
        candidates: vec![Candidate {
            template: 0,
            votes: 5,
        }],
    }
}

fn pool(template: Template) -> TemplatePool {
    TemplatePool::from_groups(vec![TemplateGroup {
        object_id: 0,
        object: "obj_00".into(),
        templates: vec![template],
    }])
    .unwrap()
}

#[test]
fn aligned_pair_passes_the_cascade() {
    let criteria = Criteria::default();
    let pool = pool(trained_template(&criteria));
    let scene = scene_with_stripes(&criteria, 20, 20, DEPTH);

    let matches = Matcher::new(&criteria).match_windows(
        1.0,
        &scene,
        &[candidate_window(20, 20)],
        &pool,
    );

    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!((m.x, m.y), (20, 20));
    assert!(m.score >= criteria.match_factor, "score {}", m.score);
    assert!(m.normal_score > 0.9);
    assert!(m.gradient_score > 0.5);
    assert!(m.color_score > 0.9);
}

#[test]
fn depth_gate_rejects_regardless_of_point_scores() {
    let criteria = Criteria::default();
    let pool = pool(trained_template(&criteria));

    // 400 units of depth offset: still within the size tolerance, but far
    // past the 120-unit deviation allowed below 10k depth. Every per-point
    // test would pass (identical stripes, colors and flat normals), so an
    // accepted match here could only come from ignoring the gate.
    let scene = scene_with_stripes(&criteria, 20, 20, DEPTH + 400.0);

    let matches = Matcher::new(&criteria).match_windows(
        1.0,
        &scene,
        &[candidate_window(20, 20)],
        &pool,
    );
    assert!(matches.is_empty());
}

#[test]
fn size_gate_rejects_mismatched_apparent_size() {
    let criteria = Criteria::default();
    let pool = pool(trained_template(&criteria));

    // Twice the depth halves the apparent size; the ratio 0.5 is far
    // outside the configured tolerance.
    let scene = scene_with_stripes(&criteria, 20, 20, DEPTH * 2.0);

    let matches = Matcher::new(&criteria).match_windows(
        1.0,
        &scene,
        &[candidate_window(20, 20)],
        &pool,
    );
    assert!(matches.is_empty());
}

#[test]
fn unknown_candidate_ids_are_skipped() {
    let criteria = Criteria::default();
    let pool = pool(trained_template(&criteria));
    let scene = scene_with_stripes(&criteria, 20, 20, DEPTH);

    let mut window = candidate_window(20, 20);
    window.candidates[0].template = 777;

    let matches = Matcher::new(&criteria).match_windows(1.0, &scene, &[window], &pool);
    assert!(matches.is_empty());
}

#[test]
fn windows_without_valid_depth_are_skipped() {
    let criteria = Criteria::default();
    let pool = pool(trained_template(&criteria));

    let side = 100;
    let source = SceneSource {
        depth: Map2::filled(side, side, 0.0f32).unwrap(),
        gray: Map2::filled(side, side, 128.0f32).unwrap(),
        hsv: Map2::filled(side, side, [60u8, 180, 200]).unwrap(),
    };
    let scene = Scene::build(&source, &criteria).unwrap();

    let matches = Matcher::new(&criteria).match_windows(
        1.0,
        &scene,
        &[candidate_window(20, 20)],
        &pool,
    );
    assert!(matches.is_empty());
}
