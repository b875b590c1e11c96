//! RGB-D raster loading and the directory-based template parser.
//!
//! Available when the `image-io` feature is enabled. Depth maps are 16-bit
//! grayscale PNGs carrying raw sensor units; color maps are 8-bit RGB PNGs
//! converted to grayscale and HSV on load.

use std::path::Path;

use serde::Deserialize;

use crate::classifier::Parser;
use crate::geometry::Pose;
use crate::image::Map2;
use crate::processing::{gray_from_rgb, rgb_to_hsv};
use crate::scene::SceneSource;
use crate::template::{RawTemplate, Template, TemplateMaps};
use crate::util::{DetectError, DetectResult};
use nalgebra::Vector3;

/// Loads a 16-bit grayscale PNG as a depth map.
pub fn load_depth_png<P: AsRef<Path>>(path: P) -> DetectResult<Map2<f32>> {
    let img = image::open(&path).map_err(|err| DetectError::ImageIo {
        reason: format!("{}: {err}", path.as_ref().display()),
    })?;
    let depth = img.to_luma16();
    let data = depth.as_raw().iter().map(|&v| v as f32).collect();
    Map2::from_vec(data, depth.width() as usize, depth.height() as usize)
}

/// Loads an RGB PNG as grayscale and HSV maps.
pub fn load_color_png<P: AsRef<Path>>(path: P) -> DetectResult<(Map2<f32>, Map2<[u8; 3]>)> {
    let img = image::open(&path).map_err(|err| DetectError::ImageIo {
        reason: format!("{}: {err}", path.as_ref().display()),
    })?;
    let rgb = img.to_rgb8();
    let width = rgb.width() as usize;
    let height = rgb.height() as usize;

    let mut gray = Vec::with_capacity(width * height);
    let mut hsv = Vec::with_capacity(width * height);
    for pixel in rgb.pixels() {
        let p = [pixel.0[0], pixel.0[1], pixel.0[2]];
        gray.push(gray_from_rgb(p));
        hsv.push(rgb_to_hsv(p));
    }
    Ok((
        Map2::from_vec(gray, width, height)?,
        Map2::from_vec(hsv, width, height)?,
    ))
}

/// Loads a scene from a depth PNG and a color PNG.
pub fn load_scene<P: AsRef<Path>>(depth_path: P, color_path: P) -> DetectResult<SceneSource> {
    let depth = load_depth_png(depth_path)?;
    let (gray, hsv) = load_color_png(color_path)?;
    Ok(SceneSource { depth, gray, hsv })
}

#[derive(Debug, Deserialize)]
struct ViewEntry {
    depth: String,
    color: String,
    #[serde(default)]
    translation: [f32; 3],
    #[serde(default)]
    rotation: [f32; 3],
}

#[derive(Debug, Deserialize)]
struct ObjectFile {
    diameter: f32,
    views: Vec<ViewEntry>,
}

/// Parses object directories holding an `object.json` view manifest next to
/// per-view depth and color PNGs.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectoryParser;

impl Parser for DirectoryParser {
    fn parse_object(&self, path: &Path, indices: &[u32]) -> DetectResult<Vec<RawTemplate>> {
        let object_file = path.join("object.json");
        let object: ObjectFile = crate::classifier::persist::read_json(&object_file)?;

        let mut raws = Vec::new();
        for (view, entry) in object.views.iter().enumerate() {
            if !indices.is_empty() && !indices.contains(&(view as u32)) {
                continue;
            }

            let depth = load_depth_png(path.join(&entry.depth))?;
            let (gray, hsv) = load_color_png(path.join(&entry.color))?;

            raws.push(RawTemplate {
                template: Template {
                    id: view as u32,
                    object_id: 0,
                    diameter: object.diameter,
                    pose: Pose::new(
                        Vector3::from(entry.translation),
                        Vector3::from(entry.rotation),
                    ),
                    depth,
                    depth_median: 0.0,
                    edgel_count: 0,
                    edge_points: Vec::new(),
                    stable_points: Vec::new(),
                },
                maps: TemplateMaps { gray, hsv },
            });
        }
        Ok(raws)
    }
}
