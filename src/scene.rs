//! Scene data and candidate windows.

use crate::criteria::Criteria;
use crate::image::{rescale_f32, rescale_rgb3, Map2};
use crate::processing::{quantized_gradients, quantized_normals};
use crate::template::TemplateId;
use crate::util::DetectResult;

/// Raw scene rasters as delivered by a parser, before derivative maps.
#[derive(Clone, Debug)]
pub struct SceneSource {
    /// Scene depth map.
    pub depth: Map2<f32>,
    /// Grayscale intensity.
    pub gray: Map2<f32>,
    /// HSV color.
    pub hsv: Map2<[u8; 3]>,
}

impl SceneSource {
    /// Returns the source rescaled to one pyramid level.
    pub fn rescaled(&self, scale: f32) -> DetectResult<Self> {
        Ok(Self {
            depth: rescale_f32(&self.depth, scale)?,
            gray: rescale_f32(&self.gray, scale)?,
            hsv: rescale_rgb3(&self.hsv, scale)?,
        })
    }
}

/// One pyramid level of a test scene with its derived quantized maps.
#[derive(Clone, Debug)]
pub struct Scene {
    /// Scene depth map.
    pub depth: Map2<f32>,
    /// HSV color.
    pub hsv: Map2<[u8; 3]>,
    /// Quantized surface normals (octant per pixel, or invalid marker).
    pub normals: Map2<u8>,
    /// Quantized gradient-orientation bins.
    pub angles: Map2<u8>,
    /// Gradient magnitudes.
    pub magnitudes: Map2<f32>,
}

impl Scene {
    /// Derives the quantized maps the cascade consumes from raw rasters.
    pub fn build(source: &SceneSource, criteria: &Criteria) -> DetectResult<Self> {
        let dims = (source.depth.width(), source.depth.height());
        if (source.gray.width(), source.gray.height()) != dims
            || (source.hsv.width(), source.hsv.height()) != dims
        {
            return Err(crate::util::DetectError::data(
                "scene",
                "depth, gray and hsv rasters must share dimensions",
            ));
        }

        let normals = quantized_normals(
            &source.depth,
            criteria.fx,
            criteria.fy,
            criteria.max_depth,
            criteria.max_depth_diff,
        )?;
        let (angles, magnitudes) = quantized_gradients(&source.gray)?;
        Ok(Self {
            depth: source.depth.clone(),
            hsv: source.hsv.clone(),
            normals,
            angles,
            magnitudes,
        })
    }

    /// Scene width in pixels.
    pub fn width(&self) -> usize {
        self.depth.width()
    }

    /// Scene height in pixels.
    pub fn height(&self) -> usize {
        self.depth.height()
    }
}

/// A template that survived hash voting for one window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// The voted template.
    pub template: TemplateId,
    /// Votes accumulated across hash tables.
    pub votes: u32,
}

/// A candidate scene region at one pyramid level.
///
/// Objectness proposes coarse regions with empty candidate lists; hash
/// verification emits fixed-size windows whose candidate lists carry the
/// surviving templates with their vote counts.
#[derive(Clone, Debug, Default)]
pub struct Window {
    /// Left edge in scene pixels.
    pub x: usize,
    /// Top edge in scene pixels.
    pub y: usize,
    /// Window width.
    pub width: usize,
    /// Window height.
    pub height: usize,
    /// Surviving candidate templates, sorted by descending votes.
    pub candidates: Vec<Candidate>,
}

impl Window {
    /// Creates a candidate-less region proposal.
    pub fn region(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
            candidates: Vec::new(),
        }
    }
}
