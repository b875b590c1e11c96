//! Template storage: rendered object views and their feature points.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::Pose;
use crate::image::Map2;
use crate::util::{DetectError, DetectResult};

/// Identifier of one template across the whole trained set.
pub type TemplateId = u32;

/// One selected feature point with its precomputed discrete descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeaturePoint {
    /// Template-local x coordinate.
    pub x: u16,
    /// Template-local y coordinate.
    pub y: u16,
    /// Quantized surface-normal octant, or `INVALID_NORMAL`.
    pub normal: u8,
    /// Quantized gradient-orientation bin.
    pub gradient: u8,
    /// Raw depth at the point.
    pub depth: f32,
    /// HSV color at the point.
    pub hsv: [u8; 3],
}

/// One rendered view of one object at a known pose.
///
/// Geometry is immutable after training; all transient detection state lives
/// in window-local accumulators, never on the template itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    /// Unique id of this view.
    pub id: TemplateId,
    /// Id of the physical object (template group) this view belongs to.
    pub object_id: u32,
    /// Physical object diameter, in depth units.
    pub diameter: f32,
    /// Render pose of the view.
    pub pose: Pose,
    /// Depth map of the rendered view.
    pub depth: Map2<f32>,
    /// Median of the valid depths, the view's expected object depth.
    pub depth_median: f32,
    /// Number of depth discontinuity pixels, used by objectness.
    pub edgel_count: u32,
    /// Edge feature points (high gradient magnitude).
    pub edge_points: Vec<FeaturePoint>,
    /// Stable feature points (smooth, valid-depth regions).
    pub stable_points: Vec<FeaturePoint>,
}

/// Auxiliary raster data used only while extracting features.
#[derive(Clone, Debug)]
pub struct TemplateMaps {
    /// Grayscale intensity of the rendered view.
    pub gray: Map2<f32>,
    /// HSV color of the rendered view.
    pub hsv: Map2<[u8; 3]>,
}

/// A parsed template together with its training-time raster data.
#[derive(Clone, Debug)]
pub struct RawTemplate {
    /// The template record being trained.
    pub template: Template,
    /// Rasters consumed by feature extraction and dropped afterwards.
    pub maps: TemplateMaps,
}

/// All templates belonging to one physical object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateGroup {
    /// Object id shared by every member template.
    pub object_id: u32,
    /// Human-readable object name (directory stem of the source).
    pub object: String,
    /// Member templates.
    pub templates: Vec<Template>,
}

/// Flat pool of all loaded templates with id-based lookup.
#[derive(Clone, Debug, Default)]
pub struct TemplatePool {
    templates: Vec<Template>,
    by_id: HashMap<TemplateId, usize>,
}

impl TemplatePool {
    /// Builds a pool from template groups, consuming them.
    ///
    /// Duplicate template ids across groups are a data violation.
    pub fn from_groups(groups: Vec<TemplateGroup>) -> DetectResult<Self> {
        let mut pool = Self::default();
        for group in groups {
            for template in group.templates {
                pool.insert(template)?;
            }
        }
        Ok(pool)
    }

    fn insert(&mut self, template: Template) -> DetectResult<()> {
        if self.by_id.contains_key(&template.id) {
            return Err(DetectError::data(
                "template pool",
                format!("duplicate template id {}", template.id),
            ));
        }
        self.by_id.insert(template.id, self.templates.len());
        self.templates.push(template);
        Ok(())
    }

    /// Resolves a template by id.
    pub fn get(&self, id: TemplateId) -> Option<&Template> {
        self.by_id.get(&id).map(|&index| &self.templates[index])
    }

    /// Returns all templates in insertion order.
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Returns the number of templates in the pool.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true when the pool holds no templates.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn template(id: TemplateId) -> Template {
        Template {
            id,
            object_id: 0,
            diameter: 100.0,
            pose: Pose::new(Vector3::zeros(), Vector3::zeros()),
            depth: Map2::filled(4, 4, 1000.0).unwrap(),
            depth_median: 1000.0,
            edgel_count: 0,
            edge_points: Vec::new(),
            stable_points: Vec::new(),
        }
    }

    #[test]
    fn pool_resolves_templates_by_id() {
        let group = TemplateGroup {
            object_id: 0,
            object: "obj_01".into(),
            templates: vec![template(7), template(9)],
        };
        let pool = TemplatePool::from_groups(vec![group]).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(9).unwrap().id, 9);
        assert!(pool.get(8).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let group = TemplateGroup {
            object_id: 0,
            object: "obj_01".into(),
            templates: vec![template(7), template(7)],
        };
        assert!(TemplatePool::from_groups(vec![group]).is_err());
    }
}
