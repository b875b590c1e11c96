//! Triplet sampling patterns over the normalized feature-point grid.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::criteria::GridSize;
use crate::util::{DetectError, DetectResult};

/// One cell of the normalized feature-point grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Grid column.
    pub x: u8,
    /// Grid row.
    pub y: u8,
}

/// A 3-point sampling pattern parametrized over the feature grid.
///
/// Grid coordinates are resolution independent: [`Triplet::coords`] scales
/// them to concrete pixel centers for any window or template size. Triplets
/// compare structurally; an index must never hold two equal ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triplet {
    /// Anchor point; relative depths are measured against it.
    pub p1: GridPoint,
    /// Second sampled point.
    pub p2: GridPoint,
    /// Third sampled point.
    pub p3: GridPoint,
}

impl Triplet {
    /// Draws a random triplet over the grid.
    pub fn random<R: Rng + ?Sized>(grid: GridSize, rng: &mut R) -> Self {
        let mut point = |rng: &mut R| GridPoint {
            x: rng.random_range(0..grid.width),
            y: rng.random_range(0..grid.height),
        };
        Self {
            p1: point(rng),
            p2: point(rng),
            p3: point(rng),
        }
    }

    /// Scales the grid coordinates to pixel centers of a `width` x `height`
    /// geometry.
    ///
    /// Each returned point must keep a one-pixel margin to the border so
    /// surface normals can be extracted with central differences; geometry
    /// too small for the configured grid is a data violation.
    pub fn coords(
        &self,
        width: usize,
        height: usize,
        grid: GridSize,
    ) -> DetectResult<[(usize, usize); 3]> {
        let cell_w = width as f32 / grid.width as f32;
        let cell_h = height as f32 / grid.height as f32;

        let scale = |p: GridPoint| -> (usize, usize) {
            let x = ((p.x as f32 + 0.5) * cell_w) as usize;
            let y = ((p.y as f32 + 0.5) * cell_h) as usize;
            (x, y)
        };

        let points = [scale(self.p1), scale(self.p2), scale(self.p3)];
        for &(x, y) in &points {
            if x < 1 || y < 1 || x + 1 >= width || y + 1 >= height {
                return Err(DetectError::data(
                    "triplet coordinates",
                    format!(
                        "point ({x}, {y}) of {self:?} leaves no border margin in \
                         {width}x{height} geometry"
                    ),
                ));
            }
        }
        Ok(points)
    }
}
