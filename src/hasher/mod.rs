//! Approximate-matching index: construction and candidate retrieval.
//!
//! Training builds `table_count` hash tables, one per distinct random
//! triplet, with depth quantization adapted to the empirical distribution of
//! relative depths across the training set. Retrieval re-derives the same
//! 5-symbol key per scene window and votes for every template sharing a
//! bucket; templates clearing the vote threshold become verification
//! candidates.

pub mod table;
pub mod triplet;

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::criteria::Criteria;
use crate::geometry::{
    quantize_normal, relative_depths, surface_normal, DEPTH_VALUES_RANGE, DEPTH_VALUE_MAX,
};
use crate::image::Map2;
use crate::scene::{Candidate, Scene, Window};
use crate::template::{Template, TemplateGroup};
use crate::trace::{trace_event, trace_span};
use crate::util::{DetectError, DetectResult};

pub use table::{HashKey, HashTable};
pub use triplet::{GridPoint, Triplet};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

// Regeneration attempts per requested triplet before giving up on
// distinctness.
const TRIPLET_RETRY_FACTOR: usize = 100;

/// Half-open quantization range over the signed depth-difference domain.
///
/// The final range of an index is closed at `DEPTH_VALUE_MAX` instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinRange {
    /// Inclusive lower bound.
    pub start: i32,
    /// Exclusive upper bound.
    pub end: i32,
}

/// A trained index: hash tables plus the shared depth bin ranges.
#[derive(Clone, Debug, Default)]
pub struct HashIndex {
    /// One table per triplet.
    pub tables: Vec<HashTable>,
    /// Equal-frequency depth bin ranges, global to all tables.
    pub ranges: Vec<BinRange>,
}

/// Builds and queries the geometric-hash index.
pub struct Hasher<'a> {
    criteria: &'a Criteria,
}

impl<'a> Hasher<'a> {
    /// Creates a hasher over the given configuration.
    pub fn new(criteria: &'a Criteria) -> Self {
        Self { criteria }
    }

    /// Generates `table_count` pairwise distinct triplets.
    ///
    /// Duplicates are regenerated in place; the retry budget makes the
    /// probabilistic termination argument explicit and turns a grid too
    /// small for the table count into a configuration error instead of a
    /// livelock.
    pub fn generate_triplets<R: Rng + ?Sized>(&self, rng: &mut R) -> DetectResult<Vec<Triplet>> {
        let count = self.criteria.table_count;
        let grid = self.criteria.feature_grid;
        let mut triplets: Vec<Triplet> = Vec::with_capacity(count);
        let mut budget = count * TRIPLET_RETRY_FACTOR;

        while triplets.len() < count {
            let candidate = Triplet::random(grid, rng);
            if triplets.contains(&candidate) {
                budget -= 1;
                if budget == 0 {
                    return Err(DetectError::config(format!(
                        "cannot draw {count} distinct triplets from a {}x{} grid",
                        grid.width, grid.height
                    )));
                }
                continue;
            }
            triplets.push(candidate);
        }
        Ok(triplets)
    }

    /// Computes equal-frequency bin ranges from a depth-difference histogram.
    ///
    /// Produces exactly `histogram_bin_count` contiguous ranges covering the
    /// whole signed domain; every bin accumulates approximately
    /// `total / bin_count` samples and the last bin absorbs the remainder up
    /// to the domain maximum.
    pub fn histogram_ranges(&self, total: u64, histogram: &[u64]) -> DetectResult<Vec<BinRange>> {
        let bin_count = self.criteria.histogram_bin_count;
        if total == 0 {
            return Err(DetectError::config(
                "depth histogram is empty; no template samples were accumulated",
            ));
        }
        if histogram.len() != DEPTH_VALUES_RANGE {
            return Err(DetectError::config(format!(
                "depth histogram must cover the full domain ({} values, got {})",
                DEPTH_VALUES_RANGE,
                histogram.len()
            )));
        }

        let target = (total / bin_count as u64).max(1);
        let mut ranges = Vec::with_capacity(bin_count);
        let mut accumulated = 0u64;
        let mut range_start = -DEPTH_VALUE_MAX;

        for (index, &count) in histogram.iter().enumerate() {
            if ranges.len() + 1 == bin_count {
                break;
            }
            accumulated += count;
            if accumulated >= target {
                let end = index as i32 - DEPTH_VALUE_MAX + 1;
                ranges.push(BinRange {
                    start: range_start,
                    end,
                });
                range_start = end;
                accumulated = 0;
            }
        }

        // A histogram concentrated on few values can starve the tail bins;
        // pad with unit-width ranges so the count invariant always holds.
        while ranges.len() + 1 < bin_count {
            if range_start >= DEPTH_VALUE_MAX {
                return Err(DetectError::config(format!(
                    "domain exhausted after {} of {bin_count} histogram ranges",
                    ranges.len()
                )));
            }
            ranges.push(BinRange {
                start: range_start,
                end: range_start + 1,
            });
            range_start += 1;
        }

        // The final bin always runs to the inclusive domain maximum.
        ranges.push(BinRange {
            start: range_start,
            end: DEPTH_VALUE_MAX + 1,
        });

        debug_assert_eq!(ranges.len(), bin_count);
        Ok(ranges)
    }

    /// Quantizes a relative depth into its bin index.
    fn quantize_depth(ranges: &[BinRange], depth: i32) -> u8 {
        for (index, range) in ranges.iter().enumerate() {
            if depth >= range.start && depth < range.end {
                return index as u8;
            }
        }
        // The domain maximum itself belongs to the last bin.
        (ranges.len() - 1) as u8
    }

    /// Derives the 5-symbol key of one triplet over a depth geometry.
    ///
    /// `origin` offsets the triplet into a scene window; templates use the
    /// zero origin with their own dimensions.
    fn key_at(
        depth: &Map2<f32>,
        origin: (usize, usize),
        size: (usize, usize),
        triplet: &Triplet,
        grid: crate::criteria::GridSize,
        ranges: &[BinRange],
    ) -> DetectResult<HashKey> {
        let points = triplet.coords(size.0, size.1, grid)?;
        let [p1, p2, p3] = points.map(|(x, y)| (origin.0 + x, origin.1 + y));

        let (d1, d2) = relative_depths(depth, p1, p2, p3);
        let n1 = quantize_normal(&surface_normal(depth, p1.0, p1.1)?);
        let n2 = quantize_normal(&surface_normal(depth, p2.0, p2.1)?);
        let n3 = quantize_normal(&surface_normal(depth, p3.0, p3.1)?);

        Ok(HashKey {
            d1: Self::quantize_depth(ranges, d1),
            d2: Self::quantize_depth(ranges, d2),
            n1,
            n2,
            n3,
        })
    }

    fn accumulate_histogram(
        &self,
        groups: &[TemplateGroup],
        triplets: &[Triplet],
    ) -> DetectResult<(u64, Vec<u64>)> {
        let grid = self.criteria.feature_grid;
        let mut histogram = vec![0u64; DEPTH_VALUES_RANGE];
        let mut total = 0u64;

        for triplet in triplets {
            for group in groups {
                for template in &group.templates {
                    let [p1, p2, p3] =
                        triplet.coords(template.depth.width(), template.depth.height(), grid)?;
                    let (d1, d2) = relative_depths(&template.depth, p1, p2, p3);
                    histogram[(d1 + DEPTH_VALUE_MAX) as usize] += 1;
                    histogram[(d2 + DEPTH_VALUE_MAX) as usize] += 1;
                    total += 2;
                }
            }
        }
        Ok((total, histogram))
    }

    /// Builds the index over all template groups.
    ///
    /// Bucket filling is a map phase (one key per table-template pair,
    /// independent) followed by a reduce phase (set-insertion of template
    /// ids), so the loop order carries no hidden semantics. Any template
    /// whose geometry cannot host the feature grid aborts training: skipping
    /// it would leave the shared bin ranges inconsistent with the data that
    /// produced them.
    pub fn train<R: Rng + ?Sized>(
        &self,
        groups: &[TemplateGroup],
        rng: &mut R,
    ) -> DetectResult<HashIndex> {
        let _span = trace_span!("hasher_train", groups = groups.len()).entered();

        if groups.is_empty() {
            return Err(DetectError::config("no template groups to index"));
        }
        for group in groups {
            if group.templates.is_empty() {
                return Err(DetectError::config(format!(
                    "template group {} ({}) is empty",
                    group.object_id, group.object
                )));
            }
        }

        let triplets = self.generate_triplets(rng)?;
        let (total, histogram) = self.accumulate_histogram(groups, &triplets)?;
        let ranges = self.histogram_ranges(total, &histogram)?;
        let grid = self.criteria.feature_grid;

        // Map phase: every (table, template) pair yields one key.
        let mut keys: Vec<Vec<(HashKey, u32)>> = Vec::with_capacity(triplets.len());
        for triplet in &triplets {
            let mut table_keys = Vec::new();
            for group in groups {
                for template in &group.templates {
                    let key = Self::key_at(
                        &template.depth,
                        (0, 0),
                        (template.depth.width(), template.depth.height()),
                        triplet,
                        grid,
                        &ranges,
                    )
                    .map_err(|err| match err {
                        DetectError::Data { reason, .. } => {
                            DetectError::data(format!("template {}", template.id), reason)
                        }
                        other => other,
                    })?;
                    table_keys.push((key, template.id));
                }
            }
            keys.push(table_keys);
        }

        // Reduce phase: bucket insertion, deduplicated by template identity.
        let mut tables = Vec::with_capacity(triplets.len());
        for (triplet, table_keys) in triplets.into_iter().zip(keys) {
            let mut table = HashTable::new(triplet);
            for (key, id) in table_keys {
                table.insert(key, id);
            }
            tables.push(table);
        }

        trace_event!("hasher_trained", tables = tables.len(), samples = total);
        Ok(HashIndex { tables, ranges })
    }

    /// Retrieves verification candidates for proposed regions of a scene.
    ///
    /// A fixed-size window slides across each region with `window_step`;
    /// every position accumulates votes in a window-local map and promotes
    /// templates with at least `min_votes` votes, most voted first, capped
    /// at `max_window_candidates`. Positions or whole regions yielding no
    /// candidates are dropped silently.
    pub fn verify_candidates(
        &self,
        scene: &Scene,
        index: &HashIndex,
        proposals: &[Window],
    ) -> Vec<Window> {
        let _span = trace_span!("hash_filter", proposals = proposals.len()).entered();

        let positions = self.window_positions(scene, proposals);

        #[cfg(feature = "rayon")]
        let windows: Vec<Window> = positions
            .par_iter()
            .filter_map(|&(x, y)| self.vote_window(scene, index, x, y))
            .collect();

        #[cfg(not(feature = "rayon"))]
        let windows: Vec<Window> = positions
            .iter()
            .filter_map(|&(x, y)| self.vote_window(scene, index, x, y))
            .collect();

        trace_event!(
            "hash_filtered",
            positions = positions.len(),
            windows = windows.len()
        );
        windows
    }

    fn window_positions(&self, scene: &Scene, proposals: &[Window]) -> Vec<(usize, usize)> {
        let size = self.criteria.window_size;
        let step = self.criteria.window_step;
        let mut positions = Vec::new();

        for proposal in proposals {
            let x_end = (proposal.x + proposal.width).min(scene.width());
            let y_end = (proposal.y + proposal.height).min(scene.height());
            if x_end < proposal.x + size || y_end < proposal.y + size {
                continue;
            }
            let mut y = proposal.y;
            while y + size <= y_end {
                let mut x = proposal.x;
                while x + size <= x_end {
                    positions.push((x, y));
                    x += step;
                }
                y += step;
            }
        }

        positions.sort_unstable();
        positions.dedup();
        positions
    }

    /// Evaluates one window position; votes live only in this call's
    /// accumulator and die with it.
    fn vote_window(
        &self,
        scene: &Scene,
        index: &HashIndex,
        x: usize,
        y: usize,
    ) -> Option<Window> {
        let size = self.criteria.window_size;
        let grid = self.criteria.feature_grid;
        let mut votes: HashMap<u32, u32> = HashMap::new();

        for table in &index.tables {
            // Scene data can be missing or broken under any sampled point;
            // that disqualifies this table's vote, not the whole window.
            let key = match Self::key_at(
                &scene.depth,
                (x, y),
                (size, size),
                &table.triplet,
                grid,
                &index.ranges,
            ) {
                Ok(key) => key,
                Err(_) => continue,
            };
            if let Some(bucket) = table.get(&key) {
                for &id in bucket {
                    *votes.entry(id).or_insert(0) += 1;
                }
            }
        }

        let mut candidates: Vec<Candidate> = votes
            .into_iter()
            .filter(|&(_, count)| count >= self.criteria.min_votes)
            .map(|(template, count)| Candidate {
                template,
                votes: count,
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.template.cmp(&b.template)));
        candidates.truncate(self.criteria.max_window_candidates);

        Some(Window {
            x,
            y,
            width: size,
            height: size,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::Criteria;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn criteria() -> Criteria {
        Criteria {
            table_count: 20,
            ..Criteria::default()
        }
    }

    #[test]
    fn generated_triplets_are_pairwise_distinct() {
        let criteria = criteria();
        let hasher = Hasher::new(&criteria);
        let mut rng = StdRng::seed_from_u64(3);
        let triplets = hasher.generate_triplets(&mut rng).unwrap();
        assert_eq!(triplets.len(), criteria.table_count);
        for (i, a) in triplets.iter().enumerate() {
            for b in triplets.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn impossible_distinctness_fails_fast() {
        let criteria = Criteria {
            table_count: 10,
            feature_grid: crate::criteria::GridSize {
                width: 1,
                height: 1,
            },
            ..Criteria::default()
        };
        let hasher = Hasher::new(&criteria);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            hasher.generate_triplets(&mut rng),
            Err(DetectError::Config { .. })
        ));
    }

    #[test]
    fn quantize_depth_maps_domain_max_to_last_bin() {
        let ranges = vec![
            BinRange {
                start: -DEPTH_VALUE_MAX,
                end: 0,
            },
            BinRange {
                start: 0,
                end: DEPTH_VALUE_MAX + 1,
            },
        ];
        assert_eq!(Hasher::quantize_depth(&ranges, -10), 0);
        assert_eq!(Hasher::quantize_depth(&ranges, 0), 1);
        assert_eq!(Hasher::quantize_depth(&ranges, DEPTH_VALUE_MAX), 1);
    }
}
