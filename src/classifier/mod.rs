//! Training and detection orchestration.
//!
//! Training streams object paths from a template list, persists each parsed
//! object immediately to bound memory, then builds the hash index over the
//! accumulated pool and persists it together with the configuration.
//! Detection loads the persisted bundle once and walks the scale pyramid per
//! scene: propose windows, hash-filter, verify, and finally collapse
//! overlapping detections.

pub mod nms;
pub mod persist;

use std::fs;
use std::path::{Path, PathBuf};

use crate::criteria::{Criteria, TrainedInfo};
use crate::hasher::{HashIndex, Hasher};
use crate::matcher::{Match, Matcher};
use crate::objectness::Objectness;
use crate::scene::{Scene, SceneSource};
use crate::template::{RawTemplate, TemplateGroup, TemplatePool};
use crate::trace::{trace_event, trace_span};
use crate::util::{DetectError, DetectResult};

use persist::{Manifest, ManifestEntry, INDEX_FILE, MANIFEST_FILE};

/// Loads raw templates for one object of the training set.
///
/// Dataset-specific formats live behind this contract; `indices` selects a
/// subset of the object's views, an empty slice means all of them.
pub trait Parser {
    /// Parses the object at `path` into raw templates.
    fn parse_object(&self, path: &Path, indices: &[u32]) -> DetectResult<Vec<RawTemplate>>;
}

/// One object that failed during batch training.
#[derive(Clone, Debug)]
pub struct ObjectFailure {
    /// Path of the failed object.
    pub path: PathBuf,
    /// Rendered failure reason.
    pub reason: String,
}

/// Outcome of a training run.
#[derive(Clone, Debug, Default)]
pub struct TrainSummary {
    /// Objects trained and persisted.
    pub objects: usize,
    /// Templates accumulated into the index.
    pub templates: usize,
    /// Objects skipped because parsing or feature extraction failed.
    pub failures: Vec<ObjectFailure>,
}

/// Orchestrates index training over a template list.
pub struct Classifier {
    criteria: Criteria,
}

impl Classifier {
    /// Creates a classifier after validating the configuration.
    pub fn new(criteria: Criteria) -> DetectResult<Self> {
        criteria.validate()?;
        Ok(Self { criteria })
    }

    /// Trains the detector over the objects listed in `list_path`.
    ///
    /// Each non-empty line of the list names one object directory. Objects
    /// failing to parse or train are reported in the summary and skipped;
    /// structural errors while building the shared index abort the run.
    pub fn train(
        &self,
        parser: &dyn Parser,
        list_path: &Path,
        out_dir: &Path,
        indices: &[u32],
    ) -> DetectResult<TrainSummary> {
        let _span = trace_span!("train").entered();

        let list =
            fs::read_to_string(list_path).map_err(|err| DetectError::io(list_path, err))?;
        fs::create_dir_all(out_dir).map_err(|err| DetectError::io(out_dir, err))?;

        let matcher = Matcher::new(&self.criteria);
        let mut summary = TrainSummary::default();
        let mut groups: Vec<TemplateGroup> = Vec::new();
        let mut manifest = Manifest::default();

        for (object_id, line) in list.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let object_path = PathBuf::from(line.trim());
            let object = object_name(&object_path);

            match self.train_object(parser, &matcher, &object_path, object_id as u32, indices) {
                Ok(mut group) => {
                    group.object = object.clone();
                    let file = format!("templates_{object_id:02}.json");
                    persist::write_json(&out_dir.join(&file), &group)?;
                    trace_event!("object_trained", templates = group.templates.len());

                    summary.objects += 1;
                    summary.templates += group.templates.len();
                    manifest.objects.push(ManifestEntry {
                        object_id: object_id as u32,
                        object,
                        file,
                    });
                    groups.push(group);
                }
                Err(err) => summary.failures.push(ObjectFailure {
                    path: object_path,
                    reason: err.to_string(),
                }),
            }
        }

        if groups.is_empty() {
            return Err(DetectError::config(
                "no object in the template list could be trained",
            ));
        }

        let info = trained_info(&groups);
        let hasher = Hasher::new(&self.criteria);
        let index = hasher.train(&groups, &mut rand::rng())?;

        persist::write_json(
            &out_dir.join(INDEX_FILE),
            &persist::index_to_record(&index, &self.criteria, &info),
        )?;
        persist::write_json(&out_dir.join(MANIFEST_FILE), &manifest)?;

        trace_event!(
            "trained",
            objects = summary.objects,
            templates = summary.templates,
            failures = summary.failures.len()
        );
        Ok(summary)
    }

    fn train_object(
        &self,
        parser: &dyn Parser,
        matcher: &Matcher<'_>,
        path: &Path,
        object_id: u32,
        indices: &[u32],
    ) -> DetectResult<TemplateGroup> {
        let mut raws = parser.parse_object(path, indices)?;
        if raws.is_empty() {
            return Err(DetectError::data(
                format!("object {object_id}"),
                "parser returned no templates",
            ));
        }
        // Ids follow the object-times-2000 convention so they stay unique
        // across the whole trained set.
        for (view, raw) in raws.iter_mut().enumerate() {
            raw.template.object_id = object_id;
            raw.template.id = object_id * 2000 + view as u32;
        }
        matcher.train(&mut raws)?;

        Ok(TemplateGroup {
            object_id,
            object: String::new(),
            templates: raws.into_iter().map(|raw| raw.template).collect(),
        })
    }
}

/// A loaded detector: templates, index and trained info, ready for scenes.
pub struct Detector {
    criteria: Criteria,
    info: TrainedInfo,
    pool: TemplatePool,
    index: HashIndex,
}

impl Detector {
    /// Loads a persisted detector bundle from `dir`.
    pub fn load(dir: &Path) -> DetectResult<Self> {
        let _span = trace_span!("load").entered();

        let manifest: Manifest = persist::read_json(&dir.join(MANIFEST_FILE))?;
        let mut groups = Vec::with_capacity(manifest.objects.len());
        for entry in &manifest.objects {
            let group: TemplateGroup = persist::read_json(&dir.join(&entry.file))?;
            groups.push(group);
        }
        let pool = TemplatePool::from_groups(groups)?;

        let record: persist::IndexRecord = persist::read_json(&dir.join(INDEX_FILE))?;
        record.criteria.validate()?;
        let index = persist::index_from_record(&record, &pool)?;

        trace_event!(
            "loaded",
            templates = pool.len(),
            tables = index.tables.len()
        );
        Ok(Self {
            criteria: record.criteria,
            info: record.info,
            pool,
            index,
        })
    }

    /// Builds a detector directly from in-memory parts (tests, embedding).
    pub fn from_parts(
        criteria: Criteria,
        info: TrainedInfo,
        pool: TemplatePool,
        index: HashIndex,
    ) -> DetectResult<Self> {
        criteria.validate()?;
        Ok(Self {
            criteria,
            info,
            pool,
            index,
        })
    }

    /// The configuration the detector was trained with.
    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    /// Detects trained objects in one scene.
    ///
    /// Walks the scale pyramid, collecting verified matches per level, then
    /// collapses overlapping detections. An empty result is a valid
    /// zero-detection outcome.
    pub fn detect(&self, source: &SceneSource) -> DetectResult<Vec<Match>> {
        let _span = trace_span!("detect").entered();

        let hasher = Hasher::new(&self.criteria);
        let matcher = Matcher::new(&self.criteria);
        let objectness = Objectness::new(&self.criteria, &self.info);

        let mut matches: Vec<Match> = Vec::new();
        let mut scale = self.criteria.initial_scale;

        for level in 0..self.criteria.pyramid_levels {
            let _level_span = trace_span!("pyramid_level", level = level).entered();

            let scaled = source.rescaled(scale)?;
            if scaled.depth.width() < self.criteria.window_size
                || scaled.depth.height() < self.criteria.window_size
            {
                scale *= self.criteria.scale_factor;
                continue;
            }
            let scene = Scene::build(&scaled, &self.criteria)?;

            let proposals = objectness.propose_windows(&scene.depth);
            if proposals.is_empty() {
                scale *= self.criteria.scale_factor;
                continue;
            }

            let windows = hasher.verify_candidates(&scene, &self.index, &proposals);
            if !windows.is_empty() {
                let level_matches = matcher.match_windows(scale, &scene, &windows, &self.pool);
                trace_event!(
                    "level_done",
                    windows = windows.len(),
                    matches = level_matches.len()
                );
                matches.extend(level_matches);
            }

            scale *= self.criteria.scale_factor;
        }

        nms::non_max_suppression(&mut matches, self.criteria.overlap_factor);
        trace_event!("detected", matches = matches.len());
        Ok(matches)
    }
}

fn object_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn trained_info(groups: &[TemplateGroup]) -> TrainedInfo {
    let mut info = TrainedInfo::default();
    let mut smallest_area = usize::MAX;
    let mut min_edgels = u32::MAX;
    for group in groups {
        for template in &group.templates {
            min_edgels = min_edgels.min(template.edgel_count);
            let area = template.depth.width() * template.depth.height();
            if area < smallest_area {
                smallest_area = area;
                info.smallest_template = (template.depth.width(), template.depth.height());
            }
        }
    }
    if min_edgels != u32::MAX {
        info.min_edgels = min_edgels;
    }
    info
}
