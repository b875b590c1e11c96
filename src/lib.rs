//! Hashmatch detects known rigid, textureless objects in RGB-D scenes.
//!
//! The detector matches precomputed object templates (rendered views)
//! against sliding windows of a test scene across a scale pyramid. A
//! geometric-hash index over triplet measurements prunes candidate
//! (window, template) pairs cheaply; survivors run a five-test verification
//! cascade and overlapping detections collapse under non-maximum
//! suppression. Optional parallelism via the `rayon` feature, tracing via
//! `tracing`, PNG loading via `image-io`.

pub mod classifier;
pub mod criteria;
pub mod geometry;
pub mod hasher;
pub mod image;
pub mod matcher;
pub mod objectness;
pub mod processing;
pub mod scene;
pub mod template;
pub mod util;

mod trace;

pub use classifier::nms::non_max_suppression;
pub use classifier::persist::{IndexRecord, Manifest};
pub use classifier::{Classifier, Detector, ObjectFailure, Parser, TrainSummary};
pub use criteria::{Criteria, DepthDeviation, GridSize, TrainedInfo};
pub use geometry::Pose;
pub use hasher::{BinRange, HashIndex, HashKey, HashTable, Hasher, Triplet};
pub use image::Map2;
pub use matcher::{Match, Matcher};
pub use objectness::Objectness;
pub use scene::{Candidate, Scene, SceneSource, Window};
pub use template::{
    FeaturePoint, RawTemplate, Template, TemplateGroup, TemplateId, TemplateMaps, TemplatePool,
};
pub use util::{DetectError, DetectResult};
