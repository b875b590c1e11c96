//! Persistence of trained templates and the hash index.
//!
//! Everything is JSON via serde. Writes go to a temporary sibling file that
//! is atomically renamed over the target, so a crash mid-training never
//! leaves a corrupt or partial record behind. Tables persist their buckets
//! as template identifiers, never full template copies; loading resolves
//! the ids against the already-loaded template pool.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::criteria::{Criteria, TrainedInfo};
use crate::hasher::{BinRange, HashIndex, HashKey, HashTable, Triplet};
use crate::template::{TemplateId, TemplatePool};
use crate::util::{DetectError, DetectResult};

/// Name of the manifest enumerating per-object template files.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Name of the persisted index (criteria + trained info + tables).
pub const INDEX_FILE: &str = "index.json";

/// One bucket of a persisted hash table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketRecord {
    /// The 5-symbol key.
    pub key: HashKey,
    /// Ids of the templates sharing the key.
    pub templates: Vec<TemplateId>,
}

/// One persisted hash table: its triplet and bucket records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableRecord {
    /// The table's sampling pattern.
    pub triplet: Triplet,
    /// Buckets, sorted by key for stable output.
    pub buckets: Vec<BucketRecord>,
}

/// Top-level persisted index record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Configuration the index was trained with.
    pub criteria: Criteria,
    /// Quantities measured from the training set.
    pub info: TrainedInfo,
    /// Shared depth bin ranges.
    pub ranges: Vec<BinRange>,
    /// All hash tables.
    pub tables: Vec<TableRecord>,
}

/// One trained object in the manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Object id shared by the templates in the file.
    pub object_id: u32,
    /// Human-readable object name.
    pub object: String,
    /// Template file name, relative to the manifest directory.
    pub file: String,
}

/// Manifest enumerating per-object template files.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Trained objects in training order.
    pub objects: Vec<ManifestEntry>,
}

/// Serializes `value` to `path` atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> DetectResult<()> {
    let tmp = tmp_path(path);
    {
        let file = File::create(&tmp).map_err(|err| DetectError::io(&tmp, err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value).map_err(|err| DetectError::Persist {
            path: tmp.clone(),
            source: err,
        })?;
        writer.flush().map_err(|err| DetectError::io(&tmp, err))?;
    }
    fs::rename(&tmp, path).map_err(|err| DetectError::io(path, err))
}

/// Deserializes a JSON record from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> DetectResult<T> {
    let file = File::open(path).map_err(|err| DetectError::io(path, err))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| DetectError::Persist {
        path: path.to_path_buf(),
        source: err,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Converts a trained index into its persisted form.
pub fn index_to_record(index: &HashIndex, criteria: &Criteria, info: &TrainedInfo) -> IndexRecord {
    let tables = index
        .tables
        .iter()
        .map(|table| {
            let mut buckets: Vec<BucketRecord> = table
                .buckets()
                .map(|(key, templates)| BucketRecord {
                    key: *key,
                    templates: templates.to_vec(),
                })
                .collect();
            buckets.sort_by_key(|bucket| {
                (
                    bucket.key.d1,
                    bucket.key.d2,
                    bucket.key.n1,
                    bucket.key.n2,
                    bucket.key.n3,
                )
            });
            TableRecord {
                triplet: table.triplet,
                buckets,
            }
        })
        .collect();

    IndexRecord {
        criteria: criteria.clone(),
        info: *info,
        ranges: index.ranges.clone(),
        tables,
    }
}

/// Rebuilds a hash index from its persisted form.
///
/// Every bucket id must resolve against the loaded pool; a dangling id means
/// the index and template files do not belong together, which is fatal.
pub fn index_from_record(record: &IndexRecord, pool: &TemplatePool) -> DetectResult<HashIndex> {
    if record.ranges.len() != record.criteria.histogram_bin_count {
        return Err(DetectError::config(format!(
            "persisted index holds {} bin ranges, criteria demand {}",
            record.ranges.len(),
            record.criteria.histogram_bin_count
        )));
    }

    let mut tables = Vec::with_capacity(record.tables.len());
    for table_record in &record.tables {
        let mut table = HashTable::new(table_record.triplet);
        for bucket in &table_record.buckets {
            for &id in &bucket.templates {
                if pool.get(id).is_none() {
                    return Err(DetectError::data(
                        "persisted index",
                        format!("bucket references unknown template id {id}"),
                    ));
                }
                table.insert(bucket.key, id);
            }
        }
        tables.push(table);
    }

    Ok(HashIndex {
        tables,
        ranges: record.ranges.clone(),
    })
}
