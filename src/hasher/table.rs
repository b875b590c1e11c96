//! Hash keys and key-to-template bucket tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hasher::triplet::Triplet;
use crate::template::TemplateId;

/// Discrete 5-symbol fingerprint of a triplet measurement.
///
/// Two quantized relative depths against the anchor point and the quantized
/// normal octant at each of the three sampled points. Equality and hashing
/// are structural.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashKey {
    /// Depth bin of point 2 relative to the anchor.
    pub d1: u8,
    /// Depth bin of point 3 relative to the anchor.
    pub d2: u8,
    /// Normal octant at the anchor.
    pub n1: u8,
    /// Normal octant at point 2.
    pub n2: u8,
    /// Normal octant at point 3.
    pub n3: u8,
}

/// One unit of the approximate index: a triplet and its buckets.
///
/// Buckets are filled once during training and read-only afterwards;
/// retrieval only votes against them.
#[derive(Clone, Debug, Default)]
pub struct HashTable {
    /// The sampling pattern this table measures.
    pub triplet: Triplet,
    buckets: HashMap<HashKey, Vec<TemplateId>>,
}

impl HashTable {
    /// Creates an empty table for one triplet.
    pub fn new(triplet: Triplet) -> Self {
        Self {
            triplet,
            buckets: HashMap::new(),
        }
    }

    /// Inserts a template into the bucket for `key`.
    ///
    /// Bucket membership is a set: re-inserting an id is a no-op.
    pub fn insert(&mut self, key: HashKey, id: TemplateId) {
        let bucket = self.buckets.entry(key).or_default();
        if !bucket.contains(&id) {
            bucket.push(id);
        }
    }

    /// Returns the templates sharing `key`, if any.
    pub fn get(&self, key: &HashKey) -> Option<&[TemplateId]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    /// Iterates over all buckets.
    pub fn buckets(&self) -> impl Iterator<Item = (&HashKey, &[TemplateId])> {
        self.buckets.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Number of distinct keys in the table.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true when no key has been inserted.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(d1: u8) -> HashKey {
        HashKey {
            d1,
            d2: 0,
            n1: 0,
            n2: 0,
            n3: 0,
        }
    }

    #[test]
    fn buckets_deduplicate_template_ids() {
        let mut table = HashTable::new(Triplet::default());
        table.insert(key(1), 4);
        table.insert(key(1), 4);
        table.insert(key(1), 5);
        assert_eq!(table.get(&key(1)), Some([4, 5].as_slice()));
    }

    #[test]
    fn missing_keys_return_none() {
        let table = HashTable::new(Triplet::default());
        assert!(table.get(&key(0)).is_none());
    }
}
