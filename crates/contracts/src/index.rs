//! StreamIndex - ordinal to seek offset mapping
//!
//! Built once (either loaded or from one full forward pass), read-only
//! afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One indexed frame set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Offset to seek the underlying source to before replaying this set
    pub seek: u64,
    /// Per-sensor member key: frame id for packet sources, message ordinal
    /// for container sources, `None` when the slot is absent
    pub members: Vec<Option<u64>>,
}

/// Stream index of a multi-sensor source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamIndex {
    /// Per sensor: frame key -> offset of the first contributing packet
    pub frame_offsets: Vec<BTreeMap<u64, u64>>,
    /// Frame sets in delivery order
    pub sets: Vec<IndexEntry>,
}

impl StreamIndex {
    pub fn new(sensor_count: usize) -> Self {
        Self {
            frame_offsets: vec![BTreeMap::new(); sensor_count],
            sets: Vec::new(),
        }
    }

    /// Number of indexed frame sets
    #[inline]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn entry(&self, ordinal: usize) -> Option<&IndexEntry> {
        self.sets.get(ordinal)
    }

    /// Record the first offset at which `key` was seen for `sensor`
    ///
    /// Later sightings of the same key keep the first offset.
    pub fn record_frame(&mut self, sensor: usize, key: u64, offset: u64) {
        if let Some(map) = self.frame_offsets.get_mut(sensor) {
            map.entry(key).or_insert(offset);
        }
    }

    pub fn frame_offset(&self, sensor: usize, key: u64) -> Option<u64> {
        self.frame_offsets.get(sensor)?.get(&key).copied()
    }

    /// Frames indexed per sensor
    pub fn frames_per_sensor(&self) -> Vec<usize> {
        self.frame_offsets.iter().map(BTreeMap::len).collect()
    }

    /// Append a set; its seek offset is the smallest member offset
    pub fn push_set(&mut self, members: Vec<Option<u64>>) -> Option<&IndexEntry> {
        let seek = members
            .iter()
            .enumerate()
            .filter_map(|(sensor, key)| key.and_then(|k| self.frame_offset(sensor, k)))
            .min()?;
        self.sets.push(IndexEntry { seek, members });
        self.sets.last()
    }
}

/// Progress of an index build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexProgress {
    /// Units processed so far (packets or messages)
    pub processed: u64,
    /// Total units when known up front
    pub total: Option<u64>,
}

impl IndexProgress {
    /// Fraction in `[0, 1]` when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.processed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}
