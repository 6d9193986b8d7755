//! Per `(layer, region)` influence buffers kept across cycles.
//!
//! Composites rebuild region buffers from every overlapping layer, so influence buffers
//! of clean layers are reused instead of rerunning their mask pipelines.
use std::collections::BTreeMap;

use crate::backend::BufferHandle;
use crate::layer::LayerId;
use crate::pipeline::micro::Quality;
use crate::region::RegionCoord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfluenceEntry {
    pub handle: BufferHandle,
    /// Quality of the last recorded pipeline run.
    pub quality: Quality,
}

#[derive(Debug, Default)]
pub struct InfluenceCache {
    entries: BTreeMap<(LayerId, RegionCoord), InfluenceEntry>,
}

impl InfluenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, layer: LayerId, region: RegionCoord) -> Option<InfluenceEntry> {
        self.entries.get(&(layer, region)).copied()
    }

    pub fn contains(&self, layer: LayerId, region: RegionCoord) -> bool {
        self.entries.contains_key(&(layer, region))
    }

    pub fn insert(&mut self, layer: LayerId, region: RegionCoord, entry: InfluenceEntry) {
        self.entries.insert((layer, region), entry);
    }

    pub fn remove(&mut self, layer: LayerId, region: RegionCoord) -> Option<BufferHandle> {
        self.entries.remove(&(layer, region)).map(|e| e.handle)
    }

    /// Entries last computed at preview quality.
    pub fn preview_entries(&self) -> impl Iterator<Item = (LayerId, RegionCoord)> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| e.quality.is_preview())
            .map(|(&key, _)| key)
    }

    pub fn iter(&self) -> impl Iterator<Item = ((LayerId, RegionCoord), InfluenceEntry)> + '_ {
        self.entries.iter().map(|(&k, &e)| (k, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u32, quality: Quality) -> InfluenceEntry {
        InfluenceEntry {
            handle: BufferHandle::new(index, 0),
            quality,
        }
    }

    #[test]
    fn entries_are_keyed_by_layer_and_region() {
        let mut cache = InfluenceCache::new();
        cache.insert(LayerId(1), RegionCoord(0, 0), entry(1, Quality::Full));
        cache.insert(LayerId(1), RegionCoord(1, 0), entry(2, Quality::Full));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.remove(LayerId(1), RegionCoord(0, 0)), Some(BufferHandle::new(1, 0)));
        assert!(!cache.contains(LayerId(1), RegionCoord(0, 0)));
        assert!(cache.contains(LayerId(1), RegionCoord(1, 0)));
    }

    #[test]
    fn preview_entries_are_listed() {
        let mut cache = InfluenceCache::new();
        cache.insert(LayerId(1), RegionCoord(0, 0), entry(1, Quality::Preview { stride: 4 }));
        cache.insert(LayerId(2), RegionCoord(0, 0), entry(2, Quality::Full));
        let preview: Vec<_> = cache.preview_entries().collect();
        assert_eq!(preview, vec![(LayerId(1), RegionCoord(0, 0))]);
    }
}
