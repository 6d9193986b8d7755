//! Persistent region storage.
//!
//! [`RegionStore`] maps each active [`RegionCoord`] to the backend handles of its two
//! persistent buffers. Handles are swapped in wholesale when a cycle commits its staging
//! buffers, so readers never observe a half-composited region.
use std::collections::BTreeMap;

use crate::backend::BufferHandle;
use crate::region::RegionCoord;

/// Whether a region currently holds persistent buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionState {
    Active,
    Inactive,
}

/// A region with its committed height and material-control buffers.
#[derive(Clone, Debug)]
pub struct Region {
    coord: RegionCoord,
    height: BufferHandle,
    material: BufferHandle,
    revision: u64,
}

impl Region {
    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    /// Handle of the single-channel `f32` height buffer.
    pub fn height(&self) -> BufferHandle {
        self.height
    }

    /// Handle of the packed `u32` material-control buffer.
    pub fn material(&self) -> BufferHandle {
        self.material
    }

    /// Number of commits applied to this region since it was activated.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Result of committing new buffers into a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    /// `true` when the region was inactive before the commit.
    pub activated: bool,
    /// Buffers that were replaced and must be released by the caller.
    pub replaced: Option<(BufferHandle, BufferHandle)>,
}

/// Active regions keyed by coordinate.
#[derive(Debug, Default)]
pub struct RegionStore {
    regions: BTreeMap<RegionCoord, Region>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    pub fn get(&self, coord: RegionCoord) -> Option<&Region> {
        self.regions.get(&coord)
    }

    pub fn state(&self, coord: RegionCoord) -> RegionState {
        if self.regions.contains_key(&coord) {
            RegionState::Active
        } else {
            RegionState::Inactive
        }
    }

    #[inline]
    pub fn is_active(&self, coord: RegionCoord) -> bool {
        self.regions.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Active coordinates in ascending order.
    pub fn coords(&self) -> impl Iterator<Item = RegionCoord> + '_ {
        self.regions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Installs freshly composited buffers, activating the region if needed.
    pub fn commit(
        &mut self,
        coord: RegionCoord,
        height: BufferHandle,
        material: BufferHandle,
    ) -> CommitOutcome {
        match self.regions.get_mut(&coord) {
            Some(region) => {
                let replaced = (region.height, region.material);
                region.height = height;
                region.material = material;
                region.revision += 1;
                CommitOutcome {
                    activated: false,
                    replaced: Some(replaced),
                }
            }
            None => {
                self.regions.insert(
                    coord,
                    Region {
                        coord,
                        height,
                        material,
                        revision: 1,
                    },
                );
                CommitOutcome {
                    activated: true,
                    replaced: None,
                }
            }
        }
    }

    /// Removes a region, returning it so the caller can release its buffers.
    pub fn deactivate(&mut self, coord: RegionCoord) -> Option<Region> {
        self.regions.remove(&coord)
    }
}
