//! Mapping from world-space bounds to affected regions.
use std::collections::BTreeSet;

use crate::region::{RegionCoord, RegionGrid, WorldBounds};

/// Regions affected when a layer moves from one box to another.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveDelta {
    /// Covered by the new bounds only.
    pub entered: BTreeSet<RegionCoord>,
    /// Covered by both.
    pub retained: BTreeSet<RegionCoord>,
    /// Covered by the old bounds only; these need a cleanup pass.
    pub vacated: BTreeSet<RegionCoord>,
}

impl MoveDelta {
    /// Regions the layer covers after the move.
    pub fn covered(&self) -> impl Iterator<Item = RegionCoord> + '_ {
        self.entered.iter().chain(&self.retained).copied()
    }
}

/// Resolves layer bounds against a [`RegionGrid`].
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialResolver {
    grid: RegionGrid,
}

impl SpatialResolver {
    pub fn new(grid: RegionGrid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &RegionGrid {
        &self.grid
    }

    /// Every region whose area intersects `bounds`; empty for degenerate bounds.
    pub fn resolve(&self, bounds: &WorldBounds) -> BTreeSet<RegionCoord> {
        self.grid.regions_overlapping(bounds).iter().collect()
    }

    /// Diff of the region sets covered before and after a move.
    pub fn resolve_move(&self, old: &WorldBounds, new: &WorldBounds) -> MoveDelta {
        let before = self.resolve(old);
        let after = self.resolve(new);
        MoveDelta {
            entered: after.difference(&before).copied().collect(),
            retained: after.intersection(&before).copied().collect(),
            vacated: before.difference(&after).copied().collect(),
        }
    }
}
