//! Region grid utilities for spatial partitioning.
//!
//! This module defines [`RegionGrid`], [`RegionCoord`] and [`WorldBounds`] to partition
//! world space into fixed-size square regions. Bounds are treated as half-open boxes
//! `[min, max)`, so a layer whose edge lies exactly on a region seam does not touch the
//! region on the far side of that seam.
use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier for a region in the region grid.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCoord(
    /// Region index along the X axis.
    pub i32,
    /// Region index along the Y axis.
    pub i32,
);

/// Neighbor offsets in the order used by [`RegionCoord::neighbors`].
pub const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

impl RegionCoord {
    /// Returns the coordinate shifted by `(dx, dy)` regions.
    #[inline]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        RegionCoord(self.0 + dx, self.1 + dy)
    }

    /// Returns the eight surrounding coordinates, row by row from the lower-left.
    pub fn neighbors(self) -> [RegionCoord; 8] {
        NEIGHBOR_OFFSETS.map(|(dx, dy)| self.offset(dx, dy))
    }
}

impl std::fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// Axis-aligned world-space bounding box.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBounds {
    /// Lower-left corner.
    pub min: Vec2,
    /// Upper-right corner.
    pub max: Vec2,
}

impl WorldBounds {
    /// Creates bounds from two corners in any order.
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Creates bounds from any mint-compatible pair of corners.
    pub fn from_mint(a: impl Into<mint::Vector2<f32>>, b: impl Into<mint::Vector2<f32>>) -> Self {
        Self::new(Vec2::from(a.into()), Vec2::from(b.into()))
    }

    /// Creates bounds centered at `center` with the given full extent.
    pub fn from_center_extent(center: Vec2, extent: Vec2) -> Self {
        let half = extent.abs() * 0.5;
        Self::new(center - half, center + half)
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// Returns `true` when the box has no area or non-finite corners.
    pub fn is_degenerate(&self) -> bool {
        let size = self.size();
        !(self.min.is_finite() && self.max.is_finite() && size.x > 0.0 && size.y > 0.0)
    }

    /// Returns `true` when both boxes share a region of positive area.
    pub fn intersects(&self, other: &WorldBounds) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    /// Half-open containment test.
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    pub fn translated(&self, delta: Vec2) -> Self {
        Self {
            min: self.min + delta,
            max: self.max + delta,
        }
    }

    /// Expands the box by `margin` on every side.
    pub fn inflated(&self, margin: f32) -> Self {
        Self::new(self.min - Vec2::splat(margin), self.max + Vec2::splat(margin))
    }

    pub fn union(&self, other: &WorldBounds) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Inclusive rectangle of region coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionRange {
    min: RegionCoord,
    max: RegionCoord,
    empty: bool,
}

impl RegionRange {
    /// A range that contains no regions.
    pub const EMPTY: RegionRange = RegionRange {
        min: RegionCoord(0, 0),
        max: RegionCoord(0, 0),
        empty: true,
    };

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn len(&self) -> usize {
        if self.empty {
            return 0;
        }
        let w = (self.max.0 - self.min.0 + 1) as usize;
        let h = (self.max.1 - self.min.1 + 1) as usize;
        w * h
    }

    pub fn contains(&self, coord: RegionCoord) -> bool {
        !self.empty
            && coord.0 >= self.min.0
            && coord.0 <= self.max.0
            && coord.1 >= self.min.1
            && coord.1 <= self.max.1
    }

    /// Iterates the covered coordinates row by row.
    pub fn iter(&self) -> impl Iterator<Item = RegionCoord> + '_ {
        let (x0, x1, y0, y1) = if self.empty {
            (0, -1, 0, -1)
        } else {
            (self.min.0, self.max.0, self.min.1, self.max.1)
        };
        (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| RegionCoord(x, y)))
    }
}

/// Fixed-size tiling of world space into square regions of `resolution²` cells.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RegionGrid {
    /// World-space origin of region `(0, 0)` (lower-left corner).
    pub origin: Vec2,
    /// Edge length of one region in world units.
    pub region_size: f32,
    /// Cells per region edge.
    pub resolution: u32,
}

impl RegionGrid {
    pub fn new(region_size: f32, resolution: u32) -> Self {
        debug_assert!(region_size > 0.0, "region_size must be > 0");
        debug_assert!(resolution > 0, "resolution must be > 0");
        Self {
            origin: Vec2::ZERO,
            region_size,
            resolution,
        }
    }

    pub fn with_origin(mut self, origin: Vec2) -> Self {
        self.origin = origin;
        self
    }

    /// Cell size in world units.
    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.region_size / self.resolution as f32
    }

    /// Number of cells stored per region buffer.
    #[inline]
    pub fn cells_per_region(&self) -> usize {
        (self.resolution as usize) * (self.resolution as usize)
    }

    /// Region containing a world position: `floor((p - origin) / region_size)`.
    pub fn region_of(&self, p: Vec2) -> RegionCoord {
        let rel = (p - self.origin) / self.region_size;
        RegionCoord(rel.x.floor() as i32, rel.y.floor() as i32)
    }

    /// World-space lower-left corner of a region.
    pub fn region_origin(&self, coord: RegionCoord) -> Vec2 {
        self.origin + Vec2::new(coord.0 as f32, coord.1 as f32) * self.region_size
    }

    pub fn region_bounds(&self, coord: RegionCoord) -> WorldBounds {
        let min = self.region_origin(coord);
        WorldBounds {
            min,
            max: min + Vec2::splat(self.region_size),
        }
    }

    /// World position of the center of cell `(ix, iy)` inside `coord`.
    pub fn cell_center(&self, coord: RegionCoord, ix: u32, iy: u32) -> Vec2 {
        self.region_origin(coord) + (Vec2::new(ix as f32, iy as f32) + 0.5) * self.cell_size()
    }

    /// Regions whose area intersects `bounds`. Degenerate bounds cover nothing.
    pub fn regions_overlapping(&self, bounds: &WorldBounds) -> RegionRange {
        if bounds.is_degenerate() {
            return RegionRange::EMPTY;
        }
        let rel_min = (bounds.min - self.origin) / self.region_size;
        let rel_max = (bounds.max - self.origin) / self.region_size;
        let min = RegionCoord(rel_min.x.floor() as i32, rel_min.y.floor() as i32);
        let max = RegionCoord(
            (rel_max.x.ceil() as i32 - 1).max(min.0),
            (rel_max.y.ceil() as i32 - 1).max(min.1),
        );
        RegionRange {
            min,
            max,
            empty: false,
        }
    }
}
