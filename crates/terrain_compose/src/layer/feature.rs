//! Path-like feature geometry and the per-cell claim encoding.
//!
//! A feature is a polyline centerline with a flat core band and a softened shoulder
//! band on either side. Rasterization classifies each cell by its distance to the
//! centerline and writes a [`FeatureClaim`] into the region's claim buffer.
use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::region::WorldBounds;

/// Zone of a feature a cell falls into.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureZone {
    Core,
    Shoulder,
}

/// Centerline and band widths of a feature.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureGeometry {
    pub centerline: Vec<Vec2>,
    /// Full width of the core band.
    pub core_width: f32,
    /// Width of each shoulder band beyond the core.
    pub shoulder_width: f32,
}

impl FeatureGeometry {
    pub fn new(centerline: Vec<Vec2>, core_width: f32, shoulder_width: f32) -> Self {
        Self {
            centerline,
            core_width,
            shoulder_width,
        }
    }

    /// Distance from the centerline to the outer edge of the shoulder.
    pub fn reach(&self) -> f32 {
        self.core_width * 0.5 + self.shoulder_width
    }

    /// Bounds of the centerline inflated by the full reach.
    pub fn bounds(&self) -> WorldBounds {
        let Some(&first) = self.centerline.first() else {
            return WorldBounds::new(Vec2::ZERO, Vec2::ZERO);
        };
        let (min, max) = self
            .centerline
            .iter()
            .fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        WorldBounds::new(min, max).inflated(self.reach())
    }

    pub fn translate(&mut self, delta: Vec2) {
        for p in &mut self.centerline {
            *p += delta;
        }
    }

    /// Unsigned distance from `p` to the centerline.
    pub fn distance(&self, p: Vec2) -> f32 {
        match self.centerline.as_slice() {
            [] => f32::INFINITY,
            [single] => p.distance(*single),
            points => points
                .windows(2)
                .map(|seg| segment_distance(p, seg[0], seg[1]))
                .fold(f32::INFINITY, f32::min),
        }
    }

    /// Signed distance to the core edge: negative inside the core.
    pub fn signed_distance(&self, p: Vec2) -> f32 {
        self.distance(p) - self.core_width * 0.5
    }

    /// Zone and weight of `p`, or `None` outside the shoulder.
    pub fn classify(&self, p: Vec2) -> Option<(FeatureZone, f32)> {
        let sd = self.signed_distance(p);
        if sd <= 0.0 {
            return Some((FeatureZone::Core, 1.0));
        }
        if sd < self.shoulder_width {
            let t = 1.0 - sd / self.shoulder_width;
            return Some((FeatureZone::Shoulder, t * t * (3.0 - 2.0 * t)));
        }
        None
    }
}

fn segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 <= f32::EPSILON {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Height and material effect of a feature.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureParams {
    /// Amount carved from the height at full weight; negative values raise.
    pub depth: f32,
    /// Base material written in the core.
    pub core_material: u8,
    /// Overlay material painted on the shoulders.
    pub shoulder_material: u8,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            depth: 1.0,
            core_material: 0,
            shoulder_material: 0,
        }
    }
}

/// One cell of a claim buffer: which feature owns the cell, in which zone, how strongly.
///
/// Bits `0..8` hold the slot plus one (zero means unclaimed), bits `8..10` the zone and
/// bits `10..18` the weight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureClaim(pub u32);

impl FeatureClaim {
    pub const UNCLAIMED: FeatureClaim = FeatureClaim(0);

    pub fn new(slot: u8, zone: FeatureZone, weight: u8) -> Self {
        debug_assert!(slot < u8::MAX, "slot {slot} exceeds claim capacity");
        let zone_bits = match zone {
            FeatureZone::Core => 1u32,
            FeatureZone::Shoulder => 2u32,
        };
        Self((u32::from(slot) + 1) | (zone_bits << 8) | (u32::from(weight) << 10))
    }

    pub fn slot(self) -> Option<u8> {
        match self.0 & 0xFF {
            0 => None,
            s => Some((s - 1) as u8),
        }
    }

    pub fn zone(self) -> Option<FeatureZone> {
        match (self.0 >> 8) & 0b11 {
            1 => Some(FeatureZone::Core),
            2 => Some(FeatureZone::Shoulder),
            _ => None,
        }
    }

    pub fn weight(self) -> u8 {
        ((self.0 >> 10) & 0xFF) as u8
    }
}
