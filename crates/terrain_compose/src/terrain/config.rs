//! Terrain configuration.
use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dirty::TexturePropagation;
use crate::error::{Error, Result};
use crate::pipeline::Quality;
use crate::region::RegionGrid;

/// Settings for a [`crate::terrain::Terrain`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainConfig {
    /// Edge length of one region in world units.
    pub region_size: f32,
    /// Cells per region edge.
    pub region_resolution: u32,
    /// World-space origin of region `(0, 0)`.
    pub origin: Vec2,
    /// Neighbor cells stitched around a region for topological masks.
    pub context_halo: u32,
    /// Maximum batches dispatched per tick.
    pub frame_budget: usize,
    /// Mask evaluation stride of interactive cycles.
    pub preview_stride: u32,
    pub texture_propagation: TexturePropagation,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            region_size: 256.0,
            region_resolution: 64,
            origin: Vec2::ZERO,
            context_halo: 2,
            frame_budget: 64,
            preview_stride: 4,
            texture_propagation: TexturePropagation::default(),
        }
    }
}

impl TerrainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region_size(mut self, region_size: f32) -> Self {
        self.region_size = region_size;
        self
    }

    pub fn with_region_resolution(mut self, resolution: u32) -> Self {
        self.region_resolution = resolution;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<mint::Vector2<f32>>) -> Self {
        self.origin = Vec2::from(origin.into());
        self
    }

    pub fn with_context_halo(mut self, halo: u32) -> Self {
        self.context_halo = halo;
        self
    }

    pub fn with_frame_budget(mut self, budget: usize) -> Self {
        self.frame_budget = budget;
        self
    }

    pub fn with_preview_stride(mut self, stride: u32) -> Self {
        self.preview_stride = stride;
        self
    }

    pub fn with_texture_propagation(mut self, policy: TexturePropagation) -> Self {
        self.texture_propagation = policy;
        self
    }

    /// Validates the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if !(self.region_size.is_finite() && self.region_size > 0.0) {
            return Err(Error::InvalidConfig("region_size must be > 0".into()));
        }
        if self.region_resolution == 0 {
            return Err(Error::InvalidConfig("region_resolution must be > 0".into()));
        }
        if self.context_halo > self.region_resolution {
            return Err(Error::InvalidConfig(format!(
                "context_halo ({}) must not exceed region_resolution ({})",
                self.context_halo, self.region_resolution
            )));
        }
        if self.frame_budget == 0 {
            return Err(Error::InvalidConfig("frame_budget must be > 0".into()));
        }
        if self.preview_stride == 0 {
            return Err(Error::InvalidConfig("preview_stride must be >= 1".into()));
        }
        if !self.origin.is_finite() {
            return Err(Error::InvalidConfig("origin must be finite".into()));
        }
        Ok(())
    }

    pub fn grid(&self) -> RegionGrid {
        RegionGrid::new(self.region_size, self.region_resolution).with_origin(self.origin)
    }

    pub(crate) fn preview_quality(&self) -> Quality {
        Quality::Preview {
            stride: self.preview_stride,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TerrainConfig::default().validate().expect("valid default");
    }

    #[test]
    fn halo_wider_than_region_is_rejected() {
        let config = TerrainConfig::new()
            .with_region_resolution(4)
            .with_context_halo(5);
        let err = config.validate().expect_err("halo too wide");
        matches!(err, Error::InvalidConfig(_))
            .then_some(())
            .expect("invalid config");
    }

    #[test]
    fn zero_budget_is_rejected() {
        assert!(TerrainConfig::new().with_frame_budget(0).validate().is_err());
        assert!(TerrainConfig::new().with_preview_stride(0).validate().is_err());
        assert!(TerrainConfig::new().with_region_size(0.0).validate().is_err());
    }

    #[test]
    fn grid_uses_origin_and_size() {
        let grid = TerrainConfig::new()
            .with_region_size(32.0)
            .with_region_resolution(8)
            .with_origin([16.0, 0.0])
            .grid();
        assert_eq!(grid.region_of(Vec2::new(15.0, 1.0)).0, -1);
        assert_eq!(grid.cell_size(), 4.0);
    }
}
