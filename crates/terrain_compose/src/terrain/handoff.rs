//! Read access to region buffers for storage and preview.
use crate::region::{MaterialControl, RegionCoord};

/// Committed buffers of a region as raw little-endian bytes, ready for storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionSnapshot {
    pub coord: RegionCoord,
    /// Incremented on every commit.
    pub revision: u64,
    pub resolution: u32,
    /// `resolution²` little-endian `f32` heights, row-major.
    pub height: Vec<u8>,
    /// `resolution²` little-endian packed material-control words, row-major.
    pub material: Vec<u8>,
}

impl RegionSnapshot {
    pub fn heights(&self) -> Vec<f32> {
        self.height
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    pub fn materials(&self) -> Vec<MaterialControl> {
        self.material
            .chunks_exact(4)
            .map(|b| MaterialControl(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect()
    }
}

/// Where a preview reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewSource {
    /// This cycle's staging buffers, possibly mid-cycle.
    Staging,
    Committed,
}

/// Read-only view of a region's buffers.
#[derive(Clone, Copy, Debug)]
pub struct RegionPreview<'a> {
    pub coord: RegionCoord,
    pub source: PreviewSource,
    pub resolution: u32,
    pub height: &'a [f32],
    pub material: &'a [u32],
}

impl RegionPreview<'_> {
    pub fn height_at(&self, ix: u32, iy: u32) -> Option<f32> {
        (ix < self.resolution && iy < self.resolution)
            .then(|| self.height[(iy * self.resolution + ix) as usize])
    }

    pub fn material_at(&self, ix: u32, iy: u32) -> Option<MaterialControl> {
        (ix < self.resolution && iy < self.resolution)
            .then(|| MaterialControl(self.material[(iy * self.resolution + ix) as usize]))
    }
}
