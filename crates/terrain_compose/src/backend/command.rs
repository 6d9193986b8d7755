//! Inspectable command lists submitted to a [`crate::backend::ComputeBackend`].
use glam::Vec2;

use crate::backend::BufferHandle;
use crate::layer::{
    BlendOperation, Falloff, FeatureGeometry, FeatureParams, Mask, MaterialPaint,
};
use crate::region::WorldBounds;

/// Fill value for [`ComputeOp::Clear`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    F32(f32),
    U32(u32),
}

/// Placement of a region-sized buffer in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionFrame {
    /// World position of the lower-left corner of cell `(0, 0)`.
    pub origin: Vec2,
    pub cell_size: f32,
    pub resolution: u32,
}

impl RegionFrame {
    #[inline]
    pub fn cell_center(&self, ix: u32, iy: u32) -> Vec2 {
        self.origin + (Vec2::new(ix as f32, iy as f32) + 0.5) * self.cell_size
    }

    pub fn len(&self) -> usize {
        self.resolution as usize * self.resolution as usize
    }

    pub fn is_empty(&self) -> bool {
        self.resolution == 0
    }
}

/// Height buffers sampled when stitching a context buffer.
///
/// Neighbors follow [`crate::region::NEIGHBOR_OFFSETS`]; a missing neighbor is replaced
/// by clamping to the edge of the center buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StitchSources {
    pub center: BufferHandle,
    pub neighbors: [Option<BufferHandle>; 8],
}

impl StitchSources {
    pub fn handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        std::iter::once(self.center).chain(self.neighbors.iter().flatten().copied())
    }
}

/// Per-cell combination performed by [`ComputeOp::Composite`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CompositeOp {
    Height {
        operation: BlendOperation,
        amplitude: f32,
    },
    Material {
        operation: BlendOperation,
        paint: MaterialPaint,
    },
}

/// One typed operation of a command batch.
#[derive(Clone, Debug, PartialEq)]
pub enum ComputeOp {
    Clear {
        target: BufferHandle,
        value: ClearValue,
    },
    /// Copies a region and the halo around it into a `(resolution + 2 * halo)²` buffer.
    Stitch {
        target: BufferHandle,
        sources: StitchSources,
        resolution: u32,
        halo: u32,
    },
    /// Blends one mask into an influence buffer, evaluating every `stride` cells.
    MaskApply {
        target: BufferHandle,
        context: BufferHandle,
        frame: RegionFrame,
        halo: u32,
        bounds: WorldBounds,
        mask: Mask,
        stride: u32,
    },
    Falloff {
        target: BufferHandle,
        frame: RegionFrame,
        bounds: WorldBounds,
        falloff: Falloff,
        stride: u32,
    },
    /// Folds an influence buffer into a height or material-control buffer.
    Composite {
        source: BufferHandle,
        target: BufferHandle,
        op: CompositeOp,
    },
    /// Writes feature claims where the geometry reaches and the influence is positive.
    Rasterize {
        influence: BufferHandle,
        claim: BufferHandle,
        frame: RegionFrame,
        slot: u8,
        geometry: FeatureGeometry,
    },
    /// Applies claimed feature zones to height and material; `features` is indexed by slot.
    ApplyFeatures {
        claim: BufferHandle,
        height: BufferHandle,
        material: BufferHandle,
        features: Vec<FeatureParams>,
    },
    Barrier,
}

impl ComputeOp {
    pub fn name(&self) -> &'static str {
        match self {
            ComputeOp::Clear { .. } => "clear",
            ComputeOp::Stitch { .. } => "stitch",
            ComputeOp::MaskApply { .. } => "mask_apply",
            ComputeOp::Falloff { .. } => "falloff",
            ComputeOp::Composite { .. } => "composite",
            ComputeOp::Rasterize { .. } => "rasterize",
            ComputeOp::ApplyFeatures { .. } => "apply_features",
            ComputeOp::Barrier => "barrier",
        }
    }

    /// Buffers the op reads, including read-modify-write targets.
    pub fn reads(&self) -> Vec<BufferHandle> {
        match self {
            ComputeOp::Clear { .. } | ComputeOp::Barrier => Vec::new(),
            ComputeOp::Stitch { sources, .. } => sources.handles().collect(),
            ComputeOp::MaskApply {
                target,
                context,
                mask,
                ..
            } => {
                if mask.is_topological() {
                    vec![*target, *context]
                } else {
                    vec![*target]
                }
            }
            ComputeOp::Falloff { target, .. } => vec![*target],
            ComputeOp::Composite { source, target, .. } => vec![*source, *target],
            ComputeOp::Rasterize {
                influence, claim, ..
            } => vec![*influence, *claim],
            ComputeOp::ApplyFeatures {
                claim,
                height,
                material,
                ..
            } => vec![*claim, *height, *material],
        }
    }

    pub fn writes(&self) -> Vec<BufferHandle> {
        match self {
            ComputeOp::Barrier => Vec::new(),
            ComputeOp::Clear { target, .. }
            | ComputeOp::Stitch { target, .. }
            | ComputeOp::MaskApply { target, .. }
            | ComputeOp::Falloff { target, .. }
            | ComputeOp::Composite { target, .. } => vec![*target],
            ComputeOp::Rasterize { claim, .. } => vec![*claim],
            ComputeOp::ApplyFeatures {
                height, material, ..
            } => vec![*height, *material],
        }
    }
}

/// Ordered list of ops submitted as one unit of backend work.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandBatch {
    pub label: String,
    pub ops: Vec<ComputeOp>,
}

impl CommandBatch {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: ComputeOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn barrier(&mut self) -> &mut Self {
        self.ops.push(ComputeOp::Barrier);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn op_names(&self) -> Vec<&'static str> {
        self.ops.iter().map(ComputeOp::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::MaskKernel;

    fn h(i: u32) -> BufferHandle {
        BufferHandle::new(i, 0)
    }

    #[test]
    fn only_topological_masks_read_context() {
        let frame = RegionFrame {
            origin: Vec2::ZERO,
            cell_size: 1.0,
            resolution: 4,
        };
        let bounds = WorldBounds::new(Vec2::ZERO, Vec2::splat(4.0));
        let op = |mask| ComputeOp::MaskApply {
            target: h(1),
            context: h(2),
            frame,
            halo: 1,
            bounds,
            mask,
            stride: 1,
        };
        assert_eq!(op(Mask::new(MaskKernel::Rectangle)).reads(), vec![h(1)]);
        assert_eq!(
            op(Mask::new(MaskKernel::Terrace { step: 1.0 })).reads(),
            vec![h(1), h(2)]
        );
    }

    #[test]
    fn batch_records_op_names_in_order() {
        let mut batch = CommandBatch::new("test");
        batch
            .push(ComputeOp::Clear {
                target: h(0),
                value: ClearValue::F32(0.0),
            })
            .barrier();
        assert_eq!(batch.op_names(), vec!["clear", "barrier"]);
    }
}
