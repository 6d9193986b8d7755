//! Per-layer mask pipeline.
//!
//! For one `(layer, region)` pair the pipeline records, with a barrier between each
//! step: clear the influence buffer, stitch the region's height context, apply the layer
//! coverage and every mask in stack order, then attenuate with the layer's falloff. The
//! resulting influence buffer is private to the layer and never aliases a region buffer.
use crate::backend::{
    BufferHandle, ClearValue, CommandBatch, ComputeBackend, ComputeOp, RegionFrame,
    StitchSources,
};
use crate::layer::{Layer, Mask, MaskKernel};

/// Evaluation quality of mask kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Quality {
    #[default]
    Full,
    /// Evaluate kernels once per `stride × stride` block.
    Preview { stride: u32 },
}

impl Quality {
    pub fn stride(self) -> u32 {
        match self {
            Quality::Full => 1,
            Quality::Preview { stride } => stride.max(1),
        }
    }

    pub fn is_preview(self) -> bool {
        self.stride() > 1
    }
}

/// Buffers written by one pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskTarget {
    pub influence: BufferHandle,
    pub context: BufferHandle,
}

/// Records mask pipelines as command batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerMaskPipeline {
    halo: u32,
}

impl LayerMaskPipeline {
    pub fn new(halo: u32) -> Self {
        Self { halo }
    }

    pub fn halo(&self) -> u32 {
        self.halo
    }

    /// Edge length of the stitched context buffer.
    pub fn context_size(&self, resolution: u32) -> u32 {
        resolution + 2 * self.halo
    }

    /// First external resource of the mask stack that the backend cannot sample yet.
    pub fn missing_resource<'a, B: ComputeBackend>(
        &self,
        layer: &'a Layer,
        backend: &B,
    ) -> Option<&'a str> {
        layer.resources().find(|r| !backend.is_resource_ready(r))
    }

    pub fn record(
        &self,
        label: impl Into<String>,
        layer: &Layer,
        frame: RegionFrame,
        sources: StitchSources,
        target: MaskTarget,
        quality: Quality,
    ) -> CommandBatch {
        let stride = quality.stride();
        let mut batch = CommandBatch::new(label);
        batch
            .push(ComputeOp::Clear {
                target: target.influence,
                value: ClearValue::F32(0.0),
            })
            .barrier()
            .push(ComputeOp::Stitch {
                target: target.context,
                sources,
                resolution: frame.resolution,
                halo: self.halo,
            })
            .barrier();

        let coverage = Mask::new(MaskKernel::Rectangle);
        for mask in std::iter::once(&coverage).chain(&layer.masks) {
            batch
                .push(ComputeOp::MaskApply {
                    target: target.influence,
                    context: target.context,
                    frame,
                    halo: self.halo,
                    bounds: layer.bounds,
                    mask: mask.clone(),
                    stride,
                })
                .barrier();
        }

        batch.push(ComputeOp::Falloff {
            target: target.influence,
            frame,
            bounds: layer.bounds,
            falloff: layer.falloff.clone(),
            stride,
        });
        batch
    }
}
