#![forbid(unsafe_code)]
//! terrain_compose: incremental layer compositing for region-tiled procedural terrain.
//!
//! Modules:
//! - region: region grid, packed material control and the committed region store
//! - layer: layer descriptions, masks, falloff, feature geometry and the layer registry
//! - dirty: spatial resolution, dirty tracking and causal propagation across layer kinds
//! - backend: compute backend trait, command batches and the reference CPU backend
//! - pipeline: per-layer mask pipeline and the six-phase region compositor
//! - scheduler: task graph with global phase barriers and a frame-budgeted tick loop
//! - terrain: the context object tying everything together, plus config and events
//!
//! For a runnable walkthrough, see the `terrain_compose_examples` crate.
pub mod backend;
pub mod dirty;
pub mod error;
pub mod layer;
pub mod pipeline;
pub mod region;
pub mod scheduler;
pub mod terrain;

/// Convenient re-exports for common types. Import with `use terrain_compose::prelude::*;`.
pub mod prelude {
    pub use crate::backend::{BackendError, BufferHandle, ComputeBackend, CpuBackend, StampImage};
    pub use crate::dirty::{DependencyEdge, TexturePropagation};
    pub use crate::error::{Error, Result};
    pub use crate::layer::{
        BlendOperation, Falloff, FalloffShape, FeatureGeometry, FeatureParams, LayerDesc,
        LayerId, LayerKind, LayerOperation, Mask, MaskBlend, MaskKernel, MaterialPaint,
        ResponseCurve,
    };
    pub use crate::pipeline::Phase;
    pub use crate::region::{MaterialControl, RegionCoord, RegionState, WorldBounds};
    pub use crate::terrain::{
        CycleMode, CycleReport, CycleState, EventSink, FnSink, MultiSink, RegionPreview,
        RegionSnapshot, Terrain, TerrainConfig, TerrainEvent, TerrainEventKind, VecSink,
    };
}
