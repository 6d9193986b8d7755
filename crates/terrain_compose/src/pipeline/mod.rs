//! Compositing pipelines.
//!
//! The micro pipeline ([`LayerMaskPipeline`]) produces one layer's influence for one
//! region. The macro pipeline ([`RegionCompositor`]) arranges mask runs, composites and
//! feature application into six ordered [`Phase`]s across every region of a cycle.
pub mod compositor;
pub mod influence;
pub mod micro;
pub mod phase;

pub use compositor::{
    CompositeInputs, CyclePlan, RegionCompositor, Skip, SkipReason, Staging, MAX_FEATURE_SLOTS,
};
pub use influence::{InfluenceCache, InfluenceEntry};
pub use micro::{LayerMaskPipeline, MaskTarget, Quality};
pub use phase::Phase;
