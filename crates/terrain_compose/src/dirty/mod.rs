//! Dirty-state resolution: which `(layer, region)` pairs need recomputation.
//!
//! [`SpatialResolver`] maps bounds to regions, [`DirtyStateTracker`] accumulates marks
//! between cycles, and [`CausalGraph`] expands a taken [`DirtySet`] along the layer-kind
//! hierarchy before a cycle is built.
pub mod causal;
pub mod spatial;
pub mod tracker;

pub use causal::{CausalGraph, DependencyEdge, IndexedLayer, RegionIndex, TexturePropagation};
pub use spatial::{MoveDelta, SpatialResolver};
pub use tracker::{DirtySet, DirtyStateTracker, Vacated};
