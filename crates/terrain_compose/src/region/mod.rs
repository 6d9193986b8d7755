//! Region subsystem: the fixed world tiling and the persistent per-region buffers.
//!
//! A region is a square cell of the world grid that owns two persistent buffers: a
//! single-channel height buffer and a packed material-control buffer.
pub mod grid;
pub mod material;
pub mod store;

pub use grid::{RegionCoord, RegionGrid, RegionRange, WorldBounds, NEIGHBOR_OFFSETS};
pub use material::MaterialControl;
pub use store::{CommitOutcome, Region, RegionState, RegionStore};
