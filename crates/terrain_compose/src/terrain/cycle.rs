//! Update-cycle bookkeeping.
use crate::dirty::DependencyEdge;
use crate::pipeline::Skip;
use crate::region::RegionCoord;
use crate::scheduler::TaskTrace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CycleId(pub u64);

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cycle#{}", self.0)
    }
}

/// How a cycle runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleMode {
    /// Built while the host is interacting: masks run at preview quality and the cycle is
    /// discarded when one of its layers is edited again before it drains.
    Interactive,
    /// Full quality, uncancellable, synchronized with the backend before commit.
    Full,
}

/// Lifecycle of the current cycle: `Idle → Building → Draining → Complete`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CycleState {
    #[default]
    Idle,
    Building,
    Draining,
    /// Results are committed; region buffers are safe to read.
    Complete,
}

/// Summary of a finished (or superseded) cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub id: CycleId,
    pub mode: CycleMode,
    /// Results were discarded because a newer edit arrived.
    pub superseded: bool,
    pub committed: Vec<RegionCoord>,
    /// Regions that became active with this cycle.
    pub activated: Vec<RegionCoord>,
    /// Regions torn down because no layer overlaps them any more.
    pub deactivated: Vec<RegionCoord>,
    /// Dirty items handed back to the tracker.
    pub retained: usize,
    pub skipped: Vec<Skip>,
    pub edges: Vec<DependencyEdge>,
    /// Ticks spent draining.
    pub ticks: u64,
    /// Compute tasks in the graph, barriers excluded.
    pub tasks: usize,
    pub trace: Vec<TaskTrace>,
}

impl CycleReport {
    pub(crate) fn new(id: CycleId, mode: CycleMode) -> Self {
        Self {
            id,
            mode,
            superseded: false,
            committed: Vec::new(),
            activated: Vec::new(),
            deactivated: Vec::new(),
            retained: 0,
            skipped: Vec::new(),
            edges: Vec::new(),
            ticks: 0,
            tasks: 0,
            trace: Vec::new(),
        }
    }

    /// Regions that had tasks in this cycle.
    pub fn scheduled_regions(&self) -> Vec<RegionCoord> {
        let mut regions: Vec<_> = self.trace.iter().filter_map(|t| t.region).collect();
        regions.sort();
        regions.dedup();
        regions
    }
}
