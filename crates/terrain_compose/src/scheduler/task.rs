//! Compute tasks and their lifecycle.
use crate::backend::{BatchId, CommandBatch};
use crate::layer::LayerId;
use crate::pipeline::Phase;
use crate::region::RegionCoord;

/// Index of a task in its [`crate::scheduler::TaskGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// What a task does within its phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Mask pipeline of one layer.
    Mask,
    /// Fold of influence buffers into a staging region buffer.
    Composite,
    /// Feature claim rasterization, after the region's feature masks.
    Rasterize,
    /// Feature application to both staging region buffers.
    Apply,
    /// Global phase barrier; no backend work.
    Barrier,
}

impl TaskKind {
    /// Ordering of tasks of the same region within one phase.
    pub fn stage(self) -> u8 {
        match self {
            TaskKind::Rasterize => 1,
            _ => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Mask => "mask",
            TaskKind::Composite => "composite",
            TaskKind::Rasterize => "rasterize",
            TaskKind::Apply => "apply",
            TaskKind::Barrier => "barrier",
        }
    }
}

/// Execution state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Dispatched { batch: BatchId, tick: u64 },
    Complete { tick: u64 },
    Failed { tick: u64 },
    /// Never dispatched: a prerequisite failed or the cycle was superseded.
    Cancelled { tick: u64 },
}

impl TaskState {
    /// Finished one way or another.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TaskState::Complete { .. } | TaskState::Failed { .. } | TaskState::Cancelled { .. }
        )
    }

    pub fn is_complete(self) -> bool {
        matches!(self, TaskState::Complete { .. })
    }

    /// Tick at which the task settled.
    pub fn settled_tick(self) -> Option<u64> {
        match self {
            TaskState::Complete { tick }
            | TaskState::Failed { tick }
            | TaskState::Cancelled { tick } => Some(tick),
            _ => None,
        }
    }
}

/// Work item produced by the compositor, before it is wired into a graph.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub phase: Phase,
    pub region: RegionCoord,
    pub layer: Option<LayerId>,
    pub kind: TaskKind,
    pub batch: CommandBatch,
}

/// A node of the task graph.
#[derive(Clone, Debug)]
pub struct ComputeTask {
    pub id: TaskId,
    pub phase: Phase,
    /// `None` for phase barriers.
    pub region: Option<RegionCoord>,
    pub layer: Option<LayerId>,
    pub kind: TaskKind,
    pub label: String,
    /// Prerequisites that must complete before dispatch.
    pub wait: Vec<TaskId>,
    pub state: TaskState,
    pub dispatched_at: Option<u64>,
    pub(crate) batch: Option<CommandBatch>,
}

impl ComputeTask {
    pub fn is_barrier(&self) -> bool {
        self.kind == TaskKind::Barrier
    }
}

/// Timing of a task after its cycle finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskTrace {
    pub id: TaskId,
    pub phase: Phase,
    pub region: Option<RegionCoord>,
    pub layer: Option<LayerId>,
    pub kind: TaskKind,
    pub label: String,
    pub dispatched: Option<u64>,
    pub settled: Option<u64>,
    pub completed: bool,
}

impl From<&ComputeTask> for TaskTrace {
    fn from(task: &ComputeTask) -> Self {
        Self {
            id: task.id,
            phase: task.phase,
            region: task.region,
            layer: task.layer,
            kind: task.kind,
            label: task.label.clone(),
            dispatched: task.dispatched_at,
            settled: task.state.settled_tick(),
            completed: task.state.is_complete(),
        }
    }
}
