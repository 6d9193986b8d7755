//! Cooperative, tick-driven execution of a cycle's task graph.
//!
//! Each [`TaskGraphScheduler::tick`] polls in-flight batches, settles barriers and
//! cancellations, then dispatches tasks whose prerequisites all completed on an earlier
//! tick. Work unblocked during a tick therefore starts on the next one, and no more than
//! the frame budget of batches is submitted per tick. Ticks never block on the backend.
pub mod graph;
pub mod task;

use tracing::{debug, error, warn};

pub use graph::TaskGraph;
pub use task::{ComputeTask, TaskId, TaskKind, TaskSpec, TaskState, TaskTrace};

use crate::backend::{BackendError, BatchId, BatchStatus, ComputeBackend};
use crate::error::{Error, Result};
use crate::pipeline::Phase;

/// What happened during one tick.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub dispatched: Vec<TaskId>,
    pub completed: Vec<TaskId>,
    pub failed: Vec<(TaskId, BackendError)>,
    pub cancelled: Vec<TaskId>,
    /// Phase barriers that resolved this tick, in phase order.
    pub barriers: Vec<Phase>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.dispatched.is_empty()
            && self.completed.is_empty()
            && self.failed.is_empty()
            && self.cancelled.is_empty()
            && self.barriers.is_empty()
    }
}

#[derive(Debug)]
pub struct TaskGraphScheduler {
    graph: TaskGraph,
    frame_budget: usize,
    tick: u64,
    in_flight: Vec<(TaskId, BatchId)>,
}

impl TaskGraphScheduler {
    /// Builds the graph for `specs` and prepares to drain it.
    pub fn build(specs: Vec<TaskSpec>, frame_budget: usize) -> Result<Self> {
        Ok(Self::new(TaskGraph::build(specs)?, frame_budget))
    }

    pub fn new(graph: TaskGraph, frame_budget: usize) -> Self {
        Self {
            graph,
            frame_budget: frame_budget.max(1),
            tick: 0,
            in_flight: Vec::new(),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn frame_budget(&self) -> usize {
        self.frame_budget
    }

    /// Ticks taken so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Every task, barriers included, has settled.
    pub fn is_settled(&self) -> bool {
        self.in_flight.is_empty() && self.graph.tasks().iter().all(|t| t.state.is_settled())
    }

    /// Advances execution by one tick.
    pub fn tick<B: ComputeBackend>(&mut self, backend: &mut B) -> Result<TickReport> {
        self.tick += 1;
        let now = self.tick;
        let mut report = TickReport {
            tick: now,
            ..Default::default()
        };

        self.poll(backend, now, &mut report);
        self.resolve(now, &mut report);
        self.dispatch(backend, now, &mut report)?;

        Ok(report)
    }

    fn poll<B: ComputeBackend>(&mut self, backend: &mut B, now: u64, report: &mut TickReport) {
        let mut pending = Vec::with_capacity(self.in_flight.len());
        for (id, batch) in std::mem::take(&mut self.in_flight) {
            let state = match backend.poll(batch) {
                BatchStatus::Pending => {
                    pending.push((id, batch));
                    continue;
                }
                BatchStatus::Complete => {
                    report.completed.push(id);
                    TaskState::Complete { tick: now }
                }
                BatchStatus::Failed(err) => {
                    warn!(task = %id, batch = %batch, error = %err, "task failed");
                    report.failed.push((id, err));
                    TaskState::Failed { tick: now }
                }
            };
            if let Some(task) = self.graph.get_mut(id) {
                task.state = state;
            }
        }
        self.in_flight = pending;
    }

    /// Settles barriers and cancels tasks behind failures, in topological order so chains
    /// resolve within one tick.
    fn resolve(&mut self, now: u64, report: &mut TickReport) {
        let order = self.graph.order().to_vec();
        for id in order {
            let Some(task) = self.graph.get(id) else {
                continue;
            };
            if task.state != TaskState::Waiting {
                continue;
            }
            let deps: Vec<TaskState> = task
                .wait
                .iter()
                .filter_map(|d| self.graph.get(*d).map(|t| t.state))
                .collect();
            let barrier = task.is_barrier();
            let phase = task.phase;

            let next = if barrier {
                deps.iter().all(|s| s.is_settled()).then(|| TaskState::Complete {
                    tick: deps.iter().filter_map(|s| s.settled_tick()).max().unwrap_or(0),
                })
            } else if deps
                .iter()
                .any(|s| matches!(s, TaskState::Failed { .. } | TaskState::Cancelled { .. }))
            {
                Some(TaskState::Cancelled { tick: now })
            } else {
                None
            };

            let Some(next) = next else {
                continue;
            };
            if let Some(task) = self.graph.get_mut(id) {
                task.state = next;
            }
            if barrier {
                debug!(phase = %phase, tick = now, "phase barrier passed");
                report.barriers.push(phase);
            } else {
                report.cancelled.push(id);
            }
        }
    }

    fn dispatch<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        now: u64,
        report: &mut TickReport,
    ) -> Result<()> {
        let order = self.graph.order().to_vec();
        for id in order {
            if report.dispatched.len() >= self.frame_budget {
                break;
            }
            let Some(task) = self.graph.get(id) else {
                continue;
            };
            if task.state != TaskState::Waiting || task.is_barrier() {
                continue;
            }
            let ready = task.wait.iter().all(|d| {
                self.graph
                    .get(*d)
                    .map(|t| matches!(t.state, TaskState::Complete { tick } if tick < now))
                    .unwrap_or(false)
            });
            if !ready {
                continue;
            }
            self.check_phase_order(id)?;

            let Some(task) = self.graph.get_mut(id) else {
                continue;
            };
            let Some(batch) = task.batch.take() else {
                continue;
            };
            let batch_id = backend.submit(batch);
            task.state = TaskState::Dispatched {
                batch: batch_id,
                tick: now,
            };
            task.dispatched_at = Some(now);
            self.in_flight.push((id, batch_id));
            report.dispatched.push(id);
        }
        Ok(())
    }

    /// A task may only start once every task of every earlier phase has settled.
    fn check_phase_order(&self, id: TaskId) -> Result<()> {
        let Some(task) = self.graph.get(id) else {
            return Ok(());
        };
        let offender = self
            .graph
            .tasks()
            .iter()
            .find(|t| t.phase < task.phase && !t.state.is_settled());
        if let Some(offender) = offender {
            let message = format!(
                "{} in {} ready while {} in {} has not settled",
                task.label, task.phase, offender.label, offender.phase
            );
            debug_assert!(false, "{message}");
            error!(task = %task.id, "{message}");
            return Err(Error::SchedulingViolation(message));
        }
        Ok(())
    }

    /// Cancels every task that has not been dispatched. In-flight batches keep running
    /// and are still polled until they settle.
    pub fn cancel(&mut self) -> usize {
        let now = self.tick;
        let mut cancelled = 0;
        for task in self.graph.tasks_mut() {
            if task.state == TaskState::Waiting {
                task.state = TaskState::Cancelled { tick: now };
                task.batch = None;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Per-task dispatch and settle ticks.
    pub fn trace(&self) -> Vec<TaskTrace> {
        self.graph.tasks().iter().map(TaskTrace::from).collect()
    }
}
