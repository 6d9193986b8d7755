//! Directed acyclic graph of compute tasks for one cycle.
//!
//! [`TaskGraph::build`] wires compositor task specs into the phase structure: one
//! barrier per phase waits on every task of that phase, every task waits on the previous
//! phase's barrier, and every task also waits on its own region's tasks from the latest
//! earlier phase so a failure cancels the rest of that region's chain.
use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, Result};
use crate::pipeline::Phase;
use crate::region::RegionCoord;
use crate::scheduler::task::{ComputeTask, TaskId, TaskKind, TaskSpec, TaskState};

#[derive(Clone, Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<ComputeTask>,
    order: Vec<TaskId>,
    barriers: BTreeMap<Phase, TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and validates the graph for a cycle.
    pub fn build(specs: Vec<TaskSpec>) -> Result<Self> {
        let mut graph = TaskGraph::new();
        let mut by_phase_region: BTreeMap<(Phase, RegionCoord), Vec<(TaskId, u8)>> =
            BTreeMap::new();
        let mut by_phase: BTreeMap<Phase, Vec<TaskId>> = BTreeMap::new();

        for spec in specs {
            let id = graph.push(ComputeTask {
                id: TaskId(0),
                phase: spec.phase,
                region: Some(spec.region),
                layer: spec.layer,
                kind: spec.kind,
                label: spec.batch.label.clone(),
                wait: Vec::new(),
                state: TaskState::Waiting,
                dispatched_at: None,
                batch: Some(spec.batch),
            });
            by_phase_region
                .entry((spec.phase, spec.region))
                .or_default()
                .push((id, spec.kind.stage()));
            by_phase.entry(spec.phase).or_default().push(id);
        }

        let mut previous_barrier = None;
        for phase in Phase::ALL {
            let members = by_phase.get(&phase).cloned().unwrap_or_default();
            if let Some(barrier) = previous_barrier {
                for &id in &members {
                    graph.add_dependency(id, barrier);
                }
            }
            let barrier = graph.push(ComputeTask {
                id: TaskId(0),
                phase,
                region: None,
                layer: None,
                kind: TaskKind::Barrier,
                label: format!("barrier:{phase}"),
                wait: members,
                state: TaskState::Waiting,
                dispatched_at: None,
                batch: None,
            });
            if let Some(previous) = previous_barrier {
                graph.add_dependency(barrier, previous);
            }
            graph.barriers.insert(phase, barrier);
            previous_barrier = Some(barrier);
        }

        // Region chains and in-phase stages.
        let mut latest: BTreeMap<RegionCoord, Vec<TaskId>> = BTreeMap::new();
        for phase in Phase::ALL {
            let regions: Vec<RegionCoord> = by_phase_region
                .keys()
                .filter(|(p, _)| *p == phase)
                .map(|&(_, r)| r)
                .collect();
            for region in regions {
                let tasks = by_phase_region[&(phase, region)].clone();
                let earlier = latest.get(&region).cloned().unwrap_or_default();
                for &(id, stage) in &tasks {
                    for &dep in &earlier {
                        graph.add_dependency(id, dep);
                    }
                    for &(other, other_stage) in &tasks {
                        if other_stage < stage {
                            graph.add_dependency(id, other);
                        }
                    }
                }
                latest.insert(region, tasks.into_iter().map(|(id, _)| id).collect());
            }
        }

        graph.validate()?;
        Ok(graph)
    }

    fn push(&mut self, mut task: ComputeTask) -> TaskId {
        let id = TaskId(self.tasks.len() as u32);
        task.id = id;
        self.tasks.push(task);
        id
    }

    /// Adds `on` to the wait-set of `task`.
    pub fn add_dependency(&mut self, task: TaskId, on: TaskId) {
        if let Some(t) = self.tasks.get_mut(task.0 as usize) {
            if !t.wait.contains(&on) {
                t.wait.push(on);
            }
        }
    }

    /// Checks that the graph is acyclic and that no edge points to a later phase, and
    /// stores a topological order.
    pub fn validate(&mut self) -> Result<()> {
        let n = self.tasks.len();
        let mut indeg = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for task in &self.tasks {
            for dep in &task.wait {
                let Some(prereq) = self.tasks.get(dep.0 as usize) else {
                    return Err(Error::SchedulingViolation(format!(
                        "{} waits on missing {}",
                        task.label, dep
                    )));
                };
                if prereq.phase > task.phase {
                    return Err(Error::SchedulingViolation(format!(
                        "{} in {} waits on {} in later phase {}",
                        task.label, task.phase, prereq.label, prereq.phase
                    )));
                }
                indeg[task.id.0 as usize] += 1;
                dependents[dep.0 as usize].push(task.id.0 as usize);
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(TaskId(i as u32));
            for &child in &dependents[i] {
                indeg[child] = indeg[child].saturating_sub(1);
                if indeg[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != n {
            return Err(Error::SchedulingViolation(
                "cycle detected in task graph".into(),
            ));
        }
        self.order = order;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&ComputeTask> {
        self.tasks.get(id.0 as usize)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut ComputeTask> {
        self.tasks.get_mut(id.0 as usize)
    }

    pub fn tasks(&self) -> &[ComputeTask] {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut [ComputeTask] {
        &mut self.tasks
    }

    /// Topological order computed by [`TaskGraph::validate`].
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn barrier(&self, phase: Phase) -> Option<TaskId> {
        self.barriers.get(&phase).copied()
    }

    /// Non-barrier tasks.
    pub fn work_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_barrier()).count()
    }

    /// Whether every task of `region` completed successfully.
    pub fn region_complete(&self, region: RegionCoord) -> bool {
        self.tasks
            .iter()
            .filter(|t| t.region == Some(region))
            .all(|t| t.state.is_complete())
    }

    /// Regions that have at least one task.
    pub fn regions(&self) -> Vec<RegionCoord> {
        let mut regions: Vec<_> = self.tasks.iter().filter_map(|t| t.region).collect();
        regions.sort();
        regions.dedup();
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommandBatch;
    use crate::layer::LayerId;

    fn spec(phase: Phase, region: RegionCoord, kind: TaskKind) -> TaskSpec {
        TaskSpec {
            phase,
            region,
            layer: Some(LayerId(1)),
            kind,
            batch: CommandBatch::new(format!("{phase}{region}")),
        }
    }

    #[test]
    fn every_task_waits_on_the_previous_barrier() {
        let specs = vec![
            spec(Phase::HeightMask, RegionCoord(0, 0), TaskKind::Mask),
            spec(Phase::HeightComposite, RegionCoord(0, 0), TaskKind::Composite),
            spec(Phase::HeightComposite, RegionCoord(1, 0), TaskKind::Composite),
        ];
        let graph = TaskGraph::build(specs).unwrap();
        let barrier = graph.barrier(Phase::HeightMask).unwrap();
        for task in graph.tasks().iter().filter(|t| t.phase == Phase::HeightComposite) {
            if !task.is_barrier() {
                assert!(task.wait.contains(&barrier));
            }
        }
        // Region chain: the (0, 0) composite also waits on its own mask task.
        assert!(graph.tasks()[1].wait.contains(&TaskId(0)));
        assert!(!graph.tasks()[2].wait.contains(&TaskId(0)));
        assert_eq!(graph.work_count(), 3);
        assert_eq!(graph.len(), 3 + Phase::ALL.len());
    }

    #[test]
    fn rasterize_waits_on_same_phase_masks() {
        let specs = vec![
            spec(Phase::FeatureMask, RegionCoord(0, 0), TaskKind::Mask),
            spec(Phase::FeatureMask, RegionCoord(0, 0), TaskKind::Rasterize),
        ];
        let graph = TaskGraph::build(specs).unwrap();
        assert!(graph.tasks()[1].wait.contains(&TaskId(0)));
        assert!(!graph.tasks()[0].wait.contains(&TaskId(1)));
    }

    #[test]
    fn topological_order_respects_every_edge() {
        let specs = vec![
            spec(Phase::TextureMask, RegionCoord(0, 0), TaskKind::Mask),
            spec(Phase::HeightMask, RegionCoord(0, 0), TaskKind::Mask),
        ];
        let graph = TaskGraph::build(specs).unwrap();
        let position = |id: TaskId| graph.order().iter().position(|&o| o == id).unwrap();
        for task in graph.tasks() {
            for &dep in &task.wait {
                assert!(position(dep) < position(task.id));
            }
        }
    }

    #[test]
    fn cycles_are_scheduling_violations() {
        let specs = vec![
            spec(Phase::HeightMask, RegionCoord(0, 0), TaskKind::Mask),
            spec(Phase::HeightMask, RegionCoord(1, 0), TaskKind::Mask),
        ];
        let mut graph = TaskGraph::build(specs).unwrap();
        graph.add_dependency(TaskId(0), TaskId(1));
        graph.add_dependency(TaskId(1), TaskId(0));
        let err = graph.validate().expect_err("cycle");
        assert!(matches!(err, Error::SchedulingViolation(_)));
    }

    #[test]
    fn edges_into_later_phases_are_rejected() {
        let specs = vec![
            spec(Phase::HeightMask, RegionCoord(0, 0), TaskKind::Mask),
            spec(Phase::TextureMask, RegionCoord(0, 0), TaskKind::Mask),
        ];
        let mut graph = TaskGraph::build(specs).unwrap();
        graph.add_dependency(TaskId(0), TaskId(1));
        assert!(matches!(
            graph.validate(),
            Err(Error::SchedulingViolation(_))
        ));
    }
}
